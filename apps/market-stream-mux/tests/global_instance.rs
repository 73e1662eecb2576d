//! Process-wide Instance Tests
//!
//! One test per binary: the instance can only be installed once.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use tokio_util::sync::CancellationToken;

use common::{ChannelTransport, control, mux_over};
use market_stream_mux::{MuxSettings, SubscriptionError, global};

#[tokio::test]
async fn global_instance_lifecycle() {
    assert!(global::instance().is_none());
    let err = global::subscribe_to_trades("BTCUSDT", |_| {}).unwrap_err();
    assert!(matches!(err, SubscriptionError::NotInitialized));

    let transport = ChannelTransport::new();
    let mut upstream = transport.script();
    global::install(mux_over(&transport)).unwrap();

    let handle = global::subscribe_to_depth("BTCUSDT", |_| {}).unwrap();
    assert_eq!(
        upstream.next_sent().await,
        control("subscribe", "depth", "BTCUSDT")
    );

    let settings = MuxSettings::from_lookup(|_| None).unwrap();
    let err = global::init(&settings, CancellationToken::new()).unwrap_err();
    assert!(matches!(err, SubscriptionError::AlreadyInitialized));
    assert!(global::install(mux_over(&ChannelTransport::new())).is_err());

    handle.unsubscribe();
    assert_eq!(
        upstream.next_sent().await,
        control("unsubscribe", "depth", "BTCUSDT")
    );
    assert!(global::instance().unwrap().active_topics().is_empty());
}
