//! Market Stream Mux Binary
//!
//! Subscribes to trades and depth for the configured symbols, logs what
//! arrives, and serves health and metrics endpoints until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-stream-mux
//! ```
//!
//! # Environment Variables
//!
//! - `STREAM_MUX_URL`: Upstream WebSocket URL (default: ws://localhost:8899/ws)
//! - `STREAM_MUX_CODEC`: envelope | binance | relay (default: envelope)
//! - `STREAM_MUX_SYMBOLS`: Comma separated symbols to subscribe at startup
//! - `STREAM_MUX_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `STREAM_MUX_RECONNECT_DELAY_INITIAL_MS`: First backoff delay (default: 1000)
//! - `STREAM_MUX_RECONNECT_DELAY_MAX_SECS`: Backoff cap (default: 30)
//! - `STREAM_MUX_RECONNECT_DELAY_MULTIPLIER`: Backoff growth (default: 2.0)
//! - `STREAM_MUX_RECONNECT_JITTER`: full | none | fraction (default: full)
//! - `STREAM_MUX_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `STREAM_MUX_OUTBOUND_CAPACITY`: Control frame queue size (default: 1024)
//! - `STREAM_MUX_IDLE_TIMEOUT_SECS`: 0 disables (default: 60)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-stream-mux)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_stream_mux::infrastructure::telemetry;
use market_stream_mux::{
    ConnectionState, HealthServer, HealthServerState, MuxSettings, StreamMux, SubscriptionHandle,
    global, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("rustls crypto provider already installed"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init().context("failed to initialize telemetry")?;

    tracing::info!("Starting Market Stream Mux");

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let settings = MuxSettings::from_env()?;
    log_config(&settings);

    let shutdown_token = CancellationToken::new();

    let mux = global::init(&settings, shutdown_token.clone())?.clone();

    tokio::spawn(log_state_changes(mux.clone()));

    let handles = subscribe_symbols(&settings.symbols)?;

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        mux.clone(),
    ));
    let health_server = HealthServer::new(
        settings.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!(topics = mux.active_topics().len(), "Stream mux ready");

    await_shutdown().await;

    for handle in &handles {
        handle.unsubscribe();
    }
    drain_control_frames(&mux).await;
    shutdown_token.cancel();

    let mut state = mux.watch_state();
    if tokio::time::timeout(
        SHUTDOWN_TIMEOUT,
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .is_err()
    {
        tracing::warn!("Upstream connection did not close before timeout");
    }

    tracing::info!("Stream mux stopped");
    Ok(())
}

/// Subscribe trade and depth loggers for each configured symbol.
fn subscribe_symbols(symbols: &[String]) -> anyhow::Result<Vec<SubscriptionHandle>> {
    if symbols.is_empty() {
        tracing::warn!("No symbols configured (STREAM_MUX_SYMBOLS); staying idle");
    }

    let mut handles = Vec::with_capacity(symbols.len() * 2);
    for symbol in symbols {
        handles.push(global::subscribe_to_trades(symbol, |trade| {
            tracing::info!(
                symbol = %trade.symbol,
                price = %trade.price,
                quantity = %trade.quantity,
                side = ?trade.side,
                "Trade"
            );
        })?);

        handles.push(global::subscribe_to_depth(symbol, |depth| {
            tracing::info!(
                symbol = %depth.symbol,
                best_bid = ?depth.best_bid().map(|l| l.price),
                best_ask = ?depth.best_ask().map(|l| l.price),
                levels = depth.bids.len() + depth.asks.len(),
                "Depth"
            );
        })?);
    }
    Ok(handles)
}

/// Log upstream connection state transitions.
async fn log_state_changes(mux: StreamMux) {
    let mut state = mux.watch_state();
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        tracing::info!(state = %current, "Upstream connection state");
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(settings: &MuxSettings) {
    tracing::info!(
        url = %settings.url,
        codec = settings.codec.as_str(),
        symbols = ?settings.symbols,
        health_port = settings.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnect_initial_ms = u64::try_from(settings.connection.reconnect_delay_initial.as_millis())
            .unwrap_or(u64::MAX),
        reconnect_max_secs = settings.connection.reconnect_delay_max.as_secs(),
        jitter = ?settings.connection.reconnect_jitter,
        outbound_capacity = settings.connection.outbound_capacity,
        idle_timeout = ?settings.connection.idle_timeout,
        "Connection settings"
    );
}

/// Give queued unsubscribes a chance to reach upstream before cancelling.
async fn drain_control_frames(mux: &StreamMux) {
    if mux.connection_state() != ConnectionState::Connected {
        return;
    }

    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while mux.queued_control_frames() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    })
    .await;

    if drained.is_err() {
        tracing::warn!(
            queued = mux.queued_control_frames(),
            "Control frames still queued at shutdown"
        );
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
