//! WebSocket Transport
//!
//! `Transport` implementation over `tokio-tungstenite` with rustls. Text and
//! UTF-8 binary frames are surfaced as frames; pings and pongs as heartbeats.
//! Pong replies are written by tungstenite itself.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, future};
use tokio_tungstenite::tungstenite::Message;

use crate::application::ports::{Transport, TransportError, TransportEvent, TransportLink};

/// Upstream WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    /// Create a transport for a `ws://` or `wss://` URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Get the endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        tracing::info!(url = %self.url, "Connecting to upstream stream");

        let (ws_stream, _response) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        let (write, read) = ws_stream.split();

        let sink = write
            .sink_map_err(TransportError::from)
            .with(|frame: String| future::ok::<_, TransportError>(Message::Text(frame.into())));
        let stream = read.filter_map(|message| future::ready(map_message(message)));

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

fn map_message(
    message: Result<Message, tokio_tungstenite::tungstenite::Error>,
) -> Option<Result<TransportEvent, TransportError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(TransportEvent::Frame(text.as_str().to_owned()))),
        Ok(Message::Binary(data)) => Some(Ok(TransportEvent::Frame(
            String::from_utf8_lossy(&data).into_owned(),
        ))),
        Ok(Message::Ping(_) | Message::Pong(_)) => Some(Ok(TransportEvent::Heartbeat)),
        Ok(Message::Close(frame)) => {
            let reason = frame.map_or_else(
                || "close frame".to_string(),
                |f| format!("{} {}", f.code, f.reason),
            );
            tracing::info!(reason = %reason, "Server sent close frame");
            Some(Err(TransportError::Closed(reason)))
        }
        Ok(Message::Frame(_)) => None,
        Err(e) => Some(Err(e.into())),
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

    use super::*;

    #[test]
    fn text_becomes_frame() {
        let event = map_message(Ok(Message::Text("{}".into()))).unwrap().unwrap();
        assert_eq!(event, TransportEvent::Frame("{}".to_string()));
    }

    #[test]
    fn binary_utf8_becomes_frame() {
        let event = map_message(Ok(Message::Binary(b"{\"a\":1}".to_vec().into())))
            .unwrap()
            .unwrap();
        assert_eq!(event, TransportEvent::Frame("{\"a\":1}".to_string()));
    }

    #[test]
    fn ping_is_heartbeat() {
        let event = map_message(Ok(Message::Ping(Vec::new().into()))).unwrap().unwrap();
        assert_eq!(event, TransportEvent::Heartbeat);
    }

    #[test]
    fn close_is_error() {
        let close = CloseFrame {
            code: CloseCode::Away,
            reason: "maintenance".into(),
        };
        let result = map_message(Ok(Message::Close(Some(close)))).unwrap();
        assert!(matches!(result, Err(TransportError::Closed(reason)) if reason.contains("maintenance")));
    }

    #[test]
    fn url_accessor() {
        let transport = WebSocketTransport::new("wss://fstream.binance.com/stream");
        assert_eq!(transport.url(), "wss://fstream.binance.com/stream");
    }
}
