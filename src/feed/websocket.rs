//! WebSocket feed transport
//!
//! Speaks the JSON protocol in `feed::wire` over a TLS-capable WebSocket
//! (TLSv1.2 minimum). The transport is owned by the feed manager's receive
//! loop, so the stream is held directly without a lock.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::feed::errors::{FeedError, FeedResult};
use crate::feed::traits::{FeedMessage, FeedTransport};
use crate::feed::wire::{self, DecodedFrame};

/// Type alias for the WebSocket stream with optional TLS
pub type TlsWebSocketStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Default timeout for connect and authentication handshakes
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connect to a WebSocket endpoint (wss:// uses TLSv1.2 minimum)
pub async fn connect_tls(url: &str) -> FeedResult<TlsWebSocketStream> {
    let tls = native_tls::TlsConnector::builder()
        .min_protocol_version(Some(native_tls::Protocol::Tlsv12))
        .build()
        .map_err(|e| FeedError::ConnectionFailed(format!("TLS error: {}", e)))?;

    let (ws_stream, _response) =
        connect_async_tls_with_config(url, None, false, Some(Connector::NativeTls(tls)))
            .await
            .map_err(|e| FeedError::WebSocket(Box::new(e)))?;

    Ok(ws_stream)
}

/// Connection settings for `WsFeedTransport`
#[derive(Debug, Clone)]
pub struct WsFeedConfig {
    pub url: String,
    /// Sent as an auth frame right after connecting when present
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
}

impl WsFeedConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

/// `FeedTransport` over a JSON WebSocket stream
pub struct WsFeedTransport {
    config: WsFeedConfig,
    stream: Option<TlsWebSocketStream>,
}

impl WsFeedTransport {
    pub fn new(config: WsFeedConfig) -> Self {
        Self {
            config,
            stream: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn send_text(&mut self, text: String) -> FeedResult<()> {
        let stream = self.stream.as_mut().ok_or(FeedError::NotConnected)?;
        stream.send(Message::Text(text)).await?;
        Ok(())
    }

    /// Send the auth frame and wait for the upstream verdict.
    async fn authenticate(&mut self, api_key: &str) -> FeedResult<()> {
        self.send_text(wire::encode_auth(api_key)).await?;

        let timeout = self.config.connect_timeout;
        let verdict = tokio::time::timeout(timeout, async {
            loop {
                match self.next_message_raw().await? {
                    Some(frame) => {
                        if frame.statuses.iter().any(|s| s.is_auth_success()) {
                            return Ok(());
                        }
                        if let Some(s) = frame.statuses.iter().find(|s| s.is_auth_failure()) {
                            return Err(FeedError::AuthFailed(s.message.clone()));
                        }
                    }
                    None => {
                        return Err(FeedError::ConnectionFailed(
                            "closed during authentication".into(),
                        ))
                    }
                }
            }
        })
        .await
        .map_err(|_| FeedError::NetworkTimeout(timeout.as_millis() as u64))?;

        verdict
    }

    /// Read one frame; `Ok(None)` when the upstream closed.
    async fn next_message_raw(&mut self) -> FeedResult<Option<DecodedFrame>> {
        let stream = self.stream.as_mut().ok_or(FeedError::NotConnected)?;

        match stream.next().await {
            None | Some(Ok(Message::Close(_))) => {
                self.stream = None;
                Ok(None)
            }
            Some(Ok(Message::Text(text))) => wire::decode_frame(&text).map(Some),
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8(data)
                    .map_err(|e| FeedError::Malformed(format!("binary frame is not UTF-8: {}", e)))?;
                wire::decode_frame(&text).map(Some)
            }
            // Pings are answered by tungstenite on the next write/flush
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                Ok(Some(DecodedFrame::default()))
            }
            Some(Err(e)) => {
                self.stream = None;
                Err(FeedError::WebSocket(Box::new(e)))
            }
        }
    }
}

#[async_trait]
impl FeedTransport for WsFeedTransport {
    async fn connect(&mut self) -> FeedResult<()> {
        // Drop any half-dead previous session before dialing again
        self.stream = None;

        tracing::info!(url = %self.config.url, "Connecting to market-data feed");
        let timeout = self.config.connect_timeout;
        let stream = tokio::time::timeout(timeout, connect_tls(&self.config.url))
            .await
            .map_err(|_| FeedError::NetworkTimeout(timeout.as_millis() as u64))??;
        self.stream = Some(stream);

        if let Some(api_key) = self.config.api_key.clone() {
            if let Err(e) = self.authenticate(&api_key).await {
                self.stream = None;
                return Err(e);
            }
            tracing::info!("Feed authentication accepted");
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> FeedResult<()> {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                tracing::debug!(error = %e, "Error while closing feed socket");
            }
        }
        Ok(())
    }

    async fn subscribe(&mut self, symbols: &[String]) -> FeedResult<()> {
        if symbols.is_empty() {
            return Ok(());
        }
        self.send_text(wire::encode_subscribe(symbols)).await
    }

    async fn unsubscribe(&mut self, symbols: &[String]) -> FeedResult<()> {
        if symbols.is_empty() {
            return Ok(());
        }
        self.send_text(wire::encode_unsubscribe(symbols)).await
    }

    async fn next_message(&mut self) -> FeedResult<FeedMessage> {
        let frame = match self.next_message_raw().await? {
            Some(frame) => frame,
            None => return Ok(FeedMessage::Closed),
        };

        for status in &frame.statuses {
            if status.is_auth_failure() {
                return Err(FeedError::AuthFailed(status.message.clone()));
            }
            if status.is_error() {
                tracing::warn!(message = %status.message, "Feed reported an error status");
            } else {
                tracing::debug!(status = %status.status, message = %status.message, "Feed status");
            }
        }

        if frame.ticks.is_empty() {
            Ok(FeedMessage::Heartbeat)
        } else {
            Ok(FeedMessage::Ticks(frame.ticks))
        }
    }

    fn feed_name(&self) -> &'static str {
        "ws"
    }
}
