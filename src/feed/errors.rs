//! Feed transport error types
//!
//! Every variant here is recovered inside the feed manager (reconnect or
//! drop-and-log); none of them reach API callers directly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeedError {
    /// Connection to the upstream feed failed or was lost
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Upstream refused a subscribe/unsubscribe request
    #[error("Subscription failed for {symbols}: {reason}")]
    SubscriptionFailed { symbols: String, reason: String },

    /// Authentication was rejected by the upstream feed
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// Network operation timed out
    #[error("Network timeout after {0}ms")]
    NetworkTimeout(u64),

    /// Inbound message could not be decoded; logged and dropped
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Operation requires a live connection
    #[error("Not connected")]
    NotConnected,

    /// WebSocket protocol error (boxed to reduce enum size)
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl FeedError {
    /// Whether the error means the current session is unusable.
    ///
    /// Malformed payloads and refused subscriptions leave the socket open.
    pub fn is_fatal_to_session(&self) -> bool {
        !matches!(
            self,
            FeedError::Malformed(_) | FeedError::SubscriptionFailed { .. }
        )
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for FeedError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        FeedError::WebSocket(Box::new(e))
    }
}

/// Result type alias for feed operations
pub type FeedResult<T> = std::result::Result<T, FeedError>;
