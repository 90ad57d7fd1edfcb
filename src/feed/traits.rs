//! Market-data feed transport trait
//!
//! The feed manager only needs a stream of `(symbol, price, timestamp)` ticks
//! after a subscribe call. Anything that can provide that (a vendor
//! WebSocket, a replay file, a scripted test double) implements
//! `FeedTransport`.

use async_trait::async_trait;

use crate::core::types::PriceSample;
use crate::feed::errors::FeedResult;

/// One decoded unit of upstream traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// Price ticks, in the order the upstream sent them
    Ticks(Vec<PriceSample>),
    /// Control or status traffic; proves the connection is alive
    Heartbeat,
    /// Upstream closed the connection
    Closed,
}

/// Common interface for upstream market-data connections
///
/// Implementations hold at most one live connection. The manager calls
/// `connect` again after any session-fatal error, so `connect` must discard
/// stale connection state first.
#[async_trait]
pub trait FeedTransport: Send {
    /// Open the upstream connection (and authenticate if required)
    async fn connect(&mut self) -> FeedResult<()>;

    /// Close the upstream connection; must succeed when already closed
    async fn disconnect(&mut self) -> FeedResult<()>;

    /// Add symbols to the live connection's symbol set
    async fn subscribe(&mut self, symbols: &[String]) -> FeedResult<()>;

    /// Remove symbols from the live connection's symbol set
    async fn unsubscribe(&mut self, symbols: &[String]) -> FeedResult<()>;

    /// Wait for the next inbound message.
    ///
    /// Must be cancel safe: the manager polls it inside `tokio::select!`.
    /// `Err(FeedError::Malformed)` is dropped by the caller; any other error
    /// ends the session.
    async fn next_message(&mut self) -> FeedResult<FeedMessage>;

    /// Short identifier used in logs (e.g. "ws")
    fn feed_name(&self) -> &'static str;
}

/// Receiver of every decoded tick, called from the feed's receive loop.
///
/// Must not block: the loop does not read the socket while this runs.
pub trait TickSink: Send + Sync {
    fn on_tick(&self, sample: PriceSample);
}
