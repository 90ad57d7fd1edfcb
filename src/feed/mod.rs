//! Upstream market-data feed
//!
//! - `traits`: `FeedTransport` / `TickSink` seams
//! - `websocket` + `wire`: the JSON WebSocket transport
//! - `manager`: the receive loop with reconnect/backoff
//! - `state_machine`: pure connection-status transitions

pub mod errors;
pub mod manager;
pub mod reconnect;
pub mod state_machine;
pub mod traits;
pub mod websocket;
pub mod wire;

#[cfg(test)]
pub(crate) mod test_utils;

pub use errors::{FeedError, FeedResult};
pub use manager::{FeedCommand, FeedHandle, FeedManager, FeedManagerConfig};
pub use reconnect::{Backoff, ReconnectConfig};
pub use state_machine::{FeedEvent, FeedStateMachine};
pub use traits::{FeedMessage, FeedTransport, TickSink};
pub use websocket::{WsFeedConfig, WsFeedTransport};
