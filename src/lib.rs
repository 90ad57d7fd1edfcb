//! Catalyst price monitor
//!
//! Streams live prices from an upstream market-data WebSocket, tracks the
//! latest and previous price per symbol, and raises deduplicated alerts when
//! a price moves far enough from the level recorded at a news catalyst.
//!
//! - `feed`: upstream connection, reconnect backoff, wire decoding
//! - `core`: price store, subscription registry, alert evaluation and dispatch
//! - `config`: YAML configuration, defaults and logging setup

pub mod config;
pub mod core;
pub mod error;
pub mod feed;

pub use crate::core::{AlertEvent, AlertRule, FeedStatus, MonitorConfig, PriceMonitor};
pub use error::{AppError, MonitorError};
