//! Application-wide error types using thiserror
//!
//! Feed-level failures are recovered inside the connection manager and only
//! surface here when a caller asks for something the monitor cannot do
//! (bad config, bad symbol, bad rule).

use thiserror::Error;

use crate::feed::errors::FeedError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned synchronously to callers of the monitor API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    #[error("Symbol list is empty")]
    EmptySymbolList,

    #[error("Invalid symbol '{0}'")]
    InvalidSymbol(String),

    #[error("Invalid rule for catalyst '{catalyst_id}': {reason}")]
    InvalidRule { catalyst_id: String, reason: String },

    #[error("Monitor is not running")]
    NotStarted,

    #[error("Monitor already started")]
    AlreadyStarted,

    #[error("Catalyst source failed: {0}")]
    CatalystSource(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for the caller-facing monitor API
pub type MonitorResult<T> = std::result::Result<T, MonitorError>;
