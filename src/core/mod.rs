//! Core module - price state, subscriptions, alert evaluation and dispatch
//!
//! This module uses **explicit re-exports** instead of glob exports
//! (`pub use module::*`) so the public API only changes on purpose.
//!
//! ## Usage
//! Prefer importing from `crate::core`:
//! ```ignore
//! use crate::core::{PriceMonitor, MonitorConfig, AlertRule};
//! ```

pub mod catalysts;
pub mod dispatcher;
pub mod evaluator;
pub mod events;
pub mod monitor;
pub mod price_store;
pub mod subscriptions;
pub mod types;

// Service
pub use monitor::{MonitorConfig, PriceMonitor};

// Data model
pub use types::{
    normalize_symbol, normalize_symbols, AlertEvent, AlertKey, AlertRule, FeedStatus, PriceSample,
    PriceState, StatusChange, MAX_SYMBOL_LEN,
};

// Components
pub use dispatcher::{
    AlertDispatcher, AlertListener, DispatcherConfig, ListenerError, ListenerHandle,
    ListenerResult,
};
pub use evaluator::{AlertEvaluator, SyncSummary};
pub use price_store::{PriceStore, UpdateOutcome};
pub use subscriptions::{SubscriptionRegistry, UpstreamControl};

// Catalyst sources
pub use catalysts::{parse_catalysts, CatalystSource, StaticCatalystSource, YamlCatalystSource};

// Structured events
pub use events::{log_event, MonitorEvent, MonitorEventType};
