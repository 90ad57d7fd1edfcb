//! Monitor event log
//!
//! Structured event records for the alert pipeline and feed health, so the
//! timeline of a session can be rebuilt from the logs alone. Every event has
//! a SCREAMING_CASE `event_type` field.
//!
//! # Example
//!
//! ```ignore
//! use crate::core::events::{log_event, MonitorEvent};
//!
//! log_event(&MonitorEvent::alert_delivered(&event, 2));
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::core::types::{AlertEvent, StatusChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorEventType {
    // Alert pipeline
    AlertTriggered, // Evaluator produced an event
    AlertMerged,    // Event replaced a pending one in the dedup window
    AlertDelivered, // Slot delivered to listeners

    // Listeners
    ListenerFailed,
    ListenerRemoved,

    // Feed
    FeedStatusChanged,

    // Lifecycle
    MonitorStarted,
    MonitorStopped,
}

impl fmt::Display for MonitorEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorEventType::AlertTriggered => write!(f, "ALERT_TRIGGERED"),
            MonitorEventType::AlertMerged => write!(f, "ALERT_MERGED"),
            MonitorEventType::AlertDelivered => write!(f, "ALERT_DELIVERED"),
            MonitorEventType::ListenerFailed => write!(f, "LISTENER_FAILED"),
            MonitorEventType::ListenerRemoved => write!(f, "LISTENER_REMOVED"),
            MonitorEventType::FeedStatusChanged => write!(f, "FEED_STATUS_CHANGED"),
            MonitorEventType::MonitorStarted => write!(f, "MONITOR_STARTED"),
            MonitorEventType::MonitorStopped => write!(f, "MONITOR_STOPPED"),
        }
    }
}

/// One structured log record
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub event_type: MonitorEventType,
    pub timestamp: DateTime<Utc>,
    pub ticker: Option<String>,
    pub catalyst_id: Option<String>,
    pub price: Option<Decimal>,
    pub movement: Option<Decimal>,
    pub listener: Option<u64>,
    pub count: Option<usize>,
    pub detail: Option<String>,
}

impl MonitorEvent {
    pub fn new(event_type: MonitorEventType) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            ticker: None,
            catalyst_id: None,
            price: None,
            movement: None,
            listener: None,
            count: None,
            detail: None,
        }
    }

    fn for_alert(event_type: MonitorEventType, alert: &AlertEvent) -> Self {
        Self {
            ticker: Some(alert.ticker.clone()),
            catalyst_id: Some(alert.catalyst_id.clone()),
            price: Some(alert.current_price),
            movement: Some(alert.move_since_price),
            ..Self::new(event_type)
        }
    }

    pub fn alert_triggered(alert: &AlertEvent) -> Self {
        Self::for_alert(MonitorEventType::AlertTriggered, alert)
    }

    /// `merged` is how many events the slot has absorbed so far
    pub fn alert_merged(alert: &AlertEvent, merged: usize) -> Self {
        Self {
            count: Some(merged),
            ..Self::for_alert(MonitorEventType::AlertMerged, alert)
        }
    }

    /// `listeners` is how many listeners were called
    pub fn alert_delivered(alert: &AlertEvent, listeners: usize) -> Self {
        Self {
            count: Some(listeners),
            ..Self::for_alert(MonitorEventType::AlertDelivered, alert)
        }
    }

    pub fn listener_failed(listener: u64, failures: u32, error: &str) -> Self {
        Self {
            listener: Some(listener),
            count: Some(failures as usize),
            detail: Some(error.to_string()),
            ..Self::new(MonitorEventType::ListenerFailed)
        }
    }

    pub fn listener_removed(listener: u64, failures: u32) -> Self {
        Self {
            listener: Some(listener),
            count: Some(failures as usize),
            ..Self::new(MonitorEventType::ListenerRemoved)
        }
    }

    pub fn feed_status_changed(change: &StatusChange) -> Self {
        Self {
            timestamp: change.at,
            detail: Some(format!("{} -> {} ({})", change.from, change.to, change.reason)),
            ..Self::new(MonitorEventType::FeedStatusChanged)
        }
    }

    pub fn monitor_started(symbols: usize) -> Self {
        Self {
            count: Some(symbols),
            ..Self::new(MonitorEventType::MonitorStarted)
        }
    }

    pub fn monitor_stopped() -> Self {
        Self::new(MonitorEventType::MonitorStopped)
    }
}

/// Log an event with structured tracing fields.
///
/// Listener problems go to WARN, merges to DEBUG, everything else to INFO.
pub fn log_event(event: &MonitorEvent) {
    let event_type = event.event_type.to_string();
    let timestamp = event.timestamp.timestamp_millis();
    let price = event.price.map(|p| p.to_string());
    let movement = event.movement.map(|m| m.to_string());

    match event.event_type {
        MonitorEventType::ListenerFailed | MonitorEventType::ListenerRemoved => {
            warn!(
                event_type = %event_type,
                timestamp = timestamp,
                listener = ?event.listener,
                failures = ?event.count,
                error = ?event.detail,
                ""
            );
        }
        MonitorEventType::AlertMerged => {
            debug!(
                event_type = %event_type,
                timestamp = timestamp,
                ticker = ?event.ticker,
                catalyst_id = ?event.catalyst_id,
                price = ?price,
                merged = ?event.count,
                ""
            );
        }
        _ => {
            info!(
                event_type = %event_type,
                timestamp = timestamp,
                ticker = ?event.ticker,
                catalyst_id = ?event.catalyst_id,
                price = ?price,
                movement = ?movement,
                count = ?event.count,
                detail = ?event.detail,
                ""
            );
        }
    }
}
