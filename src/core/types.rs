//! Core data types shared by the store, evaluator and dispatcher.
//!
//! Prices are `rust_decimal::Decimal` so that tolerance comparisons are exact
//! (150.00 + 2.00 must compare equal to 152.00).

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MonitorError, MonitorResult};

/// Longest ticker accepted by the API (e.g. "BRK.B", "RDS-A")
pub const MAX_SYMBOL_LEN: usize = 12;

// =============================================================================
// Symbols
// =============================================================================

/// Trim and uppercase a ticker, rejecting anything outside `A-Z0-9.-`.
pub fn normalize_symbol(raw: &str) -> MonitorResult<String> {
    let symbol = raw.trim().to_ascii_uppercase();
    let valid = !symbol.is_empty()
        && symbol.len() <= MAX_SYMBOL_LEN
        && symbol
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '.' || c == '-');
    if !valid {
        return Err(MonitorError::InvalidSymbol(raw.to_string()));
    }
    Ok(symbol)
}

/// Validate a whole request before anything is mutated.
///
/// Duplicates collapse to one entry; first-seen order is kept.
pub fn normalize_symbols<S: AsRef<str>>(raw: &[S]) -> MonitorResult<Vec<String>> {
    if raw.is_empty() {
        return Err(MonitorError::EmptySymbolList);
    }
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        let symbol = normalize_symbol(s.as_ref())?;
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    Ok(out)
}

// =============================================================================
// Prices
// =============================================================================

/// A single observed price for one symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSample {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PriceSample {
    pub fn new(symbol: impl Into<String>, price: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            timestamp,
        }
    }
}

/// Snapshot of the latest two accepted samples for a symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceState {
    pub current: PriceSample,
    pub previous: Option<PriceSample>,
}

// =============================================================================
// Feed Status
// =============================================================================

/// Health of the upstream market-data connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

impl fmt::Display for FeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedStatus::Disconnected => write!(f, "disconnected"),
            FeedStatus::Connecting => write!(f, "connecting"),
            FeedStatus::Connected => write!(f, "connected"),
            FeedStatus::Degraded => write!(f, "degraded"),
        }
    }
}

/// Emitted on every feed status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub from: FeedStatus,
    pub to: FeedStatus,
    pub reason: String,
    pub at: DateTime<Utc>,
}

// =============================================================================
// Alert Rules & Events
// =============================================================================

/// Identity of a rule, also the dedup key of the alerts it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AlertKey {
    pub ticker: String,
    pub catalyst_id: String,
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ticker, self.catalyst_id)
    }
}

/// Threshold rule derived from an open catalyst.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRule {
    pub ticker: String,
    pub catalyst_id: String,
    #[serde(default)]
    pub catalyst_title: String,
    /// Reference price recorded when the catalyst occurred
    pub price_at_catalyst: Decimal,
    /// Absolute deviation from the reference that counts as notable
    pub tolerance_points: Decimal,
    /// Smallest absolute move that may produce an alert
    pub minimum_move: Decimal,
}

impl AlertRule {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            ticker: self.ticker.clone(),
            catalyst_id: self.catalyst_id.clone(),
        }
    }

    /// Validate and return the rule with its ticker normalized.
    pub fn validated(mut self) -> MonitorResult<Self> {
        let invalid = |reason: &str| MonitorError::InvalidRule {
            catalyst_id: self.catalyst_id.clone(),
            reason: reason.to_string(),
        };

        if self.catalyst_id.trim().is_empty() {
            return Err(invalid("catalyst_id cannot be empty"));
        }
        if self.price_at_catalyst <= Decimal::ZERO {
            return Err(invalid("price_at_catalyst must be > 0"));
        }
        if self.tolerance_points < Decimal::ZERO {
            return Err(invalid("tolerance_points must be >= 0"));
        }
        if self.minimum_move < Decimal::ZERO {
            return Err(invalid("minimum_move must be >= 0"));
        }
        self.ticker = normalize_symbol(&self.ticker).map_err(|_| invalid("invalid ticker"))?;
        Ok(self)
    }
}

/// Alert produced when a rule's threshold is crossed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub alert_id: Uuid,
    pub ticker: String,
    pub catalyst_id: String,
    pub catalyst_title: String,
    /// Last accepted price before the crossing tick (reference price if none)
    pub price_before: Decimal,
    /// Price of the crossing tick
    pub price_after: Decimal,
    pub current_price: Decimal,
    /// `current_price - price_at_catalyst`
    pub move_since_price: Decimal,
    pub tolerance_points: Decimal,
    pub minimum_move: Decimal,
    pub triggered_at: DateTime<Utc>,
}

impl AlertEvent {
    pub fn key(&self) -> AlertKey {
        AlertKey {
            ticker: self.ticker.clone(),
            catalyst_id: self.catalyst_id.clone(),
        }
    }
}
