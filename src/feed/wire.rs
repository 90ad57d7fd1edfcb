//! JSON wire codec for the WebSocket feed
//!
//! Outbound control frames:
//!   {"action":"auth","params":"<key>"}
//!   {"action":"subscribe","params":"T.AAPL,T.MSFT"}
//!   {"action":"unsubscribe","params":"T.AAPL"}
//!
//! Inbound frames are JSON arrays of events:
//!   [{"ev":"T","sym":"AAPL","p":150.5,"t":1700000000000}]
//!   [{"ev":"status","status":"auth_success","message":"authenticated"}]
//!
//! A frame that is not a JSON array fails as a whole; a bad element inside a
//! valid array is skipped and counted.

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::core::types::{normalize_symbol, PriceSample};
use crate::feed::errors::{FeedError, FeedResult};

/// Channel prefix for trade events
pub const TRADE_CHANNEL: &str = "T";

#[derive(Debug, Deserialize)]
#[serde(tag = "ev")]
enum WireEvent {
    #[serde(rename = "T")]
    Trade { sym: String, p: f64, t: i64 },
    #[serde(rename = "status")]
    Status {
        status: String,
        #[serde(default)]
        message: String,
    },
    #[serde(other)]
    Unknown,
}

/// Status/control event sent by the upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusFrame {
    pub status: String,
    pub message: String,
}

impl StatusFrame {
    pub fn is_auth_success(&self) -> bool {
        self.status == "auth_success"
    }

    pub fn is_auth_failure(&self) -> bool {
        self.status == "auth_failed"
    }

    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Result of decoding one inbound frame
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub ticks: Vec<PriceSample>,
    pub statuses: Vec<StatusFrame>,
    /// Elements that were present but could not be decoded
    pub rejected: usize,
}

pub fn encode_auth(api_key: &str) -> String {
    serde_json::json!({ "action": "auth", "params": api_key }).to_string()
}

pub fn encode_subscribe(symbols: &[String]) -> String {
    encode_action("subscribe", symbols)
}

pub fn encode_unsubscribe(symbols: &[String]) -> String {
    encode_action("unsubscribe", symbols)
}

fn encode_action(action: &str, symbols: &[String]) -> String {
    let params = symbols
        .iter()
        .map(|s| format!("{}.{}", TRADE_CHANNEL, s))
        .collect::<Vec<_>>()
        .join(",");
    serde_json::json!({ "action": action, "params": params }).to_string()
}

/// Decode an inbound text frame.
pub fn decode_frame(text: &str) -> FeedResult<DecodedFrame> {
    let elements: Vec<serde_json::Value> = serde_json::from_str(text)
        .map_err(|e| FeedError::Malformed(format!("frame is not a JSON array: {}", e)))?;

    let mut frame = DecodedFrame::default();
    for element in elements {
        match serde_json::from_value::<WireEvent>(element) {
            Ok(WireEvent::Trade { sym, p, t }) => match trade_to_sample(&sym, p, t) {
                Ok(sample) => frame.ticks.push(sample),
                Err(e) => {
                    tracing::warn!(symbol = %sym, error = %e, "Dropping malformed trade");
                    frame.rejected += 1;
                }
            },
            Ok(WireEvent::Status { status, message }) => {
                frame.statuses.push(StatusFrame { status, message });
            }
            Ok(WireEvent::Unknown) => {}
            Err(e) => {
                tracing::warn!(error = %e, "Dropping undecodable feed event");
                frame.rejected += 1;
            }
        }
    }
    Ok(frame)
}

fn trade_to_sample(sym: &str, price: f64, ts_ms: i64) -> FeedResult<PriceSample> {
    let symbol = normalize_symbol(sym)
        .map_err(|_| FeedError::Malformed(format!("invalid symbol '{}'", sym)))?;
    if !price.is_finite() || price <= 0.0 {
        return Err(FeedError::Malformed(format!("invalid price {}", price)));
    }
    let price = Decimal::try_from(price)
        .map_err(|e| FeedError::Malformed(format!("price out of range: {}", e)))?
        .normalize();
    let timestamp = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .ok_or_else(|| FeedError::Malformed(format!("invalid timestamp {}", ts_ms)))?;
    Ok(PriceSample::new(symbol, price, timestamp))
}
