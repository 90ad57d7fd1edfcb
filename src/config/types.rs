//! Configuration types loaded from YAML
//!
//! ```yaml
//! feed:
//!   url: wss://socket.example.com/stocks
//!   api_key_env: FEED_API_KEY
//!   stale_after_secs: 30
//! reconnect:
//!   initial_delay_ms: 1000
//!   max_delay_ms: 30000
//! alerts:
//!   dedup_window_secs: 60
//!   history_capacity: 200
//! catalysts:
//!   refresh_secs: 60
//!   rules_file: data/catalysts.yaml
//! watchlist: [AAPL, MSFT]
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::constants;
use crate::core::dispatcher::DispatcherConfig;
use crate::core::monitor::MonitorConfig;
use crate::core::types::normalize_symbol;
use crate::error::AppError;
use crate::feed::manager::FeedManagerConfig;
use crate::feed::reconnect::ReconnectConfig;
use crate::feed::websocket::WsFeedConfig;

// ============================================================================
// Sections
// ============================================================================

/// Upstream market-data connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// WebSocket endpoint (ws:// or wss://)
    pub url: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Silence on a subscribed connection before it is reported degraded
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Timeout for the connect and auth handshakes
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Capacity of the status-change broadcast
    #[serde(default = "constants::feed_status_capacity")]
    pub status_capacity: usize,
}

fn default_api_key_env() -> String {
    constants::DEFAULT_API_KEY_ENV.to_string()
}

fn default_stale_after_secs() -> u64 {
    constants::feed_stale_after().as_secs()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

/// Alert dedup, history and listener policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertsConfig {
    #[serde(flatten)]
    pub dispatcher: DispatcherConfig,
    /// How often pending alerts are checked for delivery
    #[serde(default = "constants::alert_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            flush_interval_ms: constants::alert_flush_interval_ms(),
        }
    }
}

/// Where open catalysts come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalystsConfig {
    #[serde(default = "constants::catalyst_refresh_secs")]
    pub refresh_secs: u64,
    /// YAML file with the active catalysts; no rules are loaded when absent
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
}

impl Default for CatalystsConfig {
    fn default() -> Self {
        Self {
            refresh_secs: constants::catalyst_refresh_secs(),
            rules_file: None,
        }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub feed: FeedConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
    #[serde(default)]
    pub catalysts: CatalystsConfig,
    /// Symbols subscribed at startup
    #[serde(default)]
    pub watchlist: Vec<String>,
}

impl AppConfig {
    /// Validate all configuration rules
    pub fn validate(&self) -> Result<(), AppError> {
        let url = self.feed.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "feed.url must start with ws:// or wss:// (got '{}')",
                self.feed.url
            )));
        }
        if self.feed.api_key_env.trim().is_empty() {
            return Err(AppError::Config("feed.api_key_env cannot be empty".to_string()));
        }
        if self.feed.stale_after_secs == 0 {
            return Err(AppError::Config("feed.stale_after_secs must be > 0".to_string()));
        }
        if self.feed.connect_timeout_secs == 0 {
            return Err(AppError::Config("feed.connect_timeout_secs must be > 0".to_string()));
        }

        // Backoff
        if self.reconnect.initial_delay_ms == 0 {
            return Err(AppError::Config(
                "reconnect.initial_delay_ms must be > 0".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(AppError::Config(format!(
                "reconnect.max_delay_ms ({}) must be >= initial_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.initial_delay_ms
            )));
        }

        // Alerts
        if self.alerts.dispatcher.history_capacity == 0 {
            return Err(AppError::Config(
                "alerts.history_capacity must be > 0".to_string(),
            ));
        }
        if self.alerts.flush_interval_ms == 0 {
            return Err(AppError::Config(
                "alerts.flush_interval_ms must be > 0".to_string(),
            ));
        }

        if self.catalysts.refresh_secs == 0 {
            return Err(AppError::Config("catalysts.refresh_secs must be > 0".to_string()));
        }

        for symbol in &self.watchlist {
            if normalize_symbol(symbol).is_err() {
                return Err(AppError::Config(format!(
                    "watchlist contains an invalid symbol '{}'",
                    symbol
                )));
            }
        }

        Ok(())
    }

    /// Runtime settings for `PriceMonitor`
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            feed: FeedManagerConfig {
                stale_after: Duration::from_secs(self.feed.stale_after_secs),
                reconnect: self.reconnect.clone(),
                status_capacity: self.feed.status_capacity,
            },
            alerts: self.alerts.dispatcher.clone(),
            flush_interval: Duration::from_millis(self.alerts.flush_interval_ms),
            catalyst_refresh: Duration::from_secs(self.catalysts.refresh_secs),
        }
    }

    /// WebSocket transport settings; the API key is read from the environment.
    pub fn ws_feed_config(&self) -> WsFeedConfig {
        let mut ws = WsFeedConfig::new(self.feed.url.trim());
        ws.connect_timeout = Duration::from_secs(self.feed.connect_timeout_secs);
        match std::env::var(&self.feed.api_key_env) {
            Ok(key) if !key.trim().is_empty() => ws.with_api_key(key.trim()),
            _ => {
                tracing::warn!(
                    env = %self.feed.api_key_env,
                    "No feed API key in environment, connecting unauthenticated"
                );
                ws
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
