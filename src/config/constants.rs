//! Application-wide constants and configuration defaults
//!
//! These values back the `#[serde(default)]` fields of the YAML config, so
//! a missing key falls back to the environment and then to the built-in value.

use std::time::Duration;

// =============================================================================
// Feed Connection
// =============================================================================

/// Environment variable holding the market-data API key (default name)
pub const DEFAULT_API_KEY_ENV: &str = "FEED_API_KEY";

/// Seconds without inbound data before a live connection is reported degraded
/// (default: 30 seconds)
///
/// Environment variable: `FEED_STALE_AFTER_SECS`
pub fn feed_stale_after() -> Duration {
    let secs = std::env::var("FEED_STALE_AFTER_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30);
    Duration::from_secs(secs)
}

/// Capacity of the status-change broadcast channel (default: 64)
///
/// Environment variable: `FEED_STATUS_CAPACITY`
pub fn feed_status_capacity() -> usize {
    std::env::var("FEED_STATUS_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(64)
}

// =============================================================================
// Reconnect Backoff
// =============================================================================

/// First reconnect delay in milliseconds (default: 1000ms)
///
/// Environment variable: `RECONNECT_INITIAL_DELAY_MS`
pub fn reconnect_initial_delay_ms() -> u64 {
    std::env::var("RECONNECT_INITIAL_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000)
}

/// Reconnect delay cap in milliseconds (default: 30000ms)
///
/// Environment variable: `RECONNECT_MAX_DELAY_MS`
pub fn reconnect_max_delay_ms() -> u64 {
    std::env::var("RECONNECT_MAX_DELAY_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(30_000)
}

/// Upper bound of the random jitter added to each delay (default: 200ms)
///
/// Environment variable: `RECONNECT_JITTER_MS`
pub fn reconnect_jitter_ms() -> u64 {
    std::env::var("RECONNECT_JITTER_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(200)
}

// =============================================================================
// Alerts
// =============================================================================

/// Dedup window for alerts sharing (ticker, catalyst) (default: 60 seconds)
///
/// Environment variable: `ALERT_DEDUP_WINDOW_SECS`
pub fn alert_dedup_window_secs() -> u64 {
    std::env::var("ALERT_DEDUP_WINDOW_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60)
}

/// Delivered alerts kept for late subscribers (default: 200)
///
/// Environment variable: `ALERT_HISTORY_CAPACITY`
pub fn alert_history_capacity() -> usize {
    std::env::var("ALERT_HISTORY_CAPACITY")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(200)
}

/// Consecutive failures before a listener is dropped, 0 disables (default: 5)
///
/// Environment variable: `ALERT_MAX_LISTENER_FAILURES`
pub fn alert_max_listener_failures() -> u32 {
    std::env::var("ALERT_MAX_LISTENER_FAILURES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5)
}

/// How often pending alert slots are checked for delivery (default: 250ms)
///
/// Environment variable: `ALERT_FLUSH_INTERVAL_MS`
pub fn alert_flush_interval_ms() -> u64 {
    std::env::var("ALERT_FLUSH_INTERVAL_MS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(250)
}

// =============================================================================
// Catalyst Rules
// =============================================================================

/// Catalyst rule refresh interval (default: 60 seconds)
///
/// Environment variable: `CATALYST_REFRESH_SECS`
pub fn catalyst_refresh_secs() -> u64 {
    std::env::var("CATALYST_REFRESH_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Print all environment-derived defaults (for startup logs)
pub fn log_configuration() {
    tracing::info!("=== Monitor Defaults ===");
    tracing::info!("Feed:");
    tracing::info!("  - Stale after: {:?}", feed_stale_after());
    tracing::info!("  - Status channel capacity: {}", feed_status_capacity());
    tracing::info!("Reconnect:");
    tracing::info!("  - Initial delay: {}ms", reconnect_initial_delay_ms());
    tracing::info!("  - Max delay: {}ms", reconnect_max_delay_ms());
    tracing::info!("  - Jitter: 0-{}ms", reconnect_jitter_ms());
    tracing::info!("Alerts:");
    tracing::info!("  - Dedup window: {}s", alert_dedup_window_secs());
    tracing::info!("  - History capacity: {}", alert_history_capacity());
    tracing::info!("  - Max listener failures: {}", alert_max_listener_failures());
    tracing::info!("Catalysts:");
    tracing::info!("  - Refresh interval: {}s", catalyst_refresh_secs());
    tracing::info!("========================");
}
