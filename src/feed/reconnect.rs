//! Exponential reconnect backoff with jitter
//!
//! Delays double from `initial_delay_ms` up to `max_delay_ms` (1s, 2s, 4s ...
//! 30s by default) with random jitter (0..jitter_ms) so that many monitors
//! restarting together do not reconnect in lockstep. There is no attempt
//! limit: the feed manager retries for the lifetime of the process and calls
//! `reset()` after every successful connect.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::constants;

/// Configuration for reconnection attempts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Initial delay in milliseconds (doubles each attempt)
    #[serde(default = "constants::reconnect_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Maximum delay cap in milliseconds
    #[serde(default = "constants::reconnect_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Exclusive upper bound of the random jitter, 0 disables
    #[serde(default = "constants::reconnect_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: constants::reconnect_initial_delay_ms(),
            max_delay_ms: constants::reconnect_max_delay_ms(),
            jitter_ms: constants::reconnect_jitter_ms(),
        }
    }
}

/// Stateful delay generator for one connection.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of delays handed out since the last reset
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Base delay for the current attempt, before jitter.
    pub fn base_delay(&self) -> Duration {
        // Shift capped so the multiplication cannot overflow on long outages
        let factor = 1u64 << self.attempt.min(20);
        let ms = self
            .config
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(ms)
    }

    /// Delay to wait before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = if self.config.jitter_ms > 0 {
            rand::random::<u64>() % self.config.jitter_ms
        } else {
            0
        };
        let delay = self.base_delay() + Duration::from_millis(jitter);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
