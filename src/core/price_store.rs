//! Price State Store
//!
//! Latest and previous accepted sample per symbol. Updates are monotonic in
//! timestamp: an older sample is a silent no-op. The `(current, previous)`
//! pair is replaced under one write lock, so readers never see a half-applied
//! update.
//!
//! # Architecture
//! - `PriceStore`: shared map behind a `parking_lot::RwLock`
//! - `UpdateOutcome`: whether a sample was accepted, with the new snapshot

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::core::types::{PriceSample, PriceState};

/// Result of `PriceStore::update`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Sample became `current`; carries the snapshot right after the write
    Accepted(PriceState),
    /// Sample was older than `current` and was discarded
    Stale,
}

impl UpdateOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, UpdateOutcome::Accepted(_))
    }
}

#[derive(Debug, Default)]
pub struct PriceStore {
    states: RwLock<HashMap<String, PriceState>>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `sample` iff its timestamp is >= the current one.
    pub fn update(&self, sample: PriceSample) -> UpdateOutcome {
        let mut states = self.states.write();

        match states.get_mut(&sample.symbol) {
            Some(state) => {
                if sample.timestamp < state.current.timestamp {
                    tracing::trace!(
                        symbol = %sample.symbol,
                        ts = %sample.timestamp,
                        current_ts = %state.current.timestamp,
                        "Discarding out-of-order sample"
                    );
                    return UpdateOutcome::Stale;
                }
                let old = std::mem::replace(&mut state.current, sample);
                state.previous = Some(old);
                UpdateOutcome::Accepted(state.clone())
            }
            None => {
                let state = PriceState {
                    current: sample,
                    previous: None,
                };
                states.insert(state.current.symbol.clone(), state.clone());
                UpdateOutcome::Accepted(state)
            }
        }
    }

    /// `{current, previous}` for a symbol, `None` if never observed
    pub fn get(&self, symbol: &str) -> Option<PriceState> {
        self.states.read().get(symbol).cloned()
    }

    pub fn current(&self, symbol: &str) -> Option<PriceSample> {
        self.states.read().get(symbol).map(|s| s.current.clone())
    }

    /// Symbols with at least one accepted sample, sorted
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.states.read().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.read().is_empty()
    }
}
