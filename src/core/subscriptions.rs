//! Subscription Registry
//!
//! Reference-counts interest per symbol so the upstream feed carries each
//! symbol exactly once. Upstream subscribe/unsubscribe is issued only on the
//! 0→1 and 1→0 edges, while the registry lock is held, so the sequence of
//! upstream calls always matches the sequence of refcount edges.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Seam between the registry and whatever owns the upstream connection.
///
/// Calls are made with the registry lock held: implementations must not
/// block and must not call back into the registry.
pub trait UpstreamControl: Send + Sync {
    fn subscribe(&self, symbols: &[String]);
    fn unsubscribe(&self, symbols: &[String]);
}

pub struct SubscriptionRegistry {
    counts: Mutex<HashMap<String, usize>>,
    upstream: Arc<dyn UpstreamControl>,
}

impl SubscriptionRegistry {
    pub fn new(upstream: Arc<dyn UpstreamControl>) -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
            upstream,
        }
    }

    /// Increment interest; returns true when this subscribed upstream.
    pub fn add_interest(&self, symbol: &str) -> bool {
        !self.add_interests(&[symbol.to_string()]).is_empty()
    }

    /// Decrement interest; returns true when this unsubscribed upstream.
    ///
    /// At refcount 0 this is a no-op.
    pub fn remove_interest(&self, symbol: &str) -> bool {
        !self.remove_interests(&[symbol.to_string()]).is_empty()
    }

    /// Batch form of `add_interest`; one upstream call for all 0→1 edges.
    pub fn add_interests(&self, symbols: &[String]) -> Vec<String> {
        let mut counts = self.counts.lock();
        let mut opened = Vec::new();

        for symbol in symbols {
            let count = counts.entry(symbol.clone()).or_insert(0);
            *count += 1;
            if *count == 1 {
                opened.push(symbol.clone());
            }
        }

        if !opened.is_empty() {
            tracing::debug!(symbols = ?opened, "Subscribing upstream");
            self.upstream.subscribe(&opened);
        }
        opened
    }

    /// Batch form of `remove_interest`; one upstream call for all 1→0 edges.
    pub fn remove_interests(&self, symbols: &[String]) -> Vec<String> {
        let mut counts = self.counts.lock();
        let mut closed = Vec::new();

        for symbol in symbols {
            match counts.get_mut(symbol) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    counts.remove(symbol);
                    closed.push(symbol.clone());
                }
                None => {
                    tracing::debug!(symbol = %symbol, "remove_interest with no interest, ignoring");
                }
            }
        }

        if !closed.is_empty() {
            tracing::debug!(symbols = ?closed, "Unsubscribing upstream");
            self.upstream.unsubscribe(&closed);
        }
        closed
    }

    pub fn ref_count(&self, symbol: &str) -> usize {
        self.counts.lock().get(symbol).copied().unwrap_or(0)
    }

    /// Symbols with refcount > 0, sorted
    pub fn active_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.counts.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Records upstream calls and fails the test on a duplicate edge.
    #[derive(Default)]
    pub(crate) struct RecordingUpstream {
        pub subscribed: Mutex<HashSet<String>>,
        pub calls: Mutex<Vec<(bool, Vec<String>)>>,
    }

    impl UpstreamControl for RecordingUpstream {
        fn subscribe(&self, symbols: &[String]) {
            let mut subscribed = self.subscribed.lock();
            for s in symbols {
                assert!(subscribed.insert(s.clone()), "duplicate subscribe for {}", s);
            }
            self.calls.lock().push((true, symbols.to_vec()));
        }

        fn unsubscribe(&self, symbols: &[String]) {
            let mut subscribed = self.subscribed.lock();
            for s in symbols {
                assert!(subscribed.remove(s), "unsubscribe without subscribe for {}", s);
            }
            self.calls.lock().push((false, symbols.to_vec()));
        }
    }

    fn registry() -> (SubscriptionRegistry, Arc<RecordingUpstream>) {
        let upstream = Arc::new(RecordingUpstream::default());
        (SubscriptionRegistry::new(upstream.clone()), upstream)
    }

    #[test]
    fn test_subscribes_only_on_first_interest() {
        let (reg, upstream) = registry();
        assert!(reg.add_interest("AAPL"));
        assert!(!reg.add_interest("AAPL"));
        assert_eq!(reg.ref_count("AAPL"), 2);
        assert_eq!(upstream.calls.lock().len(), 1);
    }

    #[test]
    fn test_unsubscribes_only_on_last_interest() {
        let (reg, upstream) = registry();
        reg.add_interest("AAPL");
        reg.add_interest("AAPL");

        assert!(!reg.remove_interest("AAPL"));
        assert!(upstream.subscribed.lock().contains("AAPL"));
        assert!(reg.remove_interest("AAPL"));
        assert!(upstream.subscribed.lock().is_empty());
        assert_eq!(reg.ref_count("AAPL"), 0);
    }

    #[test]
    fn test_remove_at_zero_is_noop() {
        let (reg, upstream) = registry();
        assert!(!reg.remove_interest("AAPL"));
        reg.add_interest("AAPL");
        reg.remove_interest("AAPL");
        assert!(!reg.remove_interest("AAPL"));
        assert_eq!(upstream.calls.lock().len(), 2);
    }

    #[test]
    fn test_batch_issues_single_upstream_call() {
        let (reg, upstream) = registry();
        reg.add_interest("MSFT");
        let opened = reg.add_interests(&["AAPL".into(), "MSFT".into(), "TSLA".into()]);
        assert_eq!(opened, vec!["AAPL".to_string(), "TSLA".to_string()]);

        let calls = upstream.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], (true, vec!["AAPL".to_string(), "TSLA".to_string()]));
        drop(calls);

        assert_eq!(
            reg.active_symbols(),
            vec!["AAPL".to_string(), "MSFT".to_string(), "TSLA".to_string()]
        );
    }

    #[test]
    fn test_concurrent_interest_balances_out() {
        let (reg, upstream) = registry();
        let reg = Arc::new(reg);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        reg.add_interest("AAPL");
                        reg.remove_interest("AAPL");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.ref_count("AAPL"), 0);
        assert!(upstream.subscribed.lock().is_empty());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        const SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "TSLA"];

        proptest! {
            #[test]
            fn upstream_tracks_nonzero_refcount(
                ops in proptest::collection::vec((0usize..3, any::<bool>()), 0..128)
            ) {
                let (reg, upstream) = registry();

                for (idx, add) in ops {
                    let symbol = SYMBOLS[idx];
                    if add {
                        reg.add_interest(symbol);
                    } else {
                        reg.remove_interest(symbol);
                    }

                    for s in SYMBOLS {
                        let subscribed = upstream.subscribed.lock().contains(s);
                        prop_assert_eq!(subscribed, reg.ref_count(s) > 0, "symbol {}", s);
                    }
                }
            }
        }
    }
}
