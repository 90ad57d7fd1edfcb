//! Alert Evaluator
//!
//! Holds the active alert rules per ticker and checks them against every
//! accepted price update.
//!
//! Firing policy: a rule fires once per crossing. It fires when
//! `|move| >= minimum_move`, `|move| >= tolerance_points`, `|move| > 0` and
//! the rule is armed. Firing disarms it. It re-arms when the price retreats
//! inside tolerance (or back to the reference) or when the move changes sign.
//!
//! Every registered rule holds one interest in the `SubscriptionRegistry`,
//! so a ticker with open catalysts stays subscribed upstream.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::core::subscriptions::SubscriptionRegistry;
use crate::core::types::{AlertEvent, AlertKey, AlertRule, PriceState};
use crate::error::MonitorResult;

#[derive(Debug, Clone)]
struct RuleState {
    rule: AlertRule,
    armed: bool,
    /// Direction of the move at the last firing (true = below reference)
    signaled_below: Option<bool>,
}

impl RuleState {
    fn new(rule: AlertRule) -> Self {
        Self {
            rule,
            armed: true,
            signaled_below: None,
        }
    }

    /// Advance the arm state for one price; returns the signed move if the
    /// rule fires.
    fn check(&mut self, price: Decimal) -> Option<Decimal> {
        let rule = &self.rule;
        let movement = price - rule.price_at_catalyst;
        let abs = movement.abs();
        let below = movement.is_sign_negative();

        if !self.armed {
            let retreated = abs < rule.tolerance_points || abs.is_zero();
            let flipped = !abs.is_zero() && self.signaled_below.is_some_and(|b| b != below);
            if retreated || flipped {
                self.armed = true;
            }
        }

        let crossed = !abs.is_zero() && abs >= rule.minimum_move && abs >= rule.tolerance_points;
        if self.armed && crossed {
            self.armed = false;
            self.signaled_below = Some(below);
            return Some(movement);
        }
        None
    }
}

/// Counts reported by `AlertEvaluator::sync_rules`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

pub struct AlertEvaluator {
    /// ticker -> catalyst_id -> rule state
    rules: Mutex<HashMap<String, BTreeMap<String, RuleState>>>,
    registry: Arc<SubscriptionRegistry>,
}

impl AlertEvaluator {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            rules: Mutex::new(HashMap::new()),
            registry,
        }
    }

    /// Replace the whole rule set.
    ///
    /// All rules are validated before anything changes. Rules whose
    /// parameters are unchanged keep their arm state; changed rules start
    /// armed. Duplicate keys in `rules`: the last one wins.
    pub fn sync_rules(&self, rules: Vec<AlertRule>) -> MonitorResult<SyncSummary> {
        let mut incoming: BTreeMap<AlertKey, AlertRule> = BTreeMap::new();
        for rule in rules {
            let rule = rule.validated()?;
            incoming.insert(rule.key(), rule);
        }

        let mut table = self.rules.lock();
        let mut summary = SyncSummary::default();
        let mut released = Vec::new();
        let mut acquired = Vec::new();

        // Drop rules that are no longer active
        for (ticker, by_catalyst) in table.iter_mut() {
            by_catalyst.retain(|catalyst_id, _| {
                let key = AlertKey {
                    ticker: ticker.clone(),
                    catalyst_id: catalyst_id.clone(),
                };
                let keep = incoming.contains_key(&key);
                if !keep {
                    released.push(ticker.clone());
                }
                keep
            });
        }
        table.retain(|_, by_catalyst| !by_catalyst.is_empty());

        for (key, rule) in incoming {
            let by_catalyst = table.entry(key.ticker.clone()).or_default();
            match by_catalyst.get_mut(&key.catalyst_id) {
                Some(existing) if existing.rule == rule => summary.unchanged += 1,
                Some(existing) => {
                    *existing = RuleState::new(rule);
                    summary.updated += 1;
                }
                None => {
                    by_catalyst.insert(key.catalyst_id, RuleState::new(rule));
                    acquired.push(key.ticker);
                    summary.added += 1;
                }
            }
        }
        summary.removed = released.len();

        // Acquire before release so a ticker moving between catalysts is
        // never dropped upstream
        self.registry.add_interests(&acquired);
        self.registry.remove_interests(&released);

        tracing::info!(
            added = summary.added,
            updated = summary.updated,
            removed = summary.removed,
            unchanged = summary.unchanged,
            "Alert rules synced"
        );
        Ok(summary)
    }

    /// Insert or replace one rule; returns true if it was new.
    pub fn upsert_rule(&self, rule: AlertRule) -> MonitorResult<bool> {
        let rule = rule.validated()?;
        let key = rule.key();
        let mut table = self.rules.lock();
        let by_catalyst = table.entry(key.ticker.clone()).or_default();

        match by_catalyst.get_mut(&key.catalyst_id) {
            Some(existing) => {
                if existing.rule != rule {
                    *existing = RuleState::new(rule);
                }
                Ok(false)
            }
            None => {
                by_catalyst.insert(key.catalyst_id.clone(), RuleState::new(rule));
                self.registry.add_interest(&key.ticker);
                tracing::debug!(rule = %key, "Alert rule added");
                Ok(true)
            }
        }
    }

    /// Remove one rule; returns true if it existed.
    pub fn remove_rule(&self, key: &AlertKey) -> bool {
        let mut table = self.rules.lock();
        let Some(by_catalyst) = table.get_mut(&key.ticker) else {
            return false;
        };
        let removed = by_catalyst.remove(&key.catalyst_id).is_some();
        if by_catalyst.is_empty() {
            table.remove(&key.ticker);
        }
        if removed {
            self.registry.remove_interest(&key.ticker);
            tracing::debug!(rule = %key, "Alert rule removed");
        }
        removed
    }

    /// Remove every rule for a closed or deleted catalyst.
    pub fn remove_catalyst(&self, catalyst_id: &str) -> usize {
        let mut table = self.rules.lock();
        let mut released = Vec::new();

        for (ticker, by_catalyst) in table.iter_mut() {
            if by_catalyst.remove(catalyst_id).is_some() {
                released.push(ticker.clone());
            }
        }
        table.retain(|_, by_catalyst| !by_catalyst.is_empty());
        self.registry.remove_interests(&released);

        if !released.is_empty() {
            tracing::info!(catalyst_id = %catalyst_id, rules = released.len(), "Catalyst rules removed");
        }
        released.len()
    }

    /// Check all rules for the updated symbol. Events are ordered by
    /// catalyst id.
    pub fn evaluate(&self, state: &PriceState, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let current = &state.current;
        let mut table = self.rules.lock();
        let Some(by_catalyst) = table.get_mut(&current.symbol) else {
            return Vec::new();
        };

        let mut events = Vec::new();
        for rule_state in by_catalyst.values_mut() {
            let Some(movement) = rule_state.check(current.price) else {
                continue;
            };
            let rule = &rule_state.rule;
            let price_before = state
                .previous
                .as_ref()
                .map(|p| p.price)
                .unwrap_or(rule.price_at_catalyst);

            tracing::debug!(
                ticker = %rule.ticker,
                catalyst_id = %rule.catalyst_id,
                price = %current.price,
                movement = %movement,
                "Alert rule crossed"
            );
            events.push(AlertEvent {
                alert_id: Uuid::new_v4(),
                ticker: rule.ticker.clone(),
                catalyst_id: rule.catalyst_id.clone(),
                catalyst_title: rule.catalyst_title.clone(),
                price_before,
                price_after: current.price,
                current_price: current.price,
                move_since_price: movement,
                tolerance_points: rule.tolerance_points,
                minimum_move: rule.minimum_move,
                triggered_at: now,
            });
        }
        events
    }

    pub fn has_rules_for(&self, ticker: &str) -> bool {
        self.rules.lock().contains_key(ticker)
    }

    /// Snapshot of all rules, ordered by ticker then catalyst id
    pub fn rules(&self) -> Vec<AlertRule> {
        let table = self.rules.lock();
        let mut rules: Vec<AlertRule> = table
            .values()
            .flat_map(|by_catalyst| by_catalyst.values().map(|s| s.rule.clone()))
            .collect();
        rules.sort_by_key(|r| r.key());
        rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.lock().values().map(|b| b.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::subscriptions::tests::RecordingUpstream;
    use crate::core::types::PriceSample;
    use crate::error::MonitorError;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn rule(ticker: &str, catalyst_id: &str, reference: &str, tolerance: &str, minimum: &str) -> AlertRule {
        AlertRule {
            ticker: ticker.into(),
            catalyst_id: catalyst_id.into(),
            catalyst_title: format!("{} catalyst", catalyst_id),
            price_at_catalyst: dec(reference),
            tolerance_points: dec(tolerance),
            minimum_move: dec(minimum),
        }
    }

    fn setup() -> (AlertEvaluator, Arc<SubscriptionRegistry>) {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(RecordingUpstream::default())));
        (AlertEvaluator::new(registry.clone()), registry)
    }

    /// Feeds prices through a running (current, previous) pair.
    struct Ticker {
        symbol: String,
        last: Option<PriceSample>,
    }

    impl Ticker {
        fn new(symbol: &str) -> Self {
            Self {
                symbol: symbol.into(),
                last: None,
            }
        }

        fn tick(&mut self, evaluator: &AlertEvaluator, price: &str) -> Vec<AlertEvent> {
            let sample = PriceSample::new(self.symbol.clone(), dec(price), Utc::now());
            let state = PriceState {
                current: sample.clone(),
                previous: self.last.replace(sample),
            };
            evaluator.evaluate(&state, Utc::now())
        }
    }

    #[test]
    fn test_first_crossing_fires() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150.00", "2.0", "1.0")).unwrap();
        let mut aapl = Ticker::new("AAPL");

        assert!(aapl.tick(&ev, "150.50").is_empty());
        let events = aapl.tick(&ev, "152.00");
        assert_eq!(events.len(), 1);

        let e = &events[0];
        assert_eq!(e.ticker, "AAPL");
        assert_eq!(e.catalyst_id, "c1");
        assert_eq!(e.move_since_price, dec("2.00"));
        assert_eq!(e.price_before, dec("150.50"));
        assert_eq!(e.price_after, dec("152.00"));
        assert_eq!(e.current_price, dec("152.00"));
        assert_eq!(e.tolerance_points, dec("2.0"));
    }

    #[test]
    fn test_price_before_defaults_to_reference() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150", "2", "1")).unwrap();
        let events = Ticker::new("AAPL").tick(&ev, "155");
        assert_eq!(events[0].price_before, dec("150"));
    }

    #[test]
    fn test_does_not_refire_while_beyond_threshold() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150", "2", "1")).unwrap();
        let mut aapl = Ticker::new("AAPL");

        assert_eq!(aapl.tick(&ev, "152").len(), 1);
        assert!(aapl.tick(&ev, "153").is_empty());
        assert!(aapl.tick(&ev, "152.5").is_empty());
    }

    #[test]
    fn test_rearms_after_retreat_inside_tolerance() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150", "2", "1")).unwrap();
        let mut aapl = Ticker::new("AAPL");

        assert_eq!(aapl.tick(&ev, "152").len(), 1);
        assert!(aapl.tick(&ev, "151").is_empty());
        assert_eq!(aapl.tick(&ev, "152.5").len(), 1);
    }

    #[test]
    fn test_rearms_on_sign_change() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150", "2", "1")).unwrap();
        let mut aapl = Ticker::new("AAPL");

        assert_eq!(aapl.tick(&ev, "153").len(), 1);
        let events = aapl.tick(&ev, "147");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].move_since_price, dec("-3"));
    }

    #[test]
    fn test_direction_tracked_across_repeated_flips() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150", "2", "1")).unwrap();
        let mut aapl = Ticker::new("AAPL");

        assert_eq!(aapl.tick(&ev, "146").len(), 1);
        assert!(aapl.tick(&ev, "145").is_empty());
        assert_eq!(aapl.tick(&ev, "154").len(), 1);
        assert!(aapl.tick(&ev, "155").is_empty());
        let events = aapl.tick(&ev, "147.5");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].move_since_price, dec("-2.5"));
    }

    #[test]
    fn test_minimum_move_gates_tolerance() {
        let (ev, _) = setup();
        // Tolerance is crossed at 150.5 but the minimum move is 1.0
        ev.upsert_rule(rule("AAPL", "c1", "150", "0.5", "1.0")).unwrap();
        let mut aapl = Ticker::new("AAPL");

        assert!(aapl.tick(&ev, "150.5").is_empty());
        assert_eq!(aapl.tick(&ev, "151").len(), 1);
    }

    #[test]
    fn test_zero_minimum_fires_on_first_nonzero_deviation() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150", "0", "0")).unwrap();
        let mut aapl = Ticker::new("AAPL");

        assert!(aapl.tick(&ev, "150").is_empty());
        assert_eq!(aapl.tick(&ev, "150.01").len(), 1);
        assert!(aapl.tick(&ev, "150.02").is_empty());
        // Back to the reference re-arms
        assert!(aapl.tick(&ev, "150").is_empty());
        assert_eq!(aapl.tick(&ev, "149.99").len(), 1);
    }

    #[test]
    fn test_multiple_rules_fire_independently() {
        let (ev, _) = setup();
        ev.upsert_rule(rule("AAPL", "c2", "140", "5", "1")).unwrap();
        ev.upsert_rule(rule("AAPL", "c1", "150", "2", "1")).unwrap();
        ev.upsert_rule(rule("MSFT", "c3", "300", "1", "1")).unwrap();

        let events = Ticker::new("AAPL").tick(&ev, "152");
        let ids: Vec<&str> = events.iter().map(|e| e.catalyst_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_rules_hold_registry_interest() {
        let (ev, registry) = setup();
        ev.upsert_rule(rule("AAPL", "c1", "150", "2", "1")).unwrap();
        ev.upsert_rule(rule("AAPL", "c2", "150", "2", "1")).unwrap();
        // Replacing an existing rule does not take a second interest
        ev.upsert_rule(rule("AAPL", "c2", "151", "2", "1")).unwrap();
        assert_eq!(registry.ref_count("AAPL"), 2);

        assert_eq!(ev.remove_catalyst("c1"), 1);
        assert_eq!(registry.ref_count("AAPL"), 1);
        assert!(ev.remove_rule(&AlertKey {
            ticker: "AAPL".into(),
            catalyst_id: "c2".into()
        }));
        assert_eq!(registry.ref_count("AAPL"), 0);
        assert!(!ev.has_rules_for("AAPL"));
    }

    #[test]
    fn test_sync_diffs_and_keeps_arm_state() {
        let (ev, registry) = setup();
        ev.sync_rules(vec![
            rule("AAPL", "c1", "150", "2", "1"),
            rule("MSFT", "c2", "300", "2", "1"),
        ])
        .unwrap();
        let mut aapl = Ticker::new("AAPL");
        assert_eq!(aapl.tick(&ev, "152").len(), 1);

        let summary = ev
            .sync_rules(vec![
                rule("AAPL", "c1", "150", "2", "1"),
                rule("TSLA", "c3", "200", "2", "1"),
            ])
            .unwrap();
        assert_eq!(
            summary,
            SyncSummary {
                added: 1,
                updated: 0,
                removed: 1,
                unchanged: 1
            }
        );
        // Unchanged rule is still disarmed
        assert!(aapl.tick(&ev, "153").is_empty());
        assert_eq!(registry.active_symbols(), vec!["AAPL".to_string(), "TSLA".to_string()]);
    }

    #[test]
    fn test_sync_changed_rule_rearms() {
        let (ev, _) = setup();
        ev.sync_rules(vec![rule("AAPL", "c1", "150", "2", "1")]).unwrap();
        let mut aapl = Ticker::new("AAPL");
        assert_eq!(aapl.tick(&ev, "152").len(), 1);

        let summary = ev.sync_rules(vec![rule("AAPL", "c1", "149", "2", "1")]).unwrap();
        assert_eq!(summary.updated, 1);
        assert_eq!(aapl.tick(&ev, "152").len(), 1);
    }

    #[test]
    fn test_sync_rejects_invalid_rule_without_changes() {
        let (ev, registry) = setup();
        ev.sync_rules(vec![rule("AAPL", "c1", "150", "2", "1")]).unwrap();

        let err = ev
            .sync_rules(vec![
                rule("MSFT", "c2", "300", "2", "1"),
                rule("TSLA", "c3", "0", "2", "1"),
            ])
            .unwrap_err();
        assert!(matches!(err, MonitorError::InvalidRule { .. }));
        assert_eq!(ev.rule_count(), 1);
        assert_eq!(registry.active_symbols(), vec!["AAPL".to_string()]);
    }

    #[test]
    fn test_symbol_without_rules_is_ignored() {
        let (ev, _) = setup();
        assert!(Ticker::new("AAPL").tick(&ev, "999").is_empty());
    }
}
