//! PriceMonitor service
//!
//! Explicitly constructed service object with a create → start → stop
//! lifecycle. It wires the components together:
//!
//! ```text
//!   FeedManager --tick--> PriceStore --accepted--> AlertEvaluator --> AlertDispatcher --> listeners
//!        ^                                              |
//!        +------ FeedHandle <-- SubscriptionRegistry <--+ (one interest per rule)
//!                                       ^
//!                                       +-- subscribe_to_symbols / unsubscribe_from_symbols
//! ```
//!
//! Background tasks started by `start()`: the feed receive loop, the alert
//! flush ticker, and (when a `CatalystSource` is configured) the rule
//! refresh poller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::constants;
use crate::core::catalysts::CatalystSource;
use crate::core::dispatcher::{AlertDispatcher, AlertListener, DispatcherConfig, ListenerHandle};
use crate::core::evaluator::{AlertEvaluator, SyncSummary};
use crate::core::events::{log_event, MonitorEvent};
use crate::core::price_store::{PriceStore, UpdateOutcome};
use crate::core::subscriptions::SubscriptionRegistry;
use crate::core::types::{
    normalize_symbol, normalize_symbols, AlertEvent, AlertKey, AlertRule, FeedStatus, PriceSample,
    PriceState, StatusChange,
};
use crate::error::{MonitorError, MonitorResult};
use crate::feed::manager::{FeedHandle, FeedManager, FeedManagerConfig};
use crate::feed::traits::{FeedTransport, TickSink};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub feed: FeedManagerConfig,
    pub alerts: DispatcherConfig,
    /// How often pending alert slots are checked for delivery
    pub flush_interval: Duration,
    /// How often the catalyst source is polled
    pub catalyst_refresh: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            feed: FeedManagerConfig::default(),
            alerts: DispatcherConfig::default(),
            flush_interval: Duration::from_millis(constants::alert_flush_interval_ms()),
            catalyst_refresh: Duration::from_secs(constants::catalyst_refresh_secs()),
        }
    }
}

/// Wall-clock time advanced by tokio's monotonic clock.
///
/// Alert timestamps and dedup windows use this, so they never run backwards
/// when the system clock is adjusted.
#[derive(Debug, Clone, Copy)]
struct MonitorClock {
    wall_origin: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl MonitorClock {
    fn new() -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.origin.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.wall_origin + elapsed
    }
}

/// Store → evaluator → dispatcher, run on the feed's receive loop
struct TickPipeline {
    clock: MonitorClock,
    store: Arc<PriceStore>,
    evaluator: Arc<AlertEvaluator>,
    dispatcher: Arc<AlertDispatcher>,
}

impl TickSink for TickPipeline {
    fn on_tick(&self, sample: PriceSample) {
        let state = match self.store.update(sample) {
            UpdateOutcome::Accepted(state) => state,
            UpdateOutcome::Stale => return,
        };
        for event in self.evaluator.evaluate(&state, self.clock.now()) {
            self.dispatcher.publish(event);
        }
    }
}

enum Lifecycle {
    Created(Box<FeedManager>),
    /// Initial catalyst load in progress
    Starting,
    Running {
        shutdown_tx: broadcast::Sender<()>,
        tasks: Vec<JoinHandle<()>>,
    },
    Stopped,
}

pub struct PriceMonitor {
    config: MonitorConfig,
    clock: MonitorClock,
    store: Arc<PriceStore>,
    registry: Arc<SubscriptionRegistry>,
    evaluator: Arc<AlertEvaluator>,
    dispatcher: Arc<AlertDispatcher>,
    feed: FeedHandle,
    source: Option<Arc<dyn CatalystSource>>,
    /// Interest taken through the public API, per symbol. Unsubscribe only
    /// releases what the API took, never a rule's interest.
    api_interest: Mutex<HashMap<String, usize>>,
    lifecycle: Mutex<Lifecycle>,
}

impl PriceMonitor {
    pub fn new(
        config: MonitorConfig,
        transport: Box<dyn FeedTransport>,
        source: Option<Arc<dyn CatalystSource>>,
    ) -> Self {
        let (manager, feed) = FeedManager::new(transport, config.feed.clone());
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(feed.clone())));
        let evaluator = Arc::new(AlertEvaluator::new(registry.clone()));
        let dispatcher = Arc::new(AlertDispatcher::new(config.alerts.clone()));

        Self {
            config,
            clock: MonitorClock::new(),
            store: Arc::new(PriceStore::new()),
            registry,
            evaluator,
            dispatcher,
            feed,
            source,
            api_interest: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::Created(Box::new(manager))),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Load the initial catalyst rules and spawn the background tasks.
    pub async fn start(&self) -> MonitorResult<()> {
        let manager = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Starting) {
                Lifecycle::Created(manager) => manager,
                other => {
                    *lifecycle = other;
                    return Err(MonitorError::AlreadyStarted);
                }
            }
        };

        if self.source.is_some() {
            if let Err(e) = self.refresh_rules().await {
                warn!(error = %e, "Initial catalyst load failed, continuing with no rules");
            }
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        let mut tasks = Vec::with_capacity(3);

        let pipeline = Arc::new(TickPipeline {
            clock: self.clock,
            store: self.store.clone(),
            evaluator: self.evaluator.clone(),
            dispatcher: self.dispatcher.clone(),
        });
        tasks.push(tokio::spawn((*manager).run(pipeline, shutdown_tx.subscribe())));

        tasks.push(tokio::spawn(flush_loop(
            self.clock,
            self.dispatcher.clone(),
            self.config.flush_interval,
            shutdown_tx.subscribe(),
        )));

        if let Some(source) = &self.source {
            tasks.push(tokio::spawn(refresh_loop(
                source.clone(),
                self.evaluator.clone(),
                self.config.catalyst_refresh,
                shutdown_tx.subscribe(),
            )));
        }

        *self.lifecycle.lock() = Lifecycle::Running { shutdown_tx, tasks };
        log_event(&MonitorEvent::monitor_started(self.registry.active_symbols().len()));
        Ok(())
    }

    /// Close the feed, stop all tasks, then deliver pending alerts.
    ///
    /// Stopping twice is a no-op; stopping before `start` is an error.
    pub async fn stop(&self) -> MonitorResult<()> {
        let (shutdown_tx, tasks) = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
                Lifecycle::Running { shutdown_tx, tasks } => (shutdown_tx, tasks),
                Lifecycle::Stopped => return Ok(()),
                not_running => {
                    *lifecycle = not_running;
                    return Err(MonitorError::NotStarted);
                }
            }
        };

        let _ = shutdown_tx.send(());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }

        let flushed = self.dispatcher.close();
        if flushed > 0 {
            info!(alerts = flushed, "Delivered pending alerts on shutdown");
        }
        log_event(&MonitorEvent::monitor_stopped());
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Running { .. })
    }

    // =========================================================================
    // Feed status
    // =========================================================================

    pub fn status(&self) -> FeedStatus {
        self.feed.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.feed.watch_status()
    }

    pub fn status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.feed.status_changes()
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Register interest in `symbols`. The whole list is validated first;
    /// on error nothing changes.
    pub fn subscribe_to_symbols<S: AsRef<str>>(&self, symbols: &[S]) -> MonitorResult<()> {
        let symbols = normalize_symbols(symbols)?;
        let mut api_interest = self.api_interest.lock();
        for symbol in &symbols {
            *api_interest.entry(symbol.clone()).or_insert(0) += 1;
        }
        self.registry.add_interests(&symbols);
        debug!(symbols = ?symbols, "Symbols subscribed");
        Ok(())
    }

    /// Release interest taken by `subscribe_to_symbols`. Symbols with no
    /// such interest are ignored.
    pub fn unsubscribe_from_symbols<S: AsRef<str>>(&self, symbols: &[S]) -> MonitorResult<()> {
        let symbols = normalize_symbols(symbols)?;
        let mut api_interest = self.api_interest.lock();
        let mut releasable = Vec::with_capacity(symbols.len());

        for symbol in symbols {
            match api_interest.get_mut(&symbol) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    releasable.push(symbol);
                }
                Some(_) => {
                    api_interest.remove(&symbol);
                    releasable.push(symbol);
                }
                None => debug!(symbol = %symbol, "Unsubscribe without subscription, ignoring"),
            }
        }
        self.registry.remove_interests(&releasable);
        Ok(())
    }

    /// Symbols currently carried upstream
    pub fn active_symbols(&self) -> Vec<String> {
        self.registry.active_symbols()
    }

    pub fn interest_count(&self, symbol: &str) -> usize {
        normalize_symbol(symbol)
            .map(|s| self.registry.ref_count(&s))
            .unwrap_or(0)
    }

    // =========================================================================
    // Prices
    // =========================================================================

    /// Latest accepted sample; `None` if never observed (or not a valid symbol)
    pub fn current_price(&self, symbol: &str) -> Option<PriceSample> {
        let symbol = normalize_symbol(symbol).ok()?;
        self.store.current(&symbol)
    }

    pub fn price_state(&self, symbol: &str) -> Option<PriceState> {
        let symbol = normalize_symbol(symbol).ok()?;
        self.store.get(&symbol)
    }

    // =========================================================================
    // Alerts
    // =========================================================================

    pub fn on_alert<L>(&self, listener: L) -> ListenerHandle
    where
        L: AlertListener + 'static,
    {
        self.dispatcher.on_alert(listener)
    }

    pub fn off_alert(&self, handle: ListenerHandle) -> bool {
        self.dispatcher.off_alert(handle)
    }

    /// Delivered alerts, oldest first
    pub fn recent_alerts(&self, limit: Option<usize>) -> Vec<AlertEvent> {
        self.dispatcher.recent_alerts(limit)
    }

    /// Deliver pending alerts whose dedup window has elapsed now
    pub fn flush_alerts(&self) -> usize {
        self.dispatcher.flush_due(self.clock.now())
    }

    // =========================================================================
    // Rules
    // =========================================================================

    pub fn sync_rules(&self, rules: Vec<AlertRule>) -> MonitorResult<SyncSummary> {
        self.evaluator.sync_rules(rules)
    }

    pub fn upsert_rule(&self, rule: AlertRule) -> MonitorResult<bool> {
        self.evaluator.upsert_rule(rule)
    }

    pub fn remove_rule(&self, key: &AlertKey) -> bool {
        self.evaluator.remove_rule(key)
    }

    pub fn remove_catalyst(&self, catalyst_id: &str) -> usize {
        self.evaluator.remove_catalyst(catalyst_id)
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.evaluator.rules()
    }

    /// Poll the catalyst source now and resync the evaluator.
    pub async fn refresh_rules(&self) -> MonitorResult<SyncSummary> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| MonitorError::CatalystSource("no catalyst source configured".into()))?;
        refresh_from(source.as_ref(), &self.evaluator).await
    }
}

async fn refresh_from(
    source: &dyn CatalystSource,
    evaluator: &AlertEvaluator,
) -> MonitorResult<SyncSummary> {
    let rules = source.active_rules().await?;
    debug!(source = %source.source_name(), rules = rules.len(), "Catalyst rules fetched");
    evaluator.sync_rules(rules)
}

async fn flush_loop(
    clock: MonitorClock,
    dispatcher: Arc<AlertDispatcher>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                dispatcher.flush_due(clock.now());
            }
        }
    }
}

async fn refresh_loop(
    source: Arc<dyn CatalystSource>,
    evaluator: Arc<AlertEvaluator>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick fires immediately; start() already loaded the rules
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                if let Err(e) = refresh_from(source.as_ref(), &evaluator).await {
                    warn!(source = %source.source_name(), error = %e, "Catalyst refresh failed, keeping previous rules");
                }
            }
        }
    }
}
