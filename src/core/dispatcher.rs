//! Alert Dispatcher
//!
//! Deduplicates alerts per (ticker, catalyst_id), fans them out to registered
//! listeners and keeps a bounded history of what was delivered.
//!
//! Dedup works with pending slots. The first event for a key opens a slot
//! at its `triggered_at`; any event for the same key published before the
//! window closes replaces the slot's payload in place. Once the window has
//! elapsed the slot is delivered, so listeners see exactly one event per
//! window carrying the latest payload. Slots are delivered in the order they
//! were opened. A zero window delivers on publish.
//!
//! Listener calls never happen under the listener or pending locks, so a
//! listener may call `on_alert`, `off_alert` or `publish` from its callback.
//! A listener removed mid-dispatch is skipped for the rest of that dispatch.

use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::constants::{
    alert_dedup_window_secs, alert_history_capacity, alert_max_listener_failures,
};
use crate::core::events::{log_event, MonitorEvent};
use crate::core::types::{AlertEvent, AlertKey};

/// Error type listeners may return; it is logged and counted, never propagated.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// Receiver of delivered alerts
pub trait AlertListener: Send + Sync {
    fn on_alert(&self, event: &AlertEvent) -> ListenerResult;
}

impl<F> AlertListener for F
where
    F: Fn(&AlertEvent) -> ListenerResult + Send + Sync,
{
    fn on_alert(&self, event: &AlertEvent) -> ListenerResult {
        self(event)
    }
}

/// Stable registration handle returned by `on_alert`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatcherConfig {
    /// Events for the same key inside this window collapse into one
    #[serde(default = "default_dedup_window")]
    pub dedup_window_secs: u64,
    /// Delivered alerts retained, oldest evicted first
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Consecutive failures before a listener is dropped; 0 disables
    #[serde(default = "default_max_listener_failures")]
    pub max_listener_failures: u32,
}

fn default_dedup_window() -> u64 {
    alert_dedup_window_secs()
}

fn default_history_capacity() -> usize {
    alert_history_capacity()
}

fn default_max_listener_failures() -> u32 {
    alert_max_listener_failures()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window(),
            history_capacity: default_history_capacity(),
            max_listener_failures: default_max_listener_failures(),
        }
    }
}

impl DispatcherConfig {
    pub fn dedup_window(&self) -> Duration {
        Duration::from_secs(self.dedup_window_secs)
    }
}

struct PendingSlot {
    opened_at: DateTime<Utc>,
    closes_at: Option<DateTime<Utc>>,
    event: AlertEvent,
    merged: usize,
}

impl PendingSlot {
    fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.closes_at.is_some_and(|closes| closes <= now)
    }

    fn accepts(&self, event: &AlertEvent) -> bool {
        self.event.key() == event.key()
            && event.triggered_at >= self.opened_at
            && self.closes_at.map_or(true, |closes| event.triggered_at < closes)
    }
}

struct ListenerEntry {
    handle: ListenerHandle,
    listener: Arc<dyn AlertListener>,
    failures: AtomicU32,
}

pub struct AlertDispatcher {
    window: chrono::Duration,
    history_capacity: usize,
    max_listener_failures: u32,

    pending: Mutex<VecDeque<PendingSlot>>,
    listeners: RwLock<Vec<Arc<ListenerEntry>>>,
    history: Mutex<VecDeque<AlertEvent>>,
    next_handle: AtomicU64,
    closed: AtomicBool,
    /// Serializes delivery; the flag marks a delivery already running on
    /// this thread (a listener publishing from its callback)
    delivering: ReentrantMutex<Cell<bool>>,
}

impl AlertDispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        let window = chrono::Duration::from_std(config.dedup_window())
            .unwrap_or_else(|_| chrono::Duration::days(365));
        Self {
            window,
            history_capacity: config.history_capacity,
            max_listener_failures: config.max_listener_failures,
            pending: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
            history: Mutex::new(VecDeque::new()),
            next_handle: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            delivering: ReentrantMutex::new(Cell::new(false)),
        }
    }

    // =========================================================================
    // Listener registry
    // =========================================================================

    pub fn on_alert<L>(&self, listener: L) -> ListenerHandle
    where
        L: AlertListener + 'static,
    {
        self.on_alert_arc(Arc::new(listener))
    }

    pub fn on_alert_arc(&self, listener: Arc<dyn AlertListener>) -> ListenerHandle {
        let handle = ListenerHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Arc::new(ListenerEntry {
            handle,
            listener,
            failures: AtomicU32::new(0),
        }));
        tracing::debug!(listener = %handle, "Alert listener registered");
        handle
    }

    /// Remove a listener; unknown or already-removed handles are a no-op.
    pub fn off_alert(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| entry.handle != handle);
        let removed = listeners.len() != before;
        if removed {
            tracing::debug!(listener = %handle, "Alert listener removed");
        }
        removed
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn is_registered(&self, handle: ListenerHandle) -> bool {
        self.listeners.read().iter().any(|entry| entry.handle == handle)
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Accept an event for delivery. Returns false once the dispatcher is closed.
    pub fn publish(&self, event: AlertEvent) -> bool {
        if self.closed.load(Ordering::Acquire) {
            tracing::debug!(alert = %event.key(), "Dispatcher closed, dropping alert");
            return false;
        }

        {
            let mut pending = self.pending.lock();
            if let Some(slot) = pending.iter_mut().find(|slot| slot.accepts(&event)) {
                slot.merged += 1;
                log_event(&MonitorEvent::alert_merged(&event, slot.merged));
                slot.event = event;
                return true;
            }

            log_event(&MonitorEvent::alert_triggered(&event));
            pending.push_back(PendingSlot {
                opened_at: event.triggered_at,
                closes_at: event.triggered_at.checked_add_signed(self.window),
                event,
                merged: 0,
            });
        }

        if self.window == chrono::Duration::zero() {
            self.flush_all();
        }
        true
    }

    /// Deliver every slot whose window has elapsed at `now`; returns the
    /// number of slots delivered.
    pub fn flush_due(&self, now: DateTime<Utc>) -> usize {
        self.deliver_while(|pending| {
            let mut due = Vec::new();
            let mut i = 0;
            while i < pending.len() {
                if pending[i].is_due(now) {
                    if let Some(slot) = pending.remove(i) {
                        due.push(slot.event);
                    }
                } else {
                    i += 1;
                }
            }
            due
        })
    }

    /// Deliver every pending slot regardless of its window.
    pub fn flush_all(&self) -> usize {
        self.deliver_while(|pending| pending.drain(..).map(|slot| slot.event).collect())
    }

    /// Stop accepting events and deliver whatever is pending.
    pub fn close(&self) -> usize {
        self.closed.store(true, Ordering::Release);
        self.flush_all()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Keys with an undelivered slot, in slot order
    pub fn pending_keys(&self) -> Vec<AlertKey> {
        self.pending.lock().iter().map(|slot| slot.event.key()).collect()
    }

    /// Delivered alerts, oldest first; at most `limit` most recent if given
    pub fn recent_alerts(&self, limit: Option<usize>) -> Vec<AlertEvent> {
        let history = self.history.lock();
        let skip = limit.map_or(0, |n| history.len().saturating_sub(n));
        history.iter().skip(skip).cloned().collect()
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    fn deliver_while<F>(&self, mut take: F) -> usize
    where
        F: FnMut(&mut VecDeque<PendingSlot>) -> Vec<AlertEvent>,
    {
        let guard = self.delivering.lock();
        if guard.get() {
            // Re-entered from a listener; the outer loop picks it up
            return 0;
        }
        guard.set(true);

        let mut delivered = 0;
        loop {
            let batch = {
                let mut pending = self.pending.lock();
                take(&mut *pending)
            };
            if batch.is_empty() {
                break;
            }
            for event in batch {
                self.deliver(event);
                delivered += 1;
            }
        }

        guard.set(false);
        delivered
    }

    fn deliver(&self, event: AlertEvent) {
        {
            let mut history = self.history.lock();
            history.push_back(event.clone());
            while history.len() > self.history_capacity {
                history.pop_front();
            }
        }

        let snapshot: Vec<Arc<ListenerEntry>> = self.listeners.read().clone();
        let mut called = 0;

        for entry in snapshot {
            if !self.is_registered(entry.handle) {
                continue;
            }
            called += 1;

            let outcome = catch_unwind(AssertUnwindSafe(|| entry.listener.on_alert(&event)));
            let error = match outcome {
                Ok(Ok(())) => {
                    entry.failures.store(0, Ordering::Relaxed);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            self.record_failure(&entry, &error);
        }

        log_event(&MonitorEvent::alert_delivered(&event, called));
    }

    fn record_failure(&self, entry: &ListenerEntry, error: &str) {
        let failures = entry.failures.fetch_add(1, Ordering::Relaxed) + 1;
        log_event(&MonitorEvent::listener_failed(entry.handle.id(), failures, error));

        if self.max_listener_failures > 0
            && failures >= self.max_listener_failures
            && self.off_alert(entry.handle)
        {
            log_event(&MonitorEvent::listener_removed(entry.handle.id(), failures));
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

impl std::fmt::Debug for AlertDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertDispatcher")
            .field("window", &self.window)
            .field("listeners", &self.listener_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}
