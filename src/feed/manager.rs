//! Feed Connection Manager
//!
//! One long-lived task owns the `FeedTransport` and runs the receive loop:
//!
//! 1. connect (with exponential backoff between attempts)
//! 2. re-subscribe every symbol currently wanted
//! 3. forward ticks to the `TickSink`, apply subscribe/unsubscribe commands,
//!    watch for stale data
//! 4. on connection loss go back to 1, until shutdown
//!
//! The rest of the process talks to the loop through a cloneable
//! `FeedHandle`: commands go over an unbounded mpsc channel (callers never
//! wait on the feed), the current status is a `watch`, and every transition
//! is broadcast as a `StatusChange`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::constants;
use crate::core::events::{log_event, MonitorEvent};
use crate::core::subscriptions::UpstreamControl;
use crate::core::types::{FeedStatus, StatusChange};
use crate::feed::errors::FeedError;
use crate::feed::reconnect::{Backoff, ReconnectConfig};
use crate::feed::state_machine::{FeedEvent, FeedStateMachine};
use crate::feed::traits::{FeedMessage, FeedTransport, TickSink};

/// Silence multiple of `stale_after` after which a degraded connection is
/// torn down and re-dialed
pub const STALE_RECONNECT_FACTOR: u32 = 3;

/// Symbol set changes requested by the Subscription Registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct FeedManagerConfig {
    /// Connected with subscriptions but silent for this long => Degraded
    pub stale_after: Duration,
    pub reconnect: ReconnectConfig,
    /// Capacity of the status-change broadcast
    pub status_capacity: usize,
}

impl Default for FeedManagerConfig {
    fn default() -> Self {
        Self {
            stale_after: constants::feed_stale_after(),
            reconnect: ReconnectConfig::default(),
            status_capacity: constants::feed_status_capacity(),
        }
    }
}

/// Cloneable handle to a running (or not yet started) feed manager
#[derive(Clone)]
pub struct FeedHandle {
    commands: mpsc::UnboundedSender<FeedCommand>,
    status_rx: watch::Receiver<FeedStatus>,
    changes_tx: broadcast::Sender<StatusChange>,
}

impl FeedHandle {
    pub fn status(&self) -> FeedStatus {
        *self.status_rx.borrow()
    }

    /// Watch the current status (latest value only)
    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status_rx.clone()
    }

    /// Every transition from now on
    pub fn status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.changes_tx.subscribe()
    }

    fn send(&self, command: FeedCommand) {
        if self.commands.send(command).is_err() {
            debug!("Feed manager stopped, dropping command");
        }
    }
}

impl UpstreamControl for FeedHandle {
    fn subscribe(&self, symbols: &[String]) {
        self.send(FeedCommand::Subscribe(symbols.to_vec()));
    }

    fn unsubscribe(&self, symbols: &[String]) {
        self.send(FeedCommand::Unsubscribe(symbols.to_vec()));
    }
}

/// How a connected session ended
enum SessionEnd {
    Lost(String),
    Shutdown,
}

pub struct FeedManager {
    transport: Box<dyn FeedTransport>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    machine: FeedStateMachine,
    status_tx: watch::Sender<FeedStatus>,
    changes_tx: broadcast::Sender<StatusChange>,
    backoff: Backoff,
    stale_after: Duration,
    /// Symbols the registry wants; replayed on every reconnect
    desired: BTreeSet<String>,
    last_data: Instant,
}

impl FeedManager {
    pub fn new(transport: Box<dyn FeedTransport>, config: FeedManagerConfig) -> (Self, FeedHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(FeedStatus::Disconnected);
        let (changes_tx, _) = broadcast::channel(config.status_capacity.max(1));

        let handle = FeedHandle {
            commands: commands_tx,
            status_rx,
            changes_tx: changes_tx.clone(),
        };
        let manager = Self {
            transport,
            commands: commands_rx,
            machine: FeedStateMachine::new(),
            status_tx,
            changes_tx,
            backoff: Backoff::new(config.reconnect),
            stale_after: config.stale_after,
            desired: BTreeSet::new(),
            last_data: Instant::now(),
        };
        (manager, handle)
    }

    /// Run until `shutdown_rx` fires, pushing every tick into `sink`.
    /// Never returns early on feed errors.
    pub async fn run(mut self, sink: Arc<dyn TickSink>, mut shutdown_rx: broadcast::Receiver<()>) {
        let feed = self.transport.feed_name();
        info!(feed = %feed, "Feed manager started");
        let mut first_attempt = true;

        loop {
            if !first_attempt {
                let delay = self.backoff.next_delay();
                info!(feed = %feed, attempt = self.backoff.attempt(), delay_ms = delay.as_millis() as u64, "Reconnecting after backoff");
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            first_attempt = false;

            self.transition(FeedEvent::ConnectRequested);
            let connected = tokio::select! {
                _ = shutdown_rx.recv() => break,
                result = self.transport.connect() => result,
            };
            if let Err(e) = connected {
                warn!(feed = %feed, error = %e, "Feed connect failed");
                self.transition(FeedEvent::ConnectFailed(e.to_string()));
                continue;
            }

            match self.run_session(sink.as_ref(), &mut shutdown_rx).await {
                SessionEnd::Shutdown => break,
                SessionEnd::Lost(reason) => {
                    warn!(feed = %feed, reason = %reason, "Feed session ended");
                    if let Err(e) = self.transport.disconnect().await {
                        debug!(feed = %feed, error = %e, "Disconnect after session loss failed");
                    }
                    self.transition(FeedEvent::ConnectionLost(reason));
                }
            }
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!(feed = %feed, error = %e, "Error closing feed on shutdown");
        }
        self.transition(FeedEvent::Shutdown);
        info!(feed = %feed, "Feed manager stopped");
    }

    /// One connected session: replay subscriptions then pump messages.
    async fn run_session(
        &mut self,
        sink: &dyn TickSink,
        shutdown_rx: &mut broadcast::Receiver<()>,
    ) -> SessionEnd {
        // Commands queued while disconnected only change the desired set;
        // the replay below covers them
        while let Ok(command) = self.commands.try_recv() {
            self.apply_to_desired(&command);
        }

        let symbols: Vec<String> = self.desired.iter().cloned().collect();
        if !symbols.is_empty() {
            if let Err(e) = self.transport.subscribe(&symbols).await {
                if e.is_fatal_to_session() {
                    return SessionEnd::Lost(format!("resubscribe failed: {}", e));
                }
                // Connected but not carrying what we asked for
                self.transition(FeedEvent::Connected);
                self.transition(FeedEvent::UpstreamRequestFailed(e.to_string()));
            }
        }

        self.backoff.reset();
        self.last_data = Instant::now();
        self.transition(FeedEvent::Connected);
        info!(feed = %self.transport.feed_name(), symbols = symbols.len(), "Feed session established");

        let mut stale_check = tokio::time::interval(self.stale_check_period());
        stale_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => return SessionEnd::Shutdown,

                Some(command) = self.commands.recv() => {
                    if let Err(reason) = self.forward_command(command).await {
                        return SessionEnd::Lost(reason);
                    }
                }

                message = self.transport.next_message() => match message {
                    Ok(FeedMessage::Ticks(ticks)) => {
                        self.mark_alive(FeedEvent::DataReceived);
                        for sample in ticks {
                            sink.on_tick(sample);
                        }
                    }
                    Ok(FeedMessage::Heartbeat) => self.mark_alive(FeedEvent::HeartbeatReceived),
                    Ok(FeedMessage::Closed) => {
                        return SessionEnd::Lost("closed by upstream".to_string());
                    }
                    Err(FeedError::Malformed(reason)) => {
                        warn!(feed = %self.transport.feed_name(), reason = %reason, "Dropping malformed feed message");
                    }
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                },

                _ = stale_check.tick() => {
                    if let Some(reason) = self.check_stale() {
                        return SessionEnd::Lost(reason);
                    }
                }
            }
        }
    }

    /// Apply a command to the live connection. `Err` means the session is gone.
    async fn forward_command(&mut self, command: FeedCommand) -> Result<(), String> {
        self.apply_to_desired(&command);

        let result = match &command {
            FeedCommand::Subscribe(symbols) => self.transport.subscribe(symbols).await,
            FeedCommand::Unsubscribe(symbols) => self.transport.unsubscribe(symbols).await,
        };

        match result {
            Ok(()) => {
                debug!(command = ?command, "Feed command applied");
                Ok(())
            }
            Err(e) if e.is_fatal_to_session() => Err(format!("{:?} failed: {}", command, e)),
            Err(e) => {
                error!(command = ?command, error = %e, "Upstream refused feed command");
                self.transition(FeedEvent::UpstreamRequestFailed(e.to_string()));
                Ok(())
            }
        }
    }

    fn apply_to_desired(&mut self, command: &FeedCommand) {
        match command {
            FeedCommand::Subscribe(symbols) => self.desired.extend(symbols.iter().cloned()),
            FeedCommand::Unsubscribe(symbols) => {
                for s in symbols {
                    self.desired.remove(s);
                }
            }
        }
    }

    fn mark_alive(&mut self, event: FeedEvent) {
        self.last_data = Instant::now();
        self.transition(event);
    }

    /// Degrade after `stale_after` of silence; give up on the session after
    /// `STALE_RECONNECT_FACTOR` times that.
    fn check_stale(&mut self) -> Option<String> {
        if self.desired.is_empty() {
            // Nothing subscribed, silence is expected
            self.last_data = Instant::now();
            return None;
        }
        let silent_for = self.last_data.elapsed();
        if silent_for >= self.stale_after * STALE_RECONNECT_FACTOR {
            return Some(format!("no data for {}ms", silent_for.as_millis()));
        }
        if silent_for >= self.stale_after {
            self.transition(FeedEvent::Stale);
        }
        None
    }

    fn stale_check_period(&self) -> Duration {
        (self.stale_after / 4).max(Duration::from_millis(10))
    }

    fn transition(&mut self, event: FeedEvent) {
        if let Some(change) = self.machine.apply(&event) {
            log_event(&MonitorEvent::feed_status_changed(&change));
            self.status_tx.send_replace(change.to);
            // No subscribers is fine
            let _ = self.changes_tx.send(change);
        }
    }
}
