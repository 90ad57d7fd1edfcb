//! Feed connection state machine
//!
//! Pure value: the manager feeds it `FeedEvent`s and publishes whatever
//! `StatusChange` comes back. Events that make no sense in the current
//! state are ignored (return `None`), so the receive loop never has to
//! guard against double notifications.
//!
//! ```text
//!   Disconnected --ConnectRequested--> Connecting
//!   Connecting   --Connected---------> Connected
//!   Connecting   --ConnectFailed-----> Disconnected
//!   Connected    --Stale/RequestFailed-> Degraded
//!   Degraded     --DataReceived------> Connected
//!   Degraded     --Heartbeat---------> Connected   (only when degraded by silence)
//!   Connecting|Connected|Degraded --ConnectionLost--> Disconnected
//!   any          --Shutdown----------> Disconnected
//! ```

use chrono::Utc;

use crate::core::types::{FeedStatus, StatusChange};

/// Inputs to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    ConnectRequested,
    Connected,
    ConnectFailed(String),
    ConnectionLost(String),
    /// No inbound data for the stale threshold
    Stale,
    /// Subscribe/unsubscribe refused on a live connection
    UpstreamRequestFailed(String),
    /// Price ticks arrived
    DataReceived,
    /// Control traffic arrived; proves liveness but not that the requested
    /// symbols are carried
    HeartbeatReceived,
    Shutdown,
}

impl FeedEvent {
    fn reason(&self) -> String {
        match self {
            FeedEvent::ConnectRequested => "connect requested".to_string(),
            FeedEvent::Connected => "connected".to_string(),
            FeedEvent::ConnectFailed(r) => format!("connect failed: {}", r),
            FeedEvent::ConnectionLost(r) => format!("connection lost: {}", r),
            FeedEvent::Stale => "no data received".to_string(),
            FeedEvent::UpstreamRequestFailed(r) => format!("upstream request failed: {}", r),
            FeedEvent::DataReceived => "data resumed".to_string(),
            FeedEvent::HeartbeatReceived => "heartbeat resumed".to_string(),
            FeedEvent::Shutdown => "shutdown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FeedStateMachine {
    status: FeedStatus,
    /// Degraded because the upstream refused a request; only ticks clear it
    refused: bool,
}

impl FeedStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> FeedStatus {
        self.status
    }

    /// Apply an event; returns the transition if the status changed.
    pub fn apply(&mut self, event: &FeedEvent) -> Option<StatusChange> {
        use FeedStatus::*;

        let next = match (self.status, event) {
            (Disconnected, FeedEvent::ConnectRequested) => Connecting,
            (Connecting, FeedEvent::Connected) => Connected,
            (Connecting, FeedEvent::ConnectFailed(_)) => Disconnected,
            (Connecting | Connected | Degraded, FeedEvent::ConnectionLost(_)) => Disconnected,
            (Connected, FeedEvent::Stale) => Degraded,
            (Connected, FeedEvent::UpstreamRequestFailed(_)) => {
                self.refused = true;
                Degraded
            }
            (Degraded, FeedEvent::UpstreamRequestFailed(_)) => {
                self.refused = true;
                return None;
            }
            (Degraded, FeedEvent::DataReceived) => Connected,
            (Degraded, FeedEvent::HeartbeatReceived) if !self.refused => Connected,
            (Connecting | Connected | Degraded, FeedEvent::Shutdown) => Disconnected,
            _ => return None,
        };

        let change = StatusChange {
            from: self.status,
            to: next,
            reason: event.reason(),
            at: Utc::now(),
        };
        if next != Degraded {
            self.refused = false;
        }
        self.status = next;
        Some(change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(machine: &mut FeedStateMachine, events: &[FeedEvent]) -> Vec<(FeedStatus, FeedStatus)> {
        events
            .iter()
            .filter_map(|e| machine.apply(e))
            .map(|c| (c.from, c.to))
            .collect()
    }

    #[test]
    fn test_starts_disconnected() {
        assert_eq!(FeedStateMachine::new().status(), FeedStatus::Disconnected);
    }

    #[test]
    fn test_connect_lose_reconnect_cycle() {
        let mut m = FeedStateMachine::new();
        let transitions = drive(
            &mut m,
            &[
                FeedEvent::ConnectRequested,
                FeedEvent::Connected,
                FeedEvent::ConnectionLost("socket reset".into()),
                FeedEvent::ConnectRequested,
                FeedEvent::Connected,
            ],
        );
        use FeedStatus::*;
        assert_eq!(
            transitions,
            vec![
                (Disconnected, Connecting),
                (Connecting, Connected),
                (Connected, Disconnected),
                (Disconnected, Connecting),
                (Connecting, Connected),
            ]
        );
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let mut m = FeedStateMachine::new();
        m.apply(&FeedEvent::ConnectRequested);
        let change = m.apply(&FeedEvent::ConnectFailed("refused".into())).unwrap();
        assert_eq!(change.to, FeedStatus::Disconnected);
        assert!(change.reason.contains("refused"));
    }

    #[test]
    fn test_degraded_and_recovery() {
        let mut m = FeedStateMachine::new();
        m.apply(&FeedEvent::ConnectRequested);
        m.apply(&FeedEvent::Connected);

        assert_eq!(m.apply(&FeedEvent::Stale).unwrap().to, FeedStatus::Degraded);
        // A second stale tick is not a new transition
        assert!(m.apply(&FeedEvent::Stale).is_none());
        assert_eq!(m.apply(&FeedEvent::DataReceived).unwrap().to, FeedStatus::Connected);
        // Data while already connected is not a transition
        assert!(m.apply(&FeedEvent::DataReceived).is_none());

        assert_eq!(
            m.apply(&FeedEvent::UpstreamRequestFailed("denied".into())).unwrap().to,
            FeedStatus::Degraded
        );
        assert_eq!(
            m.apply(&FeedEvent::ConnectionLost("eof".into())).unwrap().to,
            FeedStatus::Disconnected
        );
    }

    #[test]
    fn test_invalid_events_are_ignored() {
        let mut m = FeedStateMachine::new();
        assert!(m.apply(&FeedEvent::Connected).is_none());
        assert!(m.apply(&FeedEvent::ConnectionLost("x".into())).is_none());
        assert!(m.apply(&FeedEvent::Shutdown).is_none());
        assert_eq!(m.status(), FeedStatus::Disconnected);
    }

    #[test]
    fn test_shutdown_from_any_live_state() {
        for setup in [
            vec![FeedEvent::ConnectRequested],
            vec![FeedEvent::ConnectRequested, FeedEvent::Connected],
            vec![FeedEvent::ConnectRequested, FeedEvent::Connected, FeedEvent::Stale],
        ] {
            let mut m = FeedStateMachine::new();
            drive(&mut m, &setup);
            let change = m.apply(&FeedEvent::Shutdown).unwrap();
            assert_eq!(change.to, FeedStatus::Disconnected);
        }
    }

    #[test]
    fn test_loss_while_connecting_returns_to_disconnected() {
        let mut m = FeedStateMachine::new();
        let transitions = drive(
            &mut m,
            &[
                FeedEvent::ConnectRequested,
                FeedEvent::ConnectionLost("resubscribe failed".into()),
                FeedEvent::ConnectRequested,
            ],
        );
        use FeedStatus::*;
        assert_eq!(
            transitions,
            vec![
                (Disconnected, Connecting),
                (Connecting, Disconnected),
                (Disconnected, Connecting),
            ]
        );
    }

    #[test]
    fn test_heartbeat_recovers_only_silence_degradation() {
        let mut m = FeedStateMachine::new();
        drive(&mut m, &[FeedEvent::ConnectRequested, FeedEvent::Connected]);

        m.apply(&FeedEvent::Stale);
        assert_eq!(
            m.apply(&FeedEvent::HeartbeatReceived).unwrap().to,
            FeedStatus::Connected
        );

        m.apply(&FeedEvent::UpstreamRequestFailed("denied".into()));
        assert!(m.apply(&FeedEvent::HeartbeatReceived).is_none());
        assert_eq!(m.status(), FeedStatus::Degraded);
        assert_eq!(m.apply(&FeedEvent::DataReceived).unwrap().to, FeedStatus::Connected);

        // Refusal cleared once recovered: silence-only degradation heals on heartbeat again
        m.apply(&FeedEvent::Stale);
        assert!(m.apply(&FeedEvent::HeartbeatReceived).is_some());
    }

    #[test]
    fn test_refusal_while_stale_needs_ticks() {
        let mut m = FeedStateMachine::new();
        drive(
            &mut m,
            &[FeedEvent::ConnectRequested, FeedEvent::Connected, FeedEvent::Stale],
        );
        assert!(m.apply(&FeedEvent::UpstreamRequestFailed("denied".into())).is_none());
        assert!(m.apply(&FeedEvent::HeartbeatReceived).is_none());
        assert!(m.apply(&FeedEvent::DataReceived).is_some());
    }
}
