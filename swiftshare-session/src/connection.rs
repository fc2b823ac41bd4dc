//! Connection state machine.
//!
//! Turns the raw transport lifecycle (connecting / connected / disconnected)
//! and document sync reports into a coarse [`ConnectionStatus`] and an
//! editability gate for the text surface.
//!
//! ```text
//!              ┌──────────── transport drop ─────────────┐
//!              ▼                                         │
//!   ┌────────────────┐   synced(true)   ┌───────────┐    │
//!   │   connecting   │ ───────────────► │ connected │ ───┘
//!   └────────────────┘                  └───────────┘
//!       │ 6th consecutive attempt
//!       ▼
//!   ┌────────┐          (any state) ── teardown ──► disconnected
//!   │ error  │  terminal: transport closed, events ignored
//!   └────────┘
//! ```
//!
//! Raw socket connectivity does not make the session usable; only a sync
//! report does. This keeps a participant from editing an incomplete replica.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transport::TransportStatus;

/// Retries tolerated before giving up. The first attempt of a connection
/// cycle is not a retry.
pub const MAX_RETRY_ATTEMPTS: u32 = 5;

/// Coarse session status exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Effects the controller must apply after feeding an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Transition {
    /// New status, if it changed
    pub status: Option<ConnectionStatus>,
    /// New editability of the text surface, if it changed
    pub editable: Option<bool>,
    /// The retry budget is exhausted; close the transport now
    pub close_transport: bool,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.status.is_none() && self.editable.is_none() && !self.close_transport
    }
}

/// Per-session connection supervisor.
///
/// All state is private and only mutated by the event handlers below.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    status: ConnectionStatus,
    editable: bool,
    attempts: u32,
    /// A `connecting` report was seen since the last `connected`
    awaiting_connect: bool,
    /// Gave up or torn down; transport events are ignored from now on
    halted: bool,
}

impl ConnectionMachine {
    pub fn new() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            editable: false,
            attempts: 0,
            awaiting_connect: false,
            halted: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    /// Consecutive retries since the last `connected` report.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True once the machine gave up or was torn down.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Feed a transport lifecycle report.
    pub fn on_transport_status(&mut self, status: TransportStatus) -> Transition {
        if self.halted {
            return Transition::default();
        }

        match status {
            TransportStatus::Connecting => {
                if self.awaiting_connect {
                    self.attempts += 1;
                    log::info!(
                        "Connection attempt {}/{}",
                        self.attempts,
                        MAX_RETRY_ATTEMPTS
                    );
                }
                self.awaiting_connect = true;

                if self.attempts >= MAX_RETRY_ATTEMPTS {
                    self.halted = true;
                    let mut transition = self.apply(ConnectionStatus::Error, false);
                    transition.close_transport = true;
                    return transition;
                }
                self.apply(ConnectionStatus::Connecting, false)
            }
            TransportStatus::Connected => {
                self.attempts = 0;
                self.awaiting_connect = false;
                Transition::default()
            }
            TransportStatus::Disconnected => self.apply(ConnectionStatus::Disconnected, false),
        }
    }

    /// Feed a document sync report.
    pub fn on_synced(&mut self, synced: bool) -> Transition {
        if self.halted {
            return Transition::default();
        }
        if synced {
            self.apply(ConnectionStatus::Connected, true)
        } else {
            self.apply(ConnectionStatus::Connecting, false)
        }
    }

    /// Local teardown. Always ends in `disconnected`, whatever came before.
    pub fn on_teardown(&mut self) -> Transition {
        self.halted = true;
        self.apply(ConnectionStatus::Disconnected, false)
    }

    fn apply(&mut self, status: ConnectionStatus, editable: bool) -> Transition {
        let transition = Transition {
            status: (self.status != status).then_some(status),
            editable: (self.editable != editable).then_some(editable),
            close_transport: false,
        };
        self.status = status;
        self.editable = editable;
        transition
    }
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TransportStatus::{Connected, Connecting, Disconnected};

    fn feed(machine: &mut ConnectionMachine, events: &[TransportStatus]) -> Vec<Transition> {
        events.iter().map(|e| machine.on_transport_status(*e)).collect()
    }

    #[test]
    fn test_initial_state() {
        let machine = ConnectionMachine::new();
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
        assert!(!machine.is_editable());
        assert_eq!(machine.attempts(), 0);
        assert!(!machine.is_halted());
    }

    #[test]
    fn test_first_connecting_is_not_a_retry() {
        let mut machine = ConnectionMachine::new();
        machine.on_transport_status(Connecting);
        assert_eq!(machine.attempts(), 0);
        machine.on_transport_status(Connecting);
        assert_eq!(machine.attempts(), 1);
    }

    #[test]
    fn test_connected_alone_does_not_enable() {
        let mut machine = ConnectionMachine::new();
        machine.on_transport_status(Connecting);
        let t = machine.on_transport_status(Connected);
        assert!(t.is_noop());
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
        assert!(!machine.is_editable());
    }

    #[test]
    fn test_synced_enables_and_unsynced_disables() {
        let mut machine = ConnectionMachine::new();
        machine.on_transport_status(Connecting);
        machine.on_transport_status(Connected);

        let t = machine.on_synced(true);
        assert_eq!(t.status, Some(ConnectionStatus::Connected));
        assert_eq!(t.editable, Some(true));
        assert!(machine.is_editable());

        let t = machine.on_synced(false);
        assert_eq!(t.status, Some(ConnectionStatus::Connecting));
        assert_eq!(t.editable, Some(false));
    }

    #[test]
    fn test_repeated_sync_is_idempotent() {
        let mut machine = ConnectionMachine::new();
        machine.on_synced(true);
        assert!(machine.on_synced(true).is_noop());
        assert!(machine.is_editable());
    }

    #[test]
    fn test_drop_disables_surface() {
        let mut machine = ConnectionMachine::new();
        machine.on_transport_status(Connected);
        machine.on_synced(true);

        let t = machine.on_transport_status(Disconnected);
        assert_eq!(t.status, Some(ConnectionStatus::Disconnected));
        assert_eq!(t.editable, Some(false));

        let t = machine.on_transport_status(Connecting);
        assert_eq!(t.status, Some(ConnectionStatus::Connecting));
        assert!(t.editable.is_none());
    }

    #[test]
    fn test_six_connecting_events_give_up_once() {
        let mut machine = ConnectionMachine::new();
        let transitions = feed(&mut machine, &[Connecting; 6]);

        assert_eq!(machine.status(), ConnectionStatus::Error);
        assert!(machine.is_halted());
        let closes = transitions.iter().filter(|t| t.close_transport).count();
        assert_eq!(closes, 1);
        assert!(transitions.last().unwrap().close_transport);
    }

    #[test]
    fn test_five_connecting_events_keep_trying() {
        let mut machine = ConnectionMachine::new();
        feed(&mut machine, &[Connecting; 5]);
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
        assert_eq!(machine.attempts(), 4);
    }

    #[test]
    fn test_disconnects_between_attempts_still_count() {
        let mut machine = ConnectionMachine::new();
        for _ in 0..5 {
            machine.on_transport_status(Connecting);
            machine.on_transport_status(Disconnected);
        }
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
        machine.on_transport_status(Connecting);
        assert_eq!(machine.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_counter_resets_on_connected() {
        let mut machine = ConnectionMachine::new();
        feed(
            &mut machine,
            &[Connecting, Connecting, Connected, Connecting, Connecting, Connecting, Connecting, Connecting],
        );
        assert_ne!(machine.status(), ConnectionStatus::Error);
        assert_eq!(machine.attempts(), 4);

        let t = machine.on_transport_status(Connecting);
        assert!(t.close_transport);
        assert_eq!(machine.status(), ConnectionStatus::Error);
    }

    #[test]
    fn test_halted_machine_ignores_transport() {
        let mut machine = ConnectionMachine::new();
        feed(&mut machine, &[Connecting; 6]);

        assert!(machine.on_transport_status(Connected).is_noop());
        assert!(machine.on_synced(true).is_noop());
        assert!(machine.on_transport_status(Connecting).is_noop());
        assert_eq!(machine.status(), ConnectionStatus::Error);
        assert!(!machine.is_editable());
    }

    #[test]
    fn test_teardown_always_disconnected() {
        let mut machine = ConnectionMachine::new();
        feed(&mut machine, &[Connecting; 6]);
        let t = machine.on_teardown();
        assert_eq!(t.status, Some(ConnectionStatus::Disconnected));
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);

        let mut synced = ConnectionMachine::new();
        synced.on_synced(true);
        let t = synced.on_teardown();
        assert_eq!(t.editable, Some(false));
        assert_eq!(synced.status(), ConnectionStatus::Disconnected);
        assert!(synced.on_synced(true).is_noop());
    }

    #[test]
    fn test_gating_matches_last_status_event() {
        // Editable iff the last status-determining event was synced(true).
        enum Ev {
            T(TransportStatus),
            S(bool),
        }
        let script = [
            Ev::T(Connecting),
            Ev::T(Connected),
            Ev::S(true),
            Ev::T(Connected),
            Ev::S(false),
            Ev::S(true),
            Ev::T(Disconnected),
            Ev::T(Connecting),
            Ev::T(Connected),
            Ev::S(true),
        ];

        let mut machine = ConnectionMachine::new();
        let mut expected = false;
        for ev in script {
            match ev {
                Ev::T(s) => {
                    machine.on_transport_status(s);
                    if s != Connected {
                        expected = false;
                    }
                }
                Ev::S(v) => {
                    machine.on_synced(v);
                    expected = v;
                }
            }
            assert_eq!(machine.is_editable(), expected);
            assert_eq!(
                machine.is_editable(),
                machine.status() == ConnectionStatus::Connected
            );
        }
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ConnectionStatus::Connecting.to_string(), "connecting");
        assert_eq!(ConnectionStatus::Error.to_string(), "error");
        assert_eq!(
            serde_json::to_string(&ConnectionStatus::Disconnected).unwrap(),
            "\"disconnected\""
        );
    }
}
