//! Presence registry: who is in the room, under which name and color.
//!
//! The registry mirrors the transport's broadcast state. Membership changes
//! are pushed by the transport as [`PresenceChange`]s; nothing is polled.
//!
//! ```text
//! transport broadcast ──► PresenceChange ──► PresenceRegistry::apply()
//!                                                  │
//!                                   observe_change callbacks (join/leave/update)
//! ```

use std::collections::BTreeMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::subscription::{Observers, Subscription};

/// Opaque participant id assigned by the transport.
pub type ClientId = u64;

/// Cursor/badge colors, indexed by `client_id % len`.
pub const PRESENCE_PALETTE: [&str; 13] = [
    "#ef4444", "#3b82f6", "#10b981", "#f59e0b", "#8b5cf6", "#ec4899", "#14b8a6",
    "#f97316", "#6366f1", "#db2777", "#22c55e", "#eab308", "#a855f7",
];

/// Placeholder names for participants that have not picked one.
pub const PLACEHOLDER_NAMES: [&str; 13] = [
    "Fox", "Bear", "Owl", "Rabbit", "Wolf", "Hawk", "Deer", "Lynx", "Crow", "Raven",
    "Sparrow", "Eagle", "Falcon",
];

const FALLBACK_NAME: &str = "Anonymous";

/// Stable color for a participant; the same id always maps to the same color.
pub fn color_for(client_id: ClientId) -> &'static str {
    PRESENCE_PALETTE[(client_id % PRESENCE_PALETTE.len() as u64) as usize]
}

/// Pick a placeholder display name from `pool` using `rng`.
///
/// Pure apart from the random source, so a deterministic source yields an
/// exact, predictable name.
pub fn pick_placeholder_name<R: RngCore + ?Sized>(
    rng: &mut R,
    pool: &[&'static str],
) -> &'static str {
    if pool.is_empty() {
        return FALLBACK_NAME;
    }
    pool[rng.next_u32() as usize % pool.len()]
}

/// What a participant broadcasts about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceState {
    pub name: String,
    /// Hex color, e.g. `#3b82f6`
    pub color: String,
}

impl PresenceState {
    pub fn new(name: impl Into<String>, color: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: color.into(),
        }
    }
}

/// One connected participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    pub client_id: ClientId,
    pub name: String,
    pub color: String,
    /// Whether this entry is the local participant.
    pub is_local: bool,
}

/// A membership change pushed by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceChange {
    Updated {
        client_id: ClientId,
        state: PresenceState,
    },
    Removed {
        client_id: ClientId,
    },
}

/// Live set of participants for one session.
pub struct PresenceRegistry {
    local_id: ClientId,
    states: BTreeMap<ClientId, PresenceState>,
    observers: Observers<Vec<PresenceEntry>>,
}

impl PresenceRegistry {
    pub fn new(local_id: ClientId) -> Self {
        Self {
            local_id,
            states: BTreeMap::new(),
            observers: Observers::new(),
        }
    }

    pub fn local_id(&self) -> ClientId {
        self.local_id
    }

    /// Record the local participant's display attributes and return the state
    /// to broadcast.
    pub fn set_local_identity(&mut self, name: &str, color: &str) -> PresenceState {
        let state = PresenceState::new(name, color);
        self.upsert(self.local_id, state.clone());
        state
    }

    pub fn local_state(&self) -> Option<&PresenceState> {
        self.states.get(&self.local_id)
    }

    /// Apply a change from the transport. Returns `true` if the set or an
    /// attribute changed; observers are notified only then.
    pub fn apply(&mut self, change: PresenceChange) -> bool {
        match change {
            PresenceChange::Updated { client_id, state } => self.upsert(client_id, state),
            PresenceChange::Removed { client_id } => {
                if client_id == self.local_id {
                    // Local presence lives as long as the session does.
                    return false;
                }
                match self.states.remove(&client_id) {
                    Some(state) => {
                        log::info!("Presence: {} ({client_id}) left", state.name);
                        self.notify();
                        true
                    }
                    None => false,
                }
            }
        }
    }

    /// Subscribe to join, leave and attribute updates. The callback receives
    /// the full current entry list.
    pub fn observe_change(
        &self,
        callback: impl Fn(&[PresenceEntry]) + Send + Sync + 'static,
    ) -> Subscription {
        self.observers.subscribe(move |entries: &Vec<PresenceEntry>| callback(entries))
    }

    /// Number of distinct participants, including self.
    pub fn count(&self) -> usize {
        self.states.len()
    }

    pub fn contains(&self, client_id: ClientId) -> bool {
        self.states.contains_key(&client_id)
    }

    /// Entries ordered by participant id.
    pub fn entries(&self) -> Vec<PresenceEntry> {
        self.states
            .iter()
            .map(|(id, state)| PresenceEntry {
                client_id: *id,
                name: state.name.clone(),
                color: state.color.clone(),
                is_local: *id == self.local_id,
            })
            .collect()
    }

    /// Forget every remote participant (the local one stays).
    pub fn clear_remote(&mut self) {
        let before = self.states.len();
        let local_id = self.local_id;
        self.states.retain(|id, _| *id == local_id);
        if self.states.len() != before {
            self.notify();
        }
    }

    fn upsert(&mut self, client_id: ClientId, state: PresenceState) -> bool {
        let previous = self.states.insert(client_id, state.clone());
        if previous.as_ref() == Some(&state) {
            return false;
        }
        if previous.is_none() && client_id != self.local_id {
            log::info!("Presence: {} ({client_id}) joined", state.name);
        }
        self.notify();
        true
    }

    fn notify(&self) {
        self.observers.notify(&self.entries());
    }
}
