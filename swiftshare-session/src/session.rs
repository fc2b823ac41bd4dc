//! Session controller.
//!
//! A [`Session`] binds one room to one transport + replicated document pair
//! and composes the connection state machine, the presence registry and the
//! file manifest on top of it. [`SessionController`] keeps a host at one
//! active session and swaps sessions when the room changes.
//!
//! ```text
//! Connector::connect ──► Transport ──► TransportEvent queue
//!                                           │ pump() / next_event()
//!                    ┌──────────────────────┼──────────────────────┐
//!                    ▼                      ▼                      ▼
//!            ConnectionMachine      PresenceRegistry          (replicated doc)
//!                    │                      │                      │
//!          status watch + surface   presence-count watch     FileManifest
//!                                                                  │
//!                                                            files watch
//! ```

use std::sync::Arc;

use rand::rngs::OsRng;
use tokio::sync::{mpsc, watch};
use yrs::Doc;

use crate::connection::{ConnectionMachine, ConnectionStatus, Transition};
use crate::error::SessionError;
use crate::identity::{DisplayName, IdentityStore};
use crate::manifest::{FileManifest, FileManifestEntry};
use crate::presence::{
    color_for, pick_placeholder_name, ClientId, PresenceChange, PresenceRegistry,
    PLACEHOLDER_NAMES,
};
use crate::room::RoomId;
use crate::subscription::Subscription;
use crate::surface::{TextBinding, TextSurface};
use crate::transport::{Connector, Transport, TransportEvent};

/// External collaborators a session is built from.
#[derive(Clone)]
pub struct SessionEnv {
    pub connector: Arc<dyn Connector>,
    pub identity: Arc<dyn IdentityStore>,
    pub surface: Arc<dyn TextSurface>,
}

/// One live editing session for one room.
///
/// Release happens only through [`Session::close`]. Dropping a session that
/// is still open logs a warning and releases nothing on its own behalf.
pub struct Session {
    room: RoomId,
    client_id: ClientId,
    machine: ConnectionMachine,
    presence: PresenceRegistry,
    doc: Option<Doc>,
    manifest: Option<FileManifest>,
    binding: Option<TextBinding>,
    transport: Option<Box<dyn Transport>>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    surface: Arc<dyn TextSurface>,
    identity: Arc<dyn IdentityStore>,
    subscriptions: Vec<Subscription>,
    status_tx: Arc<watch::Sender<ConnectionStatus>>,
    presence_count_tx: Arc<watch::Sender<usize>>,
    files_tx: Arc<watch::Sender<Vec<FileManifestEntry>>>,
    synced_once: bool,
    closed: bool,
}

impl Session {
    /// Open a session for `room`.
    ///
    /// The display name is taken from `identity_hint`, else from the identity
    /// store, else a placeholder is picked once and persisted.
    pub fn open(
        room: RoomId,
        identity_hint: Option<DisplayName>,
        env: SessionEnv,
    ) -> Result<Self, SessionError> {
        let SessionEnv {
            connector,
            identity,
            surface,
        } = env;

        let doc = Doc::new();
        let connection = connector.connect(&room, &doc)?;
        let mut transport = connection.transport;
        let client_id = transport.client_id();

        let name = resolve_display_name(identity_hint, identity.as_ref());
        let mut presence = PresenceRegistry::new(client_id);
        let state = presence.set_local_identity(name.as_str(), color_for(client_id));
        transport.set_local_presence(state);

        let manifest = FileManifest::new(&doc);
        let machine = ConnectionMachine::new();

        let status_tx = Arc::new(watch::Sender::new(machine.status()));
        let presence_count_tx = Arc::new(watch::Sender::new(presence.count()));
        let files_tx = Arc::new(watch::Sender::new(Vec::new()));

        let mut subscriptions = Vec::with_capacity(2);
        let count_tx = presence_count_tx.clone();
        subscriptions.push(presence.observe_change(move |entries| {
            count_tx.send_replace(entries.len());
        }));
        let manifest_tx = files_tx.clone();
        subscriptions.push(manifest.observe(move |entries| {
            manifest_tx.send_replace(entries.to_vec());
        }));

        let binding = TextBinding::new(&doc);
        surface.set_enabled(false);
        surface.attach(binding.clone());

        log::info!("Opened session for room {room} as {name} (client {client_id})");
        Ok(Self {
            room,
            client_id,
            machine,
            presence,
            doc: Some(doc),
            manifest: Some(manifest),
            binding: Some(binding),
            transport: Some(transport),
            events: Some(connection.events),
            surface,
            identity,
            subscriptions,
            status_tx,
            presence_count_tx,
            files_tx,
            synced_once: false,
            closed: false,
        })
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.machine.status()
    }

    pub fn is_editable(&self) -> bool {
        self.machine.is_editable()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Open and not given up on.
    pub fn is_live(&self) -> bool {
        !self.closed && self.machine.status() != ConnectionStatus::Error
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// The replicated document, while the session is open.
    pub fn document(&self) -> Option<&Doc> {
        self.doc.as_ref()
    }

    /// Binding to the shared text, while the session is open.
    pub fn binding(&self) -> Option<&TextBinding> {
        self.binding.as_ref()
    }

    /// Plain-text content of the shared document.
    ///
    /// Empty until the first sync of this session, and after close.
    pub fn get_snapshot_text(&self) -> String {
        if self.closed || !self.synced_once {
            return String::new();
        }
        self.binding
            .as_ref()
            .map(TextBinding::content)
            .unwrap_or_default()
    }

    /// Append a file record to the shared manifest. A no-op once closed.
    pub fn add_file(&self, entry: FileManifestEntry) {
        match &self.manifest {
            Some(manifest) => manifest.append(&entry),
            None => log::debug!("Ignoring file {} on closed session", entry.name),
        }
    }

    /// Current manifest; empty once closed.
    pub fn files(&self) -> Vec<FileManifestEntry> {
        self.manifest
            .as_ref()
            .map(FileManifest::snapshot)
            .unwrap_or_default()
    }

    /// Change the local display name, broadcast it and persist it for future
    /// sessions on this device.
    pub fn set_local_display_name(&mut self, name: DisplayName) -> Result<(), SessionError> {
        if !self.closed {
            let state = self
                .presence
                .set_local_identity(name.as_str(), color_for(self.client_id));
            if let Some(transport) = self.transport.as_mut() {
                transport.set_local_presence(state);
            }
        }
        self.identity.save_display_name(&name)
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn watch_presence_count(&self) -> watch::Receiver<usize> {
        self.presence_count_tx.subscribe()
    }

    pub fn watch_files(&self) -> watch::Receiver<Vec<FileManifestEntry>> {
        self.files_tx.subscribe()
    }

    /// Handle every transport event already delivered, without waiting.
    /// Returns how many were handled.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        loop {
            let Some(event) = self.events.as_mut().and_then(|rx| rx.try_recv().ok()) else {
                return handled;
            };
            self.handle_event(event);
            handled += 1;
        }
    }

    /// Wait for the next transport event and handle it.
    ///
    /// Returns `None` once the session is closed, gave up, or the transport
    /// went away.
    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.as_mut()?.recv().await?;
        self.handle_event(event.clone());
        Some(event)
    }

    fn handle_event(&mut self, event: TransportEvent) {
        if self.closed {
            return;
        }
        match event {
            TransportEvent::Status(status) => {
                let transition = self.machine.on_transport_status(status);
                self.apply_transition(transition);
            }
            TransportEvent::Synced(synced) => {
                let transition = self.machine.on_synced(synced);
                if synced && !self.machine.is_halted() {
                    self.synced_once = true;
                }
                self.apply_transition(transition);
            }
            TransportEvent::PresenceUpdated { client_id, state } => {
                self.presence
                    .apply(PresenceChange::Updated { client_id, state });
            }
            TransportEvent::PresenceRemoved { client_id } => {
                self.presence.apply(PresenceChange::Removed { client_id });
            }
        }
    }

    fn apply_transition(&mut self, transition: Transition) {
        if let Some(editable) = transition.editable {
            self.surface.set_enabled(editable);
        }
        if let Some(status) = transition.status {
            match status {
                ConnectionStatus::Connected => log::info!("Room {} is live", self.room),
                ConnectionStatus::Disconnected => {
                    log::warn!("Room {}: connection dropped", self.room)
                }
                _ => log::info!("Room {}: {status}", self.room),
            }
            self.status_tx.send_replace(status);
        }
        if transition.close_transport {
            log::error!(
                "Room {}: giving up after {} attempts",
                self.room,
                self.machine.attempts()
            );
            if let Some(mut transport) = self.transport.take() {
                transport.destroy();
            }
            self.events = None;
        }
    }

    /// Tear the session down. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // Observers first, so teardown itself notifies nobody.
        self.subscriptions.clear();

        self.surface.set_enabled(false);
        self.surface.detach();
        if let Some(binding) = self.binding.take() {
            binding.destroy();
        }

        if let Some(mut transport) = self.transport.take() {
            transport.destroy();
        }
        self.events = None;
        self.manifest = None;
        self.doc = None;

        self.machine.on_teardown();
        self.presence_count_tx.send_replace(0);
        self.status_tx.send_replace(self.machine.status());
        log::info!("Closed session for room {}", self.room);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.closed {
            log::warn!("Session for room {} dropped without close()", self.room);
        }
    }
}

fn resolve_display_name(hint: Option<DisplayName>, store: &dyn IdentityStore) -> DisplayName {
    if let Some(name) = hint {
        return name;
    }
    match store.load_display_name() {
        Ok(Some(name)) => return name,
        Ok(None) => {}
        Err(e) => log::warn!("Cannot read stored display name: {e}"),
    }

    let picked = pick_placeholder_name(&mut OsRng, &PLACEHOLDER_NAMES);
    let name = DisplayName::parse(picked).unwrap_or_default();
    if let Err(e) = store.save_display_name(&name) {
        log::warn!("Cannot persist display name {name}: {e}");
    }
    name
}

/// Keeps a host at no more than one active session.
pub struct SessionController {
    env: SessionEnv,
    active: Option<Session>,
}

impl SessionController {
    pub fn new(env: SessionEnv) -> Self {
        Self { env, active: None }
    }

    /// Make `room` the active session.
    ///
    /// The same live room returns the existing session. Any other case closes
    /// the previous session completely before the new one is created.
    pub fn open(
        &mut self,
        room: RoomId,
        identity_hint: Option<DisplayName>,
    ) -> Result<&mut Session, SessionError> {
        match self.active.take() {
            Some(existing) if existing.room() == &room && existing.is_live() => {
                Ok(self.active.insert(existing))
            }
            previous => {
                if let Some(mut previous) = previous {
                    log::info!("Leaving room {} for {room}", previous.room());
                    previous.close();
                }
                let session = Session::open(room, identity_hint, self.env.clone())?;
                Ok(self.active.insert(session))
            }
        }
    }

    /// Close the active session, if any.
    pub fn close(&mut self) {
        if let Some(mut session) = self.active.take() {
            session.close();
        }
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    pub fn active_mut(&mut self) -> Option<&mut Session> {
        self.active.as_mut()
    }
}
