//! WebSocket transport driving one replicated document against a relay.
//!
//! One background task per session:
//!
//! ```text
//!  ┌──► Connecting ── connect_async ──► Connected ── Join + SyncStep1 ──► drive
//!  │        │ failed                                                      │ dropped
//!  │        ▼                                                             ▼
//!  └── backoff (100ms · 2ⁿ, ≤ 2.5s) ◄──────────────────────────── Disconnected
//! ```
//!
//! Local document updates are forwarded as they are committed. Remote updates
//! are applied under [`REMOTE_ORIGIN`] and never echoed back.

use std::collections::HashSet;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, Origin, ReadTxn, StateVector, Transact, Update};

use super::{Connection, Connector, Transport, TransportEvent, TransportStatus};
use crate::config::TransportConfig;
use crate::error::SessionError;
use crate::presence::{ClientId, PresenceState};
use crate::protocol::{MessageType, SyncMessage};
use crate::room::RoomId;

/// Transaction origin of updates received from the relay.
pub const REMOTE_ORIGIN: &str = "swiftshare:remote";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`WebsocketTransport`]s against the configured endpoint.
#[derive(Debug, Clone, Default)]
pub struct WebsocketConnector {
    config: TransportConfig,
}

impl WebsocketConnector {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Connector for WebsocketConnector {
    fn connect(&self, room: &RoomId, doc: &Doc) -> Result<Connection, SessionError> {
        let handle = Handle::try_current().map_err(|_| SessionError::NoRuntime)?;

        let (event_tx, events) = mpsc::unbounded_channel();
        let (local_tx, local_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (presence_tx, presence_rx) = watch::channel(None);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let remote = Origin::from(REMOTE_ORIGIN);
        let updates = doc
            .observe_update_v1(move |txn, event| {
                if txn.origin() != Some(&remote) {
                    let _ = local_tx.send(event.update.clone());
                }
            })
            .map_err(|e| SessionError::Transport(format!("cannot observe document: {e:?}")))?;

        let client_id = doc.client_id();
        let worker = Worker {
            url: self.config.endpoint.room_url(room),
            room: room.as_str().to_string(),
            client_id,
            doc: doc.clone(),
            config: self.config.clone(),
            events: event_tx,
            local_updates: local_rx,
            presence: presence_rx,
            shutdown: shutdown_rx,
            remote_peers: HashSet::new(),
            synced: false,
        };
        let task = handle.spawn(worker.run());

        log::debug!("Transport for room {room} started (client {client_id})");
        Ok(Connection {
            transport: Box::new(WebsocketTransport {
                client_id,
                presence: presence_tx,
                shutdown: shutdown_tx,
                task: Some(task),
                updates: Some(updates),
            }),
            events,
        })
    }
}

/// Handle to a running transport task.
pub struct WebsocketTransport {
    client_id: ClientId,
    presence: watch::Sender<Option<PresenceState>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    updates: Option<yrs::Subscription>,
}

impl Transport for WebsocketTransport {
    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn set_local_presence(&mut self, state: PresenceState) {
        self.presence.send_replace(Some(state));
    }

    fn destroy(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.updates.take();
        self.shutdown.send_replace(true);
        // The task sends Leave and closes the socket on its own.
        drop(task);
        log::debug!("Transport for client {} destroyed", self.client_id);
    }
}

impl Drop for WebsocketTransport {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Why a connection ended.
#[derive(Debug, PartialEq, Eq)]
enum Exit {
    Dropped,
    Shutdown,
}

struct Worker {
    url: String,
    room: String,
    client_id: ClientId,
    doc: Doc,
    config: TransportConfig,
    events: mpsc::UnboundedSender<TransportEvent>,
    local_updates: mpsc::UnboundedReceiver<Vec<u8>>,
    presence: watch::Receiver<Option<PresenceState>>,
    shutdown: watch::Receiver<bool>,
    remote_peers: HashSet<ClientId>,
    synced: bool,
}

impl Worker {
    async fn run(mut self) {
        let mut failures = 0u32;

        while !*self.shutdown.borrow() {
            self.emit(TransportEvent::Status(TransportStatus::Connecting));

            let attempt = tokio::select! {
                result = tokio_tungstenite::connect_async(self.url.as_str()) => result,
                _ = self.shutdown.changed() => break,
            };

            match attempt {
                Ok((ws, _)) => {
                    failures = 0;
                    log::info!("Connected to {}", self.url);
                    self.emit(TransportEvent::Status(TransportStatus::Connected));

                    let exit = match self.drive(ws).await {
                        Ok(exit) => exit,
                        Err(e) => {
                            log::warn!("Connection to {} lost: {e}", self.url);
                            Exit::Dropped
                        }
                    };
                    self.on_connection_lost();
                    if exit == Exit::Shutdown {
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("Failed to connect to {}: {e}", self.url);
                    failures = failures.saturating_add(1);
                }
            }

            let delay = self.config.backoff(failures);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.changed() => break,
            }
        }

        log::debug!("Transport task for room {} stopped", self.room);
    }

    async fn drive(
        &mut self,
        ws: WsStream,
    ) -> Result<Exit, Box<dyn std::error::Error + Send + Sync>> {
        let (mut sender, mut receiver) = ws.split();

        // The state-vector exchange covers anything queued while offline.
        while self.local_updates.try_recv().is_ok() {}

        let state_vector = self.doc.transact().state_vector().encode_v1();
        send(&mut sender, &SyncMessage::join(self.client_id, &self.room)).await?;
        send(
            &mut sender,
            &SyncMessage::sync_step1(self.client_id, &self.room, state_vector),
        )
        .await?;
        let presence = self.presence.borrow_and_update().clone();
        if let Some(state) = presence {
            send(
                &mut sender,
                &SyncMessage::awareness(self.client_id, &self.room, &state)?,
            )
            .await?;
        }

        loop {
            tokio::select! {
                msg = receiver.next() => match msg {
                    Some(Ok(Message::Binary(data))) => {
                        match SyncMessage::decode(&data) {
                            Ok(msg) => {
                                if let Some(reply) = self.handle(msg) {
                                    send(&mut sender, &reply).await?;
                                }
                            }
                            Err(e) => log::warn!("Dropping undecodable message: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => sender.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => return Ok(Exit::Dropped),
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => {}
                },

                update = self.local_updates.recv() => match update {
                    Some(update) => {
                        send(&mut sender, &SyncMessage::update(self.client_id, &self.room, update)).await?;
                    }
                    None => {
                        self.leave(&mut sender).await;
                        return Ok(Exit::Shutdown);
                    }
                },

                changed = self.presence.changed() => {
                    if changed.is_err() {
                        self.leave(&mut sender).await;
                        return Ok(Exit::Shutdown);
                    }
                    let presence = self.presence.borrow_and_update().clone();
                    if let Some(state) = presence {
                        send(&mut sender, &SyncMessage::awareness(self.client_id, &self.room, &state)?).await?;
                    }
                }

                _ = self.shutdown.changed() => {
                    self.leave(&mut sender).await;
                    return Ok(Exit::Shutdown);
                }
            }
        }
    }

    /// Handle one relay message; returns the reply to send, if any.
    fn handle(&mut self, msg: SyncMessage) -> Option<SyncMessage> {
        if msg.client_id == self.client_id {
            return None;
        }

        match msg.msg_type {
            MessageType::SyncStep1 => match StateVector::decode_v1(&msg.payload) {
                Ok(remote) => {
                    let diff = self.doc.transact().encode_diff_v1(&remote);
                    Some(SyncMessage::sync_step2(self.client_id, &self.room, diff))
                }
                Err(e) => {
                    log::warn!("Invalid state vector from relay: {e:?}");
                    None
                }
            },
            MessageType::SyncStep2 => {
                self.apply_remote(&msg.payload);
                if !self.synced {
                    self.synced = true;
                    log::info!("Room {} synced", self.room);
                    self.emit(TransportEvent::Synced(true));
                }
                None
            }
            MessageType::Update => {
                self.apply_remote(&msg.payload);
                None
            }
            MessageType::Awareness => {
                match msg.presence_state() {
                    Ok(state) => {
                        self.remote_peers.insert(msg.client_id);
                        self.emit(TransportEvent::PresenceUpdated {
                            client_id: msg.client_id,
                            state,
                        });
                    }
                    Err(e) => log::warn!("Invalid presence from {}: {e}", msg.client_id),
                }
                None
            }
            MessageType::Leave => {
                if self.remote_peers.remove(&msg.client_id) {
                    self.emit(TransportEvent::PresenceRemoved {
                        client_id: msg.client_id,
                    });
                }
                None
            }
            MessageType::Join => None,
        }
    }

    fn apply_remote(&self, payload: &[u8]) {
        let update = match Update::decode_v1(payload) {
            Ok(update) => update,
            Err(e) => {
                log::warn!("Invalid update from relay: {e:?}");
                return;
            }
        };
        let mut txn = self.doc.transact_mut_with(REMOTE_ORIGIN);
        if let Err(e) = txn.apply_update(update) {
            log::warn!("Failed to apply remote update: {e:?}");
        }
    }

    /// Report the loss of everything this connection established.
    fn on_connection_lost(&mut self) {
        if std::mem::take(&mut self.synced) {
            self.emit(TransportEvent::Synced(false));
        }
        for client_id in std::mem::take(&mut self.remote_peers) {
            self.emit(TransportEvent::PresenceRemoved { client_id });
        }
        self.emit(TransportEvent::Status(TransportStatus::Disconnected));
    }

    async fn leave<S>(&self, sender: &mut S)
    where
        S: Sink<Message> + Unpin,
    {
        if let Ok(bytes) = SyncMessage::leave(self.client_id, &self.room).encode() {
            let _ = sender.send(Message::Binary(bytes.into())).await;
        }
        let _ = sender.close().await;
    }

    fn emit(&self, event: TransportEvent) {
        // The session may already be gone; nothing left to tell.
        let _ = self.events.send(event);
    }
}

async fn send<S>(
    sender: &mut S,
    msg: &SyncMessage,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let bytes = msg.encode()?;
    sender.send(Message::Binary(bytes.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use std::time::Duration;

    fn assert_send<T: Send>() {}

    #[test]
    fn test_transport_handle_is_send() {
        assert_send::<WebsocketTransport>();
        assert_send::<Box<dyn Transport>>();
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let connector = WebsocketConnector::new(TransportConfig {
            endpoint: Endpoint::parse("ws://127.0.0.1:9").unwrap(),
            backoff_base: Duration::from_millis(5),
            max_backoff: Duration::from_millis(5),
        });
        let doc = Doc::new();
        let mut connection = connector
            .connect(&RoomId::parse("alpha").unwrap(), &doc)
            .unwrap();

        let first = connection.events.recv().await;
        assert_eq!(
            first,
            Some(TransportEvent::Status(TransportStatus::Connecting))
        );

        connection.transport.destroy();
        connection.transport.destroy();
        drop(connection.transport);

        // The task winds down and closes the event queue.
        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while connection.events.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());
    }
}
