//! Room-keyed WebSocket relay.
//!
//! Architecture:
//! ```text
//! Session A ──┐
//!             ├── /<room-id> ── RelayRoom ── yrs Doc (room state)
//! Session B ──┘                    │
//!                                  ├── last presence per participant
//!                                  │
//!                       ┌──────────┼───────────┐
//!                       ▼          ▼           ▼
//!                   Session A   Session B   Session C   (broadcast fan-out)
//! ```
//!
//! The relay keeps each room's document in memory while at least one
//! participant is connected, answers the state-vector handshake, fans out
//! updates and presence, and announces `Leave` when a socket goes away.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{Doc, ReadTxn, StateVector, Transact, Update};

use crate::presence::{ClientId, PresenceState};
use crate::protocol::{MessageType, ProtocolError, SyncMessage};
use crate::room::RoomId;

/// Sender id the relay uses for its own messages.
pub const RELAY_CLIENT_ID: ClientId = 0;

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:1234".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: usize,
    pub active_rooms: usize,
    pub total_messages: u64,
}

/// A message on a room's broadcast channel: sender plus encoded bytes.
type Envelope = (ClientId, Arc<Vec<u8>>);

/// One room: document state, presence and fan-out.
struct RelayRoom {
    doc: Mutex<Doc>,
    presence: Mutex<HashMap<ClientId, PresenceState>>,
    peers: AtomicUsize,
    sender: broadcast::Sender<Envelope>,
}

impl RelayRoom {
    fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            doc: Mutex::new(Doc::new()),
            presence: Mutex::new(HashMap::new()),
            peers: AtomicUsize::new(0),
            sender,
        }
    }

    fn broadcast(&self, from: ClientId, msg: &SyncMessage) {
        match msg.encode() {
            // No receivers is fine: the sender may be alone in the room.
            Ok(bytes) => {
                let _ = self.sender.send((from, Arc::new(bytes)));
            }
            Err(e) => log::error!("Failed to encode broadcast: {e}"),
        }
    }

    fn state_vector(&self) -> Vec<u8> {
        let doc = lock(&self.doc);
        let txn = doc.transact();
        txn.state_vector().encode_v1()
    }

    fn diff(&self, state_vector: &[u8]) -> Option<Vec<u8>> {
        let remote = StateVector::decode_v1(state_vector).ok()?;
        let doc = lock(&self.doc);
        let txn = doc.transact();
        Some(txn.encode_diff_v1(&remote))
    }

    fn apply(&self, update: &[u8]) -> bool {
        let Ok(update) = Update::decode_v1(update) else {
            return false;
        };
        let doc = lock(&self.doc);
        let mut txn = doc.transact_mut();
        txn.apply_update(update).is_ok()
    }

    /// Messages that bring a peer that missed broadcasts back in line: the
    /// full document state and every known presence except its own.
    fn resync(
        &self,
        room_name: &str,
        peer: Option<ClientId>,
    ) -> Result<Vec<SyncMessage>, ProtocolError> {
        let state = {
            let doc = lock(&self.doc);
            let txn = doc.transact();
            txn.encode_state_as_update_v1(&StateVector::default())
        };
        let mut messages = vec![SyncMessage::sync_step2(RELAY_CLIENT_ID, room_name, state)];
        for (client_id, presence) in self.presence_snapshot() {
            if Some(client_id) != peer {
                messages.push(SyncMessage::awareness(client_id, room_name, &presence)?);
            }
        }
        Ok(messages)
    }

    fn presence_snapshot(&self) -> Vec<(ClientId, PresenceState)> {
        lock(&self.presence)
            .iter()
            .map(|(id, state)| (*id, state.clone()))
            .collect()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicUsize,
    total_messages: AtomicU64,
}

type Rooms = Arc<RwLock<HashMap<RoomId, Arc<RelayRoom>>>>;

/// The relay server.
pub struct Relay {
    config: RelayConfig,
    rooms: Rooms,
    counters: Arc<Counters>,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            rooms: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Bind to the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Serve connections accepted from `listener`.
    pub async fn serve(
        &self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let rooms = self.rooms.clone();
            let counters = self.counters.clone();
            let capacity = self.config.broadcast_capacity;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, rooms, counters, capacity).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            active_rooms: self.rooms.read().await.len(),
            total_messages: self.counters.total_messages.load(Ordering::Relaxed),
        }
    }

    /// Number of participants currently connected to `room`.
    pub async fn peer_count(&self, room: &RoomId) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map_or(0, |r| r.peers.load(Ordering::Acquire))
    }
}

/// Room id from the request path, `/<room-id>`.
fn room_from_path(path: &str) -> Option<RoomId> {
    let raw = path.trim_start_matches('/').split(['?', '/']).next()?;
    RoomId::parse(raw).ok()
}

async fn join_room(rooms: &Rooms, room_id: &RoomId, capacity: usize) -> Arc<RelayRoom> {
    let mut rooms = rooms.write().await;
    let room = rooms
        .entry(room_id.clone())
        .or_insert_with(|| {
            log::info!("Room {room_id} created");
            Arc::new(RelayRoom::new(capacity))
        })
        .clone();
    room.peers.fetch_add(1, Ordering::AcqRel);
    room
}

async fn leave_room(rooms: &Rooms, room_id: &RoomId, room: &RelayRoom) {
    let mut rooms = rooms.write().await;
    if room.peers.fetch_sub(1, Ordering::AcqRel) == 1 {
        rooms.remove(room_id);
        log::info!("Room {room_id} removed (empty)");
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    rooms: Rooms,
    counters: Arc<Counters>,
    capacity: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut path = String::new();
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        path = req.uri().path().to_string();
        Ok(resp)
    })
    .await?;

    let Some(room_id) = room_from_path(&path) else {
        log::warn!("Rejecting {addr}: invalid room path '{path}'");
        return Ok(());
    };

    counters.total_connections.fetch_add(1, Ordering::Relaxed);
    counters.active_connections.fetch_add(1, Ordering::Relaxed);

    let room = join_room(&rooms, &room_id, capacity).await;
    let mut broadcast_rx = room.sender.subscribe();
    log::info!("Connection from {addr} joined room {room_id}");

    let mut client_id = None;
    let result = relay_loop(
        ws_stream,
        &room,
        &room_id,
        &mut broadcast_rx,
        &counters,
        &mut client_id,
    )
    .await;

    // Cleanup: announce the departure and drop the room when empty
    if let Some(client_id) = client_id {
        lock(&room.presence).remove(&client_id);
        room.broadcast(client_id, &SyncMessage::leave(client_id, room_id.as_str()));
        log::info!("Client {client_id} left room {room_id}");
    }
    leave_room(&rooms, &room_id, &room).await;
    counters.active_connections.fetch_sub(1, Ordering::Relaxed);

    result
}

/// Pump one socket. `client_id` is set once the peer announces itself.
async fn relay_loop(
    ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
    room: &RelayRoom,
    room_id: &RoomId,
    broadcast_rx: &mut broadcast::Receiver<Envelope>,
    counters: &Counters,
    client_id: &mut Option<ClientId>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let room_name = room_id.as_str();

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                let data = match msg {
                    Some(Ok(Message::Binary(data))) => data,
                    Some(Ok(Message::Ping(data))) => {
                        ws_sender.send(Message::Pong(data)).await?;
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        log::warn!("WebSocket error in room {room_id}: {e}");
                        break;
                    }
                    Some(Ok(_)) => continue,
                };

                counters.total_messages.fetch_add(1, Ordering::Relaxed);
                let msg = match SyncMessage::decode(&data) {
                    Ok(msg) => msg,
                    Err(e) => {
                        log::warn!("Failed to decode message in room {room_id}: {e}");
                        continue;
                    }
                };

                let mut replies = Vec::new();
                match msg.msg_type {
                    MessageType::Join => {
                        *client_id = Some(msg.client_id);
                        replies.push(SyncMessage::sync_step1(
                            RELAY_CLIENT_ID,
                            room_name,
                            room.state_vector(),
                        ));
                        for (peer, state) in room.presence_snapshot() {
                            if peer != msg.client_id {
                                replies.push(SyncMessage::awareness(peer, room_name, &state)?);
                            }
                        }
                        log::debug!("Client {} joined room {room_id}", msg.client_id);
                    }
                    MessageType::SyncStep1 => match room.diff(&msg.payload) {
                        Some(diff) => {
                            replies.push(SyncMessage::sync_step2(RELAY_CLIENT_ID, room_name, diff));
                        }
                        None => log::warn!("Invalid state vector in room {room_id}"),
                    },
                    MessageType::SyncStep2 | MessageType::Update => {
                        if room.apply(&msg.payload) {
                            let update = SyncMessage::update(msg.client_id, room_name, msg.payload);
                            room.broadcast(update.client_id, &update);
                        } else {
                            log::warn!("Rejected invalid update in room {room_id}");
                        }
                    }
                    MessageType::Awareness => match msg.presence_state() {
                        Ok(state) => {
                            lock(&room.presence).insert(msg.client_id, state);
                            room.broadcast(msg.client_id, &msg);
                        }
                        Err(e) => log::warn!("Invalid presence in room {room_id}: {e}"),
                    },
                    MessageType::Leave => break,
                }

                for reply in replies {
                    ws_sender.send(Message::Binary(reply.encode()?.into())).await?;
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok((from, bytes)) => {
                        // Don't echo back to sender
                        if Some(from) == *client_id {
                            continue;
                        }
                        ws_sender.send(Message::Binary(bytes.to_vec().into())).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!(
                            "Client {client_id:?} in room {room_id} lagged by {n} messages, resyncing"
                        );
                        for msg in room.resync(room_name, *client_id)? {
                            ws_sender.send(Message::Binary(msg.encode()?.into())).await?;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    Ok(())
}
