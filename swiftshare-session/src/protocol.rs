//! Binary protocol spoken between the WebSocket transport and the relay.
//!
//! Wire format (bincode-encoded):
//! ```text
//! ┌──────────┬───────────┬──────────┬──────────┐
//! │ msg_type │ client_id │ room     │ payload  │
//! │ 1 byte   │ varint    │ string   │ variable │
//! └──────────┴───────────┴──────────┴──────────┘
//! ```
//!
//! Document payloads are `yrs` v1 updates and state vectors, passed through
//! untouched. Presence payloads are a bincode-encoded [`PresenceState`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::presence::{ClientId, PresenceState};

/// Message types for the sync protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// First message on a connection: enter a room
    Join = 1,
    /// State vector, asking the other side for what it is missing
    SyncStep1 = 2,
    /// Diff answering a SyncStep1
    SyncStep2 = 3,
    /// Incremental document update
    Update = 4,
    /// Presence state of one participant
    Awareness = 5,
    /// A participant left the room
    Leave = 6,
}

/// Top-level protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncMessage {
    pub msg_type: MessageType,
    /// Sender, or the participant the message is about
    pub client_id: ClientId,
    pub room: String,
    pub payload: Vec<u8>,
}

impl SyncMessage {
    fn new(msg_type: MessageType, client_id: ClientId, room: &str, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            client_id,
            room: room.to_string(),
            payload,
        }
    }

    pub fn join(client_id: ClientId, room: &str) -> Self {
        Self::new(MessageType::Join, client_id, room, Vec::new())
    }

    pub fn sync_step1(client_id: ClientId, room: &str, state_vector: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep1, client_id, room, state_vector)
    }

    pub fn sync_step2(client_id: ClientId, room: &str, diff: Vec<u8>) -> Self {
        Self::new(MessageType::SyncStep2, client_id, room, diff)
    }

    pub fn update(client_id: ClientId, room: &str, update: Vec<u8>) -> Self {
        Self::new(MessageType::Update, client_id, room, update)
    }

    pub fn awareness(
        client_id: ClientId,
        room: &str,
        state: &PresenceState,
    ) -> Result<Self, ProtocolError> {
        let payload = bincode::serde::encode_to_vec(state, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))?;
        Ok(Self::new(MessageType::Awareness, client_id, room, payload))
    }

    pub fn leave(client_id: ClientId, room: &str) -> Self {
        Self::new(MessageType::Leave, client_id, room, Vec::new())
    }

    /// Serialize to binary wire format.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    /// Deserialize from binary wire format.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (msg, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(msg)
    }

    /// Parse an awareness payload.
    pub fn presence_state(&self) -> Result<PresenceState, ProtocolError> {
        if self.msg_type != MessageType::Awareness {
            return Err(ProtocolError::InvalidMessageType(self.msg_type));
        }
        let (state, _) =
            bincode::serde::decode_from_slice(&self.payload, bincode::config::standard())
                .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
        Ok(state)
    }
}

/// Protocol errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("unexpected message type {0:?}")]
    InvalidMessageType(MessageType),
}
