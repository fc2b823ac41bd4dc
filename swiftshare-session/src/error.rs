//! Errors surfaced to the host across the session boundary.
//!
//! Connectivity problems never show up here; they are folded into
//! [`ConnectionStatus`](crate::connection::ConnectionStatus) by the state machine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no tokio runtime available to drive the transport")]
    NoRuntime,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("invalid room id '{0}'")]
    InvalidRoomId(String),

    #[error("identity store I/O error: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("identity store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
