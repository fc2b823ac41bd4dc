//! The seam between the session controller and the synchronization transport.
//!
//! A [`Connector`] opens one [`Connection`] per session: a [`Transport`]
//! handle the session exclusively owns, plus the queue of [`TransportEvent`]s
//! the transport pushes. Events are delivered in order and handled by the
//! session one at a time.

pub mod websocket;

use tokio::sync::mpsc;

use crate::error::SessionError;
use crate::presence::{ClientId, PresenceState};
use crate::room::RoomId;

pub use websocket::WebsocketConnector;

/// Raw transport lifecycle as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportStatus {
    Connecting,
    Connected,
    Disconnected,
}

/// Events pushed by a transport to its session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Lifecycle change of the underlying connection
    Status(TransportStatus),
    /// Local replica consistency with the remote session changed
    Synced(bool),
    /// A participant (possibly new) broadcast its presence state
    PresenceUpdated {
        client_id: ClientId,
        state: PresenceState,
    },
    /// A participant left or cleared its presence state
    PresenceRemoved { client_id: ClientId },
}

/// A live transport bound to one replicated document.
pub trait Transport: Send {
    /// Identifier the transport assigned to the local participant.
    fn client_id(&self) -> ClientId;

    /// Broadcast the local participant's presence state.
    fn set_local_presence(&mut self, state: PresenceState);

    /// Stop the connection and release everything held for it.
    /// Calling it again is a no-op.
    fn destroy(&mut self);
}

/// An opened transport and its event queue.
pub struct Connection {
    pub transport: Box<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens transports. The connection attempt starts immediately.
pub trait Connector: Send + Sync {
    fn connect(&self, room: &RoomId, doc: &yrs::Doc) -> Result<Connection, SessionError>;
}
