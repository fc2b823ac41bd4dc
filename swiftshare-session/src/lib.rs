//! # swiftshare-session: Collaborative session controller for SwiftShare
//!
//! Owns the lifecycle of one editing session against a remote synchronization
//! endpoint: supervising the transport connection, gating the text surface on
//! sync state, mirroring who is connected, and replicating a small manifest
//! of shared files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐    TransportEvent    ┌──────────────────┐
//! │  Transport   │ ───────────────────► │     Session      │
//! │ (WebSocket)  │ ◄─────────────────── │                  │
//! └──────┬───────┘   presence state     │ ConnectionMachine│──► status watch
//!        │                              │ PresenceRegistry │──► presence-count watch
//!        ▼                              │ FileManifest     │──► files watch
//! ┌──────────────┐                      └────────┬─────────┘
//! │   yrs Doc    │ ◄───── TextBinding ───────────┘
//! │ (replicated) │           │
//! └──────────────┘           ▼
//!                       TextSurface (host widget)
//! ```
//!
//! ## Modules
//!
//! - [`connection`]: Connection state machine and retry give-up
//! - [`presence`]: Presence registry, colors and placeholder names
//! - [`manifest`]: Replicated file manifest
//! - [`session`]: Session handle and single-session controller
//! - [`transport`]: Transport seam and the bundled WebSocket transport
//! - [`relay`]: Room-keyed relay endpoint for development and tests
//! - [`protocol`]: Binary wire protocol (bincode-encoded SyncMessage)
//! - [`room`], [`config`], [`identity`]: Addressing, endpoint and local identity

pub mod config;
pub mod connection;
pub mod error;
pub mod identity;
pub mod manifest;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod room;
pub mod session;
pub mod subscription;
pub mod surface;
pub mod transport;

// Re-exports for convenience
pub use config::{Endpoint, TransportConfig};
pub use connection::{ConnectionMachine, ConnectionStatus, Transition, MAX_RETRY_ATTEMPTS};
pub use error::SessionError;
pub use identity::{DisplayName, FileIdentityStore, IdentityStore, MemoryIdentityStore};
pub use manifest::{FileManifest, FileManifestEntry};
pub use presence::{
    color_for, pick_placeholder_name, ClientId, PresenceChange, PresenceEntry,
    PresenceRegistry, PresenceState, PLACEHOLDER_NAMES,
};
pub use protocol::{MessageType, ProtocolError, SyncMessage};
pub use relay::{Relay, RelayConfig, RelayStats};
pub use room::RoomId;
pub use session::{Session, SessionController, SessionEnv};
pub use subscription::Subscription;
pub use surface::{HeadlessSurface, TextBinding, TextSurface};
pub use transport::{
    Connection, Connector, Transport, TransportEvent, TransportStatus, WebsocketConnector,
};
