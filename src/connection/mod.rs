//! The pairwise connection protocol: mutual authentication (optionally
//! consuming an invitation), graph synchronization, session-key
//! negotiation, and live updates.

pub mod anonymous;
#[allow(clippy::module_inception)]
pub mod connection;
pub mod message;
pub mod state;

pub use anonymous::AnonymousConnection;
pub use connection::{derive_session_key, Connection, ConnectionLike, TIMEOUT_MS};
pub use message::{
    Challenge, ErrorKind, IdentityClaim, InviteeClaim, MessageBody, WireMessage,
};
pub use state::{ConnectionEvent, ConnectionState, DisconnectReason};
