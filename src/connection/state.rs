/// Connection machine states and the events it emits.

use crate::connection::message::ErrorKind;
use crate::crypto::hashing::Hash;

/// Top-level protocol state.
///
/// `Connecting` covers the parallel identity substates; the machine
/// tracks "our identity proven" and "their identity verified" as flags
/// and leaves `Connecting` only when both hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Synchronizing,
    Negotiating,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// We or the peer asked to stop.
    Requested,
    /// The reducer no longer lists the peer after applying their links.
    PeerRemoved,
    /// A protocol failure ended the connection.
    Error,
}

/// Typed events drained by the owner of the connection. There is no
/// ambient emitter; `take_events` returns everything since the last
/// call, in order.
#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// Session key negotiated; the connection is live.
    Connected,
    Disconnected {
        reason: DisconnectReason,
        details: String,
    },
    /// We detected a protocol failure and told the peer.
    LocalError { kind: ErrorKind, details: String },
    /// The peer reported a failure to us.
    RemoteError { kind: ErrorKind, details: String },
    /// Our team state changed as a result of synchronization.
    Updated { head: Hash },
}
