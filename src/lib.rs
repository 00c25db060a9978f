//! # Quorum Protocol
//!
//! **Local-first team authentication and authorization over a signed
//! membership graph.**
//!
//! A team is defined by an append-only, signed DAG of membership events
//! rather than by a server. Every peer replays the graph and derives the
//! same answer to "who is on this team, with which roles, devices, and
//! keys". Concurrent branches are reconciled deterministically, and
//! removals are *strong*: a member removed on one branch takes their
//! concurrent actions down with them.
//!
//! ## Architecture
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`crypto`] | Signatures, symmetric AEAD, sealed boxes, hashing/KDF |
//! | [`keyset`] | Scoped generational keysets and the lockbox graph |
//! | [`graph`] | The signed DAG: append, merge, validate, linearize |
//! | [`team`] | Action payloads, reducer, strong-remove, team facade |
//! | [`invite`] | Seed-derived single-use invitations |
//! | [`connection`] | Pairwise authenticated sync protocol |
//! | [`coordinator`] | Many teams over one transport |
//! | [`storage`] | Persisted team blobs and the share store |

// ── Public modules ──────────────────────────────────────────────────────────

pub mod connection;
pub mod coordinator;
pub mod crypto;
pub mod graph;
pub mod ids;
pub mod invite;
pub mod keyset;
pub mod storage;
pub mod team;

// ── Re-exports for convenience ──────────────────────────────────────────────

pub use connection::{Connection, ConnectionEvent, ConnectionLike, ConnectionState};
pub use coordinator::Coordinator;
pub use crypto::Hash;
pub use graph::{SignedGraph, SignedLink};
pub use ids::{DeviceId, InvitationId};
pub use invite::{Invitation, ProofOfInvitation};
pub use keyset::{Lockbox, PublicKeyset, Scope, SecretKeyset};
pub use storage::{ShareRecord, ShareStore};
pub use team::{LocalContext, Team, TeamState, ADMIN_ROLE};

// ── Library metadata ────────────────────────────────────────────────────────

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the crate version string.
pub fn version() -> &'static str {
    VERSION
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
        assert!(version().contains('.'));
    }
}
