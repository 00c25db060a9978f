//! Scoped, generational keysets and the lockbox graph that distributes
//! them.

pub mod keyset;
pub mod lockbox;
pub mod scope;

pub use keyset::{PublicKeyset, SecretKeyset};
pub use lockbox::{visible_keys, visible_scopes, Lockbox, LockboxError};
pub use scope::{Scope, ScopeType, EPHEMERAL_SCOPE_NAME, TEAM_SCOPE_NAME};
