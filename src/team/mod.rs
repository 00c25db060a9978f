//! Team membership: action payloads, the reducer, the strong-remove
//! resolver, and the facade that ties them to a local identity.

pub mod actions;
pub mod reducer;
pub mod state;
pub mod strong_remove;
#[allow(clippy::module_inception)]
pub mod team;

pub use actions::{Action, Device, Member, Role, Server};
pub use reducer::{apply_link, reduce, ReduceError};
pub use state::{InvitationState, TeamState, ADMIN_ROLE};
pub use strong_remove::strong_remove_resolver;
pub use team::{
    Encrypted, Keyring, LocalContext, LocalDevice, LocalUser, Team, TeamError, TeamEvent,
};
