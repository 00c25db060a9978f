/// Key scopes — the subject a keyset belongs to.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed name of the team scope.
pub const TEAM_SCOPE_NAME: &str = "TEAM";
/// Fixed name of ephemeral scopes (single-use keys, e.g. invitation starters).
pub const EPHEMERAL_SCOPE_NAME: &str = "EPHEMERAL";

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ScopeType {
    Team = 0,
    Role = 1,
    Member = 2,
    Device = 3,
    Ephemeral = 4,
}

/// The subject of a keyset: the team itself, a role, a member, a device,
/// or an ephemeral principal.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub scope_type: ScopeType,
    pub name: String,
}

impl Scope {
    pub fn team() -> Self {
        Scope {
            scope_type: ScopeType::Team,
            name: TEAM_SCOPE_NAME.to_string(),
        }
    }

    pub fn role(name: impl Into<String>) -> Self {
        Scope {
            scope_type: ScopeType::Role,
            name: name.into(),
        }
    }

    pub fn member(user_id: impl Into<String>) -> Self {
        Scope {
            scope_type: ScopeType::Member,
            name: user_id.into(),
        }
    }

    pub fn device(device_id: impl Into<String>) -> Self {
        Scope {
            scope_type: ScopeType::Device,
            name: device_id.into(),
        }
    }

    pub fn ephemeral() -> Self {
        Scope {
            scope_type: ScopeType::Ephemeral,
            name: EPHEMERAL_SCOPE_NAME.to_string(),
        }
    }

    /// Stable label for key derivation material and storage keys,
    /// e.g. `"member:alice"`.
    pub fn key_label(&self) -> String {
        let kind = match self.scope_type {
            ScopeType::Team => "team",
            ScopeType::Role => "role",
            ScopeType::Member => "member",
            ScopeType::Device => "device",
            ScopeType::Ephemeral => "ephemeral",
        };
        format!("{}:{}", kind, self.name)
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scope({})", self.key_label())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key_label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_scope_fixed_name() {
        assert_eq!(Scope::team().name, TEAM_SCOPE_NAME);
    }

    #[test]
    fn test_key_labels_distinct_across_types() {
        // A member and a role sharing a name must not collide in derivation
        // material.
        assert_ne!(
            Scope::member("managers").key_label(),
            Scope::role("managers").key_label()
        );
    }

    #[test]
    fn test_scope_ordering_stable() {
        let mut scopes = vec![Scope::member("bob"), Scope::team(), Scope::member("alice")];
        scopes.sort();
        assert_eq!(scopes[0], Scope::team());
        assert_eq!(scopes[1], Scope::member("alice"));
    }
}
