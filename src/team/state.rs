/// The materialized team state — the reducer's output.
///
/// Derived, never mutated in place by callers: every change flows through
/// the reducer. Members are kept in first-appearance order because that
/// order defines seniority for the strong-remove resolver.

use std::collections::BTreeMap;

use crate::crypto::hashing::{self, contexts, Hash};
use crate::ids::{DeviceId, InvitationId};
use crate::invite::Invitation;
use crate::keyset::{Lockbox, Scope};
use crate::team::actions::{Device, Member, Role, Server};

/// The built-in administrator role.
pub const ADMIN_ROLE: &str = "admin";

// ---------------------------------------------------------------------------
// Invitation state
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct InvitationState {
    pub invitation: Invitation,
    pub remaining_uses: u32,
    pub revoked: bool,
    pub used: bool,
}

// ---------------------------------------------------------------------------
// TeamState
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TeamState {
    pub team_name: String,
    /// Active members, in order of first appearance (seniority order).
    pub members: Vec<Member>,
    pub removed_members: Vec<Member>,
    pub removed_devices: Vec<Device>,
    pub roles: Vec<Role>,
    pub servers: Vec<Server>,
    pub invitations: BTreeMap<InvitationId, InvitationState>,
    /// The full lockbox graph, including superseded generations.
    pub lockboxes: Vec<Lockbox>,
    /// Opaque application messages, in sequence order.
    pub messages: Vec<Vec<u8>>,
    /// Current key generation per scope, monotone non-decreasing.
    pub generations: BTreeMap<Scope, u32>,
}

impl TeamState {
    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn member_mut(&mut self, user_id: &str) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.user_id == user_id)
    }

    pub fn has_member(&self, user_id: &str) -> bool {
        self.member(user_id).is_some()
    }

    pub fn was_removed(&self, user_id: &str) -> bool {
        self.removed_members.iter().any(|m| m.user_id == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.member(user_id)
            .map(|m| m.roles.iter().any(|r| r == ADMIN_ROLE))
            .unwrap_or(false)
    }

    pub fn admin_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.roles.iter().any(|r| r == ADMIN_ROLE))
            .count()
    }

    /// Seniority index: position of first appearance. Lower is more
    /// senior; the founder is index 0.
    pub fn seniority(&self, user_id: &str) -> Option<usize> {
        self.members.iter().position(|m| m.user_id == user_id)
    }

    // -----------------------------------------------------------------------
    // Devices
    // -----------------------------------------------------------------------

    /// An active device and its owning member.
    pub fn device(&self, device_id: &DeviceId) -> Option<(&Member, &Device)> {
        self.members.iter().find_map(|m| {
            m.devices
                .iter()
                .find(|d| &d.device_id == device_id)
                .map(|d| (m, d))
        })
    }

    pub fn device_was_removed(&self, device_id: &DeviceId) -> bool {
        self.removed_devices
            .iter()
            .any(|d| &d.device_id == device_id)
    }

    // -----------------------------------------------------------------------
    // Roles
    // -----------------------------------------------------------------------

    pub fn has_role(&self, role_name: &str) -> bool {
        self.roles.iter().any(|r| r.name == role_name)
    }

    pub fn members_with_role(&self, role_name: &str) -> Vec<&Member> {
        self.members
            .iter()
            .filter(|m| m.roles.iter().any(|r| r == role_name))
            .collect()
    }

    pub fn member_has_role(&self, user_id: &str, role_name: &str) -> bool {
        self.member(user_id)
            .map(|m| m.roles.iter().any(|r| r == role_name))
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Servers
    // -----------------------------------------------------------------------

    pub fn server(&self, host: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.host == host)
    }

    // -----------------------------------------------------------------------
    // Keys
    // -----------------------------------------------------------------------

    /// Current generation for a scope. Scopes with no recorded lockboxes
    /// are at generation 0.
    pub fn generation(&self, scope: &Scope) -> u32 {
        self.generations.get(scope).copied().unwrap_or(0)
    }

    /// Record lockboxes carried by an action and advance generations.
    /// Generations never decrease: a late lockbox at an older generation
    /// is kept for decryption but does not move the cursor back.
    pub fn record_lockboxes(&mut self, lockboxes: &[Lockbox]) {
        for lockbox in lockboxes {
            let entry = self
                .generations
                .entry(lockbox.contents_scope.clone())
                .or_insert(0);
            if lockbox.contents_generation > *entry {
                *entry = lockbox.contents_generation;
            }
            self.lockboxes.push(lockbox.clone());
        }
    }

    // -----------------------------------------------------------------------
    // Convergence digest
    // -----------------------------------------------------------------------

    /// Deterministic digest of the state. Two peers that applied the same
    /// sequence always produce the same hash.
    pub fn state_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();

        hasher.update(b"N");
        hasher.update(self.team_name.as_bytes());

        hasher.update(b"M");
        for member in &self.members {
            hash_member(&mut hasher, member);
        }
        hasher.update(b"X");
        for member in &self.removed_members {
            hash_member(&mut hasher, member);
        }

        hasher.update(b"R");
        for role in &self.roles {
            hasher.update(role.name.as_bytes());
            hasher.update(&[0]);
        }

        hasher.update(b"I");
        for (id, inv) in &self.invitations {
            hasher.update(id.as_bytes());
            hasher.update(&inv.remaining_uses.to_le_bytes());
            hasher.update(&[inv.revoked as u8, inv.used as u8]);
        }

        hasher.update(b"G");
        for (scope, generation) in &self.generations {
            hasher.update(scope.key_label().as_bytes());
            hasher.update(&generation.to_le_bytes());
        }

        hasher.update(b"S");
        for server in &self.servers {
            hasher.update(server.host.as_bytes());
            hasher.update(&server.keys.signing);
        }

        hasher.update(b"L");
        hasher.update(&(self.messages.len() as u64).to_le_bytes());
        for message in &self.messages {
            hasher.update(&(message.len() as u64).to_le_bytes());
            hasher.update(message);
        }

        hashing::hash(contexts::STATE_HASH, hasher.finalize().as_bytes())
    }
}

fn hash_member(hasher: &mut blake3::Hasher, member: &Member) {
    hasher.update(member.user_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(&member.keys.signing);
    hasher.update(&member.keys.generation.to_le_bytes());
    for role in &member.roles {
        hasher.update(role.as_bytes());
        hasher.update(&[1]);
    }
    for device in &member.devices {
        hasher.update(device.device_id.as_bytes());
        hasher.update(&device.keys.signing);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::{PublicKeyset, SecretKeyset};

    fn member(user_id: &str, roles: &[&str]) -> Member {
        Member {
            user_id: user_id.to_string(),
            keys: SecretKeyset::random(Scope::member(user_id)).public(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
            devices: vec![],
        }
    }

    fn keys(scope: Scope) -> PublicKeyset {
        SecretKeyset::random(scope).public()
    }

    #[test]
    fn test_member_queries() {
        let mut state = TeamState::default();
        state.members.push(member("alice", &[ADMIN_ROLE]));
        state.members.push(member("bob", &[]));

        assert!(state.has_member("alice"));
        assert!(state.is_admin("alice"));
        assert!(!state.is_admin("bob"));
        assert_eq!(state.admin_count(), 1);
        assert_eq!(state.seniority("alice"), Some(0));
        assert_eq!(state.seniority("bob"), Some(1));
        assert_eq!(state.seniority("carol"), None);
    }

    #[test]
    fn test_generation_monotone() {
        let mut state = TeamState::default();
        let team = SecretKeyset::random(Scope::team()).with_generation(2);
        let alice = keys(Scope::member("alice"));
        let lockbox = Lockbox::create(&team, &alice).unwrap();
        state.record_lockboxes(std::slice::from_ref(&lockbox));
        assert_eq!(state.generation(&Scope::team()), 2);

        // An older-generation lockbox is retained but does not regress.
        let old_team = SecretKeyset::random(Scope::team()).with_generation(1);
        let old_lockbox = Lockbox::create(&old_team, &alice).unwrap();
        state.record_lockboxes(std::slice::from_ref(&old_lockbox));
        assert_eq!(state.generation(&Scope::team()), 2);
        assert_eq!(state.lockboxes.len(), 2);
    }

    #[test]
    fn test_state_hash_sensitive_to_membership() {
        let mut a = TeamState::default();
        a.team_name = "devs".into();
        a.members.push(member("alice", &[ADMIN_ROLE]));

        let mut b = a.clone();
        assert_eq!(a.state_hash(), b.state_hash());

        b.members.push(member("bob", &[]));
        assert_ne!(a.state_hash(), b.state_hash());
    }
}
