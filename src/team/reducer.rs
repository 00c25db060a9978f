/// The membership reducer — folds a linearized sequence of links into a
/// [`TeamState`].
///
/// Every link passes through the same pipeline: decode, author check,
/// authorization check, dispatch, bookkeeping. A link that fails any
/// stage is logged and skipped; reduction itself never aborts, so peers
/// that disagree about one link still converge on the rest.

use log::warn;
use thiserror::Error;

use crate::graph::link::SignedLink;
use crate::invite;
use crate::team::actions::{Action, Member};
use crate::team::state::{InvitationState, TeamState, ADMIN_ROLE};

#[derive(Error, Debug)]
pub enum ReduceError {
    #[error("Payload could not be decoded: {0}")]
    MalformedPayload(String),

    #[error("Root link can only appear at the start of the sequence")]
    RootMisplaced,

    #[error("Author {0} is not a member of the team")]
    UnknownAuthor(String),

    #[error("Author device is not recorded for {0}")]
    UnknownAuthorDevice(String),

    #[error("Author key does not match the device recorded in team state")]
    AuthorKeyMismatch,

    #[error("{0} is not an admin")]
    NotAdmin(String),

    #[error("Cannot remove the team's only admin")]
    CannotRemoveOnlyAdmin,

    #[error("The admin role cannot be removed")]
    CannotRemoveAdminRole,

    #[error("Member {0} not found")]
    MemberNotFound(String),

    #[error("Member {0} already exists")]
    DuplicateMember(String),

    #[error("Device not found")]
    DeviceNotFound,

    #[error("Device was previously removed from the team")]
    DeviceWasRemoved,

    #[error("Cannot remove a member's only device")]
    CannotRemoveLastDevice,

    #[error("Role {0} not found")]
    RoleNotFound(String),

    #[error("Role {0} already exists")]
    DuplicateRole(String),

    #[error("Server {0} not found")]
    ServerNotFound(String),

    #[error("Invitation not found")]
    InvitationNotFound,

    #[error("Invitation was revoked")]
    InvitationRevoked,

    #[error("Invitation has no remaining uses")]
    InvitationExhausted,

    #[error("Invitation expired")]
    InvitationExpired,

    #[error("Proof of invitation is invalid")]
    InvitationProofInvalid,

    #[error("Keyset scope does not match the author")]
    WrongKeyScope,

    #[error("Keyset generation must not decrease")]
    GenerationRegression,
}

pub type Result<T> = std::result::Result<T, ReduceError>;

// ---------------------------------------------------------------------------
// Reduction
// ---------------------------------------------------------------------------

/// Fold `links` into `state`. Links that fail validation or authorization
/// are skipped with a warning.
pub fn reduce(mut state: TeamState, links: &[SignedLink]) -> TeamState {
    for link in links {
        if let Err(err) = apply_link(&mut state, link) {
            warn!("skipping link {} by {}: {err}", link.hash, link.author_id());
        }
    }
    state
}

/// Apply a single link to the state.
pub fn apply_link(state: &mut TeamState, link: &SignedLink) -> Result<()> {
    let action = link
        .action()
        .map_err(|e| ReduceError::MalformedPayload(e.to_string()))?;

    if let Action::Root {
        team_name,
        root_member,
        lockboxes,
    } = action
    {
        if !state.members.is_empty() || !state.team_name.is_empty() {
            return Err(ReduceError::RootMisplaced);
        }
        return apply_root(state, team_name, root_member, lockboxes);
    }

    check_author(state, link, &action)?;
    check_authorization(state, link, &action)?;

    match action {
        Action::Root { .. } => unreachable!("handled above"),
        Action::AddMember {
            member,
            roles,
            lockboxes,
        } => {
            if state.has_member(&member.user_id) {
                return Err(ReduceError::DuplicateMember(member.user_id));
            }
            state
                .removed_members
                .retain(|m| m.user_id != member.user_id);
            let mut member = member;
            member.roles = roles;
            state.members.push(member);
            state.record_lockboxes(&lockboxes);
        }

        Action::RemoveMember { user_id, lockboxes } => {
            if !state.has_member(&user_id) {
                // A concurrent duplicate removal is a no-op.
                if state.was_removed(&user_id) {
                    state.record_lockboxes(&lockboxes);
                    return Ok(());
                }
                return Err(ReduceError::MemberNotFound(user_id));
            }
            if state.is_admin(&user_id) && state.admin_count() == 1 {
                return Err(ReduceError::CannotRemoveOnlyAdmin);
            }
            let position = state
                .members
                .iter()
                .position(|m| m.user_id == user_id)
                .expect("member presence checked above");
            let member = state.members.remove(position);
            for device in &member.devices {
                state.removed_devices.push(device.clone());
            }
            state.removed_members.push(member);
            state.record_lockboxes(&lockboxes);
        }

        Action::AddRole { role, lockboxes } => {
            if state.has_role(&role.name) {
                return Err(ReduceError::DuplicateRole(role.name));
            }
            state.roles.push(role);
            state.record_lockboxes(&lockboxes);
        }

        Action::RemoveRole { role_name } => {
            if role_name == ADMIN_ROLE {
                return Err(ReduceError::CannotRemoveAdminRole);
            }
            if !state.has_role(&role_name) {
                return Err(ReduceError::RoleNotFound(role_name));
            }
            state.roles.retain(|r| r.name != role_name);
            for member in &mut state.members {
                member.roles.retain(|r| r != &role_name);
            }
        }

        Action::AddMemberRole {
            user_id,
            role_name,
            lockboxes,
        } => {
            if role_name != ADMIN_ROLE && !state.has_role(&role_name) {
                return Err(ReduceError::RoleNotFound(role_name));
            }
            let member = state
                .member_mut(&user_id)
                .ok_or(ReduceError::MemberNotFound(user_id))?;
            if !member.roles.contains(&role_name) {
                member.roles.push(role_name);
            }
            state.record_lockboxes(&lockboxes);
        }

        Action::RemoveMemberRole {
            user_id,
            role_name,
            lockboxes,
        } => {
            if role_name == ADMIN_ROLE
                && state.member_has_role(&user_id, ADMIN_ROLE)
                && state.admin_count() == 1
            {
                return Err(ReduceError::CannotRemoveOnlyAdmin);
            }
            let member = state
                .member_mut(&user_id)
                .ok_or(ReduceError::MemberNotFound(user_id))?;
            member.roles.retain(|r| r != &role_name);
            state.record_lockboxes(&lockboxes);
        }

        Action::AddDevice { device, lockboxes } => {
            if state.device_was_removed(&device.device_id) {
                return Err(ReduceError::DeviceWasRemoved);
            }
            if state.device(&device.device_id).is_some() {
                // Concurrent duplicate add is a no-op.
                state.record_lockboxes(&lockboxes);
                return Ok(());
            }
            let member = state
                .member_mut(&device.user_id)
                .ok_or_else(|| ReduceError::MemberNotFound(device.user_id.clone()))?;
            member.devices.push(device);
            state.record_lockboxes(&lockboxes);
        }

        Action::RemoveDevice {
            device_id,
            lockboxes,
        } => {
            if state.device_was_removed(&device_id) {
                state.record_lockboxes(&lockboxes);
                return Ok(());
            }
            let (owner, _) = state.device(&device_id).ok_or(ReduceError::DeviceNotFound)?;
            let owner_id = owner.user_id.clone();
            let owner = state
                .member_mut(&owner_id)
                .expect("owner presence established above");
            if owner.devices.len() == 1 {
                return Err(ReduceError::CannotRemoveLastDevice);
            }
            let position = owner
                .devices
                .iter()
                .position(|d| d.device_id == device_id)
                .expect("device presence established above");
            let device = owner.devices.remove(position);
            state.removed_devices.push(device);
            state.record_lockboxes(&lockboxes);
        }

        Action::ChangeMemberKeys { keys, lockboxes } => {
            let author = link.author_id().to_string();
            if keys.scope != crate::keyset::Scope::member(author.as_str()) {
                return Err(ReduceError::WrongKeyScope);
            }
            let member = state
                .member_mut(&author)
                .ok_or(ReduceError::MemberNotFound(author))?;
            if keys.generation < member.keys.generation {
                return Err(ReduceError::GenerationRegression);
            }
            member.keys = keys;
            state.record_lockboxes(&lockboxes);
        }

        Action::ChangeDeviceKeys { keys, lockboxes } => {
            let author = link.author_id().to_string();
            let device_id = link.body.author.device_id;
            let member = state
                .member_mut(&author)
                .ok_or(ReduceError::MemberNotFound(author))?;
            let device = member
                .devices
                .iter_mut()
                .find(|d| d.device_id == device_id)
                .ok_or(ReduceError::DeviceNotFound)?;
            if keys.generation < device.keys.generation {
                return Err(ReduceError::GenerationRegression);
            }
            device.keys = keys;
            state.record_lockboxes(&lockboxes);
        }

        Action::Invite { invitation } => {
            let id = invitation.id;
            state
                .invitations
                .entry(id)
                .or_insert_with(|| InvitationState {
                    remaining_uses: invitation.max_uses,
                    invitation,
                    revoked: false,
                    used: false,
                });
        }

        Action::RevokeInvitation { id } => {
            let entry = state
                .invitations
                .get_mut(&id)
                .ok_or(ReduceError::InvitationNotFound)?;
            entry.revoked = true;
        }

        Action::Admit {
            id,
            proof,
            member,
            lockboxes,
        } => {
            let entry = state
                .invitations
                .get_mut(&id)
                .ok_or(ReduceError::InvitationNotFound)?;
            if entry.revoked {
                return Err(ReduceError::InvitationRevoked);
            }
            if entry.remaining_uses == 0 {
                return Err(ReduceError::InvitationExhausted);
            }
            let expiration = entry.invitation.expiration_ms;
            if expiration > 0 && link.body.timestamp_ms > expiration {
                return Err(ReduceError::InvitationExpired);
            }
            invite::validate_proof(&proof, &entry.invitation)
                .map_err(|_| ReduceError::InvitationProofInvalid)?;

            entry.remaining_uses -= 1;
            if entry.remaining_uses == 0 {
                entry.used = true;
            }

            if !state.has_member(&member.user_id) {
                state
                    .removed_members
                    .retain(|m| m.user_id != member.user_id);
                state.members.push(member);
            }
            state.record_lockboxes(&lockboxes);
        }

        Action::AddServer { server, lockboxes } => {
            if state.server(&server.host).is_none() {
                state.servers.push(server);
            }
            state.record_lockboxes(&lockboxes);
        }

        Action::RemoveServer { host, lockboxes } => {
            if state.server(&host).is_none() {
                return Err(ReduceError::ServerNotFound(host));
            }
            state.servers.retain(|s| s.host != host);
            state.record_lockboxes(&lockboxes);
        }

        Action::ChangeServerKeys { keys, lockboxes } => {
            let host = keys.scope.name.clone();
            let server = state
                .servers
                .iter_mut()
                .find(|s| s.host == host)
                .ok_or(ReduceError::ServerNotFound(host))?;
            server.keys = keys;
            state.record_lockboxes(&lockboxes);
        }

        Action::SetTeamName { team_name } => {
            state.team_name = team_name;
        }

        Action::AddMessage { message } => {
            state.messages.push(message);
        }
    }

    Ok(())
}

fn apply_root(
    state: &mut TeamState,
    team_name: String,
    root_member: Member,
    lockboxes: Vec<crate::keyset::Lockbox>,
) -> Result<()> {
    state.team_name = team_name;
    state.roles.push(crate::team::actions::Role {
        name: ADMIN_ROLE.to_string(),
    });

    let mut founder = root_member;
    if !founder.roles.iter().any(|r| r == ADMIN_ROLE) {
        founder.roles.push(ADMIN_ROLE.to_string());
    }
    state.members.push(founder);
    state.record_lockboxes(&lockboxes);
    Ok(())
}

// ---------------------------------------------------------------------------
// Author and authorization checks
// ---------------------------------------------------------------------------

/// The author must be a current member, signing with a device the team
/// knows about — except that a member may introduce their own new device
/// with the very link that adds it.
fn check_author(state: &TeamState, link: &SignedLink, action: &Action) -> Result<()> {
    let author = link.author_id();
    let member = state
        .member(author)
        .ok_or_else(|| ReduceError::UnknownAuthor(author.to_string()))?;

    let device_id = link.body.author.device_id;
    match member.devices.iter().find(|d| d.device_id == device_id) {
        Some(device) => {
            if device.keys.signing != link.body.author.device_signing_key {
                return Err(ReduceError::AuthorKeyMismatch);
            }
            Ok(())
        }
        None => {
            // A device may sign the link that introduces it.
            if let Action::AddDevice { device, .. } = action {
                if device.user_id == author && device.device_id == device_id {
                    return Ok(());
                }
            }
            Err(ReduceError::UnknownAuthorDevice(author.to_string()))
        }
    }
}

/// Admin check for admin-only actions. Admitting an invitee and rotating
/// one's own keys are open to every member; the rest of the mutating
/// surface requires the admin role.
fn check_authorization(state: &TeamState, link: &SignedLink, action: &Action) -> Result<()> {
    let author = link.author_id();
    let requires_admin = match action {
        Action::AddMember { .. }
        | Action::RemoveMember { .. }
        | Action::AddRole { .. }
        | Action::RemoveRole { .. }
        | Action::AddMemberRole { .. }
        | Action::RemoveMemberRole { .. }
        | Action::Invite { .. }
        | Action::RevokeInvitation { .. }
        | Action::AddServer { .. }
        | Action::RemoveServer { .. }
        | Action::ChangeServerKeys { .. }
        | Action::SetTeamName { .. } => true,

        // A member may remove their own device without the admin role.
        Action::RemoveDevice { device_id, .. } => match state.device(device_id) {
            Some((owner, _)) => owner.user_id != author,
            None => true,
        },

        Action::Root { .. }
        | Action::AddDevice { .. }
        | Action::ChangeMemberKeys { .. }
        | Action::ChangeDeviceKeys { .. }
        | Action::Admit { .. }
        | Action::AddMessage { .. } => false,
    };

    if requires_admin && !state.is_admin(author) {
        return Err(ReduceError::NotAdmin(author.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hashing::Hash;
    use crate::graph::testing::TestAuthor;
    use crate::team::actions::Role;

    fn root_link(founder: &TestAuthor) -> SignedLink {
        make_link(
            founder,
            Action::Root {
                team_name: "devs".into(),
                root_member: founder.member(),
                lockboxes: vec![],
            },
            1000,
        )
    }

    fn make_link(author: &TestAuthor, action: Action, timestamp_ms: u64) -> SignedLink {
        SignedLink::create(
            &action,
            vec![Hash::from_bytes([0u8; 32])],
            author.context(),
            author.device_keys.signing_secret(),
            timestamp_ms,
        )
        .unwrap()
    }

    fn add_member(author: &TestAuthor, member: &TestAuthor, roles: &[&str]) -> SignedLink {
        make_link(
            author,
            Action::AddMember {
                member: member.member(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
                lockboxes: vec![],
            },
            2000,
        )
    }

    #[test]
    fn test_root_initializes_team() {
        let alice = TestAuthor::new("alice");
        let state = reduce(TeamState::default(), &[root_link(&alice)]);

        assert_eq!(state.team_name, "devs");
        assert!(state.is_admin("alice"));
        assert!(state.has_role(ADMIN_ROLE));
        assert_eq!(state.members.len(), 1);
        assert_eq!(state.members[0].devices.len(), 1);
    }

    #[test]
    fn test_add_and_remove_member() {
        let alice = TestAuthor::new("alice");
        let bob = TestAuthor::new("bob");

        let mut state = reduce(
            TeamState::default(),
            &[root_link(&alice), add_member(&alice, &bob, &[])],
        );
        assert!(state.has_member("bob"));
        assert_eq!(state.seniority("bob"), Some(1));

        state = reduce(
            state,
            &[make_link(
                &alice,
                Action::RemoveMember {
                    user_id: "bob".into(),
                    lockboxes: vec![],
                },
                3000,
            )],
        );
        assert!(!state.has_member("bob"));
        assert!(state.was_removed("bob"));
        // Bob's device went with him.
        assert!(state.device_was_removed(&bob.device_id()));
    }

    #[test]
    fn test_non_admin_cannot_mutate() {
        let alice = TestAuthor::new("alice");
        let bob = TestAuthor::new("bob");
        let carol = TestAuthor::new("carol");

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                add_member(&alice, &bob, &[]),
                // Bob is not an admin; this link is skipped.
                add_member(&bob, &carol, &[]),
            ],
        );
        assert!(!state.has_member("carol"));
    }

    #[test]
    fn test_unknown_author_skipped() {
        let alice = TestAuthor::new("alice");
        let mallory = TestAuthor::new("mallory");

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(
                    &mallory,
                    Action::SetTeamName {
                        team_name: "owned".into(),
                    },
                    2000,
                ),
            ],
        );
        assert_eq!(state.team_name, "devs");
    }

    #[test]
    fn test_wrong_device_key_skipped() {
        let alice = TestAuthor::new("alice");
        // Same user id, different device keys the team never saw.
        let impostor = TestAuthor::new("alice");

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(
                    &impostor,
                    Action::SetTeamName {
                        team_name: "owned".into(),
                    },
                    2000,
                ),
            ],
        );
        assert_eq!(state.team_name, "devs");
    }

    #[test]
    fn test_cannot_remove_only_admin() {
        let alice = TestAuthor::new("alice");
        let bob = TestAuthor::new("bob");

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                add_member(&alice, &bob, &[ADMIN_ROLE]),
                // Bob demotes Alice, then tries to demote himself — the
                // second demotion would leave no admin and is skipped.
                make_link(
                    &bob,
                    Action::RemoveMemberRole {
                        user_id: "alice".into(),
                        role_name: ADMIN_ROLE.into(),
                        lockboxes: vec![],
                    },
                    3000,
                ),
                make_link(
                    &bob,
                    Action::RemoveMemberRole {
                        user_id: "bob".into(),
                        role_name: ADMIN_ROLE.into(),
                        lockboxes: vec![],
                    },
                    4000,
                ),
            ],
        );
        assert!(state.is_admin("bob"));
        assert!(!state.is_admin("alice"));
        assert_eq!(state.admin_count(), 1);
    }

    #[test]
    fn test_admin_role_cannot_be_removed() {
        let alice = TestAuthor::new("alice");
        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(
                    &alice,
                    Action::RemoveRole {
                        role_name: ADMIN_ROLE.into(),
                    },
                    2000,
                ),
            ],
        );
        assert!(state.has_role(ADMIN_ROLE));
    }

    #[test]
    fn test_roles_lifecycle() {
        let alice = TestAuthor::new("alice");
        let bob = TestAuthor::new("bob");

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                add_member(&alice, &bob, &[]),
                make_link(
                    &alice,
                    Action::AddRole {
                        role: Role {
                            name: "managers".into(),
                        },
                        lockboxes: vec![],
                    },
                    3000,
                ),
                make_link(
                    &alice,
                    Action::AddMemberRole {
                        user_id: "bob".into(),
                        role_name: "managers".into(),
                        lockboxes: vec![],
                    },
                    4000,
                ),
            ],
        );
        assert!(state.member_has_role("bob", "managers"));
        assert_eq!(state.members_with_role("managers").len(), 1);

        let state = reduce(
            state,
            &[make_link(
                &alice,
                Action::RemoveRole {
                    role_name: "managers".into(),
                },
                5000,
            )],
        );
        assert!(!state.has_role("managers"));
        assert!(!state.member_has_role("bob", "managers"));
    }

    #[test]
    fn test_device_lifecycle() {
        let alice = TestAuthor::new("alice");
        let phone = TestAuthor::new("alice");

        let mut state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                // The phone introduces itself, signed by its own key.
                make_link(
                    &phone,
                    Action::AddDevice {
                        device: phone.device(),
                        lockboxes: vec![],
                    },
                    2000,
                ),
            ],
        );
        assert_eq!(state.member("alice").unwrap().devices.len(), 2);

        state = reduce(
            state,
            &[make_link(
                &alice,
                Action::RemoveDevice {
                    device_id: phone.device_id(),
                    lockboxes: vec![],
                },
                3000,
            )],
        );
        assert_eq!(state.member("alice").unwrap().devices.len(), 1);
        assert!(state.device_was_removed(&phone.device_id()));

        // A removed device cannot come back.
        state = reduce(
            state,
            &[make_link(
                &phone,
                Action::AddDevice {
                    device: phone.device(),
                    lockboxes: vec![],
                },
                4000,
            )],
        );
        assert_eq!(state.member("alice").unwrap().devices.len(), 1);
    }

    #[test]
    fn test_cannot_remove_last_device() {
        let alice = TestAuthor::new("alice");
        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(
                    &alice,
                    Action::RemoveDevice {
                        device_id: alice.device_id(),
                        lockboxes: vec![],
                    },
                    2000,
                ),
            ],
        );
        assert_eq!(state.member("alice").unwrap().devices.len(), 1);
    }

    #[test]
    fn test_invitation_flow() {
        let alice = TestAuthor::new("alice");
        let charlie = TestAuthor::new("charlie");
        let seed = crate::invite::random_seed();
        let invitation = crate::invite::create(&seed, 1, 0, None).unwrap();
        let id = invitation.id;
        let proof = crate::invite::generate_proof(&seed, "charlie").unwrap();

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(&alice, Action::Invite { invitation }, 2000),
                make_link(
                    &alice,
                    Action::Admit {
                        id,
                        proof: proof.clone(),
                        member: charlie.member(),
                        lockboxes: vec![],
                    },
                    3000,
                ),
            ],
        );
        assert!(state.has_member("charlie"));
        let entry = state.invitations.get(&id).unwrap();
        assert!(entry.used);
        assert_eq!(entry.remaining_uses, 0);

        // A second admit on the same single-use invitation is a no-op.
        let dave = TestAuthor::new("dave");
        let proof_dave = crate::invite::generate_proof(&seed, "dave").unwrap();
        let state = reduce(
            state,
            &[make_link(
                &alice,
                Action::Admit {
                    id,
                    proof: proof_dave,
                    member: dave.member(),
                    lockboxes: vec![],
                },
                4000,
            )],
        );
        assert!(!state.has_member("dave"));
    }

    #[test]
    fn test_revoked_invitation_rejected() {
        let alice = TestAuthor::new("alice");
        let charlie = TestAuthor::new("charlie");
        let seed = crate::invite::random_seed();
        let invitation = crate::invite::create(&seed, 1, 0, None).unwrap();
        let id = invitation.id;

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(&alice, Action::Invite { invitation }, 2000),
                make_link(&alice, Action::RevokeInvitation { id }, 2500),
                make_link(
                    &alice,
                    Action::Admit {
                        id,
                        proof: crate::invite::generate_proof(&seed, "charlie").unwrap(),
                        member: charlie.member(),
                        lockboxes: vec![],
                    },
                    3000,
                ),
            ],
        );
        assert!(!state.has_member("charlie"));
        assert!(state.invitations.get(&id).unwrap().revoked);
    }

    #[test]
    fn test_expired_invitation_rejected() {
        let alice = TestAuthor::new("alice");
        let charlie = TestAuthor::new("charlie");
        let seed = crate::invite::random_seed();
        // Expires at t=2500; the admit happens at t=3000.
        let invitation = crate::invite::create(&seed, 1, 2500, None).unwrap();
        let id = invitation.id;

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(&alice, Action::Invite { invitation }, 2000),
                make_link(
                    &alice,
                    Action::Admit {
                        id,
                        proof: crate::invite::generate_proof(&seed, "charlie").unwrap(),
                        member: charlie.member(),
                        lockboxes: vec![],
                    },
                    3000,
                ),
            ],
        );
        assert!(!state.has_member("charlie"));
    }

    #[test]
    fn test_servers_lifecycle() {
        let alice = TestAuthor::new("alice");
        let server_keys = crate::keyset::SecretKeyset::random(crate::keyset::Scope::member(
            "relay.example.com",
        ));

        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(
                    &alice,
                    Action::AddServer {
                        server: crate::team::actions::Server {
                            host: "relay.example.com".into(),
                            keys: server_keys.public(),
                        },
                        lockboxes: vec![],
                    },
                    2000,
                ),
            ],
        );
        assert!(state.server("relay.example.com").is_some());

        let state = reduce(
            state,
            &[make_link(
                &alice,
                Action::RemoveServer {
                    host: "relay.example.com".into(),
                    lockboxes: vec![],
                },
                3000,
            )],
        );
        assert!(state.server("relay.example.com").is_none());
    }

    #[test]
    fn test_messages_and_rename() {
        let alice = TestAuthor::new("alice");
        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                make_link(
                    &alice,
                    Action::AddMessage {
                        message: vec![1, 2, 3],
                    },
                    2000,
                ),
                make_link(
                    &alice,
                    Action::SetTeamName {
                        team_name: "renamed".into(),
                    },
                    3000,
                ),
            ],
        );
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.team_name, "renamed");
    }

    #[test]
    fn test_change_member_keys_must_match_author() {
        let alice = TestAuthor::new("alice");
        let bob = TestAuthor::new("bob");

        let bob_keys = crate::keyset::SecretKeyset::random(crate::keyset::Scope::member("bob"));
        let state = reduce(
            TeamState::default(),
            &[
                root_link(&alice),
                add_member(&alice, &bob, &[]),
                // Alice cannot rotate Bob's member keys.
                make_link(
                    &alice,
                    Action::ChangeMemberKeys {
                        keys: bob_keys.public(),
                        lockboxes: vec![],
                    },
                    3000,
                ),
            ],
        );
        assert_eq!(state.member("bob").unwrap().keys.generation, 0);
        assert_ne!(state.member("bob").unwrap().keys.signing, bob_keys.signing);
    }
}
