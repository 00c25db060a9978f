/// The team facade — holds the graph, the derived state, and the local
/// identity; every mutation appends one signed link and re-reduces.

use std::collections::BTreeMap;

use log::warn;
use thiserror::Error;

use crate::crypto::hashing::Hash;
use crate::crypto::{now_ms, symmetric, SymmetricError};
use crate::graph::link::{AuthorContext, Link, LinkError, SignedLink};
use crate::graph::sequence;
use crate::graph::{GraphError, SignedGraph};
use crate::ids::{DeviceId, InvitationId};
use crate::invite::{self, InviteError, ProofOfInvitation};
use crate::keyset::{Lockbox, LockboxError, PublicKeyset, Scope, SecretKeyset};
use crate::team::actions::{Action, Device, Member, Role, Server};
use crate::team::reducer::{self, ReduceError};
use crate::team::state::{TeamState, ADMIN_ROLE};
use crate::team::strong_remove::strong_remove_resolver;

#[derive(Error, Debug)]
pub enum TeamError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("Rejected: {0}")]
    Reduce(#[from] ReduceError),

    #[error("Lockbox error: {0}")]
    Lockbox(#[from] LockboxError),

    #[error("Invitation error: {0}")]
    Invite(#[from] InviteError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] SymmetricError),

    #[error("No keys available for {scope} at generation {generation}")]
    KeysUnavailable { scope: Scope, generation: u32 },

    #[error("This graph does not carry our invitation")]
    WrongTeam,

    #[error("{0} is not a member of this team")]
    NotMember(String),
}

pub type Result<T> = std::result::Result<T, TeamError>;

// ---------------------------------------------------------------------------
// Local identity
// ---------------------------------------------------------------------------

/// The local user's member keys.
#[derive(Clone, Debug)]
pub struct LocalUser {
    pub user_id: String,
    pub keys: SecretKeyset,
}

/// The local device and its keys.
#[derive(Clone, Debug)]
pub struct LocalDevice {
    pub device_id: DeviceId,
    pub keys: SecretKeyset,
}

impl LocalDevice {
    pub fn generate() -> Self {
        let mut keys = SecretKeyset::random(Scope::device("pending"));
        let device_id = DeviceId::from_pubkey(&keys.signing);
        keys.scope = Scope::device(device_id.to_hex());
        LocalDevice { device_id, keys }
    }
}

/// Local user + device: everything needed to author links.
#[derive(Clone, Debug)]
pub struct LocalContext {
    pub user: LocalUser,
    pub device: LocalDevice,
}

impl LocalContext {
    /// Fresh random identity for `user_id`.
    pub fn generate(user_id: &str) -> Self {
        LocalContext {
            user: LocalUser {
                user_id: user_id.to_string(),
                keys: SecretKeyset::random(Scope::member(user_id)),
            },
            device: LocalDevice::generate(),
        }
    }

    pub fn author(&self) -> AuthorContext {
        AuthorContext {
            user_id: self.user.user_id.clone(),
            device_id: self.device.device_id,
            device_signing_key: self.device.keys.signing,
        }
    }

    pub fn device_record(&self) -> Device {
        Device {
            user_id: self.user.user_id.clone(),
            device_id: self.device.device_id,
            keys: self.device.keys.public(),
        }
    }

    pub fn member_record(&self) -> Member {
        Member {
            user_id: self.user.user_id.clone(),
            keys: self.user.keys.public(),
            roles: vec![],
            devices: vec![self.device_record()],
        }
    }
}

// ---------------------------------------------------------------------------
// Keyring
// ---------------------------------------------------------------------------

/// Keysets-with-secrets the local device has opened, by scope and
/// generation. Rebuilt from the lockbox graph after every reduction.
#[derive(Clone, Debug, Default)]
pub struct Keyring {
    keys: BTreeMap<(Scope, u32), SecretKeyset>,
}

impl Keyring {
    pub fn add(&mut self, keyset: SecretKeyset) {
        self.keys
            .insert((keyset.scope.clone(), keyset.generation), keyset);
    }

    pub fn get(&self, scope: &Scope, generation: u32) -> Option<&SecretKeyset> {
        self.keys.get(&(scope.clone(), generation))
    }

    /// Everything in the ring, for persistence.
    pub fn export(&self) -> Vec<SecretKeyset> {
        self.keys.values().cloned().collect()
    }

    pub fn import(&mut self, keys: Vec<SecretKeyset>) {
        for keyset in keys {
            self.add(keyset);
        }
    }

    /// Open every lockbox reachable from the keys already held.
    ///
    /// The lockbox graph is authoritative: for each (scope, generation)
    /// slot the first openable lockbox in sequence order decides the
    /// key, replacing any locally cached keyset that lost a concurrent
    /// rotation.
    pub fn absorb(&mut self, lockboxes: &[Lockbox]) {
        loop {
            let mut progressed = false;
            let mut decided: std::collections::BTreeSet<(Scope, u32)> =
                std::collections::BTreeSet::new();

            for lockbox in lockboxes {
                let slot = (
                    lockbox.contents_scope.clone(),
                    lockbox.contents_generation,
                );
                if decided.contains(&slot) {
                    continue;
                }
                let holder = self
                    .keys
                    .values()
                    .find(|k| k.encryption == lockbox.recipient_encryption)
                    .cloned();
                let Some(holder) = holder else { continue };
                if let Ok(contents) = lockbox.open(&holder) {
                    decided.insert(slot.clone());
                    let replace = self
                        .keys
                        .get(&slot)
                        .map(|held| held.signing != contents.signing)
                        .unwrap_or(true);
                    if replace {
                        self.keys.insert(slot, contents);
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Events and envelopes
// ---------------------------------------------------------------------------

/// Emitted whenever the graph head moves; connections in the connected
/// state forward these as `Update` messages.
#[derive(Clone, Debug, PartialEq)]
pub enum TeamEvent {
    Updated { head: Hash },
}

/// Ciphertext bound to the scope+generation it was encrypted under, so
/// old messages stay readable across rotations.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Encrypted {
    pub scope: Scope,
    pub generation: u32,
    pub ciphertext: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Team
// ---------------------------------------------------------------------------

pub struct Team {
    graph: SignedGraph,
    state: TeamState,
    context: LocalContext,
    keyring: Keyring,
    events: Vec<TeamEvent>,
}

impl Team {
    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// Found a new team. The caller becomes the first member and admin.
    pub fn create(team_name: &str, context: LocalContext) -> Result<Team> {
        let team_keys = SecretKeyset::random(Scope::team());
        let admin_keys = SecretKeyset::random(Scope::role(ADMIN_ROLE));

        let member_public = context.user.keys.public();
        let lockboxes = vec![
            Lockbox::create(&team_keys, &member_public)?,
            Lockbox::create(&admin_keys, &member_public)?,
            Lockbox::create(&context.user.keys, &context.device.keys.public())?,
        ];

        let mut root_member = context.member_record();
        root_member.roles.push(ADMIN_ROLE.to_string());

        let action = Action::Root {
            team_name: team_name.to_string(),
            root_member,
            lockboxes,
        };

        let graph = SignedGraph::create(
            &action,
            context.author(),
            context.device.keys.signing_secret(),
            now_ms(),
        )?;

        Team::from_graph(graph, context)
    }

    /// Rebuild a team from a graph already known to be ours.
    pub fn from_graph(graph: SignedGraph, context: LocalContext) -> Result<Team> {
        let mut team = Team {
            graph,
            state: TeamState::default(),
            context,
            keyring: Keyring::default(),
            events: Vec::new(),
        };
        team.keyring.add(team.context.device.keys.clone());
        team.keyring.add(team.context.user.keys.clone());
        team.refresh()?;
        team.events.clear();
        Ok(team)
    }

    /// Load a serialized team blob. Rejects tampered blobs.
    pub fn load(bytes: &[u8], context: LocalContext) -> Result<Team> {
        let graph = SignedGraph::deserialize(bytes)?;
        Team::from_graph(graph, context)
    }

    /// Join as an invitee: adopt the peer's graph, verify our invitation
    /// is on it, then post our device and our real member keys.
    pub fn join(serialized_graph: &[u8], seed: &str, context: LocalContext) -> Result<Team> {
        let seed = invite::normalize_seed(seed)?;
        let graph = SignedGraph::deserialize(serialized_graph)?;

        let user_id = context.user.user_id.clone();
        let starter_keys = invite::starter_member_keys(&seed, &user_id);

        let mut team = Team {
            graph,
            state: TeamState::default(),
            context,
            keyring: Keyring::default(),
            events: Vec::new(),
        };
        team.keyring.add(team.context.device.keys.clone());
        team.keyring.add(starter_keys);
        team.refresh()?;

        // The admitting side must have posted our admission.
        let id = InvitationId::from_seed(&seed);
        if !team.state.invitations.contains_key(&id) || !team.state.has_member(&user_id) {
            return Err(TeamError::WrongTeam);
        }

        // Introduce this device, then rotate from starter keys to our
        // real member keys.
        team.add_device_with_lockboxes(team.context.device_record(), vec![])?;
        team.change_keys_internal()?;
        Ok(team)
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> &TeamState {
        &self.state
    }

    pub fn graph(&self) -> &SignedGraph {
        &self.graph
    }

    pub fn context(&self) -> &LocalContext {
        &self.context
    }

    pub fn head(&self) -> Hash {
        self.graph.head()
    }

    pub fn team_name(&self) -> &str {
        &self.state.team_name
    }

    pub fn save(&self) -> Result<Vec<u8>> {
        Ok(self.graph.serialize()?)
    }

    pub fn take_events(&mut self) -> Vec<TeamEvent> {
        std::mem::take(&mut self.events)
    }

    /// The opened keysets this device holds, for persistence.
    pub fn export_keyring(&self) -> Vec<SecretKeyset> {
        self.keyring.export()
    }

    /// Restore previously persisted keysets.
    pub fn import_keyring(&mut self, keys: Vec<SecretKeyset>) {
        self.keyring.import(keys);
        self.keyring.absorb(&self.state.lockboxes);
    }

    // -----------------------------------------------------------------------
    // Membership mutators
    // -----------------------------------------------------------------------

    /// Add a member directly (the member's keys are already known, e.g.
    /// from a trusted side channel).
    pub fn add(&mut self, member: Member, roles: Vec<String>) -> Result<Hash> {
        let mut lockboxes = vec![Lockbox::create(&self.team_keys()?, &member.keys)?];
        for role in &roles {
            lockboxes.push(Lockbox::create(&self.role_keys(role)?, &member.keys)?);
        }
        self.append(Action::AddMember {
            member,
            roles,
            lockboxes,
        })
    }

    /// Remove a member and rotate every key they could reach.
    pub fn remove(&mut self, user_id: &str) -> Result<Hash> {
        let member = self
            .state
            .member(user_id)
            .ok_or_else(|| TeamError::NotMember(user_id.to_string()))?;
        let roles = member.roles.clone();

        let mut lockboxes = self.rotate_team_keys(Some(user_id))?;
        for role in &roles {
            lockboxes.extend(self.rotate_role_keys(role, Some(user_id))?);
        }

        self.append(Action::RemoveMember {
            user_id: user_id.to_string(),
            lockboxes,
        })
    }

    pub fn add_role(&mut self, role_name: &str) -> Result<Hash> {
        let role_keys = SecretKeyset::random(Scope::role(role_name));
        let mut lockboxes = Vec::new();
        for admin in self.state.members_with_role(ADMIN_ROLE) {
            lockboxes.push(Lockbox::create(&role_keys, &admin.keys)?);
        }
        self.append(Action::AddRole {
            role: Role {
                name: role_name.to_string(),
            },
            lockboxes,
        })
    }

    pub fn remove_role(&mut self, role_name: &str) -> Result<Hash> {
        self.append(Action::RemoveRole {
            role_name: role_name.to_string(),
        })
    }

    pub fn add_member_role(&mut self, user_id: &str, role_name: &str) -> Result<Hash> {
        let member_keys = self
            .state
            .member(user_id)
            .ok_or_else(|| TeamError::NotMember(user_id.to_string()))?
            .keys
            .clone();
        let lockboxes = vec![Lockbox::create(&self.role_keys(role_name)?, &member_keys)?];
        self.append(Action::AddMemberRole {
            user_id: user_id.to_string(),
            role_name: role_name.to_string(),
            lockboxes,
        })
    }

    /// Revoke a role. Demoting an admin rotates the admin keys.
    pub fn remove_member_role(&mut self, user_id: &str, role_name: &str) -> Result<Hash> {
        let lockboxes = if role_name == ADMIN_ROLE {
            self.rotate_role_keys(ADMIN_ROLE, Some(user_id))?
        } else {
            Vec::new()
        };
        self.append(Action::RemoveMemberRole {
            user_id: user_id.to_string(),
            role_name: role_name.to_string(),
            lockboxes,
        })
    }

    pub fn add_device(&mut self, device: Device) -> Result<Hash> {
        let lockboxes = vec![Lockbox::create(&self.context.user.keys, &device.keys)?];
        self.add_device_with_lockboxes(device, lockboxes)
    }

    fn add_device_with_lockboxes(
        &mut self,
        device: Device,
        lockboxes: Vec<Lockbox>,
    ) -> Result<Hash> {
        self.append(Action::AddDevice { device, lockboxes })
    }

    /// Remove a device and rotate the keys it could reach (the team's and
    /// those of its owner's roles).
    pub fn remove_device(&mut self, device_id: &DeviceId) -> Result<Hash> {
        let owner_roles = self
            .state
            .device(device_id)
            .map(|(owner, _)| owner.roles.clone())
            .unwrap_or_default();

        let mut lockboxes = self.rotate_team_keys(None)?;
        for role in &owner_roles {
            lockboxes.extend(self.rotate_role_keys(role, None)?);
        }

        self.append(Action::RemoveDevice {
            device_id: *device_id,
            lockboxes,
        })
    }

    /// Rotate our own member keys to a fresh generation.
    pub fn change_keys(&mut self) -> Result<Hash> {
        self.change_keys_internal()
    }

    fn change_keys_internal(&mut self) -> Result<Hash> {
        let current_generation = self
            .state
            .member(&self.context.user.user_id)
            .map(|m| m.keys.generation)
            .unwrap_or(0);

        let new_keys = SecretKeyset::random(Scope::member(self.context.user.user_id.as_str()))
            .with_generation(current_generation + 1);

        let mut lockboxes = Vec::new();
        // Everything we can currently reach gets re-sealed to the new
        // member keys, so rotation never orphans older generations.
        for scope in [Scope::team()] {
            let generation = self.state.generation(&scope);
            if let Some(keys) = self.keyring.get(&scope, generation) {
                lockboxes.push(Lockbox::create(keys, &new_keys.public())?);
            }
        }
        if let Some(member) = self.state.member(&self.context.user.user_id) {
            for role in member.roles.clone() {
                let scope = Scope::role(role);
                let generation = self.state.generation(&scope);
                if let Some(keys) = self.keyring.get(&scope, generation) {
                    lockboxes.push(Lockbox::create(keys, &new_keys.public())?);
                }
            }
            for device in member.devices.clone() {
                lockboxes.push(Lockbox::create(&new_keys, &device.keys)?);
            }
        }

        let action = Action::ChangeMemberKeys {
            keys: new_keys.public(),
            lockboxes,
        };
        self.keyring.add(new_keys.clone());
        let hash = self.append(action)?;
        self.context.user.keys = new_keys;
        Ok(hash)
    }

    // -----------------------------------------------------------------------
    // Invitations
    // -----------------------------------------------------------------------

    /// Post an invitation for `seed`. The seed travels out-of-band.
    pub fn invite(
        &mut self,
        seed: &str,
        max_uses: u32,
        expiration_ms: u64,
        user_id: Option<String>,
    ) -> Result<InvitationId> {
        let invitation = invite::create(seed, max_uses, expiration_ms, user_id)?;
        let id = invitation.id;
        self.append(Action::Invite { invitation })?;
        Ok(id)
    }

    pub fn revoke_invitation(&mut self, id: InvitationId) -> Result<Hash> {
        self.append(Action::RevokeInvitation { id })
    }

    /// Admit an invitee whose proof checks out. `member_keys` and
    /// `device` come from the invitee's hello.
    pub fn admit(
        &mut self,
        proof: ProofOfInvitation,
        member_keys: PublicKeyset,
        device: Device,
    ) -> Result<Hash> {
        let entry = self
            .state
            .invitations
            .get(&proof.id)
            .ok_or(TeamError::Invite(InviteError::NotFound))?;
        if entry.revoked {
            return Err(TeamError::Invite(InviteError::Revoked));
        }
        if entry.remaining_uses == 0 {
            return Err(TeamError::Invite(InviteError::Exhausted));
        }
        let expiration = entry.invitation.expiration_ms;
        if expiration > 0 && now_ms() > expiration {
            return Err(TeamError::Invite(InviteError::Expired));
        }
        invite::validate_proof(&proof, &entry.invitation)?;

        let member = Member {
            user_id: proof.user_id.clone(),
            keys: member_keys.clone(),
            roles: vec![],
            devices: vec![device],
        };
        let lockboxes = vec![Lockbox::create(&self.team_keys()?, &member_keys)?];

        self.append(Action::Admit {
            id: proof.id,
            proof,
            member,
            lockboxes,
        })
    }

    // -----------------------------------------------------------------------
    // Messages and naming
    // -----------------------------------------------------------------------

    pub fn set_team_name(&mut self, team_name: &str) -> Result<Hash> {
        self.append(Action::SetTeamName {
            team_name: team_name.to_string(),
        })
    }

    pub fn add_message(&mut self, message: Vec<u8>) -> Result<Hash> {
        self.append(Action::AddMessage { message })
    }

    pub fn add_server(&mut self, server: Server) -> Result<Hash> {
        let lockboxes = vec![Lockbox::create(&self.team_keys()?, &server.keys)?];
        self.append(Action::AddServer { server, lockboxes })
    }

    pub fn remove_server(&mut self, host: &str) -> Result<Hash> {
        let lockboxes = self.rotate_team_keys(None)?;
        self.append(Action::RemoveServer {
            host: host.to_string(),
            lockboxes,
        })
    }

    // -----------------------------------------------------------------------
    // Crypto surface
    // -----------------------------------------------------------------------

    /// Encrypt under the current generation of `scope`'s key.
    pub fn encrypt(&self, plaintext: &[u8], scope: &Scope) -> Result<Encrypted> {
        let generation = self.state.generation(scope);
        let keys = self
            .keyring
            .get(scope, generation)
            .ok_or_else(|| TeamError::KeysUnavailable {
                scope: scope.clone(),
                generation,
            })?;
        let ciphertext = symmetric::encrypt(plaintext, &keys.symmetric_key())?;
        Ok(Encrypted {
            scope: scope.clone(),
            generation,
            ciphertext,
        })
    }

    /// Decrypt an envelope from any generation still reachable through
    /// the lockbox graph.
    pub fn decrypt(&self, envelope: &Encrypted) -> Result<Vec<u8>> {
        let keys = self
            .keyring
            .get(&envelope.scope, envelope.generation)
            .ok_or_else(|| TeamError::KeysUnavailable {
                scope: envelope.scope.clone(),
                generation: envelope.generation,
            })?;
        Ok(symmetric::decrypt(&envelope.ciphertext, &keys.symmetric_key())?)
    }

    /// Sign as the local member.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        self.context.user.keys.sign(data)
    }

    /// Verify a member's signature.
    pub fn verify(&self, data: &[u8], signature: &[u8; 64], user_id: &str) -> Result<bool> {
        let member = self
            .state
            .member(user_id)
            .ok_or_else(|| TeamError::NotMember(user_id.to_string()))?;
        crate::crypto::signing::verify(data, signature, &member.keys.signing)
            .map_err(|_| TeamError::NotMember(user_id.to_string()))
    }

    pub fn team_keys(&self) -> Result<SecretKeyset> {
        self.current_keys(&Scope::team())
    }

    pub fn admin_keys(&self) -> Result<SecretKeyset> {
        self.current_keys(&Scope::role(ADMIN_ROLE))
    }

    pub fn role_keys(&self, role_name: &str) -> Result<SecretKeyset> {
        self.current_keys(&Scope::role(role_name))
    }

    fn current_keys(&self, scope: &Scope) -> Result<SecretKeyset> {
        let generation = self.state.generation(scope);
        self.keyring
            .get(scope, generation)
            .cloned()
            .ok_or_else(|| TeamError::KeysUnavailable {
                scope: scope.clone(),
                generation,
            })
    }

    // -----------------------------------------------------------------------
    // Sync
    // -----------------------------------------------------------------------

    /// Merge a peer's full graph.
    pub fn merge(&mut self, other: &SignedGraph) -> Result<Hash> {
        let before = self.graph.head();
        let head = self.graph.merge(other)?;
        if head != before {
            self.refresh()?;
        }
        Ok(head)
    }

    /// Merge links received over the wire.
    pub fn receive_links(&mut self, their_head: Hash, links: Vec<Link>) -> Result<Hash> {
        let before = self.graph.head();
        let head = self.graph.merge_remote(their_head, links)?;
        if head != before {
            self.refresh()?;
        }
        Ok(head)
    }

    /// Re-linearize and re-reduce the whole graph, then refresh the
    /// keyring from the resulting lockboxes.
    fn refresh(&mut self) -> Result<()> {
        let seq = sequence::sequence(&self.graph, &strong_remove_resolver)?;
        self.state = reducer::reduce(TeamState::default(), &seq);
        self.keyring.absorb(&self.state.lockboxes);
        self.events.push(TeamEvent::Updated {
            head: self.graph.head(),
        });
        Ok(())
    }

    /// Validate, append, and apply a single action.
    fn append(&mut self, action: Action) -> Result<Hash> {
        let link = SignedLink::create(
            &action,
            vec![self.graph.head()],
            self.context.author(),
            self.context.device.keys.signing_secret(),
            now_ms(),
        )?;

        // Apply to a scratch state first so a rejected action never
        // lands on the graph.
        let mut next_state = self.state.clone();
        reducer::apply_link(&mut next_state, &link)?;

        let hash = link.hash;
        self.graph.merge_remote(hash, vec![Link::Signed(link)])?;
        self.state = next_state;
        self.keyring.absorb(&self.state.lockboxes);
        self.events.push(TeamEvent::Updated { head: hash });
        Ok(hash)
    }

    // -----------------------------------------------------------------------
    // Rotation helpers
    // -----------------------------------------------------------------------

    /// New team keys at the next generation, sealed to every member
    /// except `excluded`.
    fn rotate_team_keys(&self, excluded: Option<&str>) -> Result<Vec<Lockbox>> {
        let current = self.team_keys()?;
        let next = current.next_generation();
        let mut lockboxes = Vec::new();
        for member in &self.state.members {
            if Some(member.user_id.as_str()) == excluded {
                continue;
            }
            lockboxes.push(Lockbox::create(&next, &member.keys)?);
        }
        Ok(lockboxes)
    }

    /// New role keys at the next generation, sealed to every holder of
    /// the role except `excluded`.
    fn rotate_role_keys(&self, role_name: &str, excluded: Option<&str>) -> Result<Vec<Lockbox>> {
        let current = match self.role_keys(role_name) {
            Ok(keys) => keys,
            Err(_) => {
                // We never held this role's keys; rotation is someone
                // else's to perform.
                warn!("cannot rotate keys for role {role_name}: not reachable from this device");
                return Ok(Vec::new());
            }
        };
        let next = current.next_generation();
        let mut lockboxes = Vec::new();
        for member in self.state.members_with_role(role_name) {
            if Some(member.user_id.as_str()) == excluded {
                continue;
            }
            lockboxes.push(Lockbox::create(&next, &member.keys)?);
        }
        Ok(lockboxes)
    }
}

impl std::fmt::Debug for Team {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Team({} members={} head={})",
            self.state.team_name,
            self.state.members.len(),
            self.graph.head()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
