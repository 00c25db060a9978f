/// The pairwise connection protocol.
///
/// One `Connection` per peer. The machine is fed wire messages through
/// [`ConnectionLike::deliver`], holds an outbox the owner drains toward
/// the transport, and surfaces progress as typed events. All crypto for
/// the session happens here: mutual identity proof against the team's
/// recorded device keys, then an order-independent session key from two
/// sealed seeds.
///
/// The machine is synchronous; timeouts are enforced by the owner
/// calling [`ConnectionLike::check_deadline`] with the current time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use zeroize::Zeroizing;

use crate::connection::message::{
    Challenge, ErrorKind, IdentityClaim, InviteeClaim, MessageBody, WireMessage,
};
use crate::connection::state::{ConnectionEvent, ConnectionState, DisconnectReason};
use crate::crypto::hashing::{self, contexts, Hash};
use crate::crypto::{now_ms, sealed};
use crate::invite;
use crate::keyset::SecretKeyset;
use crate::team::team::{LocalContext, Team, TeamError};

/// Deadline for every state that waits on a single expected message.
pub const TIMEOUT_MS: u64 = 7_000;
/// A signed challenge older than this is stale.
const CHALLENGE_MAX_AGE_MS: u64 = 60_000;
/// Sync exchanges before we declare no progress.
const MAX_SYNC_ROUNDS: u32 = 32;

// ---------------------------------------------------------------------------
// ConnectionLike
// ---------------------------------------------------------------------------

/// The surface shared by authenticated and anonymous connections, so the
/// coordinator can hold either behind one interface.
pub trait ConnectionLike {
    fn state(&self) -> ConnectionState;
    fn peer_id(&self) -> &str;
    /// Feed one wire message. Out-of-order messages are buffered by
    /// `index` and processed in sequence.
    fn deliver(&mut self, message: WireMessage);
    /// Request shutdown: tells the peer, then disconnects locally.
    fn stop(&mut self);
    /// Messages queued for the transport since the last call.
    fn take_outbox(&mut self) -> Vec<WireMessage>;
    /// Events since the last call.
    fn take_events(&mut self) -> Vec<ConnectionEvent>;
    /// Fail the connection if its current wait has exceeded the deadline.
    fn check_deadline(&mut self, now_ms: u64);
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// What we are connecting as: an established member, or an invitee that
/// will adopt the team from the peer.
enum Identity {
    Member,
    Invitee { seed: String, context: LocalContext },
}

pub struct Connection {
    local_id: String,
    peer_id: String,

    identity: Identity,
    team: Option<Arc<Mutex<Team>>>,
    device_keys: SecretKeyset,

    state: ConnectionState,
    our_identity_proven: bool,
    their_identity_verified: bool,
    peer_claim: Option<IdentityClaim>,
    outstanding_challenge: Option<Challenge>,

    our_seed: [u8; 32],
    our_seed_sent: bool,
    their_seed: Option<Zeroizing<[u8; 32]>>,
    session_key: Option<Zeroizing<[u8; 32]>>,

    their_head: Option<Hash>,
    their_hashes: BTreeSet<Hash>,
    sync_rounds: u32,

    next_send_index: u64,
    next_recv_index: u64,
    reorder_buffer: BTreeMap<u64, WireMessage>,

    outbox: Vec<WireMessage>,
    events: Vec<ConnectionEvent>,
    deadline_ms: Option<u64>,
}

impl Connection {
    /// Connect as an established member of `team`.
    pub fn new(local_id: &str, peer_id: &str, team: Arc<Mutex<Team>>) -> Self {
        let device_keys = team.lock().unwrap().context().device.keys.clone();
        Connection {
            local_id: local_id.to_string(),
            peer_id: peer_id.to_string(),
            identity: Identity::Member,
            team: Some(team),
            device_keys,
            state: ConnectionState::Idle,
            our_identity_proven: false,
            their_identity_verified: false,
            peer_claim: None,
            outstanding_challenge: None,
            our_seed: random_seed(),
            our_seed_sent: false,
            their_seed: None,
            session_key: None,
            their_head: None,
            their_hashes: BTreeSet::new(),
            sync_rounds: 0,
            next_send_index: 0,
            next_recv_index: 0,
            reorder_buffer: BTreeMap::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            deadline_ms: None,
        }
    }

    /// Connect as an invitee holding `seed`. The team is adopted from
    /// the peer once the invitation is accepted.
    pub fn new_invitee(local_id: &str, peer_id: &str, seed: &str, context: LocalContext) -> Self {
        let device_keys = context.device.keys.clone();
        Connection {
            local_id: local_id.to_string(),
            peer_id: peer_id.to_string(),
            identity: Identity::Invitee {
                seed: seed.to_string(),
                context,
            },
            team: None,
            device_keys,
            state: ConnectionState::Idle,
            our_identity_proven: false,
            their_identity_verified: false,
            peer_claim: None,
            outstanding_challenge: None,
            our_seed: random_seed(),
            our_seed_sent: false,
            their_seed: None,
            session_key: None,
            their_head: None,
            their_hashes: BTreeSet::new(),
            sync_rounds: 0,
            next_send_index: 0,
            next_recv_index: 0,
            reorder_buffer: BTreeMap::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            deadline_ms: None,
        }
    }

    /// After a successful invitation handoff, the team the invitee
    /// adopted. The coordinator picks this up to own the share.
    pub fn team(&self) -> Option<Arc<Mutex<Team>>> {
        self.team.clone()
    }

    /// Session key once connected.
    pub fn session_key(&self) -> Option<&[u8; 32]> {
        self.session_key.as_deref()
    }

    /// Kick off the protocol: send our hello.
    pub fn start(&mut self) {
        if self.state != ConnectionState::Idle {
            return;
        }
        self.state = ConnectionState::Connecting;
        let hello = self.build_hello();
        match hello {
            Ok(body) => {
                self.send(body);
                self.arm_deadline();
            }
            Err(err) => self.fail(ErrorKind::Unexpected, &format!("cannot start: {err}")),
        }
    }

    /// The local team's head moved; push the new links if we are live.
    pub fn notify_local_update(&mut self, head: Hash) {
        if self.state != ConnectionState::Connected || self.their_head == Some(head) {
            return;
        }
        let Some(team_arc) = self.team.clone() else { return };
        let team = team_arc.lock().unwrap();

        // We tracked what the peer holds during sync, so we can push
        // directly instead of waiting for them to ask.
        let push: Vec<Hash> = team
            .graph()
            .hashes()
            .into_iter()
            .filter(|h| !self.their_hashes.contains(h))
            .collect();
        if push.is_empty() {
            drop(team);
            self.send_update();
            return;
        }
        match team.graph().links_for(&push) {
            Ok(links) => {
                let our_head = team.head();
                drop(team);
                self.their_hashes.extend(push);
                self.send(MessageBody::MissingLinks {
                    head: our_head,
                    links,
                });
            }
            Err(_) => {
                drop(team);
                self.send_update();
            }
        }
    }

    // -----------------------------------------------------------------------
    // Hello
    // -----------------------------------------------------------------------

    fn build_hello(&self) -> Result<MessageBody, TeamError> {
        match &self.identity {
            Identity::Member => {
                let team = self.team.as_ref().expect("member connection has a team");
                let team = team.lock().unwrap();
                let context = team.context();
                Ok(MessageBody::Hello {
                    claim: IdentityClaim {
                        user_id: context.user.user_id.clone(),
                        device: context.device_record(),
                    },
                    invitation: None,
                })
            }
            Identity::Invitee { seed, context } => {
                let proof = invite::generate_proof(seed, &context.user.user_id)?;
                let normalized = invite::normalize_seed(seed)?;
                let starter = invite::starter_member_keys(&normalized, &context.user.user_id);
                Ok(MessageBody::Hello {
                    claim: IdentityClaim {
                        user_id: context.user.user_id.clone(),
                        device: context.device_record(),
                    },
                    invitation: Some(InviteeClaim {
                        proof,
                        member_keys: starter.public(),
                        device: context.device_record(),
                    }),
                })
            }
        }
    }

    fn handle_hello(&mut self, claim: IdentityClaim, invitation: Option<InviteeClaim>) {
        let we_are_invitee = matches!(self.identity, Identity::Invitee { .. });
        match (we_are_invitee, invitation) {
            (true, Some(_)) => {
                self.fail(ErrorKind::NeitherIsMember, "both sides hold invitations");
            }
            (true, None) => {
                // We wait for AcceptInvitation; remember who we talk to.
                self.peer_claim = Some(claim);
                self.arm_deadline();
            }
            (false, Some(invitee)) => {
                self.admit_invitee(claim, invitee);
            }
            (false, None) => {
                self.challenge_member(claim);
            }
        }
    }

    /// Member receives a member's hello: check the claim against the
    /// team and issue a challenge.
    fn challenge_member(&mut self, claim: IdentityClaim) {
        let team = self.team.as_ref().expect("member connection has a team");
        let team = team.lock().unwrap();
        let state = team.state();

        if state.was_removed(&claim.user_id) || state.device_was_removed(&claim.device.device_id) {
            drop(team);
            self.fail(ErrorKind::PeerRemoved, "peer was removed from the team");
            return;
        }
        if !state.has_member(&claim.user_id) {
            drop(team);
            self.fail(ErrorKind::RejectIdentity, "unknown user");
            return;
        }
        let device_known = state
            .device(&claim.device.device_id)
            .map(|(owner, device)| {
                owner.user_id == claim.user_id
                    && device.keys.signing == claim.device.keys.signing
            })
            .unwrap_or(false);
        drop(team);
        if !device_known {
            self.fail(ErrorKind::RejectIdentity, "unknown device");
            return;
        }

        let challenge = Challenge::new(&claim.user_id, claim.device.device_id, now_ms());
        self.outstanding_challenge = Some(challenge.clone());
        self.peer_claim = Some(claim);
        self.send(MessageBody::ChallengeIdentity { challenge });
        self.arm_deadline();
    }

    /// Member receives an invitee's hello: validate the proof, post the
    /// admission, and hand over the graph.
    fn admit_invitee(&mut self, claim: IdentityClaim, invitee: InviteeClaim) {
        let team_arc = self
            .team
            .as_ref()
            .expect("member connection has a team")
            .clone();
        let mut team = team_arc.lock().unwrap();

        let admitted = team.admit(
            invitee.proof.clone(),
            invitee.member_keys.clone(),
            invitee.device.clone(),
        );
        if let Err(err) = admitted {
            drop(team);
            self.fail(ErrorKind::RejectInvitation, &format!("{err}"));
            return;
        }

        let serialized = match team.save() {
            Ok(bytes) => bytes,
            Err(err) => {
                drop(team);
                self.fail(ErrorKind::Unexpected, &format!("{err}"));
                return;
            }
        };
        drop(team);

        self.peer_claim = Some(claim);
        self.their_identity_verified = true;
        self.send(MessageBody::AcceptInvitation {
            serialized_graph: serialized,
        });
        // The proof already authenticated them; skip the challenge and
        // hand over our seed half directly.
        self.send_seed_to(&invitee.device.keys.encryption, true);
        self.maybe_enter_sync();
        self.arm_deadline();
    }

    /// Invitee receives the graph: adopt it, verify our invitation is on
    /// it, and post our device and real keys.
    fn handle_accept_invitation(&mut self, serialized_graph: Vec<u8>) {
        let invitee = match &self.identity {
            Identity::Invitee { seed, context } => Some((seed.clone(), context.clone())),
            Identity::Member => None,
        };
        let Some((seed, context)) = invitee else {
            self.fail(ErrorKind::Unexpected, "we did not present an invitation");
            return;
        };

        match Team::join(&serialized_graph, &seed, context) {
            Ok(team) => {
                self.team = Some(Arc::new(Mutex::new(team)));
                self.our_identity_proven = true;
                self.their_identity_verified = true;
                let peer_encryption = self.peer_device_encryption_key();
                match peer_encryption {
                    Some(key) => self.send_seed_to(&key, true),
                    None => {
                        // Their hello has not arrived yet; the seed goes
                        // out with negotiation instead.
                        debug!("peer hello pending; deferring seed");
                    }
                }
                self.maybe_enter_sync();
            }
            Err(TeamError::WrongTeam) => {
                self.fail(ErrorKind::RejectTeam, "our invitation is not on this graph");
            }
            Err(err) => {
                self.fail(ErrorKind::RejectTeam, &format!("{err}"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Identity challenge
    // -----------------------------------------------------------------------

    fn handle_challenge(&mut self, challenge: Challenge) {
        let ours = match &self.team {
            Some(team) => {
                let team = team.lock().unwrap();
                let context = team.context();
                challenge.user_id == context.user.user_id
                    && challenge.device_id == context.device.device_id
            }
            None => false,
        };
        if !ours {
            self.fail(ErrorKind::Unexpected, "challenge names someone else");
            return;
        }

        let signature = self.device_keys.sign(&challenge.signable());
        self.send(MessageBody::ProveIdentity {
            challenge,
            signature,
        });
        self.arm_deadline();
    }

    fn handle_prove_identity(&mut self, challenge: Challenge, signature: [u8; 64]) {
        let expected = match &self.outstanding_challenge {
            Some(expected) if expected.nonce == challenge.nonce => expected.clone(),
            _ => {
                self.fail(ErrorKind::Unexpected, "proof for a challenge we did not issue");
                return;
            }
        };
        if now_ms().saturating_sub(expected.timestamp_ms) > CHALLENGE_MAX_AGE_MS {
            self.fail(ErrorKind::RejectIdentity, "challenge expired");
            return;
        }

        // The signature must verify under the key the *team* records for
        // that device, not whatever the claim carried.
        let recorded_key = {
            let team = self.team.as_ref().expect("member connection has a team");
            let team = team.lock().unwrap();
            team.state()
                .device(&expected.device_id)
                .map(|(_, device)| device.keys.signing)
        };
        let valid = recorded_key
            .map(|key| {
                crate::crypto::signing::verify(&expected.signable(), &signature, &key)
                    .unwrap_or(false)
            })
            .unwrap_or(false);

        if !valid {
            self.fail(ErrorKind::RejectIdentity, "identity proof does not verify");
            return;
        }

        self.outstanding_challenge = None;
        self.their_identity_verified = true;
        if let Some(key) = self.peer_device_encryption_key() {
            self.send_seed_to(&key, true);
        }
        self.maybe_enter_sync();
        self.arm_deadline();
    }

    fn handle_accept_identity(&mut self, encrypted_seed: Vec<u8>) {
        if !self.store_their_seed(&encrypted_seed) {
            return;
        }
        self.our_identity_proven = true;
        self.maybe_enter_sync();
        self.arm_deadline();
    }

    fn store_their_seed(&mut self, encrypted_seed: &[u8]) -> bool {
        match sealed::open(encrypted_seed, self.device_keys.encryption_secret()) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut seed = Zeroizing::new([0u8; 32]);
                seed.copy_from_slice(&bytes);
                self.their_seed = Some(seed);
                true
            }
            _ => {
                self.fail(ErrorKind::RejectIdentity, "session seed does not open");
                false
            }
        }
    }

    /// Seal our seed half to the peer's device encryption key.
    fn send_seed_to(&mut self, encryption_key: &[u8; 32], as_accept: bool) {
        if self.our_seed_sent {
            return;
        }
        match sealed::seal(&self.our_seed, encryption_key) {
            Ok(encrypted_seed) => {
                self.our_seed_sent = true;
                if as_accept {
                    self.send(MessageBody::AcceptIdentity { encrypted_seed });
                } else {
                    self.send(MessageBody::Seed { encrypted_seed });
                }
            }
            Err(err) => self.fail(ErrorKind::Unexpected, &format!("cannot seal seed: {err}")),
        }
    }

    /// The peer's device encryption key: the team's record when we have
    /// it, else the hello claim (invitation path, where the claim was
    /// bound by the proof).
    fn peer_device_encryption_key(&self) -> Option<[u8; 32]> {
        let claim = self.peer_claim.as_ref()?;
        if let Some(team) = &self.team {
            let team = team.lock().unwrap();
            if let Some((_, device)) = team.state().device(&claim.device.device_id) {
                return Some(device.keys.encryption);
            }
        }
        Some(claim.device.keys.encryption)
    }

    fn maybe_enter_sync(&mut self) {
        if self.state == ConnectionState::Connecting
            && self.our_identity_proven
            && self.their_identity_verified
            && self.team.is_some()
        {
            self.state = ConnectionState::Synchronizing;
            self.sync_rounds = 0;
            self.send_update();
            self.arm_deadline();
        }
    }

    // -----------------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------------

    fn send_update(&mut self) {
        let Some(team) = self.team.clone() else { return };
        let team = team.lock().unwrap();
        let body = MessageBody::Update {
            root: team.graph().root(),
            head: team.head(),
            hashes: team.graph().hashes(),
        };
        drop(team);
        self.send(body);
    }

    fn handle_update(&mut self, root: Hash, head: Hash, hashes: Vec<Hash>) {
        let Some(team_arc) = self.team.clone() else {
            self.fail(ErrorKind::Unexpected, "update before the team exists");
            return;
        };
        let team = team_arc.lock().unwrap();
        if root != team.graph().root() {
            drop(team);
            self.fail(ErrorKind::RejectTeam, "update from a different team");
            return;
        }

        self.their_head = Some(head);
        self.their_hashes.extend(hashes);

        if head == team.head() {
            drop(team);
            self.finish_sync();
            return;
        }

        if self.state == ConnectionState::Connected {
            self.state = ConnectionState::Synchronizing;
            self.sync_rounds = 0;
        }

        let missing: Vec<Hash> = team
            .graph()
            .hashes()
            .into_iter()
            .filter(|h| !self.their_hashes.contains(h))
            .collect();

        if missing.is_empty() {
            // They are ahead of us; our own update advertisement tells
            // them what to push.
            drop(team);
            self.bump_sync_rounds();
            return;
        }

        let links = match team.graph().links_for(&missing) {
            Ok(links) => links,
            Err(err) => {
                drop(team);
                self.fail(ErrorKind::SyncFailed, &format!("{err}"));
                return;
            }
        };
        let our_head = team.head();
        drop(team);

        self.their_hashes.extend(missing);
        self.send(MessageBody::MissingLinks {
            head: our_head,
            links,
        });
        self.bump_sync_rounds();
        self.arm_deadline();
    }

    fn handle_missing_links(&mut self, head: Hash, links: Vec<crate::graph::link::Link>) {
        let Some(team_arc) = self.team.clone() else {
            self.fail(ErrorKind::Unexpected, "links before the team exists");
            return;
        };
        let mut team = team_arc.lock().unwrap();

        for link in &links {
            self.their_hashes.insert(link.hash());
        }
        self.their_head = Some(head);

        if let Err(err) = team.receive_links(head, links) {
            drop(team);
            self.fail(ErrorKind::SyncFailed, &format!("{err}"));
            return;
        }

        let our_head = team.head();
        self.events.push(ConnectionEvent::Updated { head: our_head });

        // The merged state may no longer include the peer.
        if !self.peer_still_present(&team) {
            drop(team);
            self.disconnect_removed_peer();
            return;
        }

        if self.their_head == Some(our_head) {
            drop(team);
            self.finish_sync();
            return;
        }

        // Push what they lack — at minimum the merge link we just minted.
        let push: Vec<Hash> = team
            .graph()
            .hashes()
            .into_iter()
            .filter(|h| !self.their_hashes.contains(h))
            .collect();
        if push.is_empty() {
            drop(team);
            self.send_update();
            self.bump_sync_rounds();
            return;
        }
        let links = match team.graph().links_for(&push) {
            Ok(links) => links,
            Err(err) => {
                drop(team);
                self.fail(ErrorKind::SyncFailed, &format!("{err}"));
                return;
            }
        };
        drop(team);

        self.their_hashes.extend(push);
        self.send(MessageBody::MissingLinks {
            head: our_head,
            links,
        });
        self.bump_sync_rounds();
        self.arm_deadline();
    }

    fn bump_sync_rounds(&mut self) {
        // Only a stuck synchronizing phase counts; live-update traffic
        // on a connected machine is unbounded by design.
        if self.state != ConnectionState::Synchronizing {
            self.sync_rounds = 0;
            return;
        }
        self.sync_rounds += 1;
        if self.sync_rounds > MAX_SYNC_ROUNDS {
            self.fail(ErrorKind::SyncFailed, "no sync progress");
        }
    }

    fn finish_sync(&mut self) {
        match self.state {
            ConnectionState::Synchronizing => {
                // A live connection that just re-synced goes straight
                // back to connected; the key is already negotiated.
                if self.session_key.is_some() {
                    self.state = ConnectionState::Connected;
                    self.deadline_ms = None;
                    return;
                }
                self.state = ConnectionState::Negotiating;
                // Confirm head equality so the peer finishes its sync
                // too. Sent only on this transition, so two negotiating
                // peers cannot ping-pong confirmations.
                self.send_update();
                if !self.our_seed_sent {
                    if let Some(key) = self.peer_device_encryption_key() {
                        self.send_seed_to(&key, false);
                    }
                }
                self.maybe_connect();
                self.arm_deadline();
            }
            ConnectionState::Negotiating => self.maybe_connect(),
            _ => {}
        }
    }

    fn maybe_connect(&mut self) {
        if self.state != ConnectionState::Negotiating {
            return;
        }
        let Some(their_seed) = &self.their_seed else {
            return;
        };

        self.session_key = Some(derive_session_key(&self.our_seed, their_seed));
        self.state = ConnectionState::Connected;
        self.deadline_ms = None;
        self.events.push(ConnectionEvent::Connected);
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn peer_still_present(&self, team: &Team) -> bool {
        match &self.peer_claim {
            Some(claim) => {
                team.state().has_member(&claim.user_id)
                    && team.state().device(&claim.device.device_id).is_some()
            }
            None => true,
        }
    }

    fn disconnect_removed_peer(&mut self) {
        self.send(MessageBody::Disconnect);
        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.events.push(ConnectionEvent::Disconnected {
            reason: DisconnectReason::PeerRemoved,
            details: "peer is no longer on the team".to_string(),
        });
    }

    fn fail(&mut self, kind: ErrorKind, details: &str) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            return;
        }
        warn!("connection to {} failed: {kind:?}: {details}", self.peer_id);
        self.send(MessageBody::Error {
            kind,
            details: details.to_string(),
        });
        self.teardown();
        self.state = ConnectionState::Failed;
        self.events.push(ConnectionEvent::LocalError {
            kind,
            details: details.to_string(),
        });
        self.events.push(ConnectionEvent::Disconnected {
            reason: DisconnectReason::Error,
            details: details.to_string(),
        });
    }

    fn handle_remote_error(&mut self, kind: ErrorKind, details: String) {
        self.teardown();
        self.state = ConnectionState::Failed;
        self.events.push(ConnectionEvent::RemoteError {
            kind,
            details: details.clone(),
        });
        self.events.push(ConnectionEvent::Disconnected {
            reason: DisconnectReason::Error,
            details,
        });
    }

    /// Session secrets do not outlive the connection.
    fn teardown(&mut self) {
        self.session_key = None;
        self.their_seed = None;
        self.deadline_ms = None;
    }

    // -----------------------------------------------------------------------
    // Plumbing
    // -----------------------------------------------------------------------

    fn send(&mut self, body: MessageBody) {
        let message = WireMessage {
            sender_id: self.local_id.clone(),
            target_id: self.peer_id.clone(),
            index: self.next_send_index,
            body,
        };
        self.next_send_index += 1;
        self.outbox.push(message);
    }

    fn arm_deadline(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            self.deadline_ms = Some(now_ms() + TIMEOUT_MS);
        }
    }

    fn process(&mut self, message: WireMessage) {
        debug!(
            "{} <- {} [{}] {}",
            self.local_id,
            message.sender_id,
            message.index,
            message.body.kind()
        );
        match message.body {
            MessageBody::Hello { claim, invitation } => self.handle_hello(claim, invitation),
            MessageBody::AcceptInvitation { serialized_graph } => {
                self.handle_accept_invitation(serialized_graph)
            }
            MessageBody::ChallengeIdentity { challenge } => self.handle_challenge(challenge),
            MessageBody::ProveIdentity {
                challenge,
                signature,
            } => self.handle_prove_identity(challenge, signature),
            MessageBody::AcceptIdentity { encrypted_seed } => {
                self.handle_accept_identity(encrypted_seed)
            }
            MessageBody::Update { root, head, hashes } => self.handle_update(root, head, hashes),
            MessageBody::MissingLinks { head, links } => self.handle_missing_links(head, links),
            MessageBody::Seed { encrypted_seed } => {
                if self.store_their_seed(&encrypted_seed) {
                    self.maybe_connect();
                }
            }
            MessageBody::LocalUpdate { head } => self.notify_local_update(head),
            MessageBody::Disconnect => {
                self.teardown();
                self.state = ConnectionState::Disconnected;
                self.events.push(ConnectionEvent::Disconnected {
                    reason: DisconnectReason::Requested,
                    details: "peer disconnected".to_string(),
                });
            }
            MessageBody::Error { kind, details } => self.handle_remote_error(kind, details),
        }
    }
}

impl ConnectionLike for Connection {
    fn state(&self) -> ConnectionState {
        self.state
    }

    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn deliver(&mut self, message: WireMessage) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            return;
        }
        if message.index < self.next_recv_index {
            debug!("dropping duplicate message index {}", message.index);
            return;
        }
        self.reorder_buffer.insert(message.index, message);

        while let Some(message) = self.reorder_buffer.remove(&self.next_recv_index) {
            self.next_recv_index += 1;
            self.process(message);
            if matches!(
                self.state,
                ConnectionState::Disconnected | ConnectionState::Failed
            ) {
                self.reorder_buffer.clear();
                break;
            }
        }
    }

    fn stop(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            return;
        }
        self.send(MessageBody::Disconnect);
        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.events.push(ConnectionEvent::Disconnected {
            reason: DisconnectReason::Requested,
            details: "stopped locally".to_string(),
        });
    }

    fn take_outbox(&mut self) -> Vec<WireMessage> {
        std::mem::take(&mut self.outbox)
    }

    fn take_events(&mut self) -> Vec<ConnectionEvent> {
        std::mem::take(&mut self.events)
    }

    fn check_deadline(&mut self, now_ms: u64) {
        if let Some(deadline) = self.deadline_ms {
            if now_ms > deadline {
                self.fail(ErrorKind::Timeout, "peer did not respond in time");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn random_seed() -> [u8; 32] {
    use rand::RngCore;
    let mut seed = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut seed);
    seed
}

/// `hash("session-key", min(seedA, seedB) || max(seedA, seedB))` — both
/// peers derive the same key regardless of who contributed which half.
pub fn derive_session_key(ours: &[u8; 32], theirs: &[u8; 32]) -> Zeroizing<[u8; 32]> {
    let (lo, hi) = if ours <= theirs {
        (ours, theirs)
    } else {
        (theirs, ours)
    };
    let mut material = [0u8; 64];
    material[..32].copy_from_slice(lo);
    material[32..].copy_from_slice(hi);
    Zeroizing::new(hashing::derive_key(contexts::SESSION_KEY, &material))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
