//! The multi-share coordinator.
//!
//! One per process. Owns every share this device participates in —
//! private teams, invitation handoffs in progress, and public anonymous
//! groups — and multiplexes all of their pairwise connections over a
//! single transport. Messages that arrive before their connection exists
//! are buffered by `(share id, peer id)` and replayed once the peer
//! candidate shows up.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::debug;
use thiserror::Error;

use crate::connection::anonymous::AnonymousConnection;
use crate::connection::connection::{Connection, ConnectionLike};
use crate::connection::message::WireMessage;
use crate::connection::state::{ConnectionEvent, ConnectionState};
use crate::storage::{self, ShareRecord, ShareStore, StorageError};
use crate::team::team::{LocalContext, Team, TeamError, TeamEvent};

#[derive(Error, Debug)]
pub enum CoordinatorError {
    #[error("Share {0} already exists")]
    DuplicateShare(String),

    #[error("Share {0} not found")]
    ShareNotFound(String),

    #[error("Team error: {0}")]
    Team(#[from] TeamError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

// ---------------------------------------------------------------------------
// Shares
// ---------------------------------------------------------------------------

/// What the coordinator knows about one share.
pub enum Share {
    /// A private team we are a member of.
    Team {
        team: Arc<Mutex<Team>>,
        document_ids: Vec<String>,
    },
    /// A team we hold an invitation to but have not joined yet.
    Invitation { seed: String, context: LocalContext },
    /// A public anonymous group held together by a pre-shared key.
    Public { pre_shared_key: Vec<u8> },
}

/// A connection plus the typed access the trait hides.
enum Link {
    Team(Connection),
    Anonymous(AnonymousConnection),
}

impl Link {
    fn as_connection(&mut self) -> &mut dyn ConnectionLike {
        match self {
            Link::Team(c) => c,
            Link::Anonymous(c) => c,
        }
    }

    fn state(&self) -> ConnectionState {
        match self {
            Link::Team(c) => c.state(),
            Link::Anonymous(c) => c.state(),
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    local_id: String,
    shares: BTreeMap<String, Share>,
    connections: BTreeMap<(String, String), Link>,
    buffered: BTreeMap<(String, String), Vec<WireMessage>>,
    events: Vec<(String, String, ConnectionEvent)>,
}

impl Coordinator {
    pub fn new(local_id: &str) -> Self {
        Coordinator {
            local_id: local_id.to_string(),
            shares: BTreeMap::new(),
            connections: BTreeMap::new(),
            buffered: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Share registry
    // -----------------------------------------------------------------------

    pub fn add_team_share(&mut self, share_id: &str, team: Team) -> Result<Arc<Mutex<Team>>> {
        if self.shares.contains_key(share_id) {
            return Err(CoordinatorError::DuplicateShare(share_id.to_string()));
        }
        let team = Arc::new(Mutex::new(team));
        self.shares.insert(
            share_id.to_string(),
            Share::Team {
                team: team.clone(),
                document_ids: Vec::new(),
            },
        );
        Ok(team)
    }

    /// Register a share we will join through an invitation on first
    /// contact with a member.
    pub fn add_invitation_share(
        &mut self,
        share_id: &str,
        seed: &str,
        context: LocalContext,
    ) -> Result<()> {
        if self.shares.contains_key(share_id) {
            return Err(CoordinatorError::DuplicateShare(share_id.to_string()));
        }
        self.shares.insert(
            share_id.to_string(),
            Share::Invitation {
                seed: seed.to_string(),
                context,
            },
        );
        Ok(())
    }

    pub fn add_public_share(&mut self, share_id: &str, pre_shared_key: &[u8]) -> Result<()> {
        if self.shares.contains_key(share_id) {
            return Err(CoordinatorError::DuplicateShare(share_id.to_string()));
        }
        self.shares.insert(
            share_id.to_string(),
            Share::Public {
                pre_shared_key: pre_shared_key.to_vec(),
            },
        );
        Ok(())
    }

    /// Tear down a share and every connection under it.
    pub fn remove_share(&mut self, share_id: &str) -> Result<()> {
        if self.shares.remove(share_id).is_none() {
            return Err(CoordinatorError::ShareNotFound(share_id.to_string()));
        }
        let keys: Vec<(String, String)> = self
            .connections
            .keys()
            .filter(|(sid, _)| sid == share_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(mut link) = self.connections.remove(&key) {
                link.as_connection().stop();
                self.collect(&key, &mut link);
            }
        }
        self.buffered.retain(|(sid, _), _| sid != share_id);
        Ok(())
    }

    pub fn share_ids(&self) -> Vec<&str> {
        self.shares.keys().map(String::as_str).collect()
    }

    pub fn team(&self, share_id: &str) -> Option<Arc<Mutex<Team>>> {
        match self.shares.get(share_id) {
            Some(Share::Team { team, .. }) => Some(team.clone()),
            _ => None,
        }
    }

    pub fn add_document(&mut self, share_id: &str, document_id: &str) -> Result<()> {
        match self.shares.get_mut(share_id) {
            Some(Share::Team { document_ids, .. }) => {
                if !document_ids.iter().any(|d| d == document_id) {
                    document_ids.push(document_id.to_string());
                }
                Ok(())
            }
            _ => Err(CoordinatorError::ShareNotFound(share_id.to_string())),
        }
    }

    // -----------------------------------------------------------------------
    // Peers
    // -----------------------------------------------------------------------

    /// A peer candidate appeared on the transport: optimistically start
    /// one connection per share. At most one will reach `connected`.
    pub fn connect(&mut self, peer_id: &str) {
        let share_ids: Vec<String> = self.shares.keys().cloned().collect();
        for share_id in share_ids {
            let key = (share_id.clone(), peer_id.to_string());
            if self.connections.contains_key(&key) {
                continue;
            }
            let link = match self.shares.get(&share_id) {
                Some(Share::Team { team, .. }) => {
                    let mut connection = Connection::new(&self.local_id, peer_id, team.clone());
                    connection.start();
                    Link::Team(connection)
                }
                Some(Share::Invitation { seed, context }) => {
                    let mut connection =
                        Connection::new_invitee(&self.local_id, peer_id, seed, context.clone());
                    connection.start();
                    Link::Team(connection)
                }
                Some(Share::Public { pre_shared_key }) => {
                    let mut connection =
                        AnonymousConnection::new(&self.local_id, peer_id, pre_shared_key);
                    connection.start();
                    Link::Anonymous(connection)
                }
                None => continue,
            };
            self.connections.insert(key.clone(), link);

            // Replay anything that arrived before the peer did.
            if let Some(pending) = self.buffered.remove(&key) {
                debug!("replaying {} buffered messages for {key:?}", pending.len());
                if let Some(link) = self.connections.get_mut(&key) {
                    for message in pending {
                        link.as_connection().deliver(message);
                    }
                }
            }
        }
    }

    /// A peer went away; stop all of its connections.
    pub fn disconnect_peer(&mut self, peer_id: &str) {
        let keys: Vec<(String, String)> = self
            .connections
            .keys()
            .filter(|(_, pid)| pid == peer_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(mut link) = self.connections.remove(&key) {
                link.as_connection().stop();
                self.collect(&key, &mut link);
            }
        }
    }

    /// Route one inbound message, buffering if the connection does not
    /// exist yet.
    pub fn deliver(&mut self, share_id: &str, peer_id: &str, message: WireMessage) {
        let key = (share_id.to_string(), peer_id.to_string());
        match self.connections.get_mut(&key) {
            Some(link) => link.as_connection().deliver(message),
            None => self.buffered.entry(key).or_default().push(message),
        }
    }

    /// The connected share to use for application traffic to `peer_id`.
    /// With several matches, the lowest share id wins.
    pub fn share_for_peer(&self, peer_id: &str) -> Option<&str> {
        self.connections
            .iter()
            .filter(|((_, pid), link)| pid == peer_id && link.state() == ConnectionState::Connected)
            .map(|((sid, _), _)| sid.as_str())
            .next()
    }

    // -----------------------------------------------------------------------
    // Pumping
    // -----------------------------------------------------------------------

    /// Drive timers, propagate local team updates to live connections,
    /// adopt teams from completed invitations, and return everything
    /// queued for the transport.
    pub fn pump(&mut self, now_ms: u64) -> Vec<(String, WireMessage)> {
        // Local team changes fan out as updates on live connections.
        let mut heads = Vec::new();
        for (share_id, share) in &self.shares {
            if let Share::Team { team, .. } = share {
                let mut team = team.lock().unwrap();
                for event in team.take_events() {
                    let TeamEvent::Updated { head } = event;
                    heads.push((share_id.clone(), head));
                }
            }
        }
        for (share_id, head) in heads {
            for ((sid, _), link) in self.connections.iter_mut() {
                if sid == &share_id {
                    if let Link::Team(connection) = link {
                        connection.notify_local_update(head);
                    }
                }
            }
        }

        // Adopt teams from invitation shares whose connection joined.
        let mut adopted: Vec<(String, Arc<Mutex<Team>>)> = Vec::new();
        for ((share_id, _), link) in self.connections.iter() {
            if let (Some(Share::Invitation { .. }), Link::Team(connection)) =
                (self.shares.get(share_id), link)
            {
                if let Some(team) = connection.team() {
                    adopted.push((share_id.clone(), team));
                }
            }
        }
        for (share_id, team) in adopted {
            self.shares.insert(
                share_id,
                Share::Team {
                    team,
                    document_ids: Vec::new(),
                },
            );
        }

        // Timers, outboxes, events.
        let mut outgoing = Vec::new();
        let keys: Vec<(String, String)> = self.connections.keys().cloned().collect();
        for key in keys {
            if let Some(link) = self.connections.get_mut(&key) {
                let connection = link.as_connection();
                connection.check_deadline(now_ms);
                for message in connection.take_outbox() {
                    outgoing.push((key.0.clone(), message));
                }
                for event in connection.take_events() {
                    self.events.push((key.0.clone(), key.1.clone(), event));
                }
            }
        }
        outgoing
    }

    /// Events from all connections since the last call, as
    /// `(share_id, peer_id, event)`.
    pub fn take_events(&mut self) -> Vec<(String, String, ConnectionEvent)> {
        std::mem::take(&mut self.events)
    }

    fn collect(&mut self, key: &(String, String), link: &mut Link) {
        let connection = link.as_connection();
        for event in connection.take_events() {
            self.events.push((key.0.clone(), key.1.clone(), event));
        }
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Persist every private team share: serialized graph plus the
    /// keyring sealed with that team's local device key.
    pub fn save(&self) -> Result<Vec<u8>> {
        let mut store = ShareStore::new();
        for (share_id, share) in &self.shares {
            if let Share::Team { team, document_ids } = share {
                let team = team.lock().unwrap();
                let sealed_keyring =
                    storage::seal_keyring(&team.export_keyring(), &team.context().device.keys)?;
                store.insert(
                    share_id,
                    ShareRecord {
                        serialized_graph: team.save()?,
                        sealed_keyring,
                        document_ids: document_ids.clone(),
                    },
                );
            }
        }
        Ok(store.pack()?)
    }

    /// Restore one share from a persisted record. The context must be
    /// the same device that sealed the keyring.
    pub fn restore_team_share(
        &mut self,
        share_id: &str,
        record: &ShareRecord,
        context: LocalContext,
    ) -> Result<Arc<Mutex<Team>>> {
        let keys = storage::open_keyring(&record.sealed_keyring, &context.device.keys)?;
        let mut team = Team::load(&record.serialized_graph, context)?;
        team.import_keyring(keys);

        let team = Arc::new(Mutex::new(team));
        self.shares.insert(
            share_id.to_string(),
            Share::Team {
                team: team.clone(),
                document_ids: record.document_ids.clone(),
            },
        );
        Ok(team)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::now_ms;
    use crate::team::team::LocalContext;

    fn coordinator_pair(share_id: &str) -> (Coordinator, Coordinator) {
        let alice = LocalContext::generate("alice");
        let bob = LocalContext::generate("bob");

        let mut alice_team = Team::create("devs", alice).unwrap();
        alice_team.add(bob.member_record(), vec![]).unwrap();
        let bob_team = Team::load(&alice_team.save().unwrap(), bob).unwrap();

        let mut a = Coordinator::new("alice");
        let mut b = Coordinator::new("bob");
        a.add_team_share(share_id, alice_team).unwrap();
        b.add_team_share(share_id, bob_team).unwrap();
        (a, b)
    }

    /// Exchange transport traffic until both coordinators go quiet.
    fn pump_pair(a: &mut Coordinator, b: &mut Coordinator) {
        for _ in 0..30 {
            let from_a = a.pump(now_ms());
            let from_b = b.pump(now_ms());
            if from_a.is_empty() && from_b.is_empty() {
                break;
            }
            for (share_id, message) in from_a {
                let sender = message.sender_id.clone();
                b.deliver(&share_id, &sender, message);
            }
            for (share_id, message) in from_b {
                let sender = message.sender_id.clone();
                a.deliver(&share_id, &sender, message);
            }
        }
    }

    #[test]
    fn test_peers_connect_through_coordinators() {
        let (mut a, mut b) = coordinator_pair("team-1");
        a.connect("bob");
        b.connect("alice");
        pump_pair(&mut a, &mut b);

        assert_eq!(a.share_for_peer("bob"), Some("team-1"));
        assert_eq!(b.share_for_peer("alice"), Some("team-1"));
        assert!(a
            .take_events()
            .iter()
            .any(|(sid, pid, event)| sid == "team-1"
                && pid == "bob"
                && *event == ConnectionEvent::Connected));
    }

    #[test]
    fn test_early_messages_are_buffered() {
        let (mut a, mut b) = coordinator_pair("team-1");

        // Bob speaks first; Alice has not seen the peer candidate yet.
        b.connect("alice");
        for (share_id, message) in b.pump(now_ms()) {
            let sender = message.sender_id.clone();
            a.deliver(&share_id, &sender, message);
        }
        assert_eq!(a.share_for_peer("bob"), None);

        // Once the candidate arrives, the buffer replays.
        a.connect("bob");
        pump_pair(&mut a, &mut b);
        assert_eq!(a.share_for_peer("bob"), Some("team-1"));
    }

    #[test]
    fn test_lowest_share_id_wins_for_routing() {
        let (mut a, mut b) = coordinator_pair("team-b");
        // A second, lexicographically-smaller share over the same pair.
        a.add_public_share("team-a", b"shared lobby key").unwrap();
        b.add_public_share("team-a", b"shared lobby key").unwrap();

        a.connect("bob");
        b.connect("alice");
        pump_pair(&mut a, &mut b);

        assert_eq!(a.share_for_peer("bob"), Some("team-a"));
    }

    #[test]
    fn test_local_updates_propagate_between_coordinators() {
        let (mut a, mut b) = coordinator_pair("team-1");
        a.connect("bob");
        b.connect("alice");
        pump_pair(&mut a, &mut b);

        {
            let team = a.team("team-1").unwrap();
            team.lock().unwrap().add_role("managers").unwrap();
        }
        pump_pair(&mut a, &mut b);

        let bob_team = b.team("team-1").unwrap();
        let bob_team = bob_team.lock().unwrap();
        assert!(bob_team.state().has_role("managers"));
    }

    #[test]
    fn test_invitation_share_adopts_team() {
        let alice = LocalContext::generate("alice");
        let mut alice_team = Team::create("devs", alice).unwrap();
        let seed = crate::invite::random_seed();
        alice_team.invite(&seed, 1, 0, None).unwrap();

        let mut a = Coordinator::new("alice");
        a.add_team_share("team-1", alice_team).unwrap();

        let charlie = LocalContext::generate("charlie");
        let mut c = Coordinator::new("charlie");
        c.add_invitation_share("team-1", &seed, charlie).unwrap();

        a.connect("charlie");
        c.connect("alice");
        pump_pair(&mut a, &mut c);

        // The invitation share became a team share holding the graph.
        let charlie_team = c.team("team-1").expect("invitation share was adopted");
        assert!(charlie_team.lock().unwrap().state().has_member("charlie"));
    }

    #[test]
    fn test_save_and_restore_share() {
        let (a, _) = coordinator_pair("team-1");
        let context = {
            let team = a.team("team-1").unwrap();
            let team = team.lock().unwrap();
            team.context().clone()
        };

        let packed = a.save().unwrap();
        let store = ShareStore::unpack(&packed).unwrap();
        let record = store.get("team-1").unwrap();

        let mut restored = Coordinator::new("alice");
        let team = restored
            .restore_team_share("team-1", record, context)
            .unwrap();
        let team = team.lock().unwrap();
        assert_eq!(team.team_name(), "devs");
        assert!(team.team_keys().is_ok());
    }

    #[test]
    fn test_remove_share_stops_connections() {
        let (mut a, mut b) = coordinator_pair("team-1");
        a.connect("bob");
        b.connect("alice");
        pump_pair(&mut a, &mut b);
        assert_eq!(a.share_for_peer("bob"), Some("team-1"));

        a.remove_share("team-1").unwrap();
        assert_eq!(a.share_for_peer("bob"), None);
        assert!(a.team("team-1").is_none());
    }
}
