/// Connections for public (anonymous) shares.
///
/// There is no membership graph to authenticate against; both sides
/// already hold the share's pre-shared key out-of-band. Each peer sends
/// its session seed encrypted under a key derived from the PSK; being
/// able to decrypt is the admission test. The session key is derived the
/// same order-independent way as for team connections.

use std::collections::BTreeMap;

use log::debug;
use zeroize::Zeroizing;

use crate::connection::connection::{derive_session_key, ConnectionLike, TIMEOUT_MS};
use crate::connection::message::{ErrorKind, MessageBody, WireMessage};
use crate::connection::state::{ConnectionEvent, ConnectionState, DisconnectReason};
use crate::crypto::hashing::{self, contexts};
use crate::crypto::{now_ms, symmetric};

pub struct AnonymousConnection {
    local_id: String,
    peer_id: String,
    /// Symmetric key derived from the share's pre-shared key.
    share_key: [u8; 32],

    state: ConnectionState,
    our_seed: [u8; 32],
    their_seed: Option<Zeroizing<[u8; 32]>>,
    session_key: Option<Zeroizing<[u8; 32]>>,

    next_send_index: u64,
    next_recv_index: u64,
    reorder_buffer: BTreeMap<u64, WireMessage>,

    outbox: Vec<WireMessage>,
    events: Vec<ConnectionEvent>,
    deadline_ms: Option<u64>,
}

impl AnonymousConnection {
    pub fn new(local_id: &str, peer_id: &str, pre_shared_key: &[u8]) -> Self {
        use rand::RngCore;
        let mut our_seed = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut our_seed);

        AnonymousConnection {
            local_id: local_id.to_string(),
            peer_id: peer_id.to_string(),
            share_key: hashing::derive_key(contexts::SHARE_PSK, pre_shared_key),
            state: ConnectionState::Idle,
            our_seed,
            their_seed: None,
            session_key: None,
            next_send_index: 0,
            next_recv_index: 0,
            reorder_buffer: BTreeMap::new(),
            outbox: Vec::new(),
            events: Vec::new(),
            deadline_ms: None,
        }
    }

    pub fn start(&mut self) {
        if self.state != ConnectionState::Idle {
            return;
        }
        self.state = ConnectionState::Negotiating;
        match symmetric::encrypt(&self.our_seed, &self.share_key) {
            Ok(encrypted_seed) => {
                self.send(MessageBody::Seed { encrypted_seed });
                self.deadline_ms = Some(now_ms() + TIMEOUT_MS);
            }
            Err(err) => self.fail(ErrorKind::Unexpected, &format!("{err}")),
        }
    }

    pub fn session_key(&self) -> Option<&[u8; 32]> {
        self.session_key.as_deref()
    }

    fn handle_seed(&mut self, encrypted_seed: Vec<u8>) {
        match symmetric::decrypt(&encrypted_seed, &self.share_key) {
            Ok(bytes) if bytes.len() == 32 => {
                let mut seed = Zeroizing::new([0u8; 32]);
                seed.copy_from_slice(&bytes);
                self.their_seed = Some(seed);
                self.maybe_connect();
            }
            _ => self.fail(ErrorKind::RejectIdentity, "peer does not hold the share key"),
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

    fn fail(&mut self, kind: ErrorKind, details: &str) {
        if matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::Failed
        ) {
            return;
        }
        self.send(MessageBody::Error {
            kind,
            details: details.to_string(),
        });
        self.session_key = None;
        self.their_seed = None;
        self.deadline_ms = None;
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

    fn process(&mut self, message: WireMessage) {
        debug!(
            "{} <- {} [anonymous] {}",
            self.local_id,
            message.sender_id,
            message.body.kind()
        );
        match message.body {
            MessageBody::Seed { encrypted_seed } => self.handle_seed(encrypted_seed),
            MessageBody::Disconnect => {
                self.session_key = None;
                self.their_seed = None;
                self.state = ConnectionState::Disconnected;
                self.events.push(ConnectionEvent::Disconnected {
                    reason: DisconnectReason::Requested,
                    details: "peer disconnected".to_string(),
                });
            }
            MessageBody::Error { kind, details } => {
                self.state = ConnectionState::Failed;
                self.session_key = None;
                self.events.push(ConnectionEvent::RemoteError {
                    kind,
                    details: details.clone(),
                });
                self.events.push(ConnectionEvent::Disconnected {
                    reason: DisconnectReason::Error,
                    details,
                });
            }
            other => self.fail(
                ErrorKind::Unexpected,
                &format!("{} has no meaning on an anonymous share", other.kind()),
            ),
        }
    }
}

impl ConnectionLike for AnonymousConnection {
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
            return;
        }
        self.reorder_buffer.insert(message.index, message);
        while let Some(message) = self.reorder_buffer.remove(&self.next_recv_index) {
            self.next_recv_index += 1;
            self.process(message);
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
        self.session_key = None;
        self.their_seed = None;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn pump(a: &mut AnonymousConnection, b: &mut AnonymousConnection) {
        for _ in 0..8 {
            let from_a = a.take_outbox();
            let from_b = b.take_outbox();
            if from_a.is_empty() && from_b.is_empty() {
                break;
            }
            for message in from_a {
                b.deliver(message);
            }
            for message in from_b {
                a.deliver(message);
            }
        }
    }

    #[test]
    fn test_anonymous_peers_connect_with_shared_key() {
        let mut a = AnonymousConnection::new("a", "b", b"lobby pre-shared key");
        let mut b = AnonymousConnection::new("b", "a", b"lobby pre-shared key");
        a.start();
        b.start();
        pump(&mut a, &mut b);

        assert_eq!(a.state(), ConnectionState::Connected);
        assert_eq!(b.state(), ConnectionState::Connected);
        assert_eq!(a.session_key().unwrap(), b.session_key().unwrap());
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut a = AnonymousConnection::new("a", "b", b"lobby pre-shared key");
        let mut b = AnonymousConnection::new("b", "a", b"some other key entirely");
        a.start();
        b.start();
        pump(&mut a, &mut b);

        assert_eq!(a.state(), ConnectionState::Failed);
        assert!(a.session_key().is_none());
    }

    #[test]
    fn test_stop_disconnects() {
        let mut a = AnonymousConnection::new("a", "b", b"lobby pre-shared key");
        a.start();
        a.stop();
        assert_eq!(a.state(), ConnectionState::Disconnected);
        let events = a.take_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, ConnectionEvent::Disconnected { .. })));
    }
}
