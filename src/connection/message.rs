/// Wire messages for the pairwise connection protocol.
///
/// Every message carries a per-sender `index`; the receiving machine
/// buffers out-of-order arrivals and releases them in sequence, so the
/// protocol never observes message `n + 1` before `n`. Framing and
/// delivery are the transport adapter's concern.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::crypto::hashing::Hash;
use crate::graph::link::Link;
use crate::ids::DeviceId;
use crate::invite::ProofOfInvitation;
use crate::keyset::PublicKeyset;
use crate::team::actions::Device;

// ---------------------------------------------------------------------------
// Claims and challenges
// ---------------------------------------------------------------------------

/// Who the peer says they are. Verified against the team's recorded
/// device keys, never trusted as-is.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaim {
    pub user_id: String,
    pub device: Device,
}

/// An invitee's hello attachment: the proof of invitation plus the
/// starter keys the admitting side should record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InviteeClaim {
    pub proof: ProofOfInvitation,
    pub member_keys: PublicKeyset,
    pub device: Device,
}

/// A fresh identity challenge. The prover signs the canonical encoding
/// with their device signing key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub user_id: String,
    pub device_id: DeviceId,
    pub nonce: [u8; 24],
    pub timestamp_ms: u64,
}

impl Challenge {
    pub fn new(user_id: &str, device_id: DeviceId, timestamp_ms: u64) -> Self {
        use rand::RngCore;
        let mut nonce = [0u8; 24];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        Challenge {
            user_id: user_id.to_string(),
            device_id,
            nonce,
            timestamp_ms,
        }
    }

    /// Canonical bytes signed by the prover.
    pub fn signable(&self) -> Vec<u8> {
        bincode::serialize(self).expect("challenge serialization is infallible")
    }
}

// ---------------------------------------------------------------------------
// Message body
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NeitherIsMember,
    RejectInvitation,
    RejectIdentity,
    RejectTeam,
    Timeout,
    Unexpected,
    PeerRemoved,
    SyncFailed,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Opening move from both sides.
    Hello {
        claim: IdentityClaim,
        invitation: Option<InviteeClaim>,
    },
    /// Admitting side accepts an invitation and hands over the graph.
    AcceptInvitation { serialized_graph: Vec<u8> },
    ChallengeIdentity { challenge: Challenge },
    ProveIdentity {
        challenge: Challenge,
        #[serde(with = "BigArray")]
        signature: [u8; 64],
    },
    /// Identity accepted; carries our half of the session seed, sealed
    /// to the peer's device encryption key.
    AcceptIdentity { encrypted_seed: Vec<u8> },
    /// Head advertisement for the sync loop.
    Update {
        root: Hash,
        head: Hash,
        hashes: Vec<Hash>,
    },
    /// Links the peer is missing, with our head at send time.
    MissingLinks { head: Hash, links: Vec<Link> },
    /// Session seed exchange outside the identity phase (anonymous
    /// shares and renegotiation).
    Seed { encrypted_seed: Vec<u8> },
    /// Local head moved; connected machines translate this into an
    /// outgoing `Update`.
    LocalUpdate { head: Hash },
    Disconnect,
    Error { kind: ErrorKind, details: String },
}

impl MessageBody {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MessageBody::Hello { .. } => "Hello",
            MessageBody::AcceptInvitation { .. } => "AcceptInvitation",
            MessageBody::ChallengeIdentity { .. } => "ChallengeIdentity",
            MessageBody::ProveIdentity { .. } => "ProveIdentity",
            MessageBody::AcceptIdentity { .. } => "AcceptIdentity",
            MessageBody::Update { .. } => "Update",
            MessageBody::MissingLinks { .. } => "MissingLinks",
            MessageBody::Seed { .. } => "Seed",
            MessageBody::LocalUpdate { .. } => "LocalUpdate",
            MessageBody::Disconnect => "Disconnect",
            MessageBody::Error { .. } => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub sender_id: String,
    pub target_id: String,
    /// Monotone per sender; enforces ordered delivery.
    pub index: u64,
    pub body: MessageBody,
}

impl WireMessage {
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::{Scope, SecretKeyset};

    #[test]
    fn test_challenge_nonce_varies() {
        let device = DeviceId::from_bytes([1u8; 16]);
        let a = Challenge::new("alice", device, 1000);
        let b = Challenge::new("alice", device, 1000);
        assert_ne!(a.nonce, b.nonce);
    }

    #[test]
    fn test_challenge_signable_roundtrips_signature() {
        let keys = SecretKeyset::random(Scope::device("d"));
        let challenge = Challenge::new("alice", DeviceId::from_pubkey(&keys.signing), 1000);
        let signature = keys.sign(&challenge.signable());
        assert!(
            crate::crypto::signing::verify(&challenge.signable(), &signature, &keys.signing)
                .unwrap()
        );
    }

    #[test]
    fn test_wire_roundtrip() {
        let message = WireMessage {
            sender_id: "a".into(),
            target_id: "b".into(),
            index: 7,
            body: MessageBody::Disconnect,
        };
        let bytes = message.to_bytes().unwrap();
        assert_eq!(WireMessage::from_bytes(&bytes).unwrap(), message);
    }

    #[test]
    fn test_error_body_roundtrip() {
        let message = WireMessage {
            sender_id: "a".into(),
            target_id: "b".into(),
            index: 0,
            body: MessageBody::Error {
                kind: ErrorKind::RejectIdentity,
                details: "unknown user".into(),
            },
        };
        let restored = WireMessage::from_bytes(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(restored.body.kind(), "Error");
    }
}
