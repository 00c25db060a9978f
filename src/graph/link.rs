/// Links — the nodes of the signed membership graph.
///
/// A signed link wraps an action payload with its parent hashes, a
/// timestamp, and the author context, hashed canonically and signed by
/// the author's device signing key. A merge link has no body or
/// signature: its identity is the (sorted) pair of parent hashes, so both
/// sides of a merge mint the identical link.
///
/// - Outer envelope: bincode (deterministic, field order fixed)
/// - Action payload: CBOR via ciborium inside the body
/// - Signing: Ed25519 over BLAKE3(body bytes)

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use thiserror::Error;

use crate::crypto::hashing::{contexts, hash, Hash};
use crate::crypto::signing;
use crate::ids::DeviceId;
use crate::team::actions::Action;

/// Hard cap on a serialized link. Keeps a hostile peer from ballooning
/// the graph during sync.
pub const MAX_LINK_BYTES: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Link exceeds max size ({size} > {max})")]
    TooLarge { size: usize, max: usize },

    #[error("CBOR encoding failed: {0}")]
    CborEncode(String),

    #[error("CBOR decoding failed: {0}")]
    CborDecode(String),

    #[error("Bincode serialization failed: {0}")]
    Bincode(String),

    #[error("Author device id does not match the signing key")]
    AuthorMismatch,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Link hash does not match its body")]
    HashMismatch,
}

pub type Result<T> = std::result::Result<T, LinkError>;

// ---------------------------------------------------------------------------
// Author context
// ---------------------------------------------------------------------------

/// Who authored a link. The signing key is embedded so the structural
/// signature check is self-contained; the reducer separately verifies the
/// key against the device recorded in team state at that position.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuthorContext {
    pub user_id: String,
    pub device_id: DeviceId,
    pub device_signing_key: [u8; 32],
}

// ---------------------------------------------------------------------------
// Link body
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinkBody {
    /// CBOR-encoded [`Action`].
    pub payload: Vec<u8>,
    /// Parent hashes. Empty for the root link, one entry otherwise.
    pub prev: Vec<Hash>,
    /// Wall clock ms — used for branch ordering tie-breaks, never for
    /// authorization.
    pub timestamp_ms: u64,
    pub author: AuthorContext,
}

impl LinkBody {
    fn canonical_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| LinkError::Bincode(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// SignedLink
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignedLink {
    pub body: LinkBody,
    pub hash: Hash,
    /// Ed25519 signature over the body hash.
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

impl SignedLink {
    /// Create and sign a link.
    pub fn create(
        action: &Action,
        prev: Vec<Hash>,
        author: AuthorContext,
        device_signing_secret: &[u8; 32],
        timestamp_ms: u64,
    ) -> Result<Self> {
        let mut payload = Vec::new();
        ciborium::into_writer(action, &mut payload)
            .map_err(|e| LinkError::CborEncode(e.to_string()))?;

        let body = LinkBody {
            payload,
            prev,
            timestamp_ms,
            author,
        };

        let body_bytes = body.canonical_bytes()?;
        if body_bytes.len() > MAX_LINK_BYTES {
            return Err(LinkError::TooLarge {
                size: body_bytes.len(),
                max: MAX_LINK_BYTES,
            });
        }

        let link_hash = hash(contexts::LINK, &body_bytes);
        let signature = signing::sign(link_hash.as_bytes(), device_signing_secret);

        Ok(SignedLink {
            body,
            hash: link_hash,
            signature,
        })
    }

    /// Structural verification: author id binds to the embedded key, the
    /// recorded hash matches the body, and the signature verifies.
    pub fn verify(&self) -> Result<()> {
        let expected_device = DeviceId::from_pubkey(&self.body.author.device_signing_key);
        if expected_device != self.body.author.device_id {
            return Err(LinkError::AuthorMismatch);
        }

        let body_bytes = self.body.canonical_bytes()?;
        if hash(contexts::LINK, &body_bytes) != self.hash {
            return Err(LinkError::HashMismatch);
        }

        let valid = signing::verify(
            self.hash.as_bytes(),
            &self.signature,
            &self.body.author.device_signing_key,
        )
        .map_err(|_| LinkError::InvalidSignature)?;
        if !valid {
            return Err(LinkError::InvalidSignature);
        }
        Ok(())
    }

    /// Decode the action payload.
    pub fn action(&self) -> Result<Action> {
        ciborium::from_reader(self.body.payload.as_slice())
            .map_err(|e| LinkError::CborDecode(e.to_string()))
    }

    pub fn is_root(&self) -> bool {
        self.body.prev.is_empty()
    }

    pub fn author_id(&self) -> &str {
        &self.body.author.user_id
    }
}

// ---------------------------------------------------------------------------
// MergeLink
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeLink {
    /// Sorted parent hashes — both sides of a merge mint the same link.
    pub parents: [Hash; 2],
    pub hash: Hash,
}

impl MergeLink {
    pub fn new(a: Hash, b: Hash) -> Self {
        let parents = if a <= b { [a, b] } else { [b, a] };
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(parents[0].as_bytes());
        material.extend_from_slice(parents[1].as_bytes());
        MergeLink {
            parents,
            hash: hash(contexts::MERGE, &material),
        }
    }

    /// Recompute and compare the hash.
    pub fn verify(&self) -> Result<()> {
        let expected = MergeLink::new(self.parents[0], self.parents[1]);
        if expected.hash != self.hash || expected.parents != self.parents {
            return Err(LinkError::HashMismatch);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Link {
    Signed(SignedLink),
    Merge(MergeLink),
}

impl Link {
    pub fn hash(&self) -> Hash {
        match self {
            Link::Signed(link) => link.hash,
            Link::Merge(link) => link.hash,
        }
    }

    pub fn parents(&self) -> &[Hash] {
        match self {
            Link::Signed(link) => &link.body.prev,
            Link::Merge(link) => &link.parents,
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Link::Signed(link) if link.is_root())
    }

    pub fn as_signed(&self) -> Option<&SignedLink> {
        match self {
            Link::Signed(link) => Some(link),
            Link::Merge(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyset::{Scope, SecretKeyset};

    fn sign_link(action: &Action, prev: Vec<Hash>, user_id: &str) -> SignedLink {
        let device_keys = SecretKeyset::random(Scope::device(format!("{user_id}-dev")));
        let ctx = AuthorContext {
            user_id: user_id.to_string(),
            device_id: DeviceId::from_pubkey(&device_keys.signing),
            device_signing_key: device_keys.signing,
        };
        SignedLink::create(action, prev, ctx, device_keys.signing_secret(), 1000).unwrap()
    }

    #[test]
    fn test_create_and_verify() {
        let link = sign_link(
            &Action::SetTeamName {
                team_name: "devs".into(),
            },
            vec![],
            "alice",
        );
        assert!(link.verify().is_ok());
        assert!(link.is_root());
        assert_eq!(
            link.action().unwrap(),
            Action::SetTeamName {
                team_name: "devs".into()
            }
        );
    }

    #[test]
    fn test_tampered_payload_detected() {
        let mut link = sign_link(
            &Action::SetTeamName {
                team_name: "devs".into(),
            },
            vec![],
            "alice",
        );
        link.body.timestamp_ms += 1;
        assert!(matches!(link.verify(), Err(LinkError::HashMismatch)));
    }

    #[test]
    fn test_wrong_author_key_detected() {
        let mut link = sign_link(
            &Action::SetTeamName {
                team_name: "devs".into(),
            },
            vec![],
            "alice",
        );
        let (other_pub, _) = crate::crypto::signing::generate_keypair();
        link.body.author.device_signing_key = other_pub;
        assert!(matches!(link.verify(), Err(LinkError::AuthorMismatch)));
    }

    #[test]
    fn test_merge_link_order_independent() {
        let a = hash(contexts::LINK, b"branch a head");
        let b = hash(contexts::LINK, b"branch b head");
        let ab = MergeLink::new(a, b);
        let ba = MergeLink::new(b, a);
        assert_eq!(ab.hash, ba.hash);
        assert_eq!(ab.parents, ba.parents);
        assert!(ab.verify().is_ok());
    }

    #[test]
    fn test_link_serde_roundtrip() {
        let link = Link::Signed(sign_link(
            &Action::AddMessage {
                message: vec![1, 2, 3],
            },
            vec![hash(contexts::LINK, b"parent")],
            "bob",
        ));
        let bytes = bincode::serialize(&link).unwrap();
        let restored: Link = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored, link);
        assert!(restored.as_signed().unwrap().verify().is_ok());
    }
}
