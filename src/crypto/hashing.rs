/// Content hashing and key derivation.
///
/// Every hash in the protocol is domain-separated: a BLAKE3 `derive_key`
/// call with a fixed context string, so a link hash can never collide with
/// an invitation id or a session key even over identical input bytes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Domain-separation contexts. New contexts must never reuse an existing
/// string; the version suffix allows future format bumps.
pub mod contexts {
    pub const LINK: &str = "quorum-protocol 2025 link hash v1";
    pub const MERGE: &str = "quorum-protocol 2025 merge link v1";
    pub const DEVICE_ID: &str = "quorum-protocol 2025 device id v1";
    pub const INVITATION_ID: &str = "quorum-protocol 2025 invitation id v1";
    pub const SIGNING_KEYS: &str = "quorum-protocol 2025 signing keypair v1";
    pub const ENCRYPTION_KEYS: &str = "quorum-protocol 2025 encryption keypair v1";
    pub const SEALED_BOX: &str = "quorum-protocol 2025 sealed box v1";
    pub const SCOPE_SYMMETRIC: &str = "quorum-protocol 2025 scope symmetric key v1";
    pub const SESSION_KEY: &str = "quorum-protocol 2025 session key v1";
    pub const SHARE_STORE: &str = "quorum-protocol 2025 share store key v1";
    pub const SHARE_PSK: &str = "quorum-protocol 2025 anonymous share key v1";
    pub const STATE_HASH: &str = "quorum-protocol 2025 state hash v1";
}

// ---------------------------------------------------------------------------
// Hash
// ---------------------------------------------------------------------------

/// A 256-bit BLAKE3 digest. Used as the content address of every link.
///
/// Ordering is lexicographic over the raw bytes; this is what makes merge
/// links and branch tie-breaks deterministic across peers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Base58-encode for display and storage keys.
    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    /// Decode from a base58 string.
    pub fn from_base58(s: &str) -> Option<Self> {
        let bytes = bs58::decode(s).into_vec().ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Hash(arr))
    }
}

impl Ord for Hash {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Hash {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}..)", &self.to_base58()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

// ---------------------------------------------------------------------------
// Hashing functions
// ---------------------------------------------------------------------------

/// Domain-separated hash of arbitrary bytes.
pub fn hash(context: &str, data: &[u8]) -> Hash {
    Hash(blake3::derive_key(context, data))
}

/// Domain-separated key derivation — same as [`hash`] but named for intent
/// when the output is used as key material rather than an address.
pub fn derive_key(context: &str, material: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, material)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        let a = hash(contexts::LINK, b"payload");
        let b = hash(contexts::LINK, b"payload");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_domain_separated() {
        let a = hash(contexts::LINK, b"payload");
        let b = hash(contexts::MERGE, b"payload");
        assert_ne!(a, b);
    }

    #[test]
    fn test_base58_roundtrip() {
        let h = hash(contexts::LINK, b"roundtrip");
        let encoded = h.to_base58();
        let decoded = Hash::from_base58(&encoded).unwrap();
        assert_eq!(h, decoded);
    }

    #[test]
    fn test_base58_rejects_garbage() {
        assert!(Hash::from_base58("not!valid!base58").is_none());
        // Valid base58 but wrong length
        assert!(Hash::from_base58("3mJr7A").is_none());
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let lo = Hash([0u8; 32]);
        let hi = Hash([0xFFu8; 32]);
        assert!(lo < hi);
    }
}
