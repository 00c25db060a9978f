/// Stable identity types.
///
/// - `DeviceId`: 16-byte device identity derived from the device's Ed25519
///   signing public key
/// - `InvitationId`: 16-byte invitation identity derived from the shared
///   invitation seed
///
/// 16 bytes is sufficient for collision resistance within a team while
/// keeping link bodies and storage keys compact.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::hashing::{self, contexts};

// ---------------------------------------------------------------------------
// DeviceId
// ---------------------------------------------------------------------------

/// Stable device identity — BLAKE3-derived from the Ed25519 signing public
/// key, truncated to 16 bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub [u8; 16]);

impl DeviceId {
    /// Derive from a device's Ed25519 signing public key.
    pub fn from_pubkey(pubkey: &[u8; 32]) -> Self {
        let digest = hashing::derive_key(contexts::DEVICE_ID, pubkey);
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        DeviceId(id)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        DeviceId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Ord for DeviceId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for DeviceId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// InvitationId
// ---------------------------------------------------------------------------

/// Invitation identity — BLAKE3-derived from the normalized invitation
/// seed, truncated to 16 bytes. Posting the id on the graph reveals
/// nothing about the seed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvitationId(pub [u8; 16]);

impl InvitationId {
    /// Derive from a normalized invitation seed.
    pub fn from_seed(seed: &str) -> Self {
        let digest = hashing::derive_key(contexts::INVITATION_ID, seed.as_bytes());
        let mut id = [0u8; 16];
        id.copy_from_slice(&digest[..16]);
        InvitationId(id)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl Ord for InvitationId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for InvitationId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InvitationId({})", &self.to_hex()[..8])
    }
}

impl fmt::Display for InvitationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_from_pubkey() {
        let pubkey = [42u8; 32];
        let id = DeviceId::from_pubkey(&pubkey);
        assert_eq!(DeviceId::from_pubkey(&pubkey), id);
        assert_ne!(DeviceId::from_pubkey(&[43u8; 32]), id);
    }

    #[test]
    fn test_invitation_id_from_seed() {
        let id = InvitationId::from_seed("aaaabbbbccccdddd");
        assert_eq!(InvitationId::from_seed("aaaabbbbccccdddd"), id);
        assert_ne!(InvitationId::from_seed("aaaabbbbccccddde"), id);
    }

    #[test]
    fn test_device_id_serde_roundtrip() {
        let id = DeviceId::from_pubkey(&[33u8; 32]);
        let bytes = bincode::serialize(&id).unwrap();
        let decoded: DeviceId = bincode::deserialize(&bytes).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn test_ids_are_distinct_domains() {
        // Same input bytes must not produce the same id across types.
        let device = DeviceId::from_pubkey(&[1u8; 32]);
        let digest = crate::crypto::hashing::derive_key(
            crate::crypto::contexts::INVITATION_ID,
            &[1u8; 32],
        );
        assert_ne!(device.as_bytes()[..], digest[..16]);
    }
}
