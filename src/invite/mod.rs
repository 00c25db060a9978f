//! Seitan-style single-use invitations.
//!
//! An invitation is a random 16-character alphabetic seed shared
//! out-of-band. Both sides derive the same ephemeral signing keypair from
//! the seed; the team records only the public key. The invitee proves
//! possession by signing their user id with the seed-derived secret key.

use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::ids::InvitationId;
use crate::keyset::{Scope, SecretKeyset};

/// Normalized seed length.
pub const SEED_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum InviteError {
    #[error("Seed must normalize to {SEED_LEN} alphabetic characters")]
    InvalidSeed,
    #[error("Proof does not match this invitation")]
    ProofInvalid,
    #[error("Invitation not found")]
    NotFound,
    #[error("Invitation was revoked")]
    Revoked,
    #[error("Invitation has no remaining uses")]
    Exhausted,
    #[error("Invitation expired")]
    Expired,
    #[error("Invitation is bound to a different user")]
    WrongUser,
}

pub type Result<T> = std::result::Result<T, InviteError>;

// ---------------------------------------------------------------------------
// Invitation record
// ---------------------------------------------------------------------------

/// What the graph records about an outstanding invitation. Contains no
/// secret: the id and public key are both one-way derived from the seed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Invitation {
    pub id: InvitationId,
    /// Ephemeral Ed25519 public key derived from the seed.
    pub public_key: [u8; 32],
    /// Unix ms; 0 means no expiration.
    pub expiration_ms: u64,
    pub max_uses: u32,
    /// When set, only this user may redeem the invitation (device invites).
    pub user_id: Option<String>,
}

/// The invitee's proof that they hold the seed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProofOfInvitation {
    pub id: InvitationId,
    pub user_id: String,
    /// Signature over `(id, user_id)` by the seed-derived secret key.
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

// ---------------------------------------------------------------------------
// Seed handling
// ---------------------------------------------------------------------------

/// Generate a random invitation seed: 16 lowercase alphabetic characters.
pub fn random_seed() -> String {
    use rand::Rng;
    let mut rng = rand::rngs::OsRng;
    (0..SEED_LEN)
        .map(|_| (b'a' + rng.gen_range(0..26u8)) as char)
        .collect()
}

/// Normalize a user-entered seed: strip whitespace, lowercase. The result
/// must be exactly [`SEED_LEN`] alphabetic characters.
pub fn normalize_seed(raw: &str) -> Result<String> {
    let normalized: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect();

    if normalized.len() != SEED_LEN || !normalized.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(InviteError::InvalidSeed);
    }
    Ok(normalized)
}

// ---------------------------------------------------------------------------
// Creation, proof, validation
// ---------------------------------------------------------------------------

/// Create the invitation record for a seed. Posted on the graph via the
/// `Invite` action; the seed itself travels out-of-band.
pub fn create(
    raw_seed: &str,
    max_uses: u32,
    expiration_ms: u64,
    user_id: Option<String>,
) -> Result<Invitation> {
    let seed = normalize_seed(raw_seed)?;
    Ok(Invitation {
        id: InvitationId::from_seed(&seed),
        public_key: proof_keys(&seed).signing,
        expiration_ms,
        max_uses,
        user_id,
    })
}

/// The ephemeral keyset used to sign proofs for this seed.
pub fn proof_keys(seed: &str) -> SecretKeyset {
    SecretKeyset::from_seed(Scope::ephemeral(), seed.as_bytes())
}

/// Starter member keys for an invitee joining under `user_id`. Derived
/// from the seed so the admitting side can seal team keys to them before
/// the invitee has posted real keys.
pub fn starter_member_keys(seed: &str, user_id: &str) -> SecretKeyset {
    SecretKeyset::from_seed(Scope::member(user_id), seed.as_bytes())
}

/// Sign a proof of invitation for `user_id`.
pub fn generate_proof(raw_seed: &str, user_id: &str) -> Result<ProofOfInvitation> {
    let seed = normalize_seed(raw_seed)?;
    let id = InvitationId::from_seed(&seed);
    let keys = proof_keys(&seed);
    let signature = keys.sign(&proof_payload(&id, user_id));
    Ok(ProofOfInvitation {
        id,
        user_id: user_id.to_string(),
        signature,
    })
}

/// Validate a proof against the recorded invitation.
///
/// Checks the id binding, the user binding (for device invites), and the
/// seed-derived signature. Liveness checks (revoked / exhausted /
/// expired) are the team state's concern.
pub fn validate_proof(proof: &ProofOfInvitation, invitation: &Invitation) -> Result<()> {
    if proof.id.as_bytes().ct_eq(invitation.id.as_bytes()).unwrap_u8() != 1 {
        return Err(InviteError::ProofInvalid);
    }

    if let Some(bound) = &invitation.user_id {
        if bound != &proof.user_id {
            return Err(InviteError::WrongUser);
        }
    }

    let payload = proof_payload(&proof.id, &proof.user_id);
    let valid = crate::crypto::signing::verify(&payload, &proof.signature, &invitation.public_key)
        .map_err(|_| InviteError::ProofInvalid)?;
    if !valid {
        return Err(InviteError::ProofInvalid);
    }
    Ok(())
}

fn proof_payload(id: &InvitationId, user_id: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(16 + user_id.len() + 1);
    payload.extend_from_slice(id.as_bytes());
    payload.push(0);
    payload.extend_from_slice(user_id.as_bytes());
    payload
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_seed_shape() {
        let seed = random_seed();
        assert_eq!(seed.len(), SEED_LEN);
        assert!(seed.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn test_normalize_seed() {
        assert_eq!(
            normalize_seed(" ABCD efgh IJKL mnop ").unwrap(),
            "abcdefghijklmnop"
        );
        assert!(normalize_seed("tooshort").is_err());
        assert!(normalize_seed("digits1234567890").is_err());
    }

    #[test]
    fn test_create_is_deterministic_over_normalization() {
        let a = create("aaaabbbbccccdddd", 1, 0, None).unwrap();
        let b = create("AAAA BBBB CCCC DDDD", 1, 0, None).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.public_key, b.public_key);
    }

    #[test]
    fn test_proof_roundtrip() {
        let seed = random_seed();
        let invitation = create(&seed, 1, 0, None).unwrap();
        let proof = generate_proof(&seed, "charlie").unwrap();
        assert!(validate_proof(&proof, &invitation).is_ok());
    }

    #[test]
    fn test_proof_wrong_seed_rejected() {
        let invitation = create("aaaabbbbccccdddd", 1, 0, None).unwrap();
        let proof = generate_proof("ppppqqqqrrrrssss", "charlie").unwrap();
        assert!(matches!(
            validate_proof(&proof, &invitation),
            Err(InviteError::ProofInvalid)
        ));
    }

    #[test]
    fn test_proof_tampered_user_rejected() {
        let seed = random_seed();
        let invitation = create(&seed, 1, 0, None).unwrap();
        let mut proof = generate_proof(&seed, "charlie").unwrap();
        proof.user_id = "mallory".to_string();
        assert!(validate_proof(&proof, &invitation).is_err());
    }

    #[test]
    fn test_user_bound_invitation() {
        let seed = random_seed();
        let invitation = create(&seed, 1, 0, Some("bob".to_string())).unwrap();

        let bob = generate_proof(&seed, "bob").unwrap();
        assert!(validate_proof(&bob, &invitation).is_ok());

        let eve = generate_proof(&seed, "eve").unwrap();
        assert!(matches!(
            validate_proof(&eve, &invitation),
            Err(InviteError::WrongUser)
        ));
    }

    #[test]
    fn test_starter_keys_shared_derivation() {
        let seed = random_seed();
        let invitee_side = starter_member_keys(&seed, "charlie");
        let admitter_side = starter_member_keys(&seed, "charlie");
        assert_eq!(invitee_side.public(), admitter_side.public());
    }
}
