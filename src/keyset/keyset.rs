/// Generational keysets — a signing keypair plus an encryption keypair
/// bound to a scope.
///
/// Generation 0 is the initial keyset for a scope; every rotation
/// increments the generation and replaces both keypairs. Public-only
/// variants travel on the graph; secret variants live in lockboxes and
/// local keyrings, and are zeroized on drop.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::hashing::{self, contexts};
use crate::crypto::{sealed, signing};
use crate::keyset::scope::Scope;

// ---------------------------------------------------------------------------
// PublicKeyset
// ---------------------------------------------------------------------------

/// The public half of a keyset: what the graph records about a principal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyset {
    pub scope: Scope,
    pub generation: u32,
    /// Ed25519 signing public key.
    pub signing: [u8; 32],
    /// X25519 encryption public key.
    pub encryption: [u8; 32],
}

// ---------------------------------------------------------------------------
// SecretKeyset
// ---------------------------------------------------------------------------

/// A keyset with secrets. Never leaves the process unencrypted: it is
/// sealed into lockboxes for transport and held in the local keyring.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretKeyset {
    #[zeroize(skip)]
    pub scope: Scope,
    #[zeroize(skip)]
    pub generation: u32,
    #[zeroize(skip)]
    pub signing: [u8; 32],
    #[zeroize(skip)]
    pub encryption: [u8; 32],
    signing_secret: [u8; 32],
    encryption_secret: [u8; 32],
}

impl SecretKeyset {
    /// Generate a fresh random keyset for a scope at generation 0.
    pub fn random(scope: Scope) -> Self {
        let (signing_pub, signing_secret) = signing::generate_keypair();
        let (encryption_pub, encryption_secret) = sealed::generate_keypair();
        SecretKeyset {
            scope,
            generation: 0,
            signing: signing_pub,
            encryption: encryption_pub,
            signing_secret,
            encryption_secret,
        }
    }

    /// Derive a keyset deterministically from seed material. Both halves
    /// are domain-separated from each other and from other scopes.
    pub fn from_seed(scope: Scope, seed: &[u8]) -> Self {
        let mut material = Vec::with_capacity(scope.name.len() + seed.len() + 16);
        material.extend_from_slice(scope.key_label().as_bytes());
        material.push(0);
        material.extend_from_slice(seed);

        let (signing_pub, signing_secret) =
            signing::keypair_from_seed(contexts::SIGNING_KEYS, &material);
        let (encryption_pub, encryption_secret) =
            sealed::keypair_from_seed(contexts::ENCRYPTION_KEYS, &material);

        SecretKeyset {
            scope,
            generation: 0,
            signing: signing_pub,
            encryption: encryption_pub,
            signing_secret,
            encryption_secret,
        }
    }

    /// Fresh random keys for the same scope at the next generation.
    /// Used on every rotation.
    pub fn next_generation(&self) -> Self {
        let mut next = SecretKeyset::random(self.scope.clone());
        next.generation = self.generation + 1;
        next
    }

    pub fn with_generation(mut self, generation: u32) -> Self {
        self.generation = generation;
        self
    }

    /// The public half, as recorded on the graph.
    pub fn public(&self) -> PublicKeyset {
        PublicKeyset {
            scope: self.scope.clone(),
            generation: self.generation,
            signing: self.signing,
            encryption: self.encryption,
        }
    }

    /// Sign with this keyset's signing secret.
    pub fn sign(&self, data: &[u8]) -> [u8; 64] {
        signing::sign(data, &self.signing_secret)
    }

    /// The Ed25519 secret, for signing links authored by this principal.
    pub fn signing_secret(&self) -> &[u8; 32] {
        &self.signing_secret
    }

    /// The X25519 secret, for opening sealed boxes addressed to this keyset.
    pub fn encryption_secret(&self) -> &[u8; 32] {
        &self.encryption_secret
    }

    /// Symmetric key for this scope+generation, derived from the encryption
    /// secret. Used by the team facade's `encrypt`/`decrypt`.
    pub fn symmetric_key(&self) -> [u8; 32] {
        hashing::derive_key(contexts::SCOPE_SYMMETRIC, &self.encryption_secret)
    }
}

impl std::fmt::Debug for SecretKeyset {
    // Secrets stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SecretKeyset({} gen {})",
            self.scope.key_label(),
            self.generation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signing::verify;

    #[test]
    fn test_random_keyset_generation_zero() {
        let ks = SecretKeyset::random(Scope::team());
        assert_eq!(ks.generation, 0);
        assert_eq!(ks.public().signing, ks.signing);
    }

    #[test]
    fn test_from_seed_deterministic() {
        let a = SecretKeyset::from_seed(Scope::member("alice"), b"seedseedseedseed");
        let b = SecretKeyset::from_seed(Scope::member("alice"), b"seedseedseedseed");
        assert_eq!(a.signing, b.signing);
        assert_eq!(a.encryption, b.encryption);
    }

    #[test]
    fn test_from_seed_scope_separated() {
        // Same seed, different scope: different keys.
        let member = SecretKeyset::from_seed(Scope::member("alice"), b"seedseedseedseed");
        let device = SecretKeyset::from_seed(Scope::device("alice"), b"seedseedseedseed");
        assert_ne!(member.signing, device.signing);
    }

    #[test]
    fn test_next_generation_increments_and_rekeys() {
        let gen0 = SecretKeyset::random(Scope::team());
        let gen1 = gen0.next_generation();
        assert_eq!(gen1.generation, 1);
        assert_eq!(gen1.scope, gen0.scope);
        assert_ne!(gen1.signing, gen0.signing);
        assert_ne!(gen1.encryption, gen0.encryption);
    }

    #[test]
    fn test_sign_with_keyset() {
        let ks = SecretKeyset::random(Scope::device("d1"));
        let sig = ks.sign(b"challenge");
        assert!(verify(b"challenge", &sig, &ks.signing).unwrap());
    }

    #[test]
    fn test_symmetric_key_stable_per_generation() {
        let ks = SecretKeyset::random(Scope::team());
        assert_eq!(ks.symmetric_key(), ks.symmetric_key());
        assert_ne!(ks.symmetric_key(), ks.next_generation().symmetric_key());
    }

    #[test]
    fn test_serde_roundtrip() {
        let ks = SecretKeyset::from_seed(Scope::ephemeral(), b"abcdabcdabcdabcd");
        let bytes = bincode::serialize(&ks).unwrap();
        let restored: SecretKeyset = bincode::deserialize(&bytes).unwrap();
        assert_eq!(restored.signing, ks.signing);
        assert_eq!(restored.public(), ks.public());
    }
}
