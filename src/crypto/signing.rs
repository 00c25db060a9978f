/// Ed25519 detached signatures over typed 32/64-byte arrays.
///
/// Keypairs come in two flavors: random (device and member keys) and
/// seed-derived (invitation starter keys, where both sides must derive the
/// same keypair from a shared seed).

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand_chacha::rand_core::SeedableRng;
use rand_chacha::ChaCha20Rng;
use thiserror::Error;

use crate::crypto::hashing;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Invalid public key")]
    InvalidPublicKey,
}

pub type Result<T> = std::result::Result<T, SigningError>;

/// Generate a random Ed25519 keypair.
///
/// Returns `(public_key, secret_key)`.
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let signing_key = SigningKey::generate(&mut OsRng);
    (signing_key.verifying_key().to_bytes(), signing_key.to_bytes())
}

/// Derive an Ed25519 keypair deterministically from seed material.
///
/// The seed is stretched through BLAKE3 `derive_key` under `context`, then
/// used to seed a ChaCha20 RNG from which the keypair is drawn. Same
/// context + seed always yields the same keypair.
pub fn keypair_from_seed(context: &str, seed: &[u8]) -> ([u8; 32], [u8; 32]) {
    let material = hashing::derive_key(context, seed);
    let mut rng = ChaCha20Rng::from_seed(material);
    let signing_key = SigningKey::generate(&mut rng);
    (signing_key.verifying_key().to_bytes(), signing_key.to_bytes())
}

/// Sign data with an Ed25519 secret key. Returns a 64-byte detached signature.
pub fn sign(data: &[u8], secret_key: &[u8; 32]) -> [u8; 64] {
    let signing_key = SigningKey::from_bytes(secret_key);
    signing_key.sign(data).to_bytes()
}

/// Verify a detached Ed25519 signature.
///
/// Returns `Ok(true)` if valid, `Ok(false)` if the signature does not
/// match, `Err` if the public key bytes are not a valid curve point.
pub fn verify(data: &[u8], signature: &[u8; 64], public_key: &[u8; 32]) -> Result<bool> {
    let verifying_key =
        VerifyingKey::from_bytes(public_key).map_err(|_| SigningError::InvalidPublicKey)?;
    let sig = Signature::from_bytes(signature);
    Ok(verifying_key.verify(data, &sig).is_ok())
}

/// Derive the public key for an Ed25519 secret key.
pub fn public_key(secret_key: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(secret_key).verifying_key().to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let (public, secret) = generate_keypair();
        let data = b"membership link body";

        let signature = sign(data, &secret);
        assert!(verify(data, &signature, &public).unwrap());
    }

    #[test]
    fn test_verify_rejects_tampered_data() {
        let (public, secret) = generate_keypair();
        let signature = sign(b"original", &secret);
        assert!(!verify(b"tampered", &signature, &public).unwrap());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let (_, secret) = generate_keypair();
        let (other_public, _) = generate_keypair();
        let signature = sign(b"data", &secret);
        assert!(!verify(b"data", &signature, &other_public).unwrap());
    }

    #[test]
    fn test_keypair_from_seed_deterministic() {
        let (pub1, sec1) = keypair_from_seed(hashing::contexts::SIGNING_KEYS, b"sharedseedabcdef");
        let (pub2, sec2) = keypair_from_seed(hashing::contexts::SIGNING_KEYS, b"sharedseedabcdef");
        assert_eq!(pub1, pub2);
        assert_eq!(sec1, sec2);

        let (pub3, _) = keypair_from_seed(hashing::contexts::SIGNING_KEYS, b"differentseed000");
        assert_ne!(pub1, pub3);
    }

    #[test]
    fn test_seed_derived_keys_sign() {
        let (public, secret) = keypair_from_seed(hashing::contexts::SIGNING_KEYS, b"proofseedproofse");
        let signature = sign(b"proof of invitation", &secret);
        assert!(verify(b"proof of invitation", &signature, &public).unwrap());
    }

    #[test]
    fn test_public_key_derivation() {
        let (expected, secret) = generate_keypair();
        assert_eq!(public_key(&secret), expected);
    }
}
