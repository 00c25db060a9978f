/// Asymmetric sealed boxes — anyone holding a recipient's X25519 public
/// key can seal; only the secret key holder can open.
///
/// Construction: an ephemeral X25519 keypair performs Diffie-Hellman with
/// the recipient key; the shared secret (bound to both public keys via
/// BLAKE3 `derive_key`) keys an XChaCha20-Poly1305 AEAD.
///
/// Wire format: `[ephemeral_pub: 32][nonce: 24][ciphertext + tag]`.

use rand::rngs::OsRng;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use crate::crypto::hashing::{self, contexts};
use crate::crypto::symmetric;

const EPHEMERAL_PUB_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum SealedError {
    #[error("Sealed box truncated")]
    Truncated,
    #[error("Ciphertext invalid — wrong recipient key or tampered data")]
    CiphertextInvalid,
    #[error("Encryption failed")]
    EncryptionFailed,
}

pub type Result<T> = std::result::Result<T, SealedError>;

/// Generate a random X25519 keypair. Returns `(public_key, secret_key)`.
pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (public.to_bytes(), secret.to_bytes())
}

/// Derive an X25519 keypair deterministically from seed material.
pub fn keypair_from_seed(context: &str, seed: &[u8]) -> ([u8; 32], [u8; 32]) {
    let secret = StaticSecret::from(hashing::derive_key(context, seed));
    let public = PublicKey::from(&secret);
    (public.to_bytes(), secret.to_bytes())
}

/// Derive the public key for an X25519 secret key.
pub fn public_key(secret_key: &[u8; 32]) -> [u8; 32] {
    PublicKey::from(&StaticSecret::from(*secret_key)).to_bytes()
}

/// Seal `plaintext` to the holder of `recipient_pub`.
pub fn seal(plaintext: &[u8], recipient_pub: &[u8; 32]) -> Result<Vec<u8>> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pub = PublicKey::from(&ephemeral).to_bytes();

    let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient_pub));
    let key = box_key(shared.as_bytes(), &ephemeral_pub, recipient_pub);

    let sealed =
        symmetric::encrypt(plaintext, &key).map_err(|_| SealedError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(EPHEMERAL_PUB_LEN + sealed.len());
    out.extend_from_slice(&ephemeral_pub);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a sealed box with the recipient's secret key.
pub fn open(sealed: &[u8], recipient_secret: &[u8; 32]) -> Result<Vec<u8>> {
    if sealed.len() < EPHEMERAL_PUB_LEN {
        return Err(SealedError::Truncated);
    }

    let (ephemeral_bytes, rest) = sealed.split_at(EPHEMERAL_PUB_LEN);
    let mut ephemeral_pub = [0u8; 32];
    ephemeral_pub.copy_from_slice(ephemeral_bytes);

    let secret = StaticSecret::from(*recipient_secret);
    let recipient_pub = PublicKey::from(&secret).to_bytes();
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral_pub));
    let key = box_key(shared.as_bytes(), &ephemeral_pub, &recipient_pub);

    symmetric::decrypt(rest, &key).map_err(|_| SealedError::CiphertextInvalid)
}

/// Bind the DH result to both public keys so a sealed box can't be
/// re-targeted by swapping the ephemeral key.
fn box_key(shared: &[u8; 32], ephemeral_pub: &[u8; 32], recipient_pub: &[u8; 32]) -> [u8; 32] {
    let mut material = Vec::with_capacity(96);
    material.extend_from_slice(shared);
    material.extend_from_slice(ephemeral_pub);
    material.extend_from_slice(recipient_pub);
    hashing::derive_key(contexts::SEALED_BOX, &material)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let (public, secret) = generate_keypair();
        let sealed = seal(b"keyset with secrets", &public).unwrap();
        let opened = open(&sealed, &secret).unwrap();
        assert_eq!(opened, b"keyset with secrets");
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let (public, _) = generate_keypair();
        let (_, other_secret) = generate_keypair();
        let sealed = seal(b"not for you", &public).unwrap();
        assert!(matches!(
            open(&sealed, &other_secret),
            Err(SealedError::CiphertextInvalid)
        ));
    }

    #[test]
    fn test_truncated_fails() {
        let (_, secret) = generate_keypair();
        assert!(matches!(open(&[0u8; 16], &secret), Err(SealedError::Truncated)));
    }

    #[test]
    fn test_seed_derived_keypair_opens() {
        let (public, secret) = keypair_from_seed(contexts::ENCRYPTION_KEYS, b"invitationseed00");
        let sealed = seal(b"starter keys payload", &public).unwrap();
        assert_eq!(open(&sealed, &secret).unwrap(), b"starter keys payload");
    }

    #[test]
    fn test_public_key_derivation() {
        let (public, secret) = generate_keypair();
        assert_eq!(public_key(&secret), public);
    }
}
