/// Symmetric AEAD — XChaCha20-Poly1305 with a random 24-byte nonce
/// prepended to the ciphertext.
///
/// Wire format: `[nonce: 24][ciphertext + tag]`.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// Nonce length prepended to every ciphertext.
const NONCE_LEN: usize = 24;
/// Poly1305 authentication tag length.
const TAG_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum SymmetricError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Ciphertext invalid or truncated")]
    CiphertextInvalid,
}

pub type Result<T> = std::result::Result<T, SymmetricError>;

/// Encrypt under a 32-byte key. Returns `[nonce || ciphertext]`.
pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| SymmetricError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `[nonce || ciphertext]` under a 32-byte key.
pub fn decrypt(sealed: &[u8], key: &[u8; 32]) -> Result<Vec<u8>> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(SymmetricError::CiphertextInvalid);
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
    let nonce = XNonce::from_slice(nonce_bytes);

    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SymmetricError::CiphertextInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let key = [0x42u8; 32];
        let plaintext = b"team keyset generation 3";

        let sealed = encrypt(plaintext, &key).unwrap();
        let opened = decrypt(&sealed, &key).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn test_nonce_varies() {
        let key = [7u8; 32];
        let a = encrypt(b"same message", &key).unwrap();
        let b = encrypt(b"same message", &key).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = encrypt(b"secret", &[1u8; 32]).unwrap();
        assert!(matches!(
            decrypt(&sealed, &[2u8; 32]),
            Err(SymmetricError::CiphertextInvalid)
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [9u8; 32];
        let mut sealed = encrypt(b"authentic", &key).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(decrypt(&sealed, &key).is_err());
    }

    #[test]
    fn test_truncated_input_fails() {
        assert!(decrypt(&[0u8; 10], &[0u8; 32]).is_err());
    }
}
