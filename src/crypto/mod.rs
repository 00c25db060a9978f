//! Cryptographic primitives: detached signatures, symmetric AEAD,
//! asymmetric sealed boxes, and domain-separated hashing / key derivation.
//!
//! Everything above this module treats these as a contract; no other
//! module touches a curve or cipher type directly.

pub mod hashing;
pub mod sealed;
pub mod signing;
pub mod symmetric;

pub use hashing::{contexts, hash, Hash};
pub use sealed::SealedError;
pub use signing::SigningError;
pub use symmetric::SymmetricError;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
