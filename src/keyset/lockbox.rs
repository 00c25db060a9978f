/// Lockboxes — sealed envelopes that deliver a keyset-with-secrets to the
/// holder of another keyset's encryption key.
///
/// The set of lockboxes on a team forms a directed graph: a device can
/// open its member's lockbox, a member can open the team's and their
/// roles' lockboxes. Key rotation replaces lockboxes at a higher contents
/// generation; old lockboxes stay on the graph so historic ciphertexts
/// remain reachable.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::sealed;
use crate::keyset::keyset::{PublicKeyset, SecretKeyset};
use crate::keyset::scope::Scope;

#[derive(Error, Debug)]
pub enum LockboxError {
    #[error("Lockbox recipient scope must differ from contents scope")]
    SelfAddressed,
    #[error("Lockbox was not sealed for this keyset")]
    WrongRecipient,
    #[error("Lockbox ciphertext invalid")]
    InvalidCiphertext,
    #[error("Rotation must keep the contents scope (was {was}, got {got})")]
    RotationScopeMismatch { was: Scope, got: Scope },
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, LockboxError>;

// ---------------------------------------------------------------------------
// Lockbox
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Lockbox {
    /// Who can open this lockbox.
    pub recipient_scope: Scope,
    pub recipient_generation: u32,
    /// The recipient keyset's X25519 public key the payload was sealed to.
    pub recipient_encryption: [u8; 32],
    /// What is inside (public information only).
    pub contents_scope: Scope,
    pub contents_generation: u32,
    /// Sealed box over the bincode-encoded [`SecretKeyset`].
    pub sealed: Vec<u8>,
}

impl Lockbox {
    /// Seal `contents` to the holder of `recipient`'s encryption key.
    pub fn create(contents: &SecretKeyset, recipient: &PublicKeyset) -> Result<Lockbox> {
        if contents.scope == recipient.scope {
            return Err(LockboxError::SelfAddressed);
        }

        let payload = bincode::serialize(contents)
            .map_err(|e| LockboxError::Serialization(e.to_string()))?;
        let sealed = sealed::seal(&payload, &recipient.encryption)
            .map_err(|_| LockboxError::InvalidCiphertext)?;

        Ok(Lockbox {
            recipient_scope: recipient.scope.clone(),
            recipient_generation: recipient.generation,
            recipient_encryption: recipient.encryption,
            contents_scope: contents.scope.clone(),
            contents_generation: contents.generation,
            sealed,
        })
    }

    /// Open with the recipient's secret keyset.
    pub fn open(&self, recipient: &SecretKeyset) -> Result<SecretKeyset> {
        if recipient.encryption != self.recipient_encryption {
            return Err(LockboxError::WrongRecipient);
        }

        let payload = sealed::open(&self.sealed, recipient.encryption_secret())
            .map_err(|_| LockboxError::InvalidCiphertext)?;

        bincode::deserialize(&payload).map_err(|e| LockboxError::Serialization(e.to_string()))
    }

    /// Re-seal this lockbox around rotated contents for the same recipient.
    /// The new contents must keep the original contents scope.
    pub fn rotate(&self, new_contents: &SecretKeyset) -> Result<Lockbox> {
        if new_contents.scope != self.contents_scope {
            return Err(LockboxError::RotationScopeMismatch {
                was: self.contents_scope.clone(),
                got: new_contents.scope.clone(),
            });
        }

        let recipient = PublicKeyset {
            scope: self.recipient_scope.clone(),
            generation: self.recipient_generation,
            // The signing half is not recorded in a lockbox; it is not
            // needed to re-seal. Zeros keep the struct total.
            signing: [0u8; 32],
            encryption: self.recipient_encryption,
        };
        Lockbox::create(new_contents, &recipient)
    }
}

// ---------------------------------------------------------------------------
// Visibility closure
// ---------------------------------------------------------------------------

/// All scopes reachable from `scope` through the lockbox graph, in BFS
/// order, deduplicated. Does not include `scope` itself.
pub fn visible_scopes(lockboxes: &[Lockbox], scope: &Scope) -> Vec<Scope> {
    let mut seen: Vec<Scope> = Vec::new();
    let mut frontier: Vec<Scope> = vec![scope.clone()];

    while let Some(current) = frontier.pop() {
        for lockbox in lockboxes {
            if lockbox.recipient_scope == current && !seen.contains(&lockbox.contents_scope) {
                seen.push(lockbox.contents_scope.clone());
                frontier.push(lockbox.contents_scope.clone());
            }
        }
    }
    seen
}

/// All keysets-with-secrets reachable from `keyset` by actually opening
/// lockboxes, transitively. Lockboxes that fail to open (stale recipient
/// generation, tampered payload) are skipped.
pub fn visible_keys(lockboxes: &[Lockbox], keyset: &SecretKeyset) -> Vec<SecretKeyset> {
    let mut opened: Vec<SecretKeyset> = Vec::new();
    let mut frontier: Vec<SecretKeyset> = vec![keyset.clone()];

    while let Some(current) = frontier.pop() {
        for lockbox in lockboxes {
            if lockbox.recipient_encryption != current.encryption {
                continue;
            }
            if let Ok(contents) = lockbox.open(&current) {
                let already = opened
                    .iter()
                    .any(|k| k.scope == contents.scope && k.generation == contents.generation);
                if !already {
                    opened.push(contents.clone());
                    frontier.push(contents);
                }
            }
        }
    }
    opened
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
