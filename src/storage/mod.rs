//! Persistence formats: the share store and keyring sealing.
//!
//! The graph itself serializes via [`crate::graph::SignedGraph`]; this
//! module packs per-share records `{serialized graph, sealed keyring,
//! document ids}` into one binary map and seals keyrings with a key
//! derived from the local device's encryption secret, so a stolen store
//! file reveals nothing without the device.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::hashing::{self, contexts};
use crate::crypto::symmetric;
use crate::keyset::SecretKeyset;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Keyring could not be unsealed — wrong device or corrupted store")]
    KeyringSealed,
}

pub type Result<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Share store
// ---------------------------------------------------------------------------

/// One persisted share.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub serialized_graph: Vec<u8>,
    /// The team keyring, symmetric-encrypted with the local device key.
    pub sealed_keyring: Vec<u8>,
    /// Application document ids attached to this share.
    pub document_ids: Vec<String>,
}

/// All persisted shares, keyed by share id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareStore {
    records: BTreeMap<String, ShareRecord>,
}

impl ShareStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, share_id: &str, record: ShareRecord) {
        self.records.insert(share_id.to_string(), record);
    }

    pub fn get(&self, share_id: &str) -> Option<&ShareRecord> {
        self.records.get(share_id)
    }

    pub fn remove(&mut self, share_id: &str) -> Option<ShareRecord> {
        self.records.remove(share_id)
    }

    pub fn share_ids(&self) -> Vec<&str> {
        self.records.keys().map(String::as_str).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn pack(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Keyring sealing
// ---------------------------------------------------------------------------

fn device_store_key(device_keys: &SecretKeyset) -> [u8; 32] {
    hashing::derive_key(contexts::SHARE_STORE, device_keys.encryption_secret())
}

/// Seal a keyring export with the local device's symmetric key.
pub fn seal_keyring(keys: &[SecretKeyset], device_keys: &SecretKeyset) -> Result<Vec<u8>> {
    let payload =
        bincode::serialize(keys).map_err(|e| StorageError::Serialization(e.to_string()))?;
    symmetric::encrypt(&payload, &device_store_key(device_keys))
        .map_err(|_| StorageError::KeyringSealed)
}

/// Unseal a keyring with the same device's key.
pub fn open_keyring(sealed: &[u8], device_keys: &SecretKeyset) -> Result<Vec<SecretKeyset>> {
    let payload = symmetric::decrypt(sealed, &device_store_key(device_keys))
        .map_err(|_| StorageError::KeyringSealed)?;
    bincode::deserialize(&payload).map_err(|e| StorageError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
