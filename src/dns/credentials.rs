//! In-memory credential store.

use crate::core::{Credential, CredentialIdentity, CredentialStore, CredentialType};
use crate::dns::CredentialError;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Holds up to `capacity` credentials keyed by (tag, type).
pub struct MemoryCredentialStore {
    capacity: usize,
    entries: Mutex<HashMap<CredentialIdentity, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn contains(&self, identity: CredentialIdentity) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&identity)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn add(&self, credential: &Credential) -> Result<(), CredentialError> {
        if credential.kind == CredentialType::Empty {
            return Err(CredentialError::TypeUnknown);
        }
        if credential.material.is_empty() {
            return Err(CredentialError::Invalid);
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let identity = credential.identity();
        if entries.contains_key(&identity) {
            return Err(CredentialError::AlreadyExists);
        }
        if entries.len() >= self.capacity {
            return Err(CredentialError::NoSpace);
        }
        entries.insert(identity, credential.clone());
        debug!(tag = identity.tag, kind = ?identity.kind, "Credential added");
        Ok(())
    }

    fn remove(&self, identity: CredentialIdentity) {
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&identity);
        if removed.is_some() {
            debug!(tag = identity.tag, kind = ?identity.kind, "Credential removed");
        }
    }
}
