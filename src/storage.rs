//! In-memory key-value storage.
//!
//! A single `HashMap` guarded by one `RwLock`. There is no expiration,
//! eviction, or memory accounting here; this store only ever holds what
//! callers explicitly `set`.

use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe in-memory key-value store.
///
/// Multiple concurrent readers are allowed; writers are exclusive. Keys and
/// values are arbitrary byte strings, compared byte-exact (case-sensitive).
#[derive(Default)]
pub struct Store {
    data: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
}

impl Store {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a key's value. Never fails.
    pub fn set(&self, key: Vec<u8>, value: Vec<u8>) {
        self.data.write().unwrap().insert(key, value);
    }

    /// Look up a key's value.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.read().unwrap().get(key).cloned()
    }

    /// Remove a key. Returns true iff a key was actually removed.
    pub fn del(&self, key: &[u8]) -> bool {
        self.data.write().unwrap().remove(key).is_some()
    }

    /// True iff the key is currently present.
    pub fn exists(&self, key: &[u8]) -> bool {
        self.data.read().unwrap().contains_key(key)
    }

    /// Number of live keys.
    pub fn size(&self) -> usize {
        self.data.read().unwrap().len()
    }
}
