//! Namespaced persistent KV store.
//!
//! One RocksDB instance per node directory, shared by every subsystem
//! through prefix-scoped handles: `consensus` holds cross-shard message
//! dedup keys and block-by-height entries, `abci.minibank` holds account
//! values and relay-transfer state.

use lattice_types::Hash;
use std::path::Path;
use std::sync::Arc;

/// Errors from the underlying store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// RocksDB failed to open or operate.
    #[error("store error: {0}")]
    Backend(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// The node's single on-disk database.
#[derive(Clone)]
pub struct Database {
    db: Arc<rocksdb::DB>,
}

impl Database {
    /// Open (or create) the database under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = rocksdb::DB::open_default(dir.as_ref())?;
        Ok(Self { db: Arc::new(db) })
    }

    /// A handle scoped to one namespace.
    pub fn prefix(&self, namespace: &str) -> PrefixStore {
        PrefixStore {
            db: self.db.clone(),
            prefix: namespace.as_bytes().to_vec(),
        }
    }
}

/// A namespace-scoped view of the database.
#[derive(Clone)]
pub struct PrefixStore {
    db: Arc<rocksdb::DB>,
    prefix: Vec<u8>,
}

impl PrefixStore {
    fn scoped(&self, kind: u8, key: &[u8]) -> Vec<u8> {
        let mut scoped = Vec::with_capacity(self.prefix.len() + 2 + key.len());
        scoped.extend_from_slice(&self.prefix);
        scoped.push(b'/');
        scoped.push(kind);
        scoped.extend_from_slice(key);
        scoped
    }

    /// Get a plain value.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(self.scoped(b'k', key))?)
    }

    /// Set a plain value.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.put(self.scoped(b'k', key), value)?)
    }

    /// Delete a plain value.
    pub fn delete(&self, key: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.delete(self.scoped(b'k', key))?)
    }

    /// Whether a special key exists.
    pub fn has_special(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.db.get(self.scoped(b's', key))?.is_some())
    }

    /// Get a special value.
    pub fn get_special(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.db.get(self.scoped(b's', key))?)
    }

    /// Set a special value.
    pub fn set_special(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        Ok(self.db.put(self.scoped(b's', key), value)?)
    }

    /// Persist a block's bytes under its (chain, view) slot.
    pub fn set_block_by_height(
        &self,
        chain_id: &str,
        view: u64,
        bytes: &[u8],
    ) -> Result<(), StoreError> {
        let key = format!("{}/{:020}", chain_id, view);
        self.db.put(self.scoped(b'b', key.as_bytes()), bytes)?;
        Ok(())
    }

    /// Load a block's bytes by (chain, view).
    pub fn get_block_by_height(
        &self,
        chain_id: &str,
        view: u64,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let key = format!("{}/{:020}", chain_id, view);
        Ok(self.db.get(self.scoped(b'b', key.as_bytes()))?)
    }
}

/// Dedup key for a received cross-shard message.
pub fn csm_key(source_chain: &str, last_hash: &Hash) -> Vec<u8> {
    format!("{}:{}", source_chain, last_hash.to_hex()).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespaces_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();

        let consensus = db.prefix("consensus");
        let bank = db.prefix("abci.minibank");

        consensus.set(b"key", b"from-consensus").unwrap();
        bank.set(b"key", b"from-bank").unwrap();

        assert_eq!(
            consensus.get(b"key").unwrap(),
            Some(b"from-consensus".to_vec())
        );
        assert_eq!(bank.get(b"key").unwrap(), Some(b"from-bank".to_vec()));
    }

    #[test]
    fn test_special_keys_are_separate() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = db.prefix("consensus");

        store.set(b"key", b"plain").unwrap();
        assert!(!store.has_special(b"key").unwrap());

        store.set_special(b"key", b"special").unwrap();
        assert!(store.has_special(b"key").unwrap());
        assert_eq!(store.get_special(b"key").unwrap(), Some(b"special".to_vec()));
        assert_eq!(store.get(b"key").unwrap(), Some(b"plain".to_vec()));
    }

    #[test]
    fn test_block_by_height_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = db.prefix("consensus");

        store.set_block_by_height("s1", 42, b"block bytes").unwrap();
        assert_eq!(
            store.get_block_by_height("s1", 42).unwrap(),
            Some(b"block bytes".to_vec())
        );
        assert_eq!(store.get_block_by_height("s1", 43).unwrap(), None);
        assert_eq!(store.get_block_by_height("s2", 42).unwrap(), None);
    }

    #[test]
    fn test_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = db.prefix("abci.minibank");

        store.set(b"gone", b"v").unwrap();
        store.delete(b"gone").unwrap();
        assert_eq!(store.get(b"gone").unwrap(), None);
    }
}
