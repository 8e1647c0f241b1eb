//! The bank's view of the key-value store during one execution pass.

use crate::types::{marshal_value, unmarshal_value, FREE, INIT_BALANCE, W_LOCKED};
use crate::BankError;
use lattice_store::PrefixStore;
use lattice_types::RangeList;
use std::collections::HashMap;

/// Store access scoped to one execution pass.
///
/// Local keys (inside the shard's range list) read and write through the
/// store, auto-initialising on first read. Foreign keys resolve against
/// the retain map loaded from relayed balance snapshots and are
/// write-discarded, so a replayed cross-shard transfer only touches the
/// keys this shard owns.
pub struct BankDb<'a> {
    store: &'a PrefixStore,
    range: &'a RangeList,
    retain: HashMap<String, u32>,
}

impl<'a> BankDb<'a> {
    /// A fresh view with an empty retain map.
    pub fn new(store: &'a PrefixStore, range: &'a RangeList) -> Self {
        Self {
            store,
            range,
            retain: HashMap::new(),
        }
    }

    /// Whether this shard owns `key`.
    pub fn is_local(&self, key: &str) -> bool {
        self.range.search(key)
    }

    /// Read (balance, lock byte), auto-initialising missing local keys.
    pub fn get(&mut self, key: &str) -> Result<(u32, u8), BankError> {
        if self.is_local(key) {
            match self.store.get(key.as_bytes())? {
                Some(bytes) if !bytes.is_empty() => unmarshal_value(&bytes, key),
                _ => {
                    self.set(key, INIT_BALANCE, FREE)?;
                    Ok((INIT_BALANCE, FREE))
                }
            }
        } else if let Some(&balance) = self.retain.get(key) {
            Ok((balance, FREE))
        } else {
            Err(BankError::KeyUnknownShard {
                key: key.to_string(),
            })
        }
    }

    /// Write a local key's value; writes to foreign keys are dropped.
    pub fn set(&mut self, key: &str, money: u32, locked: u8) -> Result<(), BankError> {
        if !self.is_local(key) {
            return Ok(());
        }
        self.store
            .set(key.as_bytes(), &marshal_value(money, locked))?;
        Ok(())
    }

    /// Load a foreign balance into the retain map.
    pub fn load_data(&mut self, key: &str, balance: u32) {
        self.retain.insert(key.to_string(), balance);
    }

    /// Drop the retain map.
    pub fn clear(&mut self) {
        self.retain.clear();
    }

    /// W-lock a local key, initialising it if missing.
    pub fn w_lock(&mut self, key: &str) -> Result<(), BankError> {
        let (money, _) = self.get(key)?;
        self.set(key, money, W_LOCKED)
    }

    /// Release a local key's lock, keeping its balance.
    pub fn w_unlock(&mut self, key: &str) -> Result<(), BankError> {
        let (money, _) = self.get(key)?;
        self.set(key, money, FREE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_store::Database;

    fn setup() -> (tempfile::TempDir, PrefixStore, RangeList) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path()).unwrap();
        let store = db.prefix("abci.minibank");
        let mut range = RangeList::new();
        range.add_range("a", "m");
        (dir, store, range)
    }

    #[test]
    fn test_missing_local_key_auto_initialises() {
        let (_dir, store, range) = setup();
        let mut db = BankDb::new(&store, &range);

        assert_eq!(db.get("alice").unwrap(), (INIT_BALANCE, FREE));
        // The initialisation persisted.
        assert!(store.get(b"alice").unwrap().is_some());
    }

    #[test]
    fn test_lock_unlock_cycle() {
        let (_dir, store, range) = setup();
        let mut db = BankDb::new(&store, &range);

        db.w_lock("bob").unwrap();
        assert_eq!(db.get("bob").unwrap(), (INIT_BALANCE, W_LOCKED));

        db.w_unlock("bob").unwrap();
        assert_eq!(db.get("bob").unwrap(), (INIT_BALANCE, FREE));
    }

    #[test]
    fn test_foreign_key_reads_from_retain_map() {
        let (_dir, store, range) = setup();
        let mut db = BankDb::new(&store, &range);

        assert!(matches!(
            db.get("zebra"),
            Err(BankError::KeyUnknownShard { .. })
        ));

        db.load_data("zebra", 777);
        assert_eq!(db.get("zebra").unwrap(), (777, FREE));

        // Foreign writes are discarded.
        db.set("zebra", 1, FREE).unwrap();
        assert!(store.get(b"zebra").unwrap().is_none());

        db.clear();
        assert!(db.get("zebra").is_err());
    }
}
