//! Transaction list type and transaction hashing.

use crate::{merkle_root_bytes, Hash};
use serde::{Deserialize, Serialize};

/// Hash of a raw transaction's bytes.
pub fn tx_hash(tx: &[u8]) -> Hash {
    Hash::from_bytes(tx)
}

/// Hex key of a transaction, used for mempool and relay-set lookups.
pub fn tx_key(tx: &[u8]) -> String {
    tx_hash(tx).to_hex()
}

/// An ordered list of raw transactions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Txs(pub Vec<Vec<u8>>);

impl Txs {
    /// An empty list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Merkle root over the transaction bytes.
    pub fn hash(&self) -> Hash {
        merkle_root_bytes(&self.0)
    }

    /// Number of transactions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total byte size of all transactions.
    pub fn total_bytes(&self) -> usize {
        self.0.iter().map(|tx| tx.len()).sum()
    }

    /// Iterate over the raw transactions.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.0.iter().map(|tx| tx.as_slice())
    }

    /// Append a transaction.
    pub fn push(&mut self, tx: Vec<u8>) {
        self.0.push(tx);
    }
}

impl FromIterator<Vec<u8>> for Txs {
    fn from_iter<I: IntoIterator<Item = Vec<u8>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
