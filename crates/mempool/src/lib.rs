//! Lightweight FIFO transaction pools.
//!
//! A replica runs two pools, one for intra-shard transactions and one
//! for cross-shard transactions. Insertion order is reap order; removal
//! is keyed by transaction hash. Admission goes through the
//! application's `validate_tx` seam.

use indexmap::IndexMap;
use lattice_p2p::{ChannelId, MessageType, P2pError, Reactor};
use lattice_types::{tx_key, AbciApp, Txs};
use parking_lot::Mutex;
use std::sync::Arc;

/// Errors from transaction admission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MempoolError {
    /// The application rejected the transaction.
    #[error("invalid transaction")]
    InvalidTx,
}

/// One FIFO pool over an insertion-ordered map keyed by tx hash.
pub struct Mempool {
    txs: Mutex<IndexMap<String, Vec<u8>>>,
    abci: Arc<dyn AbciApp>,
    is_cross_shard: bool,
}

impl Mempool {
    /// Create a pool; `is_cross_shard` selects the validation mode.
    pub fn new(is_cross_shard: bool, abci: Arc<dyn AbciApp>) -> Arc<Self> {
        Arc::new(Self {
            txs: Mutex::new(IndexMap::new()),
            abci,
            is_cross_shard,
        })
    }

    /// Admit one transaction after application validation.
    pub fn add_tx(&self, tx: Vec<u8>) -> Result<(), MempoolError> {
        if !self.abci.validate_tx(&tx, self.is_cross_shard) {
            return Err(MempoolError::InvalidTx);
        }
        self.txs.lock().insert(tx_key(&tx), tx);
        Ok(())
    }

    /// Remove one transaction by its bytes.
    pub fn remove_tx(&self, tx: &[u8]) {
        self.txs.lock().shift_remove(&tx_key(tx));
    }

    /// Take transactions from the front until `max_bytes` would be
    /// exceeded. The pool is left unchanged; removal happens on
    /// [`Mempool::update`] once the block is made.
    pub fn reap(&self, max_bytes: usize) -> Txs {
        let txs = self.txs.lock();
        let mut out = Txs::new();
        let mut current = 0usize;
        for tx in txs.values() {
            current += tx.len();
            if current >= max_bytes {
                break;
            }
            out.push(tx.clone());
        }
        out
    }

    /// Drop transactions that were included in a block.
    pub fn update(&self, txs: &Txs) {
        if txs.is_empty() {
            return;
        }
        let mut pool = self.txs.lock();
        for tx in txs.iter() {
            pool.shift_remove(&tx_key(tx));
        }
    }

    /// Number of pending transactions.
    pub fn len(&self) -> usize {
        self.txs.lock().len()
    }

    /// Whether the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.txs.lock().is_empty()
    }
}

impl Reactor for Mempool {
    fn receive(
        &self,
        _channel: ChannelId,
        payload: &[u8],
        _message_type: MessageType,
    ) -> Result<(), P2pError> {
        self.add_tx(payload.to_vec())
            .map_err(|e| P2pError::Reactor(e.to_string()))
    }
}
