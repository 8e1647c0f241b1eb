//! The seam between consensus and the application.
//!
//! Consensus owns a reference to the application; the mempool validates
//! through the same trait. Nothing below this trait points back up, which
//! keeps the consensus / mempool / application references one-way.

use crate::{Hash, Txs};

/// Result code of executing one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptCode {
    /// Executed and applied.
    Ok,
    /// Payload failed to decode.
    EncodingError,
    /// Rejected; state unchanged for this transaction.
    Abort,
}

/// Per-transaction execution receipt.
#[derive(Debug, Clone)]
pub struct ExecutionReceipt {
    /// Outcome.
    pub code: ReceiptCode,

    /// Human-readable reason on abort.
    pub info: String,

    /// The raw transaction this receipt is for.
    pub raw_tx: Vec<u8>,
}

impl ExecutionReceipt {
    /// An OK receipt for a transaction.
    pub fn ok(raw_tx: Vec<u8>) -> Self {
        Self {
            code: ReceiptCode::Ok,
            info: String::new(),
            raw_tx,
        }
    }

    /// An abort receipt carrying the reason.
    pub fn abort(raw_tx: Vec<u8>, info: impl Into<String>) -> Self {
        Self {
            code: ReceiptCode::Abort,
            info: info.into(),
            raw_tx,
        }
    }

    /// Whether the transaction was applied.
    pub fn is_ok(&self) -> bool {
        self.code == ReceiptCode::Ok
    }
}

/// Result of executing one block's transactions.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResponse {
    /// Receipts for the intra-shard transactions, in order.
    pub receipts: Vec<ExecutionReceipt>,

    /// Per-destination-shard relay payloads produced by pre-executing
    /// the cross-shard transactions, aligned with the canonical shard
    /// order.
    pub op_txs: Vec<Txs>,

    /// Receipts for the cross-shard transactions, in order.
    pub cross_shard_receipts: Vec<ExecutionReceipt>,
}

/// The application behind consensus.
pub trait AbciApp: Send + Sync {
    /// Whether a raw transaction is admissible to the given mempool.
    fn validate_tx(&self, tx: &[u8], is_cross_shard: bool) -> bool;

    /// Execute a committed block: relay receipts first, then intra-shard
    /// transactions, then pre-execution of the new cross-shard batch.
    fn execution(&self, ptxs: &Txs, cross_shard_txs: &Txs, commit_txs: &[Txs])
        -> ExecutionResponse;

    /// Current application state commitment.
    fn commit(&self) -> Hash;
}
