//! The mini-bank application.
//!
//! A shard-local key-value bank with per-key lock bytes. Intra-shard
//! transfers apply immediately; cross-shard transfers run the
//! lock / relay / unlock lifecycle: the originating shards W-lock their
//! keys and exchange balance snapshots, and each shard replays the
//! transfer once its relay set is complete.

mod app;
mod db;
mod importer;
mod types;

pub use app::Application;
pub use db::BankDb;
pub use importer::{Importer, TxSink};
pub use types::{
    insert_bytes, insert_from_bytes, new_transfer_tx, new_transfer_tx_must_len, transfer_bytes,
    transfer_from_bytes, tx_type_tag, validate_transfer_tx, BankData, InsertTx, RelayTransferTx,
    RelayTransferTxSet, TransferTx, FREE, INIT_BALANCE, R_LOCKED, W_LOCKED,
};

/// Errors from the bank application.
#[derive(Debug, thiserror::Error)]
pub enum BankError {
    /// A referenced key is currently locked.
    #[error("key {key} is locked")]
    LockConflict {
        /// The locked key.
        key: String,
    },

    /// A source key cannot cover its debit.
    #[error("key {key} has insufficient balance")]
    InsufficientBalance {
        /// The short key.
        key: String,
    },

    /// A key belongs to no known shard, or to a foreign shard with no
    /// relayed balance.
    #[error("key {key} does not exist in this shard")]
    KeyUnknownShard {
        /// The unknown key.
        key: String,
    },

    /// The transaction's shard list does not fit this shard.
    #[error("transaction shard list does not match this shard")]
    ShardsMismatch,

    /// A payload failed to decode or validate.
    #[error("transaction encoding error: {0}")]
    Encoding(String),

    /// A stored value was not in the lock-byte + balance format.
    #[error("corrupt stored value for key {key}")]
    CorruptValue {
        /// The key with the corrupt value.
        key: String,
    },

    /// The underlying store failed.
    #[error(transparent)]
    Store(#[from] lattice_store::StoreError),
}
