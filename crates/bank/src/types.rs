//! Bank transaction types and the stored-value codec.

use crate::BankError;
use lattice_p2p::MessageType;
use lattice_types::{from_wire, now_ms, to_wire};
use serde::{Deserialize, Serialize};

/// Lock byte: read-locked.
pub const R_LOCKED: u8 = b'0';
/// Lock byte: write-locked.
pub const W_LOCKED: u8 = b'1';
/// Lock byte: free.
pub const FREE: u8 = b'2';

/// Balance a key is born with on first read.
pub const INIT_BALANCE: u32 = 1_000_000;

/// A transfer from one or more sources to one or more destinations.
///
/// `shards` lists the participating shards, sorted and unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTx {
    /// Source keys.
    pub from: Vec<String>,
    /// Debit per source key.
    pub from_money: Vec<u32>,
    /// Destination keys.
    pub to: Vec<String>,
    /// Credit per destination key.
    pub to_money: Vec<u32>,
    /// Participating shards, sorted and unique.
    pub shards: Vec<String>,
    /// Creation time, milliseconds since the Unix epoch.
    pub time_ms: u64,
    /// Padding to reach a fixed on-wire length.
    pub buffer: Vec<u8>,
}

impl TransferTx {
    /// Every key the transfer touches, sources first, without duplicates.
    pub fn touched_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::with_capacity(self.from.len() + self.to.len());
        for key in self.from.iter().chain(self.to.iter()) {
            if !keys.contains(&key.as_str()) {
                keys.push(key);
            }
        }
        keys
    }
}

/// Direct account initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertTx {
    /// Account key.
    pub account: String,
    /// Initial balance.
    pub money: u32,
    /// Creation time, milliseconds since the Unix epoch.
    pub time_ms: u64,
    /// Padding to reach a fixed on-wire length.
    pub buffer: Vec<u8>,
}

/// Build a transfer with the current timestamp.
pub fn new_transfer_tx(
    from: Vec<String>,
    from_money: Vec<u32>,
    to: Vec<String>,
    to_money: Vec<u32>,
    shards: Vec<String>,
) -> TransferTx {
    TransferTx {
        from,
        from_money,
        to,
        to_money,
        shards,
        time_ms: now_ms(),
        buffer: Vec::new(),
    }
}

/// Build a transfer padded to at least `must_len` wire bytes.
pub fn new_transfer_tx_must_len(
    from: Vec<String>,
    from_money: Vec<u32>,
    to: Vec<String>,
    to_money: Vec<u32>,
    shards: Vec<String>,
    must_len: usize,
) -> TransferTx {
    let mut tx = new_transfer_tx(from, from_money, to, to_money, shards);
    let current = transfer_bytes(&tx).len();
    if must_len > current {
        tx.buffer = vec![b'0'; must_len - current];
    }
    tx
}

/// Wire bytes of a transfer: 4-byte big-endian type tag then payload.
pub fn transfer_bytes(tx: &TransferTx) -> Vec<u8> {
    let mut out = (MessageType::TxTransfer as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&to_wire(tx));
    out
}

/// Wire bytes of an insert: 4-byte big-endian type tag then payload.
pub fn insert_bytes(tx: &InsertTx) -> Vec<u8> {
    let mut out = (MessageType::TxInsert as u32).to_be_bytes().to_vec();
    out.extend_from_slice(&to_wire(tx));
    out
}

/// The 4-byte type tag of a raw transaction, if present.
pub fn tx_type_tag(tx: &[u8]) -> Option<u32> {
    tx.get(..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decode a transfer from its prefixed wire bytes.
pub fn transfer_from_bytes(tx: &[u8]) -> Result<TransferTx, BankError> {
    if tx_type_tag(tx) != Some(MessageType::TxTransfer as u32) {
        return Err(BankError::Encoding("not a transfer transaction".into()));
    }
    from_wire(&tx[4..]).map_err(|e| BankError::Encoding(e.to_string()))
}

/// Decode an insert from its prefixed wire bytes.
pub fn insert_from_bytes(tx: &[u8]) -> Result<InsertTx, BankError> {
    if tx_type_tag(tx) != Some(MessageType::TxInsert as u32) {
        return Err(BankError::Encoding("not an insert transaction".into()));
    }
    from_wire(&tx[4..]).map_err(|e| BankError::Encoding(e.to_string()))
}

/// Structural validity of a transfer.
pub fn validate_transfer_tx(tx: &TransferTx) -> Result<(), BankError> {
    if tx.from.len() != tx.from_money.len() || tx.to.len() != tx.to_money.len() {
        return Err(BankError::Encoding(
            "from/from_money and to/to_money lengths differ".into(),
        ));
    }
    if tx.from.is_empty() || tx.to.is_empty() {
        return Err(BankError::Encoding("from/to is empty".into()));
    }
    let from_sum: u64 = tx.from_money.iter().map(|&m| m as u64).sum();
    let to_sum: u64 = tx.to_money.iter().map(|&m| m as u64).sum();
    if from_sum != to_sum {
        return Err(BankError::Encoding(
            "from_money and to_money sums differ".into(),
        ));
    }
    Ok(())
}

/// One shard's balance snapshot for a cross-shard transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankData {
    /// Keys the sending shard owns, in stable order.
    pub keys: Vec<String>,
    /// Balance per key at lock time.
    pub balances: Vec<u32>,
}

/// Relay payload sent to every peer shard of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTransferTx {
    /// Hash of the original transfer transaction bytes.
    pub tx_hash: Vec<u8>,
    /// The sending shard's balance snapshot.
    pub data: BankData,
}

/// Per-transfer collection state: one snapshot slot per participating
/// shard, aligned with the transfer's sorted shard list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayTransferTxSet {
    /// The original transfer transaction bytes (with type tag).
    pub tx: Vec<u8>,
    /// Participating shards.
    pub shards: Vec<String>,
    /// Snapshot per shard; the transfer commits once all are present.
    pub datas: Vec<Option<BankData>>,
}

impl RelayTransferTxSet {
    /// Skeleton with every slot empty.
    pub fn skeleton(tx: Vec<u8>, shards: Vec<String>) -> Self {
        let datas = vec![None; shards.len()];
        Self { tx, shards, datas }
    }

    /// Slot index for a shard.
    pub fn index_of(&self, shard: &str) -> Option<usize> {
        self.shards.iter().position(|s| s == shard)
    }

    /// Whether every slot holds a snapshot.
    pub fn is_finished(&self) -> bool {
        self.datas.iter().all(|d| d.is_some())
    }
}

/// Stored value codec: one lock byte then the balance, big-endian.
pub fn marshal_value(money: u32, locked: u8) -> Vec<u8> {
    let mut out = vec![locked];
    out.extend_from_slice(&money.to_be_bytes());
    out
}

/// Decode a stored value into (balance, lock byte).
pub fn unmarshal_value(bytes: &[u8], key: &str) -> Result<(u32, u8), BankError> {
    if bytes.len() != 5 {
        return Err(BankError::CorruptValue {
            key: key.to_string(),
        });
    }
    let money = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    Ok((money, bytes[0]))
}
