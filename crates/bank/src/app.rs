//! The bank application driven by consensus.

use crate::types::{
    insert_from_bytes, transfer_from_bytes, tx_type_tag, validate_transfer_tx, BankData,
    RelayTransferTx, RelayTransferTxSet, FREE,
};
use crate::{BankDb, BankError};
use lattice_p2p::MessageType;
use lattice_store::PrefixStore;
use lattice_types::{
    from_wire, to_wire, tx_hash, AbciApp, ExecutionReceipt, ExecutionResponse, Hash, RangeList,
    ShardInfo, Txs,
};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, warn};

const UNDO_PREFIX: &[u8] = b"undo";

fn undo_key(tx_hash: &[u8]) -> Vec<u8> {
    let mut key = UNDO_PREFIX.to_vec();
    key.extend_from_slice(tx_hash);
    key
}

/// Balance snapshots stashed before the local relay-set skeleton exists,
/// keyed by source shard.
type UndoRelays = BTreeMap<String, BankData>;

/// The mini-bank application for one shard.
pub struct Application {
    store: PrefixStore,
    chain_id: String,
    shard_ids: Vec<String>,
    key_ranges: BTreeMap<String, RangeList>,
    my_range: RangeList,
    app_status: Hash,
}

impl Application {
    /// Build the application for `chain_id`.
    pub fn new(
        store: PrefixStore,
        chain_id: impl Into<String>,
        key_ranges: BTreeMap<String, RangeList>,
        shard_info: &ShardInfo,
    ) -> Result<Self, BankError> {
        let chain_id = chain_id.into();
        let my_range = key_ranges
            .get(&chain_id)
            .cloned()
            .ok_or(BankError::ShardsMismatch)?;
        Ok(Self {
            store,
            chain_id,
            shard_ids: shard_info.shard_ids(),
            key_ranges,
            my_range,
            app_status: Hash::ZERO,
        })
    }

    /// The shard owning `key`, scanning the shard ranges in canonical
    /// order. Ranges are disjoint by construction.
    pub fn search_key_shard(&self, key: &str) -> Option<&str> {
        self.key_ranges
            .iter()
            .find(|(_, range)| range.search(key))
            .map(|(shard, _)| shard.as_str())
    }

    /// Whether this shard owns `key`.
    pub fn search_key_intra_shard(&self, key: &str) -> bool {
        self.my_range.search(key)
    }

    fn validate(&self, tx: &[u8]) -> Result<(), BankError> {
        match tx_type_tag(tx) {
            Some(tag) if tag == MessageType::TxTransfer as u32 => {
                let transfer = transfer_from_bytes(tx)?;
                validate_transfer_tx(&transfer)
            }
            Some(tag) if tag == MessageType::TxInsert as u32 => {
                insert_from_bytes(tx).map(|_| ())
            }
            _ => Err(BankError::Encoding("unknown transaction tag".into())),
        }
    }

    /// Execute one intra-shard transaction.
    fn execute(&self, tx: &[u8], db: &mut BankDb<'_>) -> Result<(), BankError> {
        match tx_type_tag(tx) {
            Some(tag) if tag == MessageType::TxInsert as u32 => {
                let insert = insert_from_bytes(tx)?;
                db.set(&insert.account, insert.money, FREE)
            }
            Some(tag) if tag == MessageType::TxTransfer as u32 => {
                let transfer = transfer_from_bytes(tx)?;
                validate_transfer_tx(&transfer)?;
                if transfer.shards.len() != 1 || transfer.shards[0] != self.chain_id {
                    return Err(BankError::ShardsMismatch);
                }

                // Abort before touching anything: every referenced key
                // must be free and every source sufficient.
                for key in transfer.touched_keys() {
                    let (_, lock) = db.get(key)?;
                    if lock != FREE {
                        return Err(BankError::LockConflict {
                            key: key.to_string(),
                        });
                    }
                }
                for (key, &money) in transfer.from.iter().zip(&transfer.from_money) {
                    let (balance, _) = db.get(key)?;
                    if balance < money {
                        return Err(BankError::InsufficientBalance { key: key.clone() });
                    }
                }

                self.do_transfer(&transfer, db)
            }
            _ => Err(BankError::Encoding("unknown transaction tag".into())),
        }
    }

    /// Apply a validated transfer's debits and credits. All written keys
    /// end up free; foreign keys are read from the retain map and their
    /// writes dropped.
    fn do_transfer(
        &self,
        transfer: &crate::TransferTx,
        db: &mut BankDb<'_>,
    ) -> Result<(), BankError> {
        for (key, &money) in transfer.from.iter().zip(&transfer.from_money) {
            let (balance, _) = db.get(key)?;
            let next = balance
                .checked_sub(money)
                .ok_or_else(|| BankError::InsufficientBalance { key: key.clone() })?;
            db.set(key, next, FREE)?;
        }
        for (key, &money) in transfer.to.iter().zip(&transfer.to_money) {
            let (balance, _) = db.get(key)?;
            db.set(key, balance.saturating_add(money), FREE)?;
        }
        Ok(())
    }

    /// Pre-execute the cross-shard batch on the originating shard:
    /// detect lock conflicts, emit one relay per peer shard, and W-lock
    /// the local keys.
    fn pre_execution(
        &self,
        cross_shard_txs: &Txs,
        db: &mut BankDb<'_>,
    ) -> (Vec<Txs>, Vec<ExecutionReceipt>) {
        let mut out: Vec<Txs> = vec![Txs::new(); self.shard_ids.len()];
        let mut receipts = Vec::with_capacity(cross_shard_txs.len());
        // Keys claimed by earlier transactions of this batch.
        let mut wlocks: HashSet<String> = HashSet::new();

        for tx in cross_shard_txs.iter() {
            match self.pre_execute_one(tx, db, &mut wlocks, &mut out) {
                Ok(()) => receipts.push(ExecutionReceipt::ok(tx.to_vec())),
                Err(e) => {
                    debug!(error = %e, "cross-shard transaction aborted");
                    receipts.push(ExecutionReceipt::abort(tx.to_vec(), e.to_string()));
                }
            }
        }
        (out, receipts)
    }

    fn pre_execute_one(
        &self,
        tx: &[u8],
        db: &mut BankDb<'_>,
        wlocks: &mut HashSet<String>,
        out: &mut [Txs],
    ) -> Result<(), BankError> {
        let transfer = transfer_from_bytes(tx)?;
        validate_transfer_tx(&transfer)?;
        if !transfer.shards.iter().any(|s| s == &self.chain_id) {
            return Err(BankError::ShardsMismatch);
        }

        let local_keys: Vec<String> = transfer
            .touched_keys()
            .into_iter()
            .filter(|key| self.search_key_intra_shard(key))
            .map(str::to_string)
            .collect();

        let mut balances = Vec::with_capacity(local_keys.len());
        for key in &local_keys {
            let (balance, lock) = db.get(key)?;
            if lock != FREE || wlocks.contains(key) {
                return Err(BankError::LockConflict { key: key.clone() });
            }
            balances.push(balance);
        }

        let data = BankData {
            keys: local_keys.clone(),
            balances,
        };
        let relay = RelayTransferTx {
            tx_hash: tx_hash(tx).as_bytes().to_vec(),
            data: data.clone(),
        };
        let relay_bytes = to_wire(&relay);
        for shard in &transfer.shards {
            if shard == &self.chain_id {
                continue;
            }
            if let Some(index) = self.shard_ids.iter().position(|s| s == shard) {
                out[index].push(relay_bytes.clone());
            }
        }

        wlocks.extend(local_keys.iter().cloned());
        self.lock_transfer(tx, &transfer, data, db)
    }

    /// Persist the relay-set skeleton, W-lock the local keys, and merge
    /// any snapshots that arrived before the skeleton existed.
    fn lock_transfer(
        &self,
        tx: &[u8],
        transfer: &crate::TransferTx,
        own_data: BankData,
        db: &mut BankDb<'_>,
    ) -> Result<(), BankError> {
        let hash = tx_hash(tx);
        let set_key = hash.as_bytes().to_vec();

        let mut set = RelayTransferTxSet::skeleton(tx.to_vec(), transfer.shards.clone());
        if let Some(index) = set.index_of(&self.chain_id) {
            set.datas[index] = Some(own_data);
        }

        for key in transfer.touched_keys() {
            if self.search_key_intra_shard(key) {
                db.w_lock(key)?;
            }
        }

        let undo = undo_key(hash.as_bytes());
        if let Some(bytes) = self.store.get(&undo)? {
            let stashed: UndoRelays =
                from_wire(&bytes).map_err(|e| BankError::Encoding(e.to_string()))?;
            for (shard, data) in stashed {
                if let Some(index) = set.index_of(&shard) {
                    set.datas[index] = Some(data);
                }
            }
            self.store.delete(&undo)?;
        }

        if set.is_finished() {
            self.commit_relay_set(&set, db)?;
            self.store.delete(&set_key)?;
        } else {
            self.store.set(&set_key, &to_wire(&set))?;
        }
        Ok(())
    }

    /// Slot one received snapshot into the transfer's relay set, or
    /// stash it when the local skeleton has not been created yet.
    fn execute_relay(
        &self,
        relay_bytes: &[u8],
        source_chain: &str,
        db: &mut BankDb<'_>,
    ) -> Result<(), BankError> {
        let relay: RelayTransferTx =
            from_wire(relay_bytes).map_err(|e| BankError::Encoding(e.to_string()))?;
        let set_key = relay.tx_hash.clone();

        match self.store.get(&set_key)? {
            Some(bytes) => {
                let mut set: RelayTransferTxSet =
                    from_wire(&bytes).map_err(|e| BankError::Encoding(e.to_string()))?;
                let Some(index) = set.index_of(source_chain) else {
                    return Err(BankError::ShardsMismatch);
                };
                set.datas[index] = Some(relay.data);

                if set.is_finished() {
                    self.commit_relay_set(&set, db)?;
                    self.store.delete(&set_key)?;
                    self.store.delete(&undo_key(&relay.tx_hash))?;
                } else {
                    self.store.set(&set_key, &to_wire(&set))?;
                }
                Ok(())
            }
            None => {
                let undo = undo_key(&relay.tx_hash);
                let mut stashed: UndoRelays = match self.store.get(&undo)? {
                    Some(bytes) => {
                        from_wire(&bytes).map_err(|e| BankError::Encoding(e.to_string()))?
                    }
                    None => UndoRelays::new(),
                };
                stashed.insert(source_chain.to_string(), relay.data);
                self.store.set(&undo, &to_wire(&stashed))?;
                Ok(())
            }
        }
    }

    /// Complete a transfer: unlock the local keys, load the foreign
    /// balances, replay the transfer, and drop the retain map.
    fn commit_relay_set(
        &self,
        set: &RelayTransferTxSet,
        db: &mut BankDb<'_>,
    ) -> Result<(), BankError> {
        let transfer = transfer_from_bytes(&set.tx)?;

        for key in transfer.touched_keys() {
            if self.search_key_intra_shard(key) {
                db.w_unlock(key)?;
            }
        }
        for data in set.datas.iter().flatten() {
            for (key, &balance) in data.keys.iter().zip(&data.balances) {
                if !self.search_key_intra_shard(key) {
                    db.load_data(key, balance);
                }
            }
        }

        let result = self.do_transfer(&transfer, db);
        db.clear();
        result
    }
}

impl AbciApp for Application {
    fn validate_tx(&self, tx: &[u8], _is_cross_shard: bool) -> bool {
        match self.validate(tx) {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "transaction rejected");
                false
            }
        }
    }

    fn execution(
        &self,
        ptxs: &Txs,
        cross_shard_txs: &Txs,
        commit_txs: &[Txs],
    ) -> ExecutionResponse {
        let mut db = BankDb::new(&self.store, &self.my_range);

        // Relays committed by peer shards, one slot per shard in
        // canonical order.
        for (index, relays) in commit_txs.iter().enumerate() {
            let Some(source) = self.shard_ids.get(index) else {
                warn!(index, "relay slot without a shard");
                continue;
            };
            if source == &self.chain_id {
                continue;
            }
            for relay in relays.iter() {
                if let Err(e) = self.execute_relay(relay, source, &mut db) {
                    warn!(source = %source, error = %e, "relay execution failed");
                }
            }
        }

        let mut receipts = Vec::with_capacity(ptxs.len());
        for tx in ptxs.iter() {
            match self.execute(tx, &mut db) {
                Ok(()) => receipts.push(ExecutionReceipt::ok(tx.to_vec())),
                Err(e) => {
                    debug!(error = %e, "transaction aborted");
                    receipts.push(ExecutionReceipt::abort(tx.to_vec(), e.to_string()));
                }
            }
        }

        let (op_txs, cross_shard_receipts) = self.pre_execution(cross_shard_txs, &mut db);
        ExecutionResponse {
            receipts,
            op_txs,
            cross_shard_receipts,
        }
    }

    fn commit(&self) -> Hash {
        self.app_status
    }
}
