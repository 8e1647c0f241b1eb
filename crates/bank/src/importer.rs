//! Dataset import and generation.
//!
//! The leader of each shard reads a line-per-transaction hex dataset at
//! startup and routes each transfer into the intra-shard or cross-shard
//! pool. The same type generates the dataset at testnet bootstrap.

use crate::types::{new_transfer_tx_must_len, transfer_bytes, transfer_from_bytes};
use crate::BankError;
use lattice_types::RangeList;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::Path;
use tracing::{info, warn};

/// Keys touched per generated transfer (half sources, half sinks).
const TRANSFER_SIZE: usize = 4;
/// Fixed on-wire length generated transfers are padded to.
const MUST_LEN: usize = 512;
/// Distinct accounts per shard prefix.
const ACCOUNTS_PER_SHARD: usize = 100_000;
/// Fraction of generated transfers that touch several shards.
const CROSS_SHARD_RATIO: f64 = 0.8;
/// Fixed key length of generated accounts.
const ACCOUNT_KEY_LEN: usize = 32;

/// A sink for imported transactions, implemented by the mempool.
pub trait TxSink {
    /// Admit one raw transaction.
    fn add_tx(&self, tx: Vec<u8>) -> Result<(), String>;
}

/// Reads the dataset into the mempools, or generates one.
pub struct Importer<'a> {
    mempool: Option<&'a dyn TxSink>,
    cross_shard_mempool: Option<&'a dyn TxSink>,
    range_lists: BTreeMap<String, RangeList>,
    my_chain: String,
    enabled: bool,
    rng: StdRng,
}

impl<'a> Importer<'a> {
    /// An importer wired to the two pools of a replica. Only the leader
    /// enables it.
    pub fn new(
        mempool: &'a dyn TxSink,
        cross_shard_mempool: &'a dyn TxSink,
        my_chain: impl Into<String>,
        range_lists: BTreeMap<String, RangeList>,
        enabled: bool,
    ) -> Self {
        Self {
            mempool: Some(mempool),
            cross_shard_mempool: Some(cross_shard_mempool),
            range_lists,
            my_chain: my_chain.into(),
            enabled,
            rng: StdRng::from_entropy(),
        }
    }

    /// A generator-only importer used at testnet bootstrap.
    pub fn for_generator(range_lists: BTreeMap<String, RangeList>) -> Self {
        Self {
            mempool: None,
            cross_shard_mempool: None,
            range_lists,
            my_chain: String::new(),
            enabled: true,
            rng: StdRng::from_entropy(),
        }
    }

    /// Read the dataset file and route its transactions.
    pub fn start(&self, dataset_path: &Path) -> Result<(), BankError> {
        if !self.enabled {
            return Ok(());
        }
        let file = std::fs::File::open(dataset_path)
            .map_err(|e| BankError::Encoding(format!("dataset open: {e}")))?;
        let reader = std::io::BufReader::new(file);

        let mut imported = 0usize;
        let mut skipped = 0usize;
        for line in reader.lines() {
            let line = line.map_err(|e| BankError::Encoding(format!("dataset read: {e}")))?;
            if line.is_empty() {
                continue;
            }
            let tx_bytes =
                hex::decode(&line).map_err(|e| BankError::Encoding(format!("dataset hex: {e}")))?;
            let tx = transfer_from_bytes(&tx_bytes)?;

            if !tx.shards.iter().any(|s| s == &self.my_chain) {
                skipped += 1;
                continue;
            }
            let sink = if tx.shards.len() == 1 {
                self.mempool
            } else {
                self.cross_shard_mempool
            };
            if let Some(sink) = sink {
                if let Err(e) = sink.add_tx(tx_bytes) {
                    warn!(error = %e, "dataset transaction rejected");
                    continue;
                }
            }
            imported += 1;
        }
        info!(imported, skipped, "dataset import finished");
        Ok(())
    }

    /// Generate `per_shard` transfers per shard, hex-encoded one per
    /// line, padded to a fixed length.
    pub fn generate_txs(&mut self, per_shard: usize) -> Vec<String> {
        let prefixes: Vec<String> = self
            .range_lists
            .values()
            .map(|rl| rl.start_key().to_string())
            .collect();
        let count = self.range_lists.len() * per_shard;
        (0..count).map(|_| self.generate_one(&prefixes)).collect()
    }

    fn generate_one(&mut self, prefixes: &[String]) -> String {
        let accounts = if self.rng.gen::<f64>() < CROSS_SHARD_RATIO {
            self.generate_accounts(prefixes, TRANSFER_SIZE)
        } else {
            let prefix = prefixes[self.rng.gen_range(0..prefixes.len())].clone();
            self.generate_accounts(&[prefix], TRANSFER_SIZE)
        };

        // The participating shards, sorted and unique by construction
        // of the BTreeMap iteration.
        let shards: Vec<String> = self
            .range_lists
            .iter()
            .filter(|(_, rl)| accounts.iter().any(|a| rl.search(a)))
            .map(|(id, _)| id.clone())
            .collect();

        let mid = TRANSFER_SIZE / 2;
        let money = vec![1u32; mid];
        let tx = new_transfer_tx_must_len(
            accounts[..mid].to_vec(),
            money.clone(),
            accounts[mid..].to_vec(),
            money,
            shards,
            MUST_LEN,
        );
        hex::encode(transfer_bytes(&tx))
    }

    fn generate_accounts(&mut self, prefixes: &[String], k: usize) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(k);
        while out.len() < k {
            let prefix = &prefixes[self.rng.gen_range(0..prefixes.len())];
            let num = self.rng.gen_range(1..=ACCOUNTS_PER_SHARD);
            let digits = num.to_string();
            let fill = ACCOUNT_KEY_LEN.saturating_sub(prefix.len() + digits.len());
            let account = format!("{}{}{}", prefix, "0".repeat(fill), digits);
            if !out.contains(&account) {
                out.push(account);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<Vec<u8>>>);

    impl TxSink for Collect {
        fn add_tx(&self, tx: Vec<u8>) -> Result<(), String> {
            self.0.lock().unwrap().push(tx);
            Ok(())
        }
    }

    fn range_lists() -> BTreeMap<String, RangeList> {
        let mut out = BTreeMap::new();
        out.insert("s1".to_string(), RangeList::from_compact("10,11").unwrap());
        out.insert("s2".to_string(), RangeList::from_compact("20,21").unwrap());
        out
    }

    #[test]
    fn test_generated_txs_parse_and_route() {
        let mut generator = Importer::for_generator(range_lists());
        let lines = generator.generate_txs(20);
        assert_eq!(lines.len(), 40);

        for line in &lines {
            let bytes = hex::decode(line).unwrap();
            assert!(bytes.len() >= MUST_LEN);
            let tx = transfer_from_bytes(&bytes).unwrap();
            assert_eq!(tx.from.len(), TRANSFER_SIZE / 2);
            assert!(!tx.shards.is_empty());
            // Shard list is sorted and unique.
            let mut sorted = tx.shards.clone();
            sorted.sort();
            sorted.dedup();
            assert_eq!(sorted, tx.shards);
            // Every account has the fixed key length and maps to a
            // listed shard.
            for account in tx.from.iter().chain(tx.to.iter()) {
                assert_eq!(account.len(), ACCOUNT_KEY_LEN);
                let lists = range_lists();
                let shard = lists
                    .iter()
                    .find(|(_, rl)| rl.search(account))
                    .map(|(id, _)| id.clone())
                    .unwrap();
                assert!(tx.shards.contains(&shard));
            }
        }
    }

    #[test]
    fn test_dataset_import_routes_by_shard_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataset.txt");

        let mut generator = Importer::for_generator(range_lists());
        let lines = generator.generate_txs(25);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in &lines {
            writeln!(file, "{}", line).unwrap();
        }

        let intra = Collect::default();
        let cross = Collect::default();
        let importer = Importer::new(&intra, &cross, "s1", range_lists(), true);
        importer.start(&path).unwrap();

        for tx_bytes in intra.0.lock().unwrap().iter() {
            let tx = transfer_from_bytes(tx_bytes).unwrap();
            assert_eq!(tx.shards, vec!["s1".to_string()]);
        }
        for tx_bytes in cross.0.lock().unwrap().iter() {
            let tx = transfer_from_bytes(tx_bytes).unwrap();
            assert!(tx.shards.len() > 1);
            assert!(tx.shards.contains(&"s1".to_string()));
        }
    }

    #[test]
    fn test_disabled_importer_is_a_noop() {
        let intra = Collect::default();
        let cross = Collect::default();
        let importer = Importer::new(&intra, &cross, "s1", range_lists(), false);
        importer.start(Path::new("/nonexistent")).unwrap();
        assert!(intra.0.lock().unwrap().is_empty());
    }
}
