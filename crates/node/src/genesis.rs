//! Testnet bootstrap: key generation and per-node directory layout.

use crate::config::{
    config_path, dataset_path, private_key_path, shard_info_path, store_path, NodeConfig,
    ShardConfig, ShardConfigEntry,
};
use lattice_bank::Importer;
use lattice_types::{BlsKeyPair, Peer, RangeList, Shard, ShardInfo};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::info;

const FIRST_PORT: u16 = 26601;

/// The sample testnet layout written by `lattice example`.
pub fn example_shard_config() -> ShardConfig {
    let mut range = RangeList::new();
    range.add_range("10", "11");

    let mut ip_in_use = BTreeMap::new();
    ip_in_use.insert("192.168.200.49".to_string(), 5);
    ip_in_use.insert("192.168.200.51".to_string(), 4);
    ip_in_use.insert("192.168.200.52".to_string(), 5);
    ip_in_use.insert("192.168.200.53".to_string(), 6);

    ShardConfig {
        ip_in_use,
        shards: vec![ShardConfigEntry {
            chain_id: "i1".into(),
            peer_num: 4,
            key_range: range.to_compact(),
        }],
        txs_per_shard: 500_000,
    }
}

/// Spread node slots over the available machines round-robin, each
/// machine serving at most its configured budget.
fn address_roulette(config: &ShardConfig) -> Vec<(String, u16)> {
    let ips: Vec<&String> = config.ip_in_use.keys().collect();
    let max_budget = config.ip_in_use.values().copied().max().unwrap_or(0);

    let mut slots: Vec<String> = Vec::new();
    for round in 0..max_budget {
        for ip in &ips {
            if config.ip_in_use[*ip] > round {
                slots.push((*ip).clone());
            }
        }
    }

    let mut next_port: BTreeMap<String, u16> =
        ips.iter().map(|ip| ((*ip).clone(), FIRST_PORT)).collect();
    let mut out = Vec::new();
    let mut pointer = 0usize;
    let total: u32 = config.shards.iter().map(|s| s.peer_num).sum();
    for _ in 0..total {
        if pointer == slots.len() {
            pointer = 0;
        }
        let ip = slots[pointer].clone();
        let port = next_port[&ip];
        next_port.insert(ip.clone(), port + 1);
        pointer += 1;
        out.push((ip, port));
    }
    out
}

/// Bootstrap one directory per node under `<root>/<ip>/node{i}/`:
/// private key, shard info, node config, an empty database directory,
/// and (for each shard's leader) the transaction dataset.
pub fn generate_config_files(shard_config_path: &Path, root: &Path) -> anyhow::Result<()> {
    let config = ShardConfig::read_json(shard_config_path)?;
    let addresses = address_roulette(&config);

    let total: usize = config.shards.iter().map(|s| s.peer_num as usize).sum();
    let keypairs: Vec<BlsKeyPair> = (0..total)
        .map(|_| BlsKeyPair::generate())
        .collect::<Result<_, _>>()?;

    // Shard map with one peer entry per node slot.
    let mut shards = BTreeMap::new();
    let mut key_ranges = BTreeMap::new();
    let mut slot = 0usize;
    for entry in &config.shards {
        let mut peers = Vec::with_capacity(entry.peer_num as usize);
        for _ in 0..entry.peer_num {
            let (ip, port) = &addresses[slot];
            peers.push(Peer {
                addr: format!("{}:{}", ip, port),
                chains: vec![entry.chain_id.clone()],
                pubkey: keypairs[slot].public_hex(),
                vote: 1,
            });
            slot += 1;
        }
        shards.insert(
            entry.chain_id.clone(),
            Shard::new(peers, 0, entry.key_range.clone()),
        );
        key_ranges.insert(
            entry.chain_id.clone(),
            RangeList::from_compact(&entry.key_range)
                .ok_or_else(|| anyhow::anyhow!("invalid key range for {}", entry.chain_id))?,
        );
    }
    let shard_info = ShardInfo::new(shards)?;
    let shard_info_json = shard_info.to_json();

    // One dataset shared by every shard leader.
    let mut generator = Importer::for_generator(key_ranges);
    let dataset = generator.generate_txs(config.txs_per_shard);
    info!(lines = dataset.len(), "dataset generated");

    let mut slot = 0usize;
    for entry in &config.shards {
        for index in 0..entry.peer_num {
            let (ip, port) = &addresses[slot];
            let node_name = format!("node{}", slot + 1);
            let node_root = root.join(ip).join(&node_name);

            let node_config = NodeConfig {
                node_name: node_name.clone(),
                chain_id: entry.chain_id.clone(),
                local_ip: ip.clone(),
                local_port: *port,
                max_part_size: 40 * 1024,
                max_block_tx_bytes: 160 * 1024,
                max_block_cross_shard_tx_bytes: 640 * 1024,
                signer_index: index,
                is_leader: index == 0,
                warmup_views: 5,
                view_one_delay_secs: 10,
            };

            std::fs::create_dir_all(store_path(&node_root))?;
            std::fs::create_dir_all(node_root.join("config"))?;
            std::fs::write(shard_info_path(&node_root), &shard_info_json)?;
            std::fs::write(
                private_key_path(&node_root),
                keypairs[slot].secret_hex(),
            )?;
            std::fs::write(config_path(&node_root), node_config.to_toml())?;

            if node_config.is_leader {
                let path = dataset_path(&node_root);
                std::fs::create_dir_all(path.parent().expect("dataset path has a parent"))?;
                let mut file = std::io::BufWriter::new(std::fs::File::create(&path)?);
                for line in &dataset {
                    writeln!(file, "{}", line)?;
                }
            }
            slot += 1;
        }
    }
    info!(nodes = total, root = %root.display(), "testnet generated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::Verifier;

    fn tiny_config() -> ShardConfig {
        let mut ip_in_use = BTreeMap::new();
        ip_in_use.insert("127.0.0.1".to_string(), 8);
        ShardConfig {
            ip_in_use,
            shards: vec![
                ShardConfigEntry {
                    chain_id: "s1".into(),
                    peer_num: 2,
                    key_range: "10,11".into(),
                },
                ShardConfigEntry {
                    chain_id: "s2".into(),
                    peer_num: 2,
                    key_range: "20,21".into(),
                },
            ],
            txs_per_shard: 5,
        }
    }

    #[test]
    fn test_address_roulette_assigns_unique_ports() {
        let addresses = address_roulette(&tiny_config());
        assert_eq!(addresses.len(), 4);

        let mut seen: Vec<String> = addresses
            .iter()
            .map(|(ip, port)| format!("{}:{}", ip, port))
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_generate_writes_complete_node_directories() {
        let dir = tempfile::tempdir().unwrap();
        let config_file = dir.path().join("shard-config.json");
        tiny_config().write_json(&config_file).unwrap();

        generate_config_files(&config_file, dir.path()).unwrap();

        // Four node directories with config, key, shard info.
        let mut leaders = 0;
        for slot in 1..=4 {
            let node_root = dir.path().join("127.0.0.1").join(format!("node{slot}"));
            assert!(config_path(&node_root).exists(), "node{slot} config");
            assert!(private_key_path(&node_root).exists(), "node{slot} key");
            assert!(shard_info_path(&node_root).exists(), "node{slot} shard info");
            assert!(store_path(&node_root).exists(), "node{slot} database");

            let cfg = NodeConfig::from_toml(
                &std::fs::read_to_string(config_path(&node_root)).unwrap(),
            )
            .unwrap();
            if cfg.is_leader {
                leaders += 1;
                assert!(dataset_path(&node_root).exists(), "leader dataset");
            }

            // The written private key matches the shard info pubkey.
            let key = BlsKeyPair::from_hex(
                &std::fs::read_to_string(private_key_path(&node_root)).unwrap(),
            )
            .unwrap();
            let info = ShardInfo::from_json(
                &std::fs::read(shard_info_path(&node_root)).unwrap(),
            )
            .unwrap();
            let shard = info.shard(&cfg.chain_id).unwrap();
            assert_eq!(
                shard.peer_list[cfg.signer_index as usize].pubkey,
                key.public_hex()
            );
            let verifier: &Verifier = shard.verifier();
            assert_eq!(verifier.len(), 2);
        }
        assert_eq!(leaders, 2);
    }
}
