//! Node configuration files and the testnet shard config.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-node config, stored as `config/config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node directory name, `node{i}`.
    pub node_name: String,

    /// Shard this node validates.
    pub chain_id: String,

    /// Listen IP.
    pub local_ip: String,

    /// Listen port.
    pub local_port: u16,

    /// Maximum size of one block part.
    #[serde(default = "default_max_part_size")]
    pub max_part_size: usize,

    /// Byte budget for intra-shard transactions per block.
    #[serde(default = "default_max_block_tx_bytes")]
    pub max_block_tx_bytes: usize,

    /// Byte budget for cross-shard transactions per block.
    #[serde(default = "default_max_block_cross_shard_tx_bytes")]
    pub max_block_cross_shard_tx_bytes: usize,

    /// Index of this node in its shard's validator list.
    pub signer_index: u32,

    /// Whether this node is its shard's fixed leader.
    pub is_leader: bool,

    /// Views below this skip chained block verification.
    #[serde(default = "default_warmup_views")]
    pub warmup_views: u64,

    /// Seconds to pause before the first proposal.
    #[serde(default = "default_view_one_delay_secs")]
    pub view_one_delay_secs: u64,
}

fn default_max_part_size() -> usize {
    40 * 1024
}
fn default_max_block_tx_bytes() -> usize {
    160 * 1024
}
fn default_max_block_cross_shard_tx_bytes() -> usize {
    640 * 1024
}
fn default_warmup_views() -> u64 {
    5
}
fn default_view_one_delay_secs() -> u64 {
    10
}

impl NodeConfig {
    /// Address this node listens on.
    pub fn local_addr(&self) -> String {
        format!("{}:{}", self.local_ip, self.local_port)
    }

    /// Parse from `config.toml` contents.
    pub fn from_toml(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Serialize to `config.toml` contents.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).expect("config serialization should never fail")
    }
}

/// Path of the node's private key file.
pub fn private_key_path(root: &Path) -> PathBuf {
    root.join("config").join("private_key.txt")
}

/// Path of the node's shard-info file.
pub fn shard_info_path(root: &Path) -> PathBuf {
    root.join("config").join("shard_info.json")
}

/// Path of the node's config file.
pub fn config_path(root: &Path) -> PathBuf {
    root.join("config").join("config.toml")
}

/// Path of the node's database directory.
pub fn store_path(root: &Path) -> PathBuf {
    root.join("database")
}

/// Path of the leader's transaction dataset.
pub fn dataset_path(root: &Path) -> PathBuf {
    root.join("dataset").join("dataset.txt")
}

/// One shard's entry in the testnet config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfigEntry {
    /// Shard id.
    pub chain_id: String,

    /// Number of validators.
    pub peer_num: u32,

    /// Compact key-range string for the shard's key space.
    pub key_range: String,
}

/// The testnet topology, stored as a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardConfig {
    /// Machines to spread nodes over, with per-machine node budget.
    pub ip_in_use: BTreeMap<String, u32>,

    /// The shards to bootstrap.
    pub shards: Vec<ShardConfigEntry>,

    /// Transactions generated per shard for the leader dataset.
    #[serde(default = "default_txs_per_shard")]
    pub txs_per_shard: usize,
}

fn default_txs_per_shard() -> usize {
    500_000
}

impl ShardConfig {
    /// Read from a JSON file.
    pub fn read_json(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Write to a JSON file.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_config_toml_roundtrip() {
        let cfg = NodeConfig {
            node_name: "node1".into(),
            chain_id: "s1".into(),
            local_ip: "127.0.0.1".into(),
            local_port: 26601,
            max_part_size: default_max_part_size(),
            max_block_tx_bytes: default_max_block_tx_bytes(),
            max_block_cross_shard_tx_bytes: default_max_block_cross_shard_tx_bytes(),
            signer_index: 0,
            is_leader: true,
            warmup_views: 5,
            view_one_delay_secs: 10,
        };

        let parsed = NodeConfig::from_toml(&cfg.to_toml()).unwrap();
        assert_eq!(parsed, cfg);
        assert_eq!(parsed.local_addr(), "127.0.0.1:26601");
    }

    #[test]
    fn test_node_config_defaults_apply() {
        let minimal = r#"
            node_name = "node2"
            chain_id = "s1"
            local_ip = "10.0.0.1"
            local_port = 26602
            signer_index = 1
            is_leader = false
        "#;
        let cfg = NodeConfig::from_toml(minimal).unwrap();
        assert_eq!(cfg.max_part_size, 40 * 1024);
        assert_eq!(cfg.warmup_views, 5);
        assert_eq!(cfg.view_one_delay_secs, 10);
    }

    #[test]
    fn test_shard_config_json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shard-config.json");

        let mut ip_in_use = BTreeMap::new();
        ip_in_use.insert("192.168.200.51".to_string(), 4);
        let config = ShardConfig {
            ip_in_use,
            shards: vec![ShardConfigEntry {
                chain_id: "i1".into(),
                peer_num: 4,
                key_range: "10,11".into(),
            }],
            txs_per_shard: 100,
        };

        config.write_json(&path).unwrap();
        let parsed = ShardConfig::read_json(&path).unwrap();
        assert_eq!(parsed, config);
    }
}
