//! Replica wiring and testnet bootstrap.

mod config;
mod genesis;
mod runtime;

pub use config::{
    config_path, dataset_path, private_key_path, shard_info_path, store_path, NodeConfig,
    ShardConfig, ShardConfigEntry,
};
pub use genesis::{example_shard_config, generate_config_files};
pub use runtime::init_node;
