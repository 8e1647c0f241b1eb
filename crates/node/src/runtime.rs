//! Node wiring and the replica's run loop.

use crate::config::{
    config_path, dataset_path, private_key_path, shard_info_path, store_path, NodeConfig,
};
use lattice_bank::{Application, Importer, TxSink};
use lattice_consensus::{ConsensusConfig, ConsensusHandle, State};
use lattice_mempool::Mempool;
use lattice_p2p::{ChannelId, Receiver, Sender};
use lattice_store::Database;
use lattice_types::{AbciApp, BlsKeyPair, ShardInfo, Signer};
use std::path::Path;
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing::{info, warn};

struct MempoolSink(Arc<Mempool>);

impl TxSink for MempoolSink {
    fn add_tx(&self, tx: Vec<u8>) -> Result<(), String> {
        self.0.add_tx(tx).map_err(|e| e.to_string())
    }
}

/// Seconds until the wall-clock `HH:MM` deadline today; zero when the
/// deadline has passed or no deadline was given.
fn delay_until(start_time: Option<&str>) -> anyhow::Result<Duration> {
    let Some(start_time) = start_time else {
        return Ok(Duration::ZERO);
    };
    let (hours, minutes) = start_time
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("start time must be HH:MM"))?;
    let hours: u32 = hours.parse()?;
    let minutes: u32 = minutes.parse()?;
    if hours > 23 || minutes > 59 {
        anyhow::bail!("invalid start time {start_time}");
    }

    let now = chrono::Local::now();
    let target = now
        .date_naive()
        .and_hms_opt(hours, minutes, 0)
        .ok_or_else(|| anyhow::anyhow!("invalid start time {start_time}"))?;
    let delta = target - now.naive_local();
    Ok(delta.to_std().unwrap_or(Duration::ZERO))
}

/// Load a node directory, wire every subsystem, and run the replica
/// until the consensus core reaches its view limit.
pub fn init_node(
    root: &Path,
    start_time: Option<&str>,
    wait_time_secs: u64,
    enable_pipeline: bool,
) -> anyhow::Result<()> {
    let config = NodeConfig::from_toml(&std::fs::read_to_string(config_path(root))?)?;
    let keypair = BlsKeyPair::from_hex(&std::fs::read_to_string(private_key_path(root))?)?;
    let signer = Arc::new(Signer::new(keypair));
    let shard_info = Arc::new(ShardInfo::from_json(&std::fs::read(shard_info_path(root))?)?);

    let database = Database::open(store_path(root))?;
    let key_ranges = shard_info.key_range_lists()?;
    let abci: Arc<dyn AbciApp> = Arc::new(Application::new(
        database.prefix("abci.minibank"),
        config.chain_id.clone(),
        key_ranges.clone(),
        &shard_info,
    )?);

    let mempool = Mempool::new(false, abci.clone());
    let cross_shard_mempool = Mempool::new(true, abci.clone());

    let sender = Sender::new(config.local_addr());
    for shard in shard_info.shards.values() {
        for peer in &shard.peer_list {
            sender.add_peer(peer);
        }
    }
    let receiver = Receiver::new(config.local_addr());

    let consensus_cfg = ConsensusConfig {
        max_tx_bytes: config.max_block_tx_bytes,
        max_cross_shard_tx_bytes: config.max_block_cross_shard_tx_bytes,
        max_part_size: config.max_part_size,
        enable_pipeline,
        warmup_views: config.warmup_views,
        view_one_delay: Duration::from_secs(config.view_one_delay_secs),
        ..Default::default()
    };
    let state = State::new(
        0,
        0,
        signer,
        config.signer_index,
        shard_info.clone(),
        config.chain_id.clone(),
        mempool.clone(),
        cross_shard_mempool.clone(),
        abci,
        sender.clone(),
        database.prefix("consensus"),
        consensus_cfg,
    )?;
    let (halt_tx, halt_rx) = mpsc::channel();
    let consensus = ConsensusHandle::new(state, halt_tx);

    receiver.add_channel(consensus.clone(), ChannelId::ConsensusState);
    receiver.add_channel(mempool.clone(), ChannelId::Mempool);
    receiver.add_channel(cross_shard_mempool.clone(), ChannelId::CrossShardMempool);
    receiver.start()?;

    let intra_sink = MempoolSink(mempool);
    let cross_sink = MempoolSink(cross_shard_mempool);
    let is_leader = config.signer_index
        == shard_info
            .shard(&config.chain_id)
            .map(|s| s.leader_index)
            .unwrap_or(u32::MAX);
    let importer = Importer::new(
        &intra_sink,
        &cross_sink,
        config.chain_id.clone(),
        key_ranges,
        is_leader,
    );
    if is_leader {
        importer.start(&dataset_path(root))?;
    }

    // The sender starts only once every receiver is expected to be up.
    let delay = delay_until(start_time)?;
    info!(delay_secs = delay.as_secs(), "waiting for start time");
    std::thread::sleep(delay);
    if let Err(e) = sender.start() {
        warn!(error = %e, "some peers unreachable at startup");
    }
    std::thread::sleep(Duration::from_secs(wait_time_secs));

    info!(chain = %config.chain_id, node = %config.node_name, "starting consensus");
    consensus.start()?;

    // Block until the consensus core hits its view limit.
    let _ = halt_rx.recv();
    sender.stop();
    info!("experiment finished");
    Ok(())
}
