//! In-process pipeline progression for a single-shard, single-validator
//! replica: the leader self-votes to quorum, folds its own cross-shard
//! message back in, and advances until the view limit halts the run.

use lattice_consensus::{ConsensusConfig, Progress, State};
use lattice_mempool::Mempool;
use lattice_p2p::Sender;
use lattice_store::{Database, PrefixStore};
use lattice_types::{
    from_wire, AbciApp, Block, BlsKeyPair, ExecutionReceipt, ExecutionResponse, Hash, Peer, Shard,
    ShardInfo, Signer, Txs,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Application stub: every executed block yields one relay set for the
/// single destination shard.
struct StubApp;

impl AbciApp for StubApp {
    fn validate_tx(&self, _tx: &[u8], _is_cross_shard: bool) -> bool {
        true
    }

    fn execution(&self, ptxs: &Txs, _cross: &Txs, _commit: &[Txs]) -> ExecutionResponse {
        ExecutionResponse {
            receipts: ptxs
                .iter()
                .map(|tx| ExecutionReceipt::ok(tx.to_vec()))
                .collect(),
            op_txs: vec![Txs(vec![b"relay-payload".to_vec()])],
            cross_shard_receipts: vec![],
        }
    }

    fn commit(&self) -> Hash {
        Hash::ZERO
    }
}

fn single_validator_state(dir: &std::path::Path, view_limit: u64) -> (State, PrefixStore) {
    let keypair = BlsKeyPair::from_seed(&[11; 32]).unwrap();
    let signer = Arc::new(Signer::new(keypair.clone()));

    let peer = Peer {
        addr: "127.0.0.1:1".into(),
        chains: vec!["s".into()],
        pubkey: keypair.public_hex(),
        vote: 1,
    };
    let mut shards = BTreeMap::new();
    shards.insert("s".to_string(), Shard::new(vec![peer], 0, "a,z".into()));
    let shard_info = Arc::new(ShardInfo::new(shards).unwrap());

    let abci: Arc<dyn AbciApp> = Arc::new(StubApp);
    let mempool = Mempool::new(false, abci.clone());
    let cross_shard_mempool = Mempool::new(true, abci.clone());
    let p2p = Sender::new("127.0.0.1:1");
    let database = Database::open(dir).unwrap();
    let store = database.prefix("consensus");

    let cfg = ConsensusConfig {
        view_one_delay: std::time::Duration::ZERO,
        pipeline_view_limit: view_limit,
        ..Default::default()
    };

    let state = State::new(
        0,
        0,
        signer,
        0,
        shard_info,
        "s",
        mempool,
        cross_shard_mempool,
        abci,
        p2p,
        store.clone(),
        cfg,
    )
    .unwrap();
    (state, store)
}

fn load_block(store: &PrefixStore, view: u64) -> Block {
    let bytes = store
        .get_block_by_height("s", view)
        .unwrap()
        .unwrap_or_else(|| panic!("no stored block for view {view}"));
    from_wire(&bytes).unwrap()
}

#[test]
fn test_pipeline_runs_to_view_limit_and_halts() {
    let dir = tempfile::tempdir().unwrap();
    let (mut state, _store) = single_validator_state(dir.path(), 10);

    let progress = state.start().unwrap();
    assert_eq!(progress, Progress::Halted);
}

#[test]
fn test_view_six_block_carries_full_pipeline_payload() {
    let dir = tempfile::tempdir().unwrap();
    let (mut state, store) = single_validator_state(dir.path(), 12);

    assert_eq!(state.start().unwrap(), Progress::Halted);

    let block6 = load_block(&store, 6);

    // The carried QC certifies view 5 and chains to the view-4 block.
    let qc = block6.agg_sig_vote.as_ref().expect("view-6 block has a QC");
    assert_eq!(qc.view, 5);
    let block5 = load_block(&store, 5);
    let block4 = load_block(&store, 4);
    assert_eq!(qc.for_hash, block5.hash());
    assert_eq!(qc.last_hash(), block4.hash());

    // Commit intention, certificates, and cross-shard outputs are all
    // populated by view 6 in a one-shard topology.
    let ci = block6.ci.as_ref().expect("view-6 block has an intention");
    assert_eq!(ci.intention_hash.len(), 1);
    assert_eq!(block6.cc.len(), 1);
    assert_eq!(block6.ctxs.len(), 1);
    assert!(!block6.ctxs[0].is_empty());

    // The block's own structural proofs all verify.
    block6.validate_basic().expect("pipeline proofs verify");

    // Hash pointers chain the stored blocks.
    assert_eq!(block6.header.hash_pointer, block5.hash());
    assert_eq!(block5.header.hash_pointer, block4.hash());
}

#[test]
fn test_blocks_persisted_through_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (mut state, store) = single_validator_state(dir.path(), 8);
    assert_eq!(state.start().unwrap(), Progress::Halted);

    for view in 1..=8 {
        let block = load_block(&store, view);
        assert_eq!(block.header.view, view);
        assert_eq!(block.header.chain_id, "s");
    }
}
