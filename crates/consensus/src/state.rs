//! Consensus state: wiring, message intake, and cross-shard bookkeeping.

use crate::{BlockData, ConsensusConfig, ConsensusError, Progress, Proposal, Step};
use lattice_hotstuff::HotStuffState;
use lattice_mempool::Mempool;
use lattice_p2p::{ChannelId, MessageType, P2pError, Reactor, Sender};
use lattice_store::{csm_key, PrefixStore};
use lattice_types::{
    from_wire, AbciApp, Block, CrossShardMessage, Hash, Part, ShardInfo, Signer, Verifier, Vote,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Depth of the block ring buffer.
const BLOCK_POOL_SIZE: usize = 7;

/// Bandwidth counters, guarded by their own mutex because the proposal
/// broadcast task accounts from off-thread.
#[derive(Debug, Default)]
pub(crate) struct Bandwidth {
    pub intra_shard: u64,
    pub cross_shard_data: u64,
    pub cooperation: u64,
}

/// One decoded consensus-channel message.
#[derive(Debug, Clone)]
pub enum ConsensusMessage {
    /// A block fragment.
    Part(Part),
    /// A signed part-set announcement.
    Proposal(Proposal),
    /// A peer shard's cross-shard message.
    CrossShard(Box<CrossShardMessage>),
    /// A validator's vote.
    Vote(Vote),
}

/// The per-replica consensus state. All mutation happens behind the
/// owning [`ConsensusHandle`]'s mutex.
pub struct State {
    pub(crate) hotstuff: HotStuffState,

    pub(crate) mempool: Arc<Mempool>,
    pub(crate) cross_shard_mempool: Arc<Mempool>,
    pub(crate) abci: Arc<dyn AbciApp>,
    pub(crate) p2p: Arc<Sender>,
    pub(crate) store: PrefixStore,
    pub(crate) step: Step,

    pub(crate) signer: Arc<Signer>,
    pub(crate) signer_index: u32,
    pub(crate) proposer_index: u32,
    pub(crate) verifier: Arc<Verifier>,

    pub(crate) block_data: BlockData,

    pub(crate) shard_info: Arc<ShardInfo>,
    pub(crate) shard_ids: Vec<String>,
    pub(crate) chain_id: String,

    pub(crate) block_pool: VecDeque<Block>,

    pub(crate) cfg: ConsensusConfig,
    pub(crate) bandwidth: Arc<Mutex<Bandwidth>>,
    pub(crate) start_time: Instant,
    pub(crate) halted: bool,
}

impl State {
    /// Wire up a replica's consensus state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        view: u64,
        round: u32,
        signer: Arc<Signer>,
        signer_index: u32,
        shard_info: Arc<ShardInfo>,
        chain_id: impl Into<String>,
        mempool: Arc<Mempool>,
        cross_shard_mempool: Arc<Mempool>,
        abci: Arc<dyn AbciApp>,
        p2p: Arc<Sender>,
        store: PrefixStore,
        cfg: ConsensusConfig,
    ) -> Result<Self, ConsensusError> {
        let chain_id = chain_id.into();
        let shard = shard_info
            .shard(&chain_id)
            .ok_or_else(|| ConsensusError::UnknownShard(chain_id.clone()))?;

        let verifier = Arc::new(shard.verifier().clone());
        let per_votes = shard.per_votes();
        let proposer_index = shard.leader_index;

        let hotstuff = HotStuffState::new(view, round, verifier.clone(), per_votes);

        let shard_ids = shard_info.shard_ids();
        let last_hash: HashMap<String, Hash> = shard_ids
            .iter()
            .map(|id| (id.clone(), Hash::ZERO))
            .collect();
        let block_data = BlockData::new(view, round, last_hash);

        Ok(Self {
            hotstuff,
            mempool,
            cross_shard_mempool,
            abci,
            p2p,
            store,
            step: Step::Validator,
            signer,
            signer_index,
            proposer_index,
            verifier,
            block_data,
            shard_info,
            shard_ids,
            chain_id,
            block_pool: VecDeque::with_capacity(BLOCK_POOL_SIZE),
            cfg,
            bandwidth: Arc::new(Mutex::new(Bandwidth::default())),
            start_time: Instant::now(),
            halted: false,
        })
    }

    /// Kick the replica off. The leader of view 0 proposes immediately;
    /// everyone else advances into view 1 and waits for parts.
    pub fn start(&mut self) -> Result<Progress, ConsensusError> {
        self.start_time = Instant::now();
        if self.hotstuff.view == 0 {
            info!(
                view = self.hotstuff.view,
                round = self.hotstuff.round,
                "consensus starting"
            );
            if self.is_proposer() {
                self.do_propose()?;
                self.step = Step::LeaderVote;
            } else {
                self.enter_next_view();
                self.step = Step::Validator;
            }
        } else {
            // Restarting mid-run: derive the step from quorum status.
            self.step = self.next_step();
        }
        self.handle_state_transition()
    }

    /// The k-th most recent block in the pool (1 = newest).
    pub(crate) fn fetch_block(&self, pre_index: usize) -> Option<&Block> {
        if pre_index == 0 || pre_index > self.block_pool.len() {
            return None;
        }
        self.block_pool.get(self.block_pool.len() - pre_index)
    }

    /// Ring-append a block and persist it by height.
    pub(crate) fn append_block(&mut self, block: Block) -> Result<(), ConsensusError> {
        debug!(view = block.header.view, "append block");
        self.store.set_block_by_height(
            &self.chain_id,
            block.header.view,
            &block.wire_bytes(),
        )?;
        if self.block_pool.len() == BLOCK_POOL_SIZE {
            self.block_pool.pop_front();
        }
        self.block_pool.push_back(block);
        Ok(())
    }

    pub(crate) fn block_pool_size(&self) -> usize {
        self.block_pool.len()
    }

    /// Process one decoded message, then run the transition loop.
    pub fn do_message(&mut self, msg: ConsensusMessage) -> Result<Progress, ConsensusError> {
        if self.halted {
            return Ok(Progress::Halted);
        }
        match msg {
            ConsensusMessage::Part(part) => {
                if part.chain_id != self.chain_id {
                    return Err(ConsensusError::ChainMismatch {
                        expected: self.chain_id.clone(),
                        got: part.chain_id,
                    });
                }
                self.block_data.add_part(part)?;
            }
            ConsensusMessage::Proposal(proposal) => {
                if proposal.header.chain_id != self.chain_id {
                    return Err(ConsensusError::ChainMismatch {
                        expected: self.chain_id.clone(),
                        got: proposal.header.chain_id,
                    });
                }
                if !self.verifier.verify(
                    &proposal.signature,
                    &proposal.sign_bytes(),
                    proposal.proposer_index as usize,
                ) {
                    return Err(ConsensusError::InvalidProposalSignature(
                        proposal.proposer_index,
                    ));
                }
                self.block_data
                    .add_part_set_header(proposal.header, proposal.block_header_hash)?;
            }
            ConsensusMessage::CrossShard(csm) => {
                self.do_cross_shard_message(*csm)?;
            }
            ConsensusMessage::Vote(vote) => {
                self.hotstuff.add_vote(vote)?;
            }
        }
        self.handle_state_transition()
    }

    fn do_cross_shard_message(&mut self, csm: CrossShardMessage) -> Result<(), ConsensusError> {
        let source_shard = self
            .shard_info
            .shard(&csm.source_chain)
            .ok_or_else(|| ConsensusError::UnknownShard(csm.source_chain.clone()))?;
        if !source_shard.verifier().verify_aggregate(
            &csm.agg_vote.signature,
            &csm.agg_vote.sign_bytes(),
            &csm.agg_vote.signer_indexer,
        ) {
            return Err(ConsensusError::InvalidAggregateSignature(
                "cross-shard message",
            ));
        }

        debug!(source = %csm.source_chain, "received cross-shard message");
        let key = csm_key(&csm.source_chain, &csm.last_hash());
        if self.store.has_special(&key)? {
            return Err(ConsensusError::DuplicatedCsm);
        }
        self.store.set_special(&key, &csm.wire_bytes())?;

        if !self.block_data.finished.contains_key(&csm.source_chain) {
            let expected = self
                .block_data
                .last_hash
                .get(&csm.source_chain)
                .copied()
                .unwrap_or(Hash::ZERO);
            if expected == csm.last_hash() {
                self.extend_hash(csm);
            }
        }
        Ok(())
    }

    /// Promote a cross-shard message into the finished map and advance
    /// the expected hash for its source shard.
    pub(crate) fn extend_hash(&mut self, csm: CrossShardMessage) {
        debug!(
            source = %csm.source_chain,
            from = %csm.last_hash(),
            to = %csm.agg_vote.for_hash,
            "extend hash"
        );
        self.block_data
            .last_hash
            .insert(csm.source_chain.clone(), csm.agg_vote.for_hash);
        self.block_data
            .finished
            .insert(csm.source_chain.clone(), csm);
    }

    /// Replay persisted cross-shard messages whose hash now matches the
    /// expected chain position (out-of-order arrival path).
    pub(crate) fn redo_cross_shard_messages(&mut self) -> Result<(), ConsensusError> {
        let expectations: Vec<(String, Hash)> = self
            .block_data
            .last_hash
            .iter()
            .filter(|(shard, _)| **shard != self.chain_id)
            .map(|(shard, hash)| (shard.clone(), *hash))
            .collect();

        for (shard, hash) in expectations {
            if self.block_data.finished.contains_key(&shard) {
                continue;
            }
            let key = csm_key(&shard, &hash);
            let Some(bytes) = self.store.get_special(&key)? else {
                continue;
            };
            let csm: CrossShardMessage = from_wire(&bytes)?;
            debug!(source = %csm.source_chain, "redo cross-shard message");
            self.extend_hash(csm);
        }
        Ok(())
    }
}

/// The mutex-owning wrapper the p2p layer dispatches into.
pub struct ConsensusHandle {
    state: Mutex<State>,
    halt_tx: mpsc::Sender<()>,
}

impl ConsensusHandle {
    /// Wrap a state; `halt_tx` fires once when the view limit is hit.
    pub fn new(state: State, halt_tx: mpsc::Sender<()>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(state),
            halt_tx,
        })
    }

    /// Start the replica (leader proposes, validators wait).
    pub fn start(&self) -> Result<(), ConsensusError> {
        let progress = self.state.lock().start()?;
        if progress == Progress::Halted {
            let _ = self.halt_tx.send(());
        }
        Ok(())
    }

    /// Run a closure under the state lock (tests and wiring).
    pub fn with_state<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut self.state.lock())
    }

    fn handle(&self, msg: ConsensusMessage) -> Result<(), ConsensusError> {
        let progress = self.state.lock().do_message(msg)?;
        if progress == Progress::Halted {
            let _ = self.halt_tx.send(());
        }
        Ok(())
    }
}

impl Reactor for ConsensusHandle {
    fn receive(
        &self,
        _channel: ChannelId,
        payload: &[u8],
        message_type: MessageType,
    ) -> Result<(), P2pError> {
        let result = match message_type {
            MessageType::Part => {
                let part: Part =
                    from_wire(payload).map_err(|e| P2pError::Reactor(e.to_string()))?;
                part.validate_basic()
                    .map_err(|e| P2pError::Reactor(e.to_string()))?;
                self.handle(ConsensusMessage::Part(part))
            }
            MessageType::Proposal => {
                let proposal: Proposal =
                    from_wire(payload).map_err(|e| P2pError::Reactor(e.to_string()))?;
                proposal
                    .validate_basic()
                    .map_err(|e| P2pError::Reactor(e.to_string()))?;
                self.handle(ConsensusMessage::Proposal(proposal))
            }
            MessageType::CrossShardMessage => {
                let csm: CrossShardMessage =
                    from_wire(payload).map_err(|e| P2pError::Reactor(e.to_string()))?;
                csm.validate_basic()
                    .map_err(|e| P2pError::Reactor(e.to_string()))?;
                self.handle(ConsensusMessage::CrossShard(Box::new(csm)))
            }
            MessageType::Vote => {
                let vote: Vote =
                    from_wire(payload).map_err(|e| P2pError::Reactor(e.to_string()))?;
                self.handle(ConsensusMessage::Vote(vote))
            }
            MessageType::TxInsert | MessageType::TxTransfer => {
                return Err(P2pError::Reactor(
                    "transaction on consensus channel".into(),
                ));
            }
        };
        result.map_err(|e| P2pError::Reactor(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConsensusConfig;
    use lattice_store::Database;
    use lattice_types::{
        aggregate_signatures, BlsKeyPair, ExecutionResponse, IntentionBrief, Peer, Shard,
        SignerBitfield, Txs,
    };
    use std::collections::BTreeMap;

    struct NullApp;

    impl AbciApp for NullApp {
        fn validate_tx(&self, _tx: &[u8], _is_cross_shard: bool) -> bool {
            true
        }
        fn execution(&self, _: &Txs, _: &Txs, _: &[Txs]) -> ExecutionResponse {
            ExecutionResponse::default()
        }
        fn commit(&self) -> Hash {
            Hash::ZERO
        }
    }

    fn peer(addr: &str, chain: &str, keypair: &BlsKeyPair) -> Peer {
        Peer {
            addr: addr.into(),
            chains: vec![chain.into()],
            pubkey: keypair.public_hex(),
            vote: 1,
        }
    }

    fn two_shard_state(dir: &std::path::Path) -> (State, BlsKeyPair) {
        let key_a = BlsKeyPair::from_seed(&[1; 32]).unwrap();
        let key_b = BlsKeyPair::from_seed(&[2; 32]).unwrap();

        let mut shards = BTreeMap::new();
        shards.insert(
            "s1".to_string(),
            Shard::new(vec![peer("127.0.0.1:1", "s1", &key_a)], 0, "a,m".into()),
        );
        shards.insert(
            "s2".to_string(),
            Shard::new(vec![peer("127.0.0.1:2", "s2", &key_b)], 0, "m,z".into()),
        );
        let shard_info = Arc::new(ShardInfo::new(shards).unwrap());

        let abci: Arc<dyn AbciApp> = Arc::new(NullApp);
        let state = State::new(
            0,
            0,
            Arc::new(Signer::new(key_a)),
            0,
            shard_info,
            "s1",
            lattice_mempool::Mempool::new(false, abci.clone()),
            lattice_mempool::Mempool::new(true, abci.clone()),
            abci,
            lattice_p2p::Sender::new("127.0.0.1:1"),
            Database::open(dir).unwrap().prefix("consensus"),
            ConsensusConfig::default(),
        )
        .unwrap();
        (state, key_b)
    }

    fn s2_csm(view: u64, last_hash: Hash, for_hash: Hash, key: &BlsKeyPair) -> CrossShardMessage {
        let mut vote = Vote::new(view, 0, for_hash, vec![], 0);
        vote.set_last_hash(last_hash);
        let signature = key.sign(&vote.sign_bytes());
        vote.signature = aggregate_signatures(&[signature]).unwrap();
        let mut signers = SignerBitfield::new(1);
        signers.set(0);
        CrossShardMessage {
            source_chain: "s2".into(),
            agg_vote: vote.into_aggregated(signers),
            intention_brief: IntentionBrief::default(),
            proof_of_intention: None,
            op_txs: Txs::new(),
            output_txs_proof: None,
        }
    }

    #[test]
    fn test_csm_redo_path_promotes_stored_message() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, key_b) = two_shard_state(dir.path());

        let h1 = Hash::from_bytes(b"s2-block-1");
        let h2 = Hash::from_bytes(b"s2-block-2");

        // The view-2 message arrives first: persisted but not promoted,
        // because the expected hash for s2 is still zero.
        let early = s2_csm(2, h1, h2, &key_b);
        state
            .do_message(ConsensusMessage::CrossShard(Box::new(early.clone())))
            .unwrap();
        assert!(!state.block_data.finished.contains_key("s2"));

        // Re-delivery is rejected by the persistent dedup key.
        let redelivered =
            state.do_message(ConsensusMessage::CrossShard(Box::new(early)));
        assert!(matches!(
            redelivered,
            Err(crate::ConsensusError::DuplicatedCsm)
        ));

        // The view-1 message matches the zero hash and promotes,
        // advancing the expectation to h1.
        let first = s2_csm(1, Hash::ZERO, h1, &key_b);
        state
            .do_message(ConsensusMessage::CrossShard(Box::new(first)))
            .unwrap();
        assert_eq!(state.block_data.last_hash["s2"], h1);

        // After the stage shift, the redo path finds the persisted
        // view-2 message without re-delivery.
        state.block_data.next(1, 0);
        assert!(!state.block_data.finished.contains_key("s2"));

        state.redo_cross_shard_messages().unwrap();
        let promoted = &state.block_data.finished["s2"];
        assert_eq!(promoted.agg_vote.for_hash, h2);
        assert_eq!(state.block_data.last_hash["s2"], h2);
    }

    #[test]
    fn test_csm_with_bad_signature_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, _key_b) = two_shard_state(dir.path());

        // Signed with a key that is not in s2's validator set.
        let wrong_key = BlsKeyPair::from_seed(&[9; 32]).unwrap();
        let csm = s2_csm(1, Hash::ZERO, Hash::from_bytes(b"h"), &wrong_key);
        let result = state.do_message(ConsensusMessage::CrossShard(Box::new(csm)));
        assert!(matches!(
            result,
            Err(crate::ConsensusError::InvalidAggregateSignature(_))
        ));
    }

    #[test]
    fn test_csm_from_unknown_shard_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut state, key_b) = two_shard_state(dir.path());

        let mut csm = s2_csm(1, Hash::ZERO, Hash::from_bytes(b"h"), &key_b);
        csm.source_chain = "s9".into();
        let result = state.do_message(ConsensusMessage::CrossShard(Box::new(csm)));
        assert!(matches!(result, Err(crate::ConsensusError::UnknownShard(_))));
    }
}
