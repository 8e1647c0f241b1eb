//! The state transition loop: propose, validate, vote, exchange, commit.

use crate::state::Bandwidth;
use crate::{ConsensusError, Progress, Proposal, State};
use lattice_p2p::{ChannelId, MessageType, Sender};
use lattice_types::{
    now_ms, to_wire, Block, BlockHeader, CommitCertificate, CommitCertificateCore,
    CommitIntention, CrossShardMessage, ExecutionResponse, Hash, IntentionBrief, OutputTxsProof,
    PartSet, ProofOfIntention, Signer, Txs, Vote,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The replica's position in the per-view protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Awaiting block parts; verify and vote on completion.
    Validator,
    /// Leader awaiting its own quorum of votes.
    LeaderVote,
    /// Leader holding a QC, awaiting every peer shard's message.
    LeaderWait,
}

impl State {
    pub(crate) fn is_proposer(&self) -> bool {
        self.signer_index == self.proposer_index
    }

    pub(crate) fn next_step(&self) -> Step {
        match (self.is_proposer(), self.hotstuff.is_quorum()) {
            (false, _) => Step::Validator,
            (true, true) => Step::LeaderWait,
            (true, false) => Step::LeaderVote,
        }
    }

    fn view_limit_reached(&self) -> bool {
        let view = self.hotstuff.view;
        (self.cfg.enable_pipeline && view > self.cfg.pipeline_view_limit)
            || view > self.cfg.plain_view_limit
    }

    /// Re-entrant transition loop: act on whichever edge condition the
    /// last message satisfied, re-derive the step, repeat until no edge
    /// fires or the view limit halts the run.
    pub(crate) fn handle_state_transition(&mut self) -> Result<Progress, ConsensusError> {
        loop {
            let view = self.hotstuff.view;
            let round = self.hotstuff.round;
            match self.step {
                Step::Validator => {
                    if !self.block_data.is_complete(view, round) {
                        return Ok(Progress::Continue);
                    }
                    debug!(view, round, "block complete");
                    let block = self.block_data.get_block(view, round)?;
                    self.do_validate(block)?;
                }
                Step::LeaderWait => {
                    if !self.block_data.is_cross_shard_message_complete() {
                        return Ok(Progress::Continue);
                    }
                    self.do_propose()?;
                }
                Step::LeaderVote => {
                    if !self.hotstuff.is_quorum() {
                        return Ok(Progress::Continue);
                    }
                    self.cross_shard_communicate()?;
                }
            }

            self.step = self.next_step();

            if self.is_proposer() && self.view_limit_reached() {
                self.stop();
                return Ok(Progress::Halted);
            }
        }
    }

    /// Flush the bandwidth counters and mark the run finished.
    pub(crate) fn stop(&mut self) {
        self.halted = true;
        let elapsed = self.start_time.elapsed().as_secs_f64().max(f64::EPSILON);
        let bw = self.bandwidth.lock();
        let mbps = |bytes: u64| bytes as f64 / elapsed / 1024.0 / 1024.0;
        info!(view = self.hotstuff.view, "view limit reached, stopping");
        info!(
            intra_shard_mbps = mbps(bw.intra_shard),
            cross_shard_mbps = mbps(bw.cross_shard_data),
            cooperation_mbps = mbps(bw.cooperation),
            "bandwidth totals"
        );
    }

    /// Chained verification of a reassembled block (validator side).
    fn verify_block(&self, block: &Block) -> Result<(), ConsensusError> {
        debug!(
            view = self.hotstuff.view,
            round = self.hotstuff.round,
            "validate block"
        );
        if block.header.view < self.cfg.warmup_views {
            return Ok(());
        }

        // 1. The carried QC chains to our history: it signs over the
        // j-2 block and targets the j-1 block.
        let agg = block
            .agg_sig_vote
            .as_ref()
            .ok_or_else(|| ConsensusError::Verify("block carries no aggregated vote".into()))?;
        if !self
            .verifier
            .verify_aggregate(&agg.signature, &agg.sign_bytes(), &agg.signer_indexer)
        {
            return Err(ConsensusError::InvalidAggregateSignature("block QC"));
        }
        let j2 = self
            .fetch_block(2)
            .ok_or_else(|| ConsensusError::Verify("no j-2 block in pool".into()))?;
        if j2.hash() != agg.last_hash() {
            return Err(ConsensusError::Verify(
                "hash of j-2 block is not consistent".into(),
            ));
        }
        let j1 = self
            .fetch_block(1)
            .ok_or_else(|| ConsensusError::Verify("no j-1 block in pool".into()))?;
        if j1.hash() != agg.for_hash {
            return Err(ConsensusError::Verify(
                "hash of j-1 block is not consistent".into(),
            ));
        }

        // 2. One commit intention per shard, each evidenced by a QC that
        // verifies against the owning shard's validator set.
        let ci = block
            .ci
            .as_ref()
            .ok_or_else(|| ConsensusError::Verify("block carries no commit intention".into()))?;
        if ci.intention_hash.len() != self.shard_ids.len() {
            return Err(ConsensusError::Verify("not enough intention hashes".into()));
        }
        for (shard_id, peer_agg) in self.shard_ids.iter().zip(&ci.aggregated_signatures) {
            let shard = self
                .shard_info
                .shard(shard_id)
                .ok_or_else(|| ConsensusError::UnknownShard(shard_id.clone()))?;
            if !shard.verifier().verify_aggregate(
                &peer_agg.signature,
                &peer_agg.sign_bytes(),
                &peer_agg.signer_indexer,
            ) {
                return Err(ConsensusError::InvalidAggregateSignature("commit intention"));
            }
        }

        // 3. One commit certificate core per shard. Core proofs, the
        // CI/CC hash agreement, and the CTXS proofs were already checked
        // structurally when the block was reassembled.
        if block.cc.len() != self.shard_ids.len() {
            return Err(ConsensusError::Verify(
                "not enough commit certificate cores".into(),
            ));
        }

        Ok(())
    }

    /// Verify, vote, and on acceptance commit j-2 and advance.
    fn do_validate(&mut self, block: Block) -> Result<(), ConsensusError> {
        let block_result = self.verify_block(&block);
        if let Err(e) = &block_result {
            warn!(error = %e, "block validation failed");
        }

        let last_hash = self.fetch_block(1).map(|b| b.hash()).unwrap_or(Hash::ZERO);
        let vote = generate_vote_for_block(
            &block,
            last_hash,
            block_result.is_ok(),
            self.signer_index,
            &self.signer,
        );

        if vote.is_ok() {
            self.commit_and_execute_j2();
            self.enter_next_view();
            self.append_block(block)?;
        } else {
            self.block_data
                .discard_block(block.header.view, block.header.round);
        }

        let vote_bytes = vote.wire_bytes();
        self.bandwidth.lock().intra_shard += vote_bytes.len() as u64;
        if let Err(e) = self.p2p.send_to_shard_index(
            &self.chain_id,
            self.proposer_index as usize,
            ChannelId::ConsensusState,
            &vote_bytes,
            MessageType::Vote,
        ) {
            warn!(error = %e, "vote send failed");
        }
        Ok(())
    }

    /// Hand the block from two views back to the application.
    ///
    /// Executes its prepared transactions, the cross-shard outputs
    /// committed through its certificates, and pre-executes its pending
    /// cross-shard batch.
    fn commit_and_execute_j2(&mut self) -> ExecutionResponse {
        let abci = self.abci.clone();
        let Some(block) = self.fetch_block(2) else {
            return ExecutionResponse::default();
        };
        debug!(view = block.header.view, "executing block");
        abci.execution(&block.ptxs, &block.cross_shard_txs, &block.ctxs)
    }

    /// Advance (view+1, round 0): shift the pipeline buffers and install
    /// a fresh vote collector.
    pub(crate) fn enter_next_view(&mut self) {
        self.block_data.next(self.hotstuff.view + 1, 0);
        self.hotstuff.enter_new_view();
    }

    /// Build, announce, and self-vote the next block.
    pub(crate) fn do_propose(&mut self) -> Result<(), ConsensusError> {
        let response = self.commit_and_execute_j2();
        self.enter_next_view();

        if self.hotstuff.view == 1 {
            // Warm-up: let every replica's sender links settle.
            std::thread::sleep(self.cfg.view_one_delay);
        }

        let block = self.make_block(response)?;
        let part_set = PartSet::from_block(&block, self.cfg.max_part_size, self.hotstuff.round);
        self.block_data.insert_part_set(part_set.clone())?;
        self.hotstuff.set_proposal_hash(block.hash());

        let mut proposal = Proposal::new(
            part_set.header.clone(),
            self.signer_index,
            part_set.block_header_hash,
        );
        proposal.signature = self.signer.sign(&proposal.sign_bytes());

        self.broadcast_proposal(&block, &proposal, &part_set);

        let vote = generate_vote_for_block(
            &block,
            block.header.hash_pointer,
            true,
            self.signer_index,
            &self.signer,
        );
        self.hotstuff.add_vote(vote)?;

        self.mempool.update(&block.ptxs);
        self.cross_shard_mempool.update(&block.cross_shard_txs);
        self.append_block(block)?;
        Ok(())
    }

    /// Fan the proposal and its parts out to the shard, accounting the
    /// byte classes off-thread.
    fn broadcast_proposal(&self, block: &Block, proposal: &Proposal, part_set: &PartSet) {
        let proposal_bytes = proposal.wire_bytes();
        let part_bytes: Vec<Vec<u8>> = part_set.parts().map(|p| p.wire_bytes()).collect();

        let cooperation = (to_wire(&block.ci).len() + to_wire(&block.cc).len()) as u64;
        let cross_shard: u64 = block
            .ctxs
            .iter()
            .zip(&block.ctxs_proof)
            .map(|(txs, proof)| (to_wire(txs).len() + to_wire(proof).len()) as u64)
            .sum();

        let sender: Arc<Sender> = self.p2p.clone();
        let bandwidth: Arc<Mutex<Bandwidth>> = self.bandwidth.clone();
        let chain_id = self.chain_id.clone();
        std::thread::spawn(move || {
            let mut bw = bandwidth.lock();
            bw.cross_shard_data += cross_shard;
            bw.cooperation += cooperation;
            bw.intra_shard +=
                (proposal_bytes.len() as u64).saturating_sub(cross_shard + cooperation);

            sender.send_to_shard(
                &chain_id,
                ChannelId::ConsensusState,
                &proposal_bytes,
                MessageType::Proposal,
            );
            for bytes in &part_bytes {
                bw.intra_shard += bytes.len() as u64;
                sender.send_to_shard(
                    &chain_id,
                    ChannelId::ConsensusState,
                    bytes,
                    MessageType::Part,
                );
            }
        });
    }

    /// Assemble the block for the current view from the execution result
    /// and the pipeline stages.
    fn make_block(&mut self, response: ExecutionResponse) -> Result<Block, ConsensusError> {
        debug!(view = self.hotstuff.view, "generating block");
        let last_hash = self.fetch_block(1).map(|b| b.hash()).unwrap_or(Hash::ZERO);

        let mut block = Block::default();
        block.header = BlockHeader {
            hash_pointer: last_hash,
            chain_id: self.chain_id.clone(),
            view: self.hotstuff.view,
            round: self.hotstuff.round,
            time_ms: now_ms(),
            ..Default::default()
        };

        if self.block_pool_size() >= 1 {
            let own = self
                .block_data
                .j1_finished
                .get(&self.chain_id)
                .ok_or_else(|| ConsensusError::MissingCsm(self.chain_id.clone()))?;
            block.agg_sig_vote = Some(own.agg_vote.clone());
        }

        if self.cfg.enable_pipeline || self.hotstuff.view % 6 == 0 {
            block.ptxs = self.mempool.reap(self.cfg.max_tx_bytes);
            block.cross_shard_txs = self
                .cross_shard_mempool
                .reap(self.cfg.max_cross_shard_tx_bytes);
        }

        block.opt = response
            .op_txs
            .iter()
            .map(|txs| txs.hash().as_bytes().to_vec())
            .collect();
        self.block_data.j1_cross_shard_txs = response.op_txs;

        if self.block_pool_size() >= 2 {
            let mut hashes = Vec::with_capacity(self.shard_ids.len());
            let mut signatures = Vec::with_capacity(self.shard_ids.len());
            for shard_id in &self.shard_ids {
                let csm = self
                    .block_data
                    .j1_finished
                    .get(shard_id)
                    .ok_or_else(|| ConsensusError::MissingCsm(shard_id.clone()))?;
                hashes.push(csm.last_hash().as_bytes().to_vec());
                signatures.push(csm.agg_vote.clone());
            }
            block.ci = Some(CommitIntention::new(IntentionBrief(hashes), signatures));
        }

        if self.block_pool_size() >= 4 {
            let mut cores = Vec::with_capacity(self.shard_ids.len());
            let mut ctxs = Vec::with_capacity(self.shard_ids.len());
            let mut ctxs_proof = Vec::with_capacity(self.shard_ids.len());
            for shard_id in &self.shard_ids {
                let csm = self
                    .block_data
                    .j1_finished
                    .get(shard_id)
                    .ok_or_else(|| ConsensusError::MissingCsm(shard_id.clone()))?;
                let proof = csm
                    .proof_of_intention
                    .clone()
                    .ok_or_else(|| ConsensusError::MissingCsm(shard_id.clone()))?;
                let output_proof = csm
                    .output_txs_proof
                    .clone()
                    .ok_or_else(|| ConsensusError::MissingCsm(shard_id.clone()))?;
                cores.push(CommitCertificateCore {
                    hash: csm.last_hash(),
                    proof,
                    intention_brief: csm.intention_brief.clone(),
                });
                ctxs.push(csm.op_txs.clone());
                ctxs_proof.push(output_proof);
            }
            block.cc = CommitCertificate(cores);
            block.ctxs = ctxs;
            block.ctxs_proof = ctxs_proof;
        }

        block.seal();
        info!(
            view = self.hotstuff.view,
            hash = %block.hash(),
            intra_txs = block.ptxs.len(),
            cross_txs = block.cross_shard_txs.len(),
            "block generated"
        );
        Ok(block)
    }

    /// Broadcast this shard's cross-shard message to every shard's
    /// leader, one thread per destination, and fold the self-destined
    /// copy straight into the finished map.
    pub(crate) fn cross_shard_communicate(&mut self) -> Result<(), ConsensusError> {
        self.redo_cross_shard_messages()?;
        let qc = self.hotstuff.get_maj23()?;

        let mut intention_brief = IntentionBrief::default();
        let mut proof_of_intention: Option<ProofOfIntention> = None;
        let mut per_destination: Vec<(Txs, Option<OutputTxsProof>)> = self
            .shard_ids
            .iter()
            .map(|_| (Txs::new(), None))
            .collect();

        if self.block_pool_size() >= 4 {
            let block_j2 = self
                .fetch_block(2)
                .ok_or_else(|| ConsensusError::Verify("no j-2 block to prove against".into()))?;
            let ci = block_j2
                .ci
                .as_ref()
                .ok_or_else(|| ConsensusError::Verify("j-2 block has no intention".into()))?;
            intention_brief = ci.brief();
            proof_of_intention = Some(ProofOfIntention {
                intention_hash_proof: block_j2.commit_intention_proof().ok_or_else(|| {
                    ConsensusError::Verify("j-2 block has no intention proof".into())
                })?,
                right_hash: ci.right_hash(),
            });
            for (index, slot) in per_destination.iter_mut().enumerate() {
                slot.0 = self
                    .block_data
                    .j2_cross_shard_txs
                    .get(index)
                    .cloned()
                    .unwrap_or_default();
                slot.1 = block_j2.output_txs_proof_of(index);
            }
        }

        let mut self_csm: Option<CrossShardMessage> = None;
        let mut outbound: Vec<(String, usize, CrossShardMessage)> = Vec::new();
        for (index, shard_id) in self.shard_ids.iter().enumerate() {
            let (op_txs, output_txs_proof) = per_destination[index].clone();
            let csm = CrossShardMessage {
                source_chain: self.chain_id.clone(),
                agg_vote: qc.clone(),
                intention_brief: intention_brief.clone(),
                proof_of_intention: proof_of_intention.clone(),
                op_txs,
                output_txs_proof,
            };
            if shard_id == &self.chain_id {
                self_csm = Some(csm);
            } else {
                let leader = self
                    .shard_info
                    .shard(shard_id)
                    .map(|s| s.leader_index as usize)
                    .ok_or_else(|| ConsensusError::UnknownShard(shard_id.clone()))?;
                outbound.push((shard_id.clone(), leader, csm));
            }
        }

        let sender = self.p2p.clone();
        let bandwidth = self.bandwidth.clone();
        std::thread::scope(|scope| {
            for (shard_id, leader, csm) in &outbound {
                let sender = sender.clone();
                let bandwidth = bandwidth.clone();
                scope.spawn(move || {
                    let bytes = csm.wire_bytes();
                    let cross = to_wire(&csm.op_txs).len() as u64;
                    {
                        let mut bw = bandwidth.lock();
                        bw.cross_shard_data += cross;
                        bw.cooperation += (bytes.len() as u64).saturating_sub(cross);
                    }
                    debug!(
                        destination = %shard_id,
                        bytes = bytes.len(),
                        op_txs = csm.op_txs.len(),
                        "broadcasting cross-shard message"
                    );
                    if let Err(e) = sender.send_to_shard_index(
                        shard_id,
                        *leader,
                        ChannelId::ConsensusState,
                        &bytes,
                        MessageType::CrossShardMessage,
                    ) {
                        warn!(destination = %shard_id, error = %e, "cross-shard send failed");
                    }
                });
            }
        });

        if let Some(csm) = self_csm {
            self.extend_hash(csm);
        }
        Ok(())
    }
}

/// Construct and sign a vote on `block`, chaining `last_hash` into the
/// necessary data.
fn generate_vote_for_block(
    block: &Block,
    last_hash: Hash,
    accept: bool,
    validator_index: u32,
    signer: &Signer,
) -> Vote {
    let mut vote = Vote::new(
        block.header.view,
        block.header.round,
        block.hash(),
        Vec::new(),
        validator_index,
    );
    if !accept {
        vote.set_reject();
    }
    vote.set_last_hash(last_hash);
    vote.signature = signer.sign(&vote.sign_bytes());
    vote
}
