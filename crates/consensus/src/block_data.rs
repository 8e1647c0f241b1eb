//! Per-view block assembly and the pipeline stage buffers.

use lattice_types::{Block, CrossShardMessage, Hash, Part, PartError, PartSet, PartSetHeader, Txs};
use std::collections::HashMap;
use tracing::debug;

/// Errors from block buffering.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockDataError {
    /// The item belongs to an already-pruned (view, round).
    #[error("stale item for view {view}, round {round}")]
    Old {
        /// Item view.
        view: u64,
        /// Item round.
        round: u32,
    },

    /// A part set already exists for this (view, round).
    #[error("part set already exists for view {view}, round {round}")]
    HeaderExists {
        /// Item view.
        view: u64,
        /// Item round.
        round: u32,
    },

    /// The part arrived before its header; it was stashed.
    #[error("no part set yet for view {view}, round {round}; part retained")]
    HeaderNotReady {
        /// Item view.
        view: u64,
        /// Item round.
        round: u32,
    },

    /// The block for this slot is not complete.
    #[error("no complete block for view {view}, round {round}")]
    NotComplete {
        /// Item view.
        view: u64,
        /// Item round.
        round: u32,
    },

    /// Part verification failed.
    #[error(transparent)]
    Part(#[from] PartError),
}

/// The view-local assembly state plus three pipeline stages of finished
/// cross-shard messages and their output-transaction slices.
pub struct BlockData {
    retain_view: u64,
    retain_round: u32,

    blocks: HashMap<(u64, u32), PartSet>,
    retained_parts: HashMap<(u64, u32), Vec<Part>>,

    /// Expected previous-block hash per peer shard.
    pub last_hash: HashMap<String, Hash>,

    /// Finished cross-shard messages of the current stage.
    pub finished: HashMap<String, CrossShardMessage>,

    /// Finished messages one stage back.
    pub j1_finished: HashMap<String, CrossShardMessage>,

    /// Finished messages two stages back.
    pub j2_finished: HashMap<String, CrossShardMessage>,

    /// Per-destination relay payloads of the current stage.
    pub j_cross_shard_txs: Vec<Txs>,

    /// Relay payloads one stage back.
    pub j1_cross_shard_txs: Vec<Txs>,

    /// Relay payloads two stages back.
    pub j2_cross_shard_txs: Vec<Txs>,
}

impl BlockData {
    /// Start buffering at (view, round) with the given expected-hash map.
    pub fn new(view: u64, round: u32, last_hash: HashMap<String, Hash>) -> Self {
        Self {
            retain_view: view,
            retain_round: round,
            blocks: HashMap::new(),
            retained_parts: HashMap::new(),
            last_hash,
            finished: HashMap::new(),
            j1_finished: HashMap::new(),
            j2_finished: HashMap::new(),
            j_cross_shard_txs: Vec::new(),
            j1_cross_shard_txs: Vec::new(),
            j2_cross_shard_txs: Vec::new(),
        }
    }

    fn is_old(&self, view: u64, round: u32) -> bool {
        view < self.retain_view || (view == self.retain_view && round < self.retain_round)
    }

    /// Install the part set announced by a proposal and drain any parts
    /// that arrived ahead of it.
    pub fn add_part_set_header(
        &mut self,
        header: PartSetHeader,
        block_header_hash: Hash,
    ) -> Result<(), BlockDataError> {
        let slot = (header.view, header.round);
        if self.is_old(header.view, header.round) {
            return Err(BlockDataError::Old {
                view: header.view,
                round: header.round,
            });
        }
        if self.blocks.contains_key(&slot) {
            return Err(BlockDataError::HeaderExists {
                view: header.view,
                round: header.round,
            });
        }
        self.blocks
            .insert(slot, PartSet::new(header, block_header_hash));

        if let Some(stashed) = self.retained_parts.remove(&slot) {
            for part in stashed {
                if let Err(e) = self.add_part(part) {
                    debug!(error = %e, "stashed part rejected");
                }
            }
        }
        Ok(())
    }

    /// Install a locally built part set (the proposer's own block).
    pub fn insert_part_set(&mut self, part_set: PartSet) -> Result<(), BlockDataError> {
        let slot = (part_set.header.view, part_set.header.round);
        if self.is_old(slot.0, slot.1) {
            return Err(BlockDataError::Old {
                view: slot.0,
                round: slot.1,
            });
        }
        if self.blocks.contains_key(&slot) {
            return Err(BlockDataError::HeaderExists {
                view: slot.0,
                round: slot.1,
            });
        }
        self.blocks.insert(slot, part_set);
        Ok(())
    }

    /// Route one part into its set, stashing it when the header has not
    /// arrived yet.
    pub fn add_part(&mut self, part: Part) -> Result<(), BlockDataError> {
        let slot = (part.view, part.round);
        if self.is_old(part.view, part.round) {
            return Err(BlockDataError::Old {
                view: part.view,
                round: part.round,
            });
        }
        match self.blocks.get_mut(&slot) {
            Some(part_set) => Ok(part_set.add_part(part)?),
            None => {
                let err = BlockDataError::HeaderNotReady {
                    view: part.view,
                    round: part.round,
                };
                self.retained_parts.entry(slot).or_default().push(part);
                Err(err)
            }
        }
    }

    /// Whether the block of (view, round) has all its parts.
    pub fn is_complete(&self, view: u64, round: u32) -> bool {
        self.blocks
            .get(&(view, round))
            .is_some_and(|ps| ps.is_complete())
    }

    /// Reassemble the block of (view, round).
    pub fn get_block(&self, view: u64, round: u32) -> Result<Block, BlockDataError> {
        let part_set = self
            .blocks
            .get(&(view, round))
            .ok_or(BlockDataError::NotComplete { view, round })?;
        Ok(part_set.assemble_block()?)
    }

    /// Whether every peer shard's cross-shard message has arrived for
    /// the current stage.
    pub fn is_cross_shard_message_complete(&self) -> bool {
        self.finished.len() == self.last_hash.len()
    }

    /// Drop a rejected block's assembly state so the transition loop
    /// does not re-validate it; a re-delivered proposal reinstalls it.
    pub fn discard_block(&mut self, view: u64, round: u32) {
        self.blocks.remove(&(view, round));
    }

    /// Advance to (view, round): prune older slots and shift the
    /// pipeline stages down.
    pub fn next(&mut self, view: u64, round: u32) {
        self.prune(view, round);

        self.j2_finished = std::mem::take(&mut self.j1_finished);
        self.j1_finished = std::mem::take(&mut self.finished);

        self.j2_cross_shard_txs = std::mem::take(&mut self.j1_cross_shard_txs);
        self.j1_cross_shard_txs = std::mem::take(&mut self.j_cross_shard_txs);

        self.retain_view = view;
        self.retain_round = round;
    }

    fn prune(&mut self, view: u64, round: u32) {
        self.blocks
            .retain(|&(v, r), _| v > view || (v == view && r >= round));
        self.retained_parts
            .retain(|&(v, r), _| v > view || (v == view && r >= round));
    }
}
