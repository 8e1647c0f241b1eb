//! The shard consensus state machine.
//!
//! Drives the pipelined view sequence: propose, collect votes into a
//! quorum certificate, exchange cross-shard messages with every peer
//! shard, commit the block two views back, advance. Every inbound
//! message is processed under one state mutex; the transition loop acts
//! on whichever edge condition the message satisfied.

mod block_data;
mod proposal;
mod state;
mod transition;

pub use block_data::{BlockData, BlockDataError};
pub use proposal::Proposal;
pub use state::{ConsensusHandle, ConsensusMessage, State};
pub use transition::Step;

use lattice_hotstuff::VoteError;
use lattice_types::{PartError, WireError};

/// How far the state machine got; `Halted` means the view limit fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// Keep feeding messages.
    Continue,
    /// The experiment is over; shut the replica down.
    Halted,
}

/// Tunable knobs of the consensus core.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Byte budget when reaping the intra-shard mempool.
    pub max_tx_bytes: usize,

    /// Byte budget when reaping the cross-shard mempool.
    pub max_cross_shard_tx_bytes: usize,

    /// Maximum size of one block part.
    pub max_part_size: usize,

    /// Reap every view instead of every sixth view.
    pub enable_pipeline: bool,

    /// Views below this skip chained block verification; the history
    /// they would check does not exist yet.
    pub warmup_views: u64,

    /// Pause before the first proposal so peer links settle.
    pub view_one_delay: std::time::Duration,

    /// Proposer halts past this view when the pipeline is enabled.
    pub pipeline_view_limit: u64,

    /// Proposer halts past this view when the pipeline is disabled.
    pub plain_view_limit: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            max_tx_bytes: 160 * 1024,
            max_cross_shard_tx_bytes: 640 * 1024,
            max_part_size: 40 * 1024,
            enable_pipeline: true,
            warmup_views: 5,
            view_one_delay: std::time::Duration::from_secs(10),
            pipeline_view_limit: 100,
            plain_view_limit: 600,
        }
    }
}

/// Errors internal to the consensus state machine. They stop at the p2p
/// dispatch boundary, where they are logged and the message dropped.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// A message belongs to a different shard.
    #[error("chain id mismatch: expected {expected}, got {got}")]
    ChainMismatch {
        /// Our shard.
        expected: String,
        /// The message's shard.
        got: String,
    },

    /// A cross-shard message named an unknown shard.
    #[error("shard {0} does not exist")]
    UnknownShard(String),

    /// The same cross-shard message was delivered twice.
    #[error("duplicated cross-shard message")]
    DuplicatedCsm,

    /// A proposal's signature failed against its proposer index.
    #[error("invalid proposal signature from validator {0}")]
    InvalidProposalSignature(u32),

    /// An aggregated signature failed verification.
    #[error("invalid aggregated signature on {0}")]
    InvalidAggregateSignature(&'static str),

    /// Block verification failed; the replica votes REJECT.
    #[error("block verification failed: {0}")]
    Verify(String),

    /// A pipeline stage was missing data the protocol guarantees.
    #[error("missing finished cross-shard message for shard {0}")]
    MissingCsm(String),

    /// Vote collection failed.
    #[error(transparent)]
    Vote(#[from] VoteError),

    /// Part handling failed.
    #[error(transparent)]
    Part(#[from] PartError),

    /// Block buffering failed.
    #[error(transparent)]
    BlockData(#[from] BlockDataError),

    /// A payload failed to decode.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Proof verification failed.
    #[error(transparent)]
    Proof(#[from] lattice_types::ProofError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] lattice_store::StoreError),
}
