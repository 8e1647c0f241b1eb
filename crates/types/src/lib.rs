//! Core types for the Lattice sharded consensus protocol.
//!
//! Everything that crosses a wire or a module boundary lives here:
//! hashes, Merkle proofs, BLS keys and verifiers, votes and quorum
//! certificates, blocks and their part sets, commit intentions and
//! certificates, cross-shard messages, and the static shard topology.

mod abci;
mod block;
mod commit;
mod cross_shard;
mod crypto;
mod hash;
mod merkle;
mod part;
mod range_list;
mod signer_bitfield;
mod signing;
mod topology;
mod txs;
mod vote;
mod wire;

pub use abci::{AbciApp, ExecutionReceipt, ExecutionResponse, ReceiptCode};
pub use block::{Block, BlockHeader};
pub use commit::{
    CommitCertificate, CommitCertificateCore, CommitIntention, IntentionBrief, ProofError,
    ProofOfIntention,
};
pub use cross_shard::{CrossShardMessage, OutputTxsProof};
pub use crypto::{aggregate_signatures, BlsKeyPair, CryptoError, Signer, Verifier};
pub use hash::{Hash, HexError};
pub use merkle::{merkle_proofs_bytes, merkle_root_bytes, MerkleProof};
pub use part::{Part, PartError, PartSet, PartSetHeader};
pub use range_list::RangeList;
pub use signer_bitfield::SignerBitfield;
pub use signing::{proposal_message, vote_message, DOMAIN_PROPOSAL, DOMAIN_VOTE};
pub use topology::{Peer, Shard, ShardInfo, TopologyError};
pub use txs::{tx_hash, tx_key, Txs};
pub use vote::{AggregatedVote, Vote, VoteCode};
pub use wire::{from_wire, to_wire, WireError};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
