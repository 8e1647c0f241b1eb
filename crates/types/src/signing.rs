//! Domain-separated signable messages.
//!
//! Each signed message type carries a unique domain tag so a signature
//! from one context cannot be replayed in another. The signable bytes of
//! a vote exclude the signature and the voter index: the voter's identity
//! is proven by the signature alone.

use crate::{Hash, PartSetHeader, VoteCode};

/// Domain tag for consensus votes (individual and aggregated).
pub const DOMAIN_VOTE: &[u8] = b"lattice/vote:";

/// Domain tag for block proposals.
pub const DOMAIN_PROPOSAL: &[u8] = b"lattice/proposal:";

/// Build the signing message for a vote.
///
/// Covers the stance, the (view, round) slot, the voted-for block hash,
/// and every necessary-data entry (length-prefixed). Matching-stance
/// votes on the same proposal therefore sign identical bytes, which is
/// what makes their BLS signatures aggregate into one quorum signature.
pub fn vote_message(
    code: VoteCode,
    view: u64,
    round: u32,
    for_hash: &Hash,
    necessary_data: &[Vec<u8>],
) -> Vec<u8> {
    let mut message = Vec::with_capacity(64 + 36 * necessary_data.len());
    message.extend_from_slice(DOMAIN_VOTE);
    message.push(code as u8);
    message.extend_from_slice(&view.to_be_bytes());
    message.extend_from_slice(&round.to_be_bytes());
    message.extend_from_slice(for_hash.as_bytes());
    for entry in necessary_data {
        message.extend_from_slice(&(entry.len() as u32).to_be_bytes());
        message.extend_from_slice(entry);
    }
    message
}

/// Build the signing message for a proposal.
///
/// Covers the part-set header and the proposed block's header hash.
pub fn proposal_message(header: &PartSetHeader, block_header_hash: &Hash) -> Vec<u8> {
    let mut message = Vec::with_capacity(96 + header.chain_id.len());
    message.extend_from_slice(DOMAIN_PROPOSAL);
    message.extend_from_slice(header.chain_id.as_bytes());
    message.extend_from_slice(&header.view.to_be_bytes());
    message.extend_from_slice(&header.round.to_be_bytes());
    message.extend_from_slice(&header.total.to_be_bytes());
    message.extend_from_slice(header.root.as_bytes());
    message.extend_from_slice(block_header_hash.as_bytes());
    message
}
