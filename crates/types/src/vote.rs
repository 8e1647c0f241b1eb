//! Consensus votes and aggregated quorum votes.

use crate::{to_wire, vote_message, Hash, SignerBitfield};
use serde::{Deserialize, Serialize};

/// Stance of a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoteCode {
    /// The voter accepts the proposal.
    Ok = 1,
    /// The voter rejects the proposal.
    Reject = 2,
}

/// A single validator's vote on a proposed block.
///
/// Slot 0 of `necessary_data` carries the previous block's hash, which
/// chains the quorum certificate to the voter's view of history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    /// Stance.
    pub code: VoteCode,

    /// View this vote belongs to.
    pub view: u64,

    /// Round within the view.
    pub round: u32,

    /// Hash of the block being voted on.
    pub for_hash: Hash,

    /// Auxiliary byte strings committed by the signature.
    pub necessary_data: Vec<Vec<u8>>,

    /// BLS signature over `sign_bytes()`.
    pub signature: Vec<u8>,

    /// Index of the voter in the shard's validator set.
    pub validator_index: u32,
}

impl Vote {
    /// Create an unsigned OK vote.
    pub fn new(
        view: u64,
        round: u32,
        for_hash: Hash,
        necessary_data: Vec<Vec<u8>>,
        validator_index: u32,
    ) -> Self {
        Self {
            code: VoteCode::Ok,
            view,
            round,
            for_hash,
            necessary_data,
            signature: Vec::new(),
            validator_index,
        }
    }

    /// Whether this is an OK vote.
    pub fn is_ok(&self) -> bool {
        self.code == VoteCode::Ok
    }

    /// Set the stance to OK.
    pub fn set_ok(&mut self) {
        self.code = VoteCode::Ok;
    }

    /// Set the stance to reject.
    pub fn set_reject(&mut self) {
        self.code = VoteCode::Reject;
    }

    /// The bytes a validator signs: the identity and signature fields are
    /// excluded, so the signature alone proves who voted.
    pub fn sign_bytes(&self) -> Vec<u8> {
        vote_message(
            self.code,
            self.view,
            self.round,
            &self.for_hash,
            &self.necessary_data,
        )
    }

    /// Wire encoding.
    pub fn wire_bytes(&self) -> Vec<u8> {
        to_wire(self)
    }

    /// Hash over the wire encoding.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.wire_bytes())
    }

    /// The previous-block hash carried in slot 0 of the necessary data.
    pub fn last_hash(&self) -> Hash {
        self.necessary_data
            .first()
            .and_then(|d| Hash::from_digest(d))
            .unwrap_or(Hash::ZERO)
    }

    /// Install the previous-block hash in slot 0 of the necessary data.
    pub fn set_last_hash(&mut self, hash: Hash) {
        let bytes = hash.as_bytes().to_vec();
        if self.necessary_data.is_empty() {
            self.necessary_data.push(bytes);
        } else {
            self.necessary_data[0] = bytes;
        }
    }

    /// Promote this vote to an aggregated vote with the given bitfield.
    pub fn into_aggregated(self, signers: SignerBitfield) -> AggregatedVote {
        AggregatedVote {
            code: self.code,
            view: self.view,
            round: self.round,
            for_hash: self.for_hash,
            necessary_data: self.necessary_data,
            signature: self.signature,
            signer_indexer: signers,
        }
    }
}

/// A 2/3-weighted quorum of votes, aggregated into one BLS signature.
///
/// The set bits of `signer_indexer` name the validators whose individual
/// signatures were aggregated; the sum of their weights meets the quorum
/// threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedVote {
    /// Stance the quorum agreed on.
    pub code: VoteCode,

    /// View of the aggregated votes.
    pub view: u64,

    /// Round of the aggregated votes.
    pub round: u32,

    /// Hash of the block the quorum voted on.
    pub for_hash: Hash,

    /// Auxiliary byte strings shared by the aggregated votes.
    pub necessary_data: Vec<Vec<u8>>,

    /// Aggregated BLS signature.
    pub signature: Vec<u8>,

    /// Which validators contributed to the signature.
    pub signer_indexer: SignerBitfield,
}

impl AggregatedVote {
    /// Whether the quorum accepted the proposal.
    pub fn is_ok(&self) -> bool {
        self.code == VoteCode::Ok
    }

    /// The common message all contributors signed.
    pub fn sign_bytes(&self) -> Vec<u8> {
        vote_message(
            self.code,
            self.view,
            self.round,
            &self.for_hash,
            &self.necessary_data,
        )
    }

    /// Wire encoding.
    pub fn wire_bytes(&self) -> Vec<u8> {
        to_wire(self)
    }

    /// Hash over the wire encoding.
    pub fn hash(&self) -> Hash {
        Hash::from_bytes(&self.wire_bytes())
    }

    /// The previous-block hash carried in slot 0 of the necessary data.
    pub fn last_hash(&self) -> Hash {
        self.necessary_data
            .first()
            .and_then(|d| Hash::from_digest(d))
            .unwrap_or(Hash::ZERO)
    }

    /// Install the previous-block hash in slot 0 of the necessary data.
    pub fn set_last_hash(&mut self, hash: Hash) {
        let bytes = hash.as_bytes().to_vec();
        if self.necessary_data.is_empty() {
            self.necessary_data.push(bytes);
        } else {
            self.necessary_data[0] = bytes;
        }
    }
}
