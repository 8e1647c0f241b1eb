//! Per-(view, round) vote aggregation.

use lattice_types::{
    aggregate_signatures, AggregatedVote, CryptoError, Hash, SignerBitfield, Verifier, Vote,
    VoteCode,
};
use std::sync::Arc;

/// Errors from vote collection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoteError {
    /// The vote's signature does not verify for its claimed index.
    #[error("invalid vote signature")]
    InvalidSignature,

    /// The validator index is outside the validator set.
    #[error("invalid validator index {0}")]
    InvalidValidatorIndex(u32),

    /// The vote targets a different (view, round, hash) than collected.
    #[error("vote does not match collector slot")]
    VoteMismatch,

    /// The validator's slot is already sealed.
    #[error("duplicated vote")]
    DuplicatedVote,

    /// Neither stance has reached the quorum threshold.
    #[error("no 2/3 majority yet")]
    NoQuorum,

    /// The aggregated signature failed to verify or build.
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Vote collector for one (view, round).
///
/// Owns the validator set and weight vector, seals one slot per
/// validator on first acceptance, and tracks the accumulated OK and
/// REJECT weight. Quorum holds as soon as either counter reaches
/// ⌈2W/3⌉ of the total weight W.
#[derive(Debug)]
pub struct HeightDataPackage {
    /// Hash of the proposal votes must target. Zero until the proposal
    /// is known; votes arriving earlier fail the match check.
    proposal_hash: Hash,
    view: u64,
    round: u32,

    votes: Vec<Option<Vote>>,
    votes_bitfield: SignerBitfield,
    votes_total: u64,
    reject_total: u64,
    total_weight: u64,
    per_vote: Vec<u64>,
    validator_set: Arc<Verifier>,

    agg_vote: Option<AggregatedVote>,
}

impl HeightDataPackage {
    /// Create an empty collector wired to a validator set and weights.
    pub fn new(validator_set: Arc<Verifier>, per_vote: Vec<u64>, view: u64, round: u32) -> Self {
        let total_weight = per_vote.iter().sum();
        let size = validator_set.len();
        Self {
            proposal_hash: Hash::ZERO,
            view,
            round,
            votes: vec![None; size],
            votes_bitfield: SignerBitfield::new(size),
            votes_total: 0,
            reject_total: 0,
            total_weight,
            per_vote,
            validator_set,
            agg_vote: None,
        }
    }

    /// Install the proposal hash votes are collected for.
    pub fn set_proposal_hash(&mut self, hash: Hash) {
        self.proposal_hash = hash;
    }

    /// The (view, round) this package collects for.
    pub fn slot(&self) -> (u64, u32) {
        (self.view, self.round)
    }

    /// Accept one vote, crediting its weight to the matching counter.
    pub fn add_vote(&mut self, vote: Vote) -> Result<(), VoteError> {
        let index = vote.validator_index as usize;
        if index >= self.votes.len() {
            return Err(VoteError::InvalidValidatorIndex(vote.validator_index));
        }
        if !self
            .validator_set
            .verify(&vote.signature, &vote.sign_bytes(), index)
        {
            return Err(VoteError::InvalidSignature);
        }
        if self.view != vote.view
            || self.round != vote.round
            || self.proposal_hash != vote.for_hash
        {
            return Err(VoteError::VoteMismatch);
        }
        if self.votes[index].is_some() {
            return Err(VoteError::DuplicatedVote);
        }

        if vote.is_ok() {
            self.votes_total += self.per_vote[index];
        } else {
            self.reject_total += self.per_vote[index];
        }
        self.votes_bitfield.set(index);
        self.votes[index] = Some(vote);
        Ok(())
    }

    /// Whether either stance has reached the quorum threshold.
    pub fn is_quorum(&self) -> bool {
        Self::reaches_quorum(self.votes_total, self.total_weight)
            || Self::reaches_quorum(self.reject_total, self.total_weight)
    }

    fn reaches_quorum(weight: u64, total: u64) -> bool {
        total > 0 && weight * 3 >= total * 2
    }

    /// Build (once) and return the majority aggregated vote.
    ///
    /// The winning stance is whichever counter reached the threshold,
    /// OK taking precedence; only matching-stance signatures enter the
    /// aggregate, and the bitfield names exactly those contributors.
    pub fn get_maj23(&mut self) -> Result<AggregatedVote, VoteError> {
        if let Some(agg) = &self.agg_vote {
            return Ok(agg.clone());
        }

        let code = if Self::reaches_quorum(self.votes_total, self.total_weight) {
            VoteCode::Ok
        } else if Self::reaches_quorum(self.reject_total, self.total_weight) {
            VoteCode::Reject
        } else {
            return Err(VoteError::NoQuorum);
        };

        let mut bitfield = SignerBitfield::new(self.votes.len());
        let mut signatures: Vec<&[u8]> = Vec::new();
        let mut necessary_data: Vec<Vec<u8>> = Vec::new();
        for (index, slot) in self.votes.iter().enumerate() {
            let Some(vote) = slot else { continue };
            if vote.code != code {
                continue;
            }
            bitfield.set(index);
            signatures.push(&vote.signature);
            necessary_data = vote.necessary_data.clone();
        }

        let signature = aggregate_signatures(&signatures)?;
        let template = Vote {
            code,
            view: self.view,
            round: self.round,
            for_hash: self.proposal_hash,
            necessary_data,
            signature,
            validator_index: 0,
        };
        let agg = template.into_aggregated(bitfield);
        self.agg_vote = Some(agg.clone());
        Ok(agg)
    }

    /// Verify an externally produced aggregate and install it.
    pub fn validate_aggregated(&mut self, agg: AggregatedVote) -> Result<(), VoteError> {
        if !self.validator_set.verify_aggregate(
            &agg.signature,
            &agg.sign_bytes(),
            &agg.signer_indexer,
        ) {
            return Err(VoteError::InvalidSignature);
        }
        if self.view != agg.view || self.round != agg.round {
            return Err(VoteError::VoteMismatch);
        }
        self.agg_vote = Some(agg);
        Ok(())
    }

    /// Whether an aggregated vote has been built or installed.
    pub fn has_agg_vote(&self) -> bool {
        self.agg_vote.is_some()
    }

    /// Accumulated OK weight.
    pub fn votes_total(&self) -> u64 {
        self.votes_total
    }

    /// Accumulated REJECT weight.
    pub fn reject_total(&self) -> u64 {
        self.reject_total
    }
}
