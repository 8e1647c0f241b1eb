//! View/round state over the vote collector.

use crate::{HeightDataPackage, VoteError};
use lattice_types::{AggregatedVote, Hash, Verifier, Vote};
use std::sync::Arc;

/// The HotStuff view state of one replica.
///
/// Advancing the view or round replaces the collector package, so votes
/// for past slots silently fail the package's match check and are
/// dropped.
#[derive(Debug)]
pub struct HotStuffState {
    /// Current view.
    pub view: u64,

    /// Current round within the view.
    pub round: u32,

    package: HeightDataPackage,
    validator_set: Arc<Verifier>,
    per_votes: Vec<u64>,
}

impl HotStuffState {
    /// Start at (view, round) with the shard's validator set.
    pub fn new(view: u64, round: u32, validator_set: Arc<Verifier>, per_votes: Vec<u64>) -> Self {
        let package =
            HeightDataPackage::new(validator_set.clone(), per_votes.clone(), view, round);
        Self {
            view,
            round,
            package,
            validator_set,
            per_votes,
        }
    }

    /// Install the proposal hash for the current slot.
    pub fn set_proposal_hash(&mut self, hash: Hash) {
        self.package.set_proposal_hash(hash);
    }

    /// Advance to the next round of the same view with a fresh package.
    pub fn enter_new_round(&mut self) {
        self.round += 1;
        self.package = HeightDataPackage::new(
            self.validator_set.clone(),
            self.per_votes.clone(),
            self.view,
            self.round,
        );
    }

    /// Advance to the next view, round zero, with a fresh package.
    pub fn enter_new_view(&mut self) {
        self.view += 1;
        self.round = 0;
        self.package = HeightDataPackage::new(
            self.validator_set.clone(),
            self.per_votes.clone(),
            self.view,
            self.round,
        );
    }

    /// Feed a vote into the current package.
    pub fn add_vote(&mut self, vote: Vote) -> Result<(), VoteError> {
        self.package.add_vote(vote)
    }

    /// Whether the current package holds a quorum.
    pub fn is_quorum(&self) -> bool {
        self.package.is_quorum()
    }

    /// The majority aggregated vote of the current package.
    pub fn get_maj23(&mut self) -> Result<AggregatedVote, VoteError> {
        self.package.get_maj23()
    }

    /// Verify and install an externally produced aggregate.
    pub fn validate_aggregated(&mut self, agg: AggregatedVote) -> Result<(), VoteError> {
        self.package.validate_aggregated(agg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{BlsKeyPair, Signer};

    fn setup() -> (Vec<Signer>, HotStuffState) {
        let keypairs: Vec<BlsKeyPair> = (0..4)
            .map(|i| BlsKeyPair::from_seed(&[i as u8 + 1; 32]).unwrap())
            .collect();
        let pubkeys: Vec<String> = keypairs.iter().map(|k| k.public_hex()).collect();
        let verifier = Arc::new(Verifier::new(&pubkeys).unwrap());
        let signers = keypairs.into_iter().map(Signer::new).collect();
        (signers, HotStuffState::new(0, 0, verifier, vec![1; 4]))
    }

    fn vote_for(signer: &Signer, index: u32, view: u64, hash: Hash) -> Vote {
        let mut vote = Vote::new(view, 0, hash, vec![], index);
        vote.set_last_hash(Hash::ZERO);
        vote.signature = signer.sign(&vote.sign_bytes());
        vote
    }

    #[test]
    fn test_enter_new_view_resets_package() {
        let (signers, mut state) = setup();
        let hash = Hash::from_bytes(b"b1");

        state.enter_new_view();
        assert_eq!((state.view, state.round), (1, 0));
        state.set_proposal_hash(hash);

        for (i, signer) in signers.iter().enumerate().take(3) {
            state.add_vote(vote_for(signer, i as u32, 1, hash)).unwrap();
        }
        assert!(state.is_quorum());

        // The fresh package of the next view drops votes for view 1.
        state.enter_new_view();
        assert!(!state.is_quorum());
        let late = vote_for(&signers[3], 3, 1, hash);
        assert_eq!(state.add_vote(late), Err(VoteError::VoteMismatch));
    }

    #[test]
    fn test_enter_new_round_keeps_view() {
        let (_, mut state) = setup();
        state.enter_new_view();
        state.enter_new_round();
        assert_eq!((state.view, state.round), (1, 1));
    }
}
