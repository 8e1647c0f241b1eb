//! Cross-shard messages and output-transaction proofs.

use crate::commit::ProofError;
use crate::{to_wire, AggregatedVote, Hash, IntentionBrief, MerkleProof, ProofOfIntention, Txs};
use serde::{Deserialize, Serialize};

/// Two-step Merkle evidence that an output-transaction set is committed
/// by a block: the set's hash is a leaf of the per-destination output
/// list, whose root is in turn a leaf of the block's hash tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputTxsProof {
    /// Path from the output-list root to the block hash.
    pub block_proof: MerkleProof,

    /// Path from the output set's hash to the output-list root.
    pub opt_proof: MerkleProof,
}

impl OutputTxsProof {
    /// Verify `output_txs` against a block hash.
    pub fn verify(&self, root: &Hash, output_txs: &Txs) -> Result<(), ProofError> {
        let opt_leaf = Hash::from_bytes(output_txs.hash().as_bytes());
        let opt_root = self.opt_proof.compute_root(&opt_leaf);
        let block_leaf = Hash::from_bytes(opt_root.as_bytes());
        if self.block_proof.verify(&block_leaf, root) {
            Ok(())
        } else {
            Err(ProofError::Mismatch {
                context: "output txs",
            })
        }
    }

    /// Hash of this proof, used in the commit-txs-list root.
    pub fn hash(&self) -> Hash {
        crate::merkle_root_bytes(&[
            self.block_proof.content_hash().to_bytes(),
            self.opt_proof.content_hash().to_bytes(),
        ])
    }
}

/// One leader-to-leader envelope of the cross-shard commitment flow.
///
/// Carries the source shard's newest quorum certificate plus Merkle
/// evidence for the commit intention and the output transactions of the
/// block two pipeline stages back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossShardMessage {
    /// Shard that produced this message.
    pub source_chain: String,

    /// Quorum certificate for the source shard's latest block.
    pub agg_vote: AggregatedVote,

    /// Commit intention brief of the pipeline-delayed block.
    pub intention_brief: IntentionBrief,

    /// Proof of the intention brief against that block's hash.
    pub proof_of_intention: Option<ProofOfIntention>,

    /// Output transactions destined for the receiving shard.
    pub op_txs: Txs,

    /// Proof of the output transactions against that block's hash.
    pub output_txs_proof: Option<OutputTxsProof>,
}

impl CrossShardMessage {
    /// The source shard's previous block hash, as committed by the
    /// quorum certificate's necessary data.
    pub fn last_hash(&self) -> Hash {
        self.agg_vote.last_hash()
    }

    /// Verify the carried Merkle evidence against `last_hash()`.
    ///
    /// Proof fields absent during the pipeline warm-up are skipped.
    pub fn validate_basic(&self) -> Result<(), ProofError> {
        let root = self.last_hash();
        if let Some(poi) = &self.proof_of_intention {
            poi.verify(&root, &self.intention_brief.hash())?;
        }
        if let Some(proof) = &self.output_txs_proof {
            proof.verify(&root, &self.op_txs)?;
        }
        Ok(())
    }

    /// Wire encoding.
    pub fn wire_bytes(&self) -> Vec<u8> {
        to_wire(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{merkle_proofs_bytes, SignerBitfield, Vote, VoteCode};

    #[test]
    fn test_output_txs_proof_roundtrip() {
        let txs_a = Txs(vec![b"relay-1".to_vec()]);
        let txs_b = Txs(vec![b"relay-2".to_vec(), b"relay-3".to_vec()]);

        // Per-destination output list: one hash per destination shard.
        let opt: Vec<[u8; 32]> = vec![txs_a.hash().to_bytes(), txs_b.hash().to_bytes()];
        let (opt_root, opt_proofs) = merkle_proofs_bytes(&opt);

        // Block tree with the output-list root at leaf 1.
        let leaves = vec![Hash::from_bytes(b"header").to_bytes(), opt_root.to_bytes()];
        let (block_hash, block_proofs) = merkle_proofs_bytes(&leaves);

        let proof = OutputTxsProof {
            block_proof: block_proofs[1].clone(),
            opt_proof: opt_proofs[0].clone(),
        };
        assert!(proof.verify(&block_hash, &txs_a).is_ok());

        // Wrong transaction set fails.
        assert!(proof.verify(&block_hash, &txs_b).is_err());

        let proof_b = OutputTxsProof {
            block_proof: block_proofs[1].clone(),
            opt_proof: opt_proofs[1].clone(),
        };
        assert!(proof_b.verify(&block_hash, &txs_b).is_ok());
    }

    #[test]
    fn test_csm_proof_integrity_under_mutation() {
        use crate::{Block, BlockHeader, CommitIntention};

        // A sealed block carrying an intention and one output set.
        let op_txs = Txs(vec![b"relay-a".to_vec(), b"relay-b".to_vec()]);
        let mut peer_vote = Vote::new(8, 0, Hash::from_bytes(b"b8"), vec![], 0);
        peer_vote.set_last_hash(Hash::from_bytes(b"b7"));
        let ci = CommitIntention::new(
            IntentionBrief(vec![Hash::from_bytes(b"b7").as_bytes().to_vec()]),
            vec![peer_vote.into_aggregated(SignerBitfield::new(4))],
        );

        let mut block = Block::default();
        block.header = BlockHeader {
            hash_pointer: Hash::from_bytes(b"prev"),
            chain_id: "s1".into(),
            view: 9,
            round: 0,
            time_ms: 9,
            ..Default::default()
        };
        block.opt = vec![op_txs.hash().as_bytes().to_vec()];
        block.ci = Some(ci.clone());
        block.seal();

        // The quorum certificate commits to this block's hash.
        let mut qc_vote = Vote::new(10, 0, Hash::from_bytes(b"b10"), vec![], 0);
        qc_vote.set_last_hash(block.hash());
        let csm = CrossShardMessage {
            source_chain: "s1".into(),
            agg_vote: qc_vote.into_aggregated(SignerBitfield::new(4)),
            intention_brief: ci.brief(),
            proof_of_intention: Some(ProofOfIntention {
                intention_hash_proof: block.commit_intention_proof().unwrap(),
                right_hash: ci.right_hash(),
            }),
            op_txs: op_txs.clone(),
            output_txs_proof: Some(block.output_txs_proof_of(0).unwrap()),
        };
        assert!(csm.validate_basic().is_ok());

        // Mutating the intention brief breaks the intention proof.
        let mut tampered = csm.clone();
        tampered.intention_brief = IntentionBrief(vec![b"other".to_vec()]);
        assert!(tampered.validate_basic().is_err());

        // Mutating the output set breaks the output proof.
        let mut tampered = csm.clone();
        tampered.op_txs = Txs(vec![b"relay-c".to_vec()]);
        assert!(tampered.validate_basic().is_err());

        // Mutating a proof byte breaks verification.
        let mut tampered = csm.clone();
        if let Some(proof) = &mut tampered.proof_of_intention {
            proof.right_hash = Hash::from_bytes(b"flipped");
        }
        assert!(tampered.validate_basic().is_err());

        // Mutating the committed hash breaks both proofs.
        let mut tampered = csm;
        tampered.agg_vote.set_last_hash(Hash::from_bytes(b"elsewhere"));
        assert!(tampered.validate_basic().is_err());
    }

    #[test]
    fn test_csm_validate_skips_absent_proofs() {
        let mut vote = Vote::new(1, 0, Hash::from_bytes(b"b1"), vec![], 0);
        vote.set_last_hash(Hash::ZERO);
        let csm = CrossShardMessage {
            source_chain: "s1".into(),
            agg_vote: vote.into_aggregated(SignerBitfield::new(4)),
            intention_brief: IntentionBrief::default(),
            proof_of_intention: None,
            op_txs: Txs::new(),
            output_txs_proof: None,
        };

        assert!(csm.validate_basic().is_ok());
        assert_eq!(csm.agg_vote.code, VoteCode::Ok);
    }
}
