//! Blocks: the unit of consensus within a shard.
//!
//! A block's hash is the root of a fixed seven-leaf Merkle tree over its
//! header roots, so that individual roots (the hash pointer, the output
//! transactions, the commit intention) can later be proven against the
//! block hash without shipping the whole block.

use crate::commit::ProofError;
use crate::{
    merkle_proofs_bytes, merkle_root_bytes, to_wire, AggregatedVote, CommitCertificate,
    CommitIntention, Hash, MerkleProof, OutputTxsProof, Txs,
};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Stable leaf position of the hash pointer in the block hash tree.
pub const LEAF_HASH_POINTER: usize = 1;
/// Stable leaf position of the output-transactions root.
pub const LEAF_OUTPUT_TXS: usize = 3;
/// Stable leaf position of the commit-intention root.
pub const LEAF_COMMIT_INTENTION: usize = 4;

/// Block header: the chain position plus the roots of every payload
/// section, staggered across pipeline stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the previous block.
    pub hash_pointer: Hash,

    /// Shard this block belongs to.
    pub chain_id: String,

    /// View number.
    pub view: u64,

    /// Round within the view.
    pub round: u32,

    /// Proposal time, milliseconds since the Unix epoch.
    pub time_ms: u64,

    /// Root of the intra-shard transactions (this view).
    pub prepare_root: Hash,

    /// Root of the pending cross-shard transactions (this view).
    pub cross_shard_root: Hash,

    /// Root of the per-destination output sets (this view).
    pub output_txs_root: Hash,

    /// Hash of the previous view's quorum certificate.
    pub last_agg_sig_root: Hash,

    /// Root of the commit intention carried from two views back.
    pub commit_intention_root: Hash,

    /// Root of the commit certificates from four views back.
    pub commit_certificate_root: Hash,

    /// Root over the committed cross-shard outputs and their proofs.
    pub commit_txs_list_root: Hash,

    /// State root, six views delayed.
    pub state_root: Hash,
}

/// Cached hash tree of a sealed block.
#[derive(Debug, Clone)]
struct BlockDigest {
    hash: Hash,
    proofs: Vec<MerkleProof>,
}

/// A complete block: header plus the pipeline payload sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    /// Header with the section roots.
    pub header: BlockHeader,

    /// Intra-shard transactions prepared in this view.
    pub ptxs: Txs,

    /// Cross-shard transactions originating here, pending pre-execution.
    pub cross_shard_txs: Txs,

    /// Hashes of the per-destination output sets, one per shard.
    pub opt: Vec<Vec<u8>>,

    /// Quorum certificate of the previous view.
    pub agg_sig_vote: Option<AggregatedVote>,

    /// Commit intention carried from two views back.
    pub ci: Option<CommitIntention>,

    /// Commit certificates from four views back.
    pub cc: CommitCertificate,

    /// Cross-shard output transactions received from peer shards.
    pub ctxs: Vec<Txs>,

    /// Proofs of those outputs against the peer shards' block hashes.
    pub ctxs_proof: Vec<OutputTxsProof>,

    #[serde(skip)]
    pub(crate) digest: OnceLock<BlockDigest>,
}

impl Block {
    /// Fill any unset header roots from the payload sections and
    /// materialise the hash tree. Must run before hashing or
    /// serialising a locally built block.
    pub fn seal(&mut self) {
        self.fill_roots();
        let _ = self.digest();
    }

    fn fill_roots(&mut self) {
        if self.header.prepare_root.is_zero() {
            self.header.prepare_root = self.ptxs.hash();
        }
        if self.header.cross_shard_root.is_zero() {
            self.header.cross_shard_root = self.cross_shard_txs.hash();
        }
        if self.header.output_txs_root.is_zero() {
            self.header.output_txs_root = merkle_root_bytes(&self.opt);
        }
        if self.header.last_agg_sig_root.is_zero() {
            if let Some(agg) = &self.agg_sig_vote {
                self.header.last_agg_sig_root = agg.hash();
            }
        }
        if self.header.commit_intention_root.is_zero() {
            if let Some(ci) = &self.ci {
                self.header.commit_intention_root = ci.hash();
            }
        }
        if self.header.commit_certificate_root.is_zero() {
            self.header.commit_certificate_root = self.cc.hash();
        }
        if self.header.commit_txs_list_root.is_zero() {
            let ctxs_hashes: Vec<[u8; 32]> =
                self.ctxs.iter().map(|txs| txs.hash().to_bytes()).collect();
            let proof_hashes: Vec<[u8; 32]> = self
                .ctxs_proof
                .iter()
                .map(|proof| proof.hash().to_bytes())
                .collect();
            self.header.commit_txs_list_root = merkle_root_bytes(&[
                merkle_root_bytes(&ctxs_hashes).to_bytes(),
                merkle_root_bytes(&proof_hashes).to_bytes(),
            ]);
        }
    }

    fn digest(&self) -> &BlockDigest {
        self.digest.get_or_init(|| {
            let header = &self.header;
            let package_hash = {
                let leaves: Vec<Vec<u8>> = vec![
                    header.chain_id.as_bytes().to_vec(),
                    header.view.to_be_bytes().to_vec(),
                    header.round.to_be_bytes().to_vec(),
                    header.time_ms.to_be_bytes().to_vec(),
                    header.last_agg_sig_root.as_bytes().to_vec(),
                    header.commit_certificate_root.as_bytes().to_vec(),
                ];
                merkle_root_bytes(&leaves)
            };

            let leaves: Vec<[u8; 32]> = vec![
                package_hash.to_bytes(),
                header.hash_pointer.to_bytes(), // LEAF_HASH_POINTER
                header.prepare_root.to_bytes(),
                header.output_txs_root.to_bytes(), // LEAF_OUTPUT_TXS
                header.commit_intention_root.to_bytes(), // LEAF_COMMIT_INTENTION
                header.commit_txs_list_root.to_bytes(),
                header.state_root.to_bytes(),
            ];
            let (hash, proofs) = merkle_proofs_bytes(&leaves);
            BlockDigest { hash, proofs }
        })
    }

    /// The block hash: root of the seven-leaf header tree.
    pub fn hash(&self) -> Hash {
        self.digest().hash
    }

    /// Inclusion proof for one of the seven header leaves.
    pub fn proof_of_index(&self, index: usize) -> Option<MerkleProof> {
        self.digest().proofs.get(index).cloned()
    }

    /// Proof for the hash-pointer leaf.
    pub fn header_proof(&self) -> Option<MerkleProof> {
        self.proof_of_index(LEAF_HASH_POINTER)
    }

    /// Proof for the output-transactions leaf.
    pub fn output_txs_proof(&self) -> Option<MerkleProof> {
        self.proof_of_index(LEAF_OUTPUT_TXS)
    }

    /// Proof for the commit-intention leaf.
    pub fn commit_intention_proof(&self) -> Option<MerkleProof> {
        self.proof_of_index(LEAF_COMMIT_INTENTION)
    }

    /// Build the two-step proof for the output set destined to
    /// `shard_index`.
    pub fn output_txs_proof_of(&self, shard_index: usize) -> Option<OutputTxsProof> {
        let block_proof = self.output_txs_proof()?;
        let (_, opt_proofs) = merkle_proofs_bytes(&self.opt);
        Some(OutputTxsProof {
            block_proof,
            opt_proof: opt_proofs.get(shard_index)?.clone(),
        })
    }

    /// Wire encoding. The block must be sealed (or deserialized, in
    /// which case the roots arrived over the wire).
    pub fn wire_bytes(&self) -> Vec<u8> {
        to_wire(self)
    }

    /// Structural consistency of the pipeline payload sections.
    ///
    /// Whether the sections must be populated at all for the block's
    /// view is the consensus layer's judgement; here only present
    /// sections are cross-checked.
    pub fn validate_basic(&self) -> Result<(), ProofError> {
        if let Some(ci) = &self.ci {
            if ci.intention_hash.len() != ci.aggregated_signatures.len() {
                return Err(ProofError::Inconsistent(format!(
                    "block carries {} intention hashes but {} aggregated signatures",
                    ci.intention_hash.len(),
                    ci.aggregated_signatures.len()
                )));
            }
            for (i, agg) in ci.aggregated_signatures.iter().enumerate() {
                if ci.intention_hash.0[i] != agg.last_hash().as_bytes().to_vec() {
                    return Err(ProofError::Inconsistent(format!(
                        "commit intention {} of block (view={}, round={}) disagrees with its vote",
                        i, self.header.view, self.header.round
                    )));
                }
            }

            if !self.cc.is_empty() {
                if self.cc.len() != ci.intention_hash.len() {
                    return Err(ProofError::Inconsistent(format!(
                        "block carries {} certificate cores but {} intention hashes",
                        self.cc.len(),
                        ci.intention_hash.len()
                    )));
                }
                for (i, core) in self.cc.0.iter().enumerate() {
                    if core.hash != ci.aggregated_signatures[i].last_hash() {
                        return Err(ProofError::Inconsistent(format!(
                            "commit certificate {} of block (view={}, round={}) disagrees with its vote",
                            i, self.header.view, self.header.round
                        )));
                    }
                }
                self.cc.verify()?;
            }
        }

        if self.ctxs.len() != self.ctxs_proof.len() || self.ctxs.len() != self.cc.len() {
            return Err(ProofError::Inconsistent(
                "block carries mismatched cross-shard output sections".into(),
            ));
        }
        if let Some(ci) = &self.ci {
            let (_, conflicts) = self.cc.result();
            for (i, proof) in self.ctxs_proof.iter().enumerate() {
                if conflicts.get(i).copied().unwrap_or(false) {
                    continue;
                }
                proof.verify(&ci.aggregated_signatures[i].last_hash(), &self.ctxs[i])?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{from_wire, SignerBitfield, Vote};

    fn sealed_block() -> Block {
        let mut vote = Vote::new(9, 0, Hash::from_bytes(b"b9"), vec![], 0);
        vote.set_last_hash(Hash::from_bytes(b"b8"));

        let opt_set = Txs(vec![b"relay".to_vec()]);
        let mut block = Block {
            header: BlockHeader {
                hash_pointer: Hash::from_bytes(b"b9"),
                chain_id: "s".into(),
                view: 10,
                round: 0,
                time_ms: 1_700_000_000_000,
                ..Default::default()
            },
            ptxs: Txs(vec![b"tx1".to_vec(), b"tx2".to_vec()]),
            cross_shard_txs: Txs::new(),
            opt: vec![opt_set.hash().as_bytes().to_vec()],
            agg_sig_vote: Some(vote.into_aggregated(SignerBitfield::new(4))),
            ci: None,
            cc: CommitCertificate::default(),
            ctxs: vec![],
            ctxs_proof: vec![],
            digest: OnceLock::new(),
        };
        block.seal();
        block
    }

    #[test]
    fn test_hash_stable_across_reserialization() {
        let block = sealed_block();
        let hash = block.hash();

        let decoded: Block = from_wire(&block.wire_bytes()).unwrap();
        assert_eq!(decoded.hash(), hash);
        assert_eq!(decoded.header, block.header);
    }

    #[test]
    fn test_every_leaf_proof_verifies() {
        let block = sealed_block();
        let root = block.hash();

        for i in 0..7 {
            let proof = block.proof_of_index(i).unwrap();
            // Leaf 0 is the packed header hash; the rest are the stored
            // roots in tree order.
            let header = &block.header;
            let leaves = [
                None,
                Some(header.hash_pointer),
                Some(header.prepare_root),
                Some(header.output_txs_root),
                Some(header.commit_intention_root),
                Some(header.commit_txs_list_root),
                Some(header.state_root),
            ];
            if let Some(leaf) = leaves[i] {
                assert!(
                    proof.verify(&Hash::from_bytes(leaf.as_bytes()), &root),
                    "leaf {} proof failed",
                    i
                );
            }
        }
    }

    #[test]
    fn test_output_txs_two_step_proof() {
        let block = sealed_block();
        let opt_set = Txs(vec![b"relay".to_vec()]);

        let proof = block.output_txs_proof_of(0).unwrap();
        assert!(proof.verify(&block.hash(), &opt_set).is_ok());

        let wrong = Txs(vec![b"other".to_vec()]);
        assert!(proof.verify(&block.hash(), &wrong).is_err());
    }

    #[test]
    fn test_output_root_proof_against_block_hash() {
        let block = sealed_block();
        let proof = block.output_txs_proof().unwrap();
        assert!(proof.verify(
            &Hash::from_bytes(block.header.output_txs_root.as_bytes()),
            &block.hash()
        ));
    }

    #[test]
    fn test_validate_basic_on_minimal_block() {
        let block = sealed_block();
        assert!(block.validate_basic().is_ok());
    }
}
