//! Commit intentions and commit certificates.
//!
//! A block carries a commit intention: the list of peer-shard block
//! hashes it intends to commit, each evidenced by that shard's quorum
//! certificate. Two pipeline stages later a commit certificate follows,
//! proving via Merkle paths that every peer carried the same intention.

use crate::{merkle_root_bytes, AggregatedVote, Hash, MerkleProof};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Errors from proof verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProofError {
    /// A Merkle path did not lead to the expected root.
    #[error("merkle proof mismatch for {context}")]
    Mismatch {
        /// Which proof failed.
        context: &'static str,
    },

    /// Structural inconsistency between paired fields.
    #[error("{0}")]
    Inconsistent(String),
}

/// The per-shard list of intended peer-shard block hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentionBrief(pub Vec<Vec<u8>>);

impl IntentionBrief {
    /// Merkle root over the intention hashes.
    pub fn hash(&self) -> Hash {
        merkle_root_bytes(&self.0)
    }

    /// Number of entries (one per shard).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the brief is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A block's declared intent to commit one block per peer shard.
///
/// `intention_hash[i]` is the hash of shard i's block; the matching
/// entry of `aggregated_signatures` is the quorum certificate evidencing
/// it. The left/right subtree hashes are cached so a membership proof
/// can be produced without re-hashing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitIntention {
    /// One peer-shard block hash per shard, in canonical shard order.
    pub intention_hash: IntentionBrief,

    /// The quorum certificates evidencing those hashes.
    pub aggregated_signatures: Vec<AggregatedVote>,

    #[serde(skip)]
    left: OnceLock<Hash>,
    #[serde(skip)]
    right: OnceLock<Hash>,
}

impl CommitIntention {
    /// Build a commit intention from paired hashes and certificates.
    pub fn new(intention_hash: IntentionBrief, aggregated_signatures: Vec<AggregatedVote>) -> Self {
        Self {
            intention_hash,
            aggregated_signatures,
            left: OnceLock::new(),
            right: OnceLock::new(),
        }
    }

    /// Hash of the intention-hash subtree (the proof's left leaf).
    pub fn left_hash(&self) -> Hash {
        *self.left.get_or_init(|| self.intention_hash.hash())
    }

    /// Hash of the aggregated-signature subtree (the proof's sibling).
    pub fn right_hash(&self) -> Hash {
        *self.right.get_or_init(|| {
            let leaves: Vec<[u8; 32]> = self
                .aggregated_signatures
                .iter()
                .map(|av| av.hash().to_bytes())
                .collect();
            merkle_root_bytes(&leaves)
        })
    }

    /// The commit-intention root committed in the block header.
    pub fn hash(&self) -> Hash {
        merkle_root_bytes(&[self.left_hash(), self.right_hash()])
    }

    /// The brief carried inside cross-shard messages.
    pub fn brief(&self) -> IntentionBrief {
        self.intention_hash.clone()
    }
}

impl PartialEq for CommitIntention {
    fn eq(&self, other: &Self) -> bool {
        self.intention_hash == other.intention_hash
            && self.aggregated_signatures == other.aggregated_signatures
    }
}

impl Eq for CommitIntention {}

/// Merkle evidence that a commit intention is part of a block.
///
/// The path runs from the commit-intention leaf of the block's hash tree
/// up to the block hash; the sibling subtree hash is precomputed so the
/// receiver only needs the intention brief to rebuild the leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofOfIntention {
    /// Path from the commit-intention leaf to the block root.
    pub intention_hash_proof: MerkleProof,

    /// The aggregated-signature subtree hash (the leaf's sibling).
    pub right_hash: Hash,
}

impl ProofOfIntention {
    /// Verify the intention brief's subtree hash against a block hash.
    pub fn verify(&self, root: &Hash, left_hash: &Hash) -> Result<(), ProofError> {
        let ci_hash = merkle_root_bytes(&[*left_hash, self.right_hash]);
        let leaf = Hash::from_bytes(ci_hash.as_bytes());
        if self.intention_hash_proof.verify(&leaf, root) {
            Ok(())
        } else {
            Err(ProofError::Mismatch {
                context: "commit intention",
            })
        }
    }

    /// Hash of this proof, used in the commit-certificate root.
    pub fn hash(&self) -> Hash {
        merkle_root_bytes(&[
            self.intention_hash_proof.content_hash().to_bytes(),
            self.right_hash.to_bytes(),
        ])
    }
}

/// One shard's entry in a commit certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCertificateCore {
    /// The peer-shard block hash being certified.
    pub hash: Hash,

    /// Proof that the intention brief is part of that block.
    pub proof: ProofOfIntention,

    /// The intention brief the peer shard carried.
    pub intention_brief: IntentionBrief,
}

impl CommitCertificateCore {
    /// Verify the proof against this core's block hash.
    pub fn verify(&self) -> Result<(), ProofError> {
        self.proof.verify(&self.hash, &self.intention_brief.hash())
    }
}

/// The per-shard commit certificate list, one core per shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCertificate(pub Vec<CommitCertificateCore>);

impl CommitCertificate {
    /// Number of cores.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the certificate is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Verify every core's proof.
    pub fn verify(&self) -> Result<(), ProofError> {
        for (i, core) in self.0.iter().enumerate() {
            core.verify().map_err(|e| {
                ProofError::Inconsistent(format!("commit certificate core {i}: {e}"))
            })?;
        }
        Ok(())
    }

    /// The commit-certificate root committed in the block header.
    pub fn hash(&self) -> Hash {
        let core_hashes: Vec<[u8; 32]> = self
            .0
            .iter()
            .map(|core| {
                merkle_root_bytes(&[
                    core.hash.to_bytes(),
                    core.intention_brief.hash().to_bytes(),
                    core.proof.hash().to_bytes(),
                ])
                .to_bytes()
            })
            .collect();
        merkle_root_bytes(&core_hashes)
    }

    /// Fold the cores' intention briefs into one intention per index,
    /// flagging indices where the briefs disagree.
    ///
    /// A conflicting index is only logged and skipped by callers; the
    /// non-conflicting majority intention stands.
    pub fn result(&self) -> (Vec<Vec<u8>>, Vec<bool>) {
        if self.0.is_empty() {
            return (Vec::new(), Vec::new());
        }
        let width = self.0.len();
        let mut intentions: Vec<Vec<u8>> = vec![Vec::new(); width];
        let mut conflicts = vec![false; width];
        for core in &self.0 {
            for (i, bytes) in core.intention_brief.0.iter().enumerate().take(width) {
                if bytes.is_empty() || intentions[i] == *bytes {
                    continue;
                } else if !intentions[i].is_empty() {
                    conflicts[i] = true;
                } else {
                    intentions[i] = bytes.clone();
                }
            }
        }
        (intentions, conflicts)
    }
}
