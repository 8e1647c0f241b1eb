//! Merkle-split block parts.
//!
//! A serialized block is split into fragments of bounded size so peers
//! can relay them in parallel; each fragment carries a Merkle path back
//! to the part-set root announced in the proposal.

use crate::{merkle_proofs_bytes, to_wire, Block, Hash, MerkleProof};
use serde::{Deserialize, Serialize};

/// Errors from part handling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartError {
    /// The same index was delivered twice.
    #[error("duplicated part {index}")]
    Duplicated {
        /// Index of the duplicate.
        index: u32,
    },

    /// Part does not match the part-set header.
    #[error("part does not match part set: {0}")]
    Mismatch(String),

    /// The Merkle path failed to verify.
    #[error("part proof verification failed for index {index}")]
    BadProof {
        /// Index of the failing part.
        index: u32,
    },

    /// Structural problem with a part or header.
    #[error("{0}")]
    Invalid(String),

    /// Reassembled bytes did not decode to a consistent block.
    #[error("block reassembly failed: {0}")]
    Reassembly(String),
}

/// One fragment of a serialized block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Shard the block belongs to.
    pub chain_id: String,

    /// View of the block.
    pub view: u64,

    /// Round of the block.
    pub round: u32,

    /// The payload fragment.
    pub bytes: Vec<u8>,

    /// Merkle path from this fragment to the part-set root.
    pub proof: MerkleProof,
}

impl Part {
    /// Index of this part within the set.
    pub fn index(&self) -> u32 {
        self.proof.index
    }

    /// Verify this part against the set's root, total and chain.
    pub fn verify(&self, root: &Hash, total: u32, chain_id: &str) -> Result<(), PartError> {
        if !self.proof.verify(&Hash::from_bytes(&self.bytes), root) {
            return Err(PartError::BadProof {
                index: self.index(),
            });
        }
        if total != self.proof.total || chain_id != self.chain_id {
            return Err(PartError::Mismatch(format!(
                "{} != {} || {} != {}",
                total, self.proof.total, chain_id, self.chain_id
            )));
        }
        Ok(())
    }

    /// Cheap shape checks before touching any state.
    pub fn validate_basic(&self) -> Result<(), PartError> {
        if self.bytes.is_empty() {
            return Err(PartError::Invalid("part bytes must not be empty".into()));
        }
        if self.chain_id.is_empty() {
            return Err(PartError::Invalid("part chain id must not be empty".into()));
        }
        if self.proof.index >= self.proof.total {
            return Err(PartError::Invalid(format!(
                "part index {} out of range for total {}",
                self.proof.index, self.proof.total
            )));
        }
        Ok(())
    }

    /// Wire encoding.
    pub fn wire_bytes(&self) -> Vec<u8> {
        to_wire(self)
    }
}

/// Identifies a block's Merkle part structure.
///
/// Two headers for the same (chain, view, round) must agree on total
/// and root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartSetHeader {
    /// Shard the block belongs to.
    pub chain_id: String,

    /// View of the block.
    pub view: u64,

    /// Round of the block.
    pub round: u32,

    /// Number of parts.
    pub total: u32,

    /// Merkle root over the part payloads.
    pub root: Hash,
}

impl PartSetHeader {
    /// Cheap shape checks.
    pub fn validate_basic(&self) -> Result<(), PartError> {
        if self.chain_id.is_empty() {
            return Err(PartError::Invalid(
                "part set header chain id must not be empty".into(),
            ));
        }
        if self.total == 0 {
            return Err(PartError::Invalid(
                "part set header total must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Collects parts until the block can be reassembled.
#[derive(Debug, Clone)]
pub struct PartSet {
    /// The announced structure.
    pub header: PartSetHeader,

    /// Received parts, indexed by position.
    parts: Vec<Option<Part>>,

    /// How many distinct parts have been received.
    count: u32,

    /// The proposed block's header hash, checked after reassembly.
    pub block_header_hash: Hash,
}

impl PartSet {
    /// Start an empty set for an announced header.
    pub fn new(header: PartSetHeader, block_header_hash: Hash) -> Self {
        let total = header.total as usize;
        Self {
            header,
            parts: vec![None; total],
            count: 0,
            block_header_hash,
        }
    }

    /// Split a sealed block into parts of at most `max_part_size` bytes.
    pub fn from_block(block: &Block, max_part_size: usize, round: u32) -> Self {
        let bytes = block.wire_bytes();
        let fragments: Vec<&[u8]> = bytes.chunks(max_part_size.max(1)).collect();
        let (root, proofs) = merkle_proofs_bytes(&fragments);

        let chain_id = block.header.chain_id.clone();
        let view = block.header.view;
        let parts: Vec<Option<Part>> = fragments
            .iter()
            .zip(proofs)
            .map(|(fragment, proof)| {
                Some(Part {
                    chain_id: chain_id.clone(),
                    view,
                    round,
                    bytes: fragment.to_vec(),
                    proof,
                })
            })
            .collect();

        let total = parts.len() as u32;
        Self {
            header: PartSetHeader {
                chain_id,
                view,
                round,
                total,
                root,
            },
            count: total,
            parts,
            block_header_hash: block.hash(),
        }
    }

    /// Accept one part, rejecting duplicates, mismatches and bad proofs.
    pub fn add_part(&mut self, part: Part) -> Result<(), PartError> {
        let index = part.index() as usize;
        if index < self.parts.len() && self.parts[index].is_some() {
            return Err(PartError::Duplicated {
                index: part.index(),
            });
        }
        if self.header.view != part.view || self.header.round != part.round {
            return Err(PartError::Mismatch(format!(
                "part (view={}, round={}) does not belong to set (view={}, round={})",
                part.view, part.round, self.header.view, self.header.round
            )));
        }
        part.verify(&self.header.root, self.header.total, &self.header.chain_id)?;
        self.parts[index] = Some(part);
        self.count += 1;
        Ok(())
    }

    /// Whether every part has arrived.
    pub fn is_complete(&self) -> bool {
        self.count == self.header.total
    }

    /// All received parts, in order (for rebroadcast).
    pub fn parts(&self) -> impl Iterator<Item = &Part> {
        self.parts.iter().flatten()
    }

    /// Reassemble and cross-check the block.
    pub fn assemble_block(&self) -> Result<Block, PartError> {
        if !self.is_complete() {
            return Err(PartError::Reassembly("part set incomplete".into()));
        }
        let mut bytes = Vec::new();
        for part in self.parts.iter().flatten() {
            bytes.extend_from_slice(&part.bytes);
        }
        let block: Block = crate::from_wire(&bytes)
            .map_err(|e| PartError::Reassembly(e.to_string()))?;

        if block.header.chain_id != self.header.chain_id {
            return Err(PartError::Reassembly("block chain id mismatch".into()));
        }
        if block.header.view != self.header.view {
            return Err(PartError::Reassembly("block view mismatch".into()));
        }
        block
            .validate_basic()
            .map_err(|e| PartError::Reassembly(e.to_string()))?;
        if block.hash() != self.block_header_hash {
            return Err(PartError::Reassembly(format!(
                "block hash mismatch: {} != {}",
                block.hash(),
                self.block_header_hash
            )));
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockHeader, Txs};

    fn test_block() -> Block {
        let mut block = Block {
            header: BlockHeader {
                hash_pointer: Hash::from_bytes(b"prev"),
                chain_id: "s".into(),
                view: 3,
                round: 0,
                time_ms: 1,
                ..Default::default()
            },
            ptxs: Txs(vec![vec![7u8; 500], vec![8u8; 500]]),
            ..Default::default()
        };
        block.seal();
        block
    }

    #[test]
    fn test_split_reassemble_roundtrip() {
        let block = test_block();

        // Several part sizes, including one that forces many fragments.
        for size in [1usize, 64, 333, 100_000] {
            let source = PartSet::from_block(&block, size, 0);
            assert!(source.is_complete());

            let mut sink = PartSet::new(source.header.clone(), source.block_header_hash);
            for part in source.parts() {
                part.verify(&source.header.root, source.header.total, "s")
                    .unwrap();
                sink.add_part(part.clone()).unwrap();
            }
            assert!(sink.is_complete());

            let reassembled = sink.assemble_block().unwrap();
            assert_eq!(reassembled.hash(), block.hash());
            assert_eq!(reassembled.wire_bytes(), block.wire_bytes());
        }
    }

    #[test]
    fn test_duplicate_part_rejected() {
        let block = test_block();
        let source = PartSet::from_block(&block, 100, 0);
        let part = source.parts().next().unwrap().clone();

        let mut sink = PartSet::new(source.header.clone(), source.block_header_hash);
        sink.add_part(part.clone()).unwrap();
        assert_eq!(
            sink.add_part(part),
            Err(PartError::Duplicated { index: 0 })
        );
    }

    #[test]
    fn test_tampered_part_rejected() {
        let block = test_block();
        let source = PartSet::from_block(&block, 100, 0);
        let mut part = source.parts().next().unwrap().clone();
        part.bytes[0] ^= 0xff;

        let mut sink = PartSet::new(source.header.clone(), source.block_header_hash);
        assert!(matches!(
            sink.add_part(part),
            Err(PartError::BadProof { .. })
        ));
    }

    #[test]
    fn test_mismatched_round_rejected() {
        let block = test_block();
        let source = PartSet::from_block(&block, 100, 0);
        let mut part = source.parts().next().unwrap().clone();
        part.round = 1;

        let mut sink = PartSet::new(source.header.clone(), source.block_header_hash);
        assert!(matches!(sink.add_part(part), Err(PartError::Mismatch(_))));
    }
}
