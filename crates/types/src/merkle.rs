//! Binary Merkle tree with inclusion proofs.
//!
//! Blocks are hashed as small fixed trees, part sets as one leaf per
//! fragment, and output-transaction sets as one leaf per destination.
//! Leaves are padded to the next power of two with zero hashes; a proof
//! carries the leaf index, the leaf count of the original tree, and the
//! sibling path up to the root.

use crate::Hash;
use serde::{Deserialize, Serialize};

/// Merkle inclusion proof for a leaf in a binary Merkle tree.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// Index of the leaf in the tree (0-based).
    pub index: u32,

    /// Number of leaves in the original (unpadded) tree.
    pub total: u32,

    /// Sibling hashes from leaf to root.
    pub siblings: Vec<Hash>,
}

impl MerkleProof {
    /// Recompute the root implied by this proof for the given leaf hash.
    pub fn compute_root(&self, leaf_hash: &Hash) -> Hash {
        let mut current = *leaf_hash;
        let mut index = self.index;

        for sibling in &self.siblings {
            current = if index % 2 == 0 {
                Hash::pair(&current, sibling)
            } else {
                Hash::pair(sibling, &current)
            };
            index /= 2;
        }

        current
    }

    /// Verify that `leaf_hash` is included under `root` at `self.index`.
    pub fn verify(&self, leaf_hash: &Hash, root: &Hash) -> bool {
        self.index < self.total && self.compute_root(leaf_hash) == *root
    }

    /// Hash of the proof's own contents, used where proofs are themselves
    /// committed to (commit-certificate and output-proof roots).
    pub fn content_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(8 + 32 * self.siblings.len());
        data.extend_from_slice(&self.index.to_be_bytes());
        data.extend_from_slice(&self.total.to_be_bytes());
        for sibling in &self.siblings {
            data.extend_from_slice(sibling.as_bytes());
        }
        Hash::from_bytes(&data)
    }

    /// Depth of the padded tree this proof walks.
    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}

/// Compute the Merkle root over a list of byte leaves.
///
/// Each leaf's bytes are hashed first. The empty list hashes to the
/// zero hash.
pub fn merkle_root_bytes<T: AsRef<[u8]>>(leaves: &[T]) -> Hash {
    let leaf_hashes: Vec<Hash> = leaves.iter().map(|l| Hash::from_bytes(l.as_ref())).collect();
    root_from_hashes(&leaf_hashes)
}

/// Compute the Merkle root and one inclusion proof per leaf.
pub fn merkle_proofs_bytes<T: AsRef<[u8]>>(leaves: &[T]) -> (Hash, Vec<MerkleProof>) {
    let leaf_hashes: Vec<Hash> = leaves.iter().map(|l| Hash::from_bytes(l.as_ref())).collect();
    proofs_from_hashes(&leaf_hashes)
}

fn root_from_hashes(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Hash::ZERO,
        1 => leaves[0],
        _ => {
            let tree = build_tree(leaves);
            tree[tree.len() - 1]
        }
    }
}

fn proofs_from_hashes(leaves: &[Hash]) -> (Hash, Vec<MerkleProof>) {
    if leaves.is_empty() {
        return (Hash::ZERO, Vec::new());
    }
    if leaves.len() == 1 {
        return (
            leaves[0],
            vec![MerkleProof {
                index: 0,
                total: 1,
                siblings: vec![],
            }],
        );
    }

    let n = leaves.len().next_power_of_two();
    let depth = n.trailing_zeros() as usize;
    let tree = build_tree(leaves);
    let root = tree[tree.len() - 1];

    let proofs: Vec<MerkleProof> = (0..leaves.len())
        .map(|leaf_idx| {
            let mut siblings = Vec::with_capacity(depth);
            let mut level_start = 0;
            let mut level_size = n;
            let mut idx = leaf_idx;

            for _ in 0..depth {
                let sibling_idx = if idx % 2 == 0 { idx + 1 } else { idx - 1 };
                siblings.push(tree[level_start + sibling_idx]);

                level_start += level_size;
                level_size /= 2;
                idx /= 2;
            }

            MerkleProof {
                index: leaf_idx as u32,
                total: leaves.len() as u32,
                siblings,
            }
        })
        .collect();

    (root, proofs)
}

/// Build the full padded tree bottom-up.
///
/// Layout: [leaves (n), level 1 (n/2), ..., root (1)] with n the padded
/// leaf count.
fn build_tree(leaves: &[Hash]) -> Vec<Hash> {
    let n = leaves.len().next_power_of_two();
    let depth = n.trailing_zeros() as usize;

    let mut tree = vec![Hash::ZERO; 2 * n - 1];
    tree[..leaves.len()].copy_from_slice(leaves);

    let mut level_start = 0;
    let mut level_size = n;

    for _ in 0..depth {
        let next_level_start = level_start + level_size;
        let next_level_size = level_size / 2;

        for i in 0..next_level_size {
            let left = tree[level_start + 2 * i];
            let right = tree[level_start + 2 * i + 1];
            tree[next_level_start + i] = Hash::pair(&left, &right);
        }

        level_start = next_level_start;
        level_size = next_level_size;
    }

    tree
}
