//! Static shard topology: peers, shards, and the shard map.
//!
//! The topology is fixed for the lifetime of a run: every shard knows
//! every shard's validator list, weights, leader, and key range. Shard
//! ids iterate in sorted order everywhere, which is the canonical order
//! all cross-shard vectors are aligned to.

use crate::{CryptoError, RangeList, Verifier};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Errors from topology construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    /// A validator public key failed to parse.
    #[error("shard {shard}: {source}")]
    BadValidatorKey {
        /// Shard whose key failed.
        shard: String,
        /// Underlying key error.
        source: CryptoError,
    },

    /// Shard info JSON failed to parse.
    #[error("shard info decode error: {0}")]
    Decode(String),

    /// A shard's key range string failed to parse.
    #[error("shard {0}: invalid key range")]
    BadKeyRange(String),
}

/// One validator endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// TCP address, `ip:port`.
    pub addr: String,

    /// Shards this peer serves.
    pub chains: Vec<String>,

    /// Hex-encoded BLS public key.
    pub pubkey: String,

    /// Voting weight.
    pub vote: u64,
}

/// Static view of one shard's replica group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shard {
    /// Validators in index order.
    pub peer_list: Vec<Peer>,

    /// Sum of the validators' weights.
    pub total_votes: u64,

    /// Index of the fixed leader.
    pub leader_index: u32,

    /// Compact key-range string, alternating low/high boundaries.
    pub key_range: String,

    #[serde(skip)]
    verifier: OnceLock<Verifier>,
}

impl Shard {
    /// Build a shard from its peers.
    pub fn new(peer_list: Vec<Peer>, leader_index: u32, key_range: String) -> Self {
        let total_votes = peer_list.iter().map(|p| p.vote).sum();
        Self {
            peer_list,
            total_votes,
            leader_index,
            key_range,
            verifier: OnceLock::new(),
        }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.peer_list.len()
    }

    /// Whether the shard has no validators.
    pub fn is_empty(&self) -> bool {
        self.peer_list.is_empty()
    }

    /// Per-validator weights in index order.
    pub fn per_votes(&self) -> Vec<u64> {
        self.peer_list.iter().map(|p| p.vote).collect()
    }

    /// The shard's validator-set verifier.
    ///
    /// Initialised once by [`ShardInfo::init`]; every constructor path
    /// runs it before handing the topology out.
    pub fn verifier(&self) -> &Verifier {
        self.verifier
            .get()
            .expect("shard verifier initialised at topology construction")
    }

    fn init_verifier(&self) -> Result<(), CryptoError> {
        if self.verifier.get().is_some() {
            return Ok(());
        }
        let pubkeys: Vec<&str> = self.peer_list.iter().map(|p| p.pubkey.as_str()).collect();
        let verifier = Verifier::new(&pubkeys)?;
        let _ = self.verifier.set(verifier);
        Ok(())
    }
}

impl PartialEq for Shard {
    fn eq(&self, other: &Self) -> bool {
        self.peer_list == other.peer_list
            && self.total_votes == other.total_votes
            && self.leader_index == other.leader_index
            && self.key_range == other.key_range
    }
}

/// The full shard map.
///
/// `BTreeMap` keeps the shard ids sorted, which is the canonical order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardInfo {
    /// Shard id to shard descriptor.
    pub shards: BTreeMap<String, Shard>,
}

impl ShardInfo {
    /// Build and initialise a shard map.
    pub fn new(shards: BTreeMap<String, Shard>) -> Result<Self, TopologyError> {
        let info = Self { shards };
        info.init()?;
        Ok(info)
    }

    /// Parse from the `shard_info.json` file contents.
    pub fn from_json(bytes: &[u8]) -> Result<Self, TopologyError> {
        let info: ShardInfo =
            serde_json::from_slice(bytes).map_err(|e| TopologyError::Decode(e.to_string()))?;
        info.init()?;
        Ok(info)
    }

    /// Serialize to pretty JSON for the config directory.
    pub fn to_json(&self) -> Vec<u8> {
        serde_json::to_vec_pretty(self).expect("shard info serialization should never fail")
    }

    fn init(&self) -> Result<(), TopologyError> {
        for (id, shard) in &self.shards {
            shard
                .init_verifier()
                .map_err(|source| TopologyError::BadValidatorKey {
                    shard: id.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Shard ids in canonical (sorted) order.
    pub fn shard_ids(&self) -> Vec<String> {
        self.shards.keys().cloned().collect()
    }

    /// Number of shards.
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Position of a shard id in canonical order.
    pub fn index_of(&self, chain_id: &str) -> Option<usize> {
        self.shards.keys().position(|id| id == chain_id)
    }

    /// Look up a shard.
    pub fn shard(&self, chain_id: &str) -> Option<&Shard> {
        self.shards.get(chain_id)
    }

    /// Parse every shard's key range into a range list.
    pub fn key_range_lists(&self) -> Result<BTreeMap<String, RangeList>, TopologyError> {
        self.shards
            .iter()
            .map(|(id, shard)| {
                RangeList::from_compact(&shard.key_range)
                    .map(|rl| (id.clone(), rl))
                    .ok_or_else(|| TopologyError::BadKeyRange(id.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BlsKeyPair;

    fn test_shard(n: usize, key_range: &str) -> Shard {
        let peers: Vec<Peer> = (0..n)
            .map(|i| Peer {
                addr: format!("127.0.0.1:{}", 26600 + i),
                chains: vec!["s1".into()],
                pubkey: BlsKeyPair::from_seed(&[i as u8 + 1; 32]).unwrap().public_hex(),
                vote: 1,
            })
            .collect();
        Shard::new(peers, 0, key_range.into())
    }

    #[test]
    fn test_shard_ids_sorted() {
        let mut shards = BTreeMap::new();
        shards.insert("s2".to_string(), test_shard(2, "20,21"));
        shards.insert("s1".to_string(), test_shard(2, "10,11"));
        let info = ShardInfo::new(shards).unwrap();

        assert_eq!(info.shard_ids(), vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(info.index_of("s2"), Some(1));
    }

    #[test]
    fn test_json_roundtrip_reinitialises_verifiers() {
        let mut shards = BTreeMap::new();
        shards.insert("s1".to_string(), test_shard(4, "10,11"));
        let info = ShardInfo::new(shards).unwrap();

        let restored = ShardInfo::from_json(&info.to_json()).unwrap();
        assert_eq!(restored, info);
        assert_eq!(restored.shard("s1").unwrap().verifier().len(), 4);
        assert_eq!(restored.shard("s1").unwrap().per_votes(), vec![1, 1, 1, 1]);
    }
}
