//! The leader's signed part-set announcement.

use lattice_types::{proposal_message, to_wire, Hash, PartError, PartSetHeader};
use serde::{Deserialize, Serialize};

/// Announces a block's part structure to the shard.
///
/// Validators install the part set from the header and start accepting
/// parts; the block header hash pins what the reassembled block must
/// hash to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// The announced part structure.
    pub header: PartSetHeader,

    /// Index of the proposing validator.
    pub proposer_index: u32,

    /// Hash of the proposed block's header tree.
    pub block_header_hash: Hash,

    /// BLS signature over `sign_bytes()`.
    pub signature: Vec<u8>,
}

impl Proposal {
    /// Build an unsigned proposal.
    pub fn new(header: PartSetHeader, proposer_index: u32, block_header_hash: Hash) -> Self {
        Self {
            header,
            proposer_index,
            block_header_hash,
            signature: Vec::new(),
        }
    }

    /// The bytes the proposer signs.
    pub fn sign_bytes(&self) -> Vec<u8> {
        proposal_message(&self.header, &self.block_header_hash)
    }

    /// Cheap shape checks.
    pub fn validate_basic(&self) -> Result<(), PartError> {
        self.header.validate_basic()
    }

    /// Wire encoding.
    pub fn wire_bytes(&self) -> Vec<u8> {
        to_wire(self)
    }
}
