//! The types module contains the primitive types shared by the dispute game participants.

use ethers::types::H256;

/// The [Hash] type represents a checkpoint commitment (an L2 output root) at a given block
/// number within a bisection segment.
pub type Hash = H256;

/// The output root that the ledger reports for an output which has been deleted, either by a
/// successful fault proof or by the security council.
pub const DELETED_OUTPUT_ROOT: Hash = H256::zero();

/// Returns true if the given output root marks a deleted output.
pub fn is_output_deleted(output_root: &Hash) -> bool {
    *output_root == DELETED_OUTPUT_ROOT
}
