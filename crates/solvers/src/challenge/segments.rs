//! The segments module holds [Segments], one level of the bisection tree laid over a block range.

use super::Hash;
use anyhow::{anyhow, ensure, Result};
use serde::{Deserialize, Serialize};

/// A single level of the bisection tree.
///
/// The `hashes` are checkpoint commitments at block numbers `start`, `start + degree`, ...,
/// `start + size`. Each of the `hashes.len() - 1` children spans exactly `degree` blocks, so the
/// children always tile `[start, start + size)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segments {
    /// The block number at which the segment begins.
    pub start: u64,
    /// The number of blocks spanned by the segment.
    pub size: u64,
    /// The number of blocks spanned by each child segment.
    pub degree: u64,
    /// The checkpoint hashes, one per child boundary.
    pub hashes: Vec<Hash>,
}

impl Segments {
    /// Creates a new [Segments] over `[start, start + size)` with the given checkpoint hashes.
    ///
    /// ### Takes
    /// - `start`: The first block number of the segment.
    /// - `size`: The number of blocks spanned by the segment.
    /// - `hashes`: The checkpoint hashes. Must hold at least the two disputed endpoints.
    ///
    /// ### Returns
    /// - `Ok(Segments)`: The segment, with its degree derived from `size` and `hashes`.
    /// - `Err(anyhow::Error)`: Fewer than two hashes were given, or `size` cannot be split
    ///   evenly between the children.
    pub fn try_new(start: u64, size: u64, hashes: Vec<Hash>) -> Result<Self> {
        ensure!(
            hashes.len() >= 2,
            "segments require at least 2 hashes, got {}",
            hashes.len()
        );
        let sections = hashes.len() as u64 - 1;
        ensure!(size > 0, "segments must span at least one block");
        ensure!(
            size % sections == 0,
            "segment size {} is not divisible into {} sections",
            size,
            sections
        );

        Ok(Self {
            start,
            size,
            degree: size / sections,
            hashes,
        })
    }

    /// Creates a new [Segments] with `child_count` zeroed hash slots. Used before a party has
    /// computed its view of the checkpoints.
    pub fn empty(start: u64, size: u64, child_count: usize) -> Result<Self> {
        Self::try_new(start, size, vec![Hash::zero(); child_count])
    }

    /// Computes the range of the child segment at `position`.
    ///
    /// ### Takes
    /// - `position`: The 0-based index of the selected child, in `[0, child_count - 2]`.
    ///
    /// ### Returns
    /// - `Ok((start, size))`: The start block and size of the child segment.
    /// - `Err(anyhow::Error)`: `position` does not name a child of this segment.
    pub fn next_segments_range(&self, position: u64) -> Result<(u64, u64)> {
        let children = self.hashes.len() as u64 - 1;
        ensure!(
            position < children,
            "position {} is out of range for {} child segments",
            position,
            children
        );
        Ok((self.start + position * self.degree, self.degree))
    }

    /// Sets the checkpoint hash at `index`.
    pub fn set_hash_value(&mut self, index: usize, hash: Hash) -> Result<()> {
        let len = self.hashes.len();
        let slot = self
            .hashes
            .get_mut(index)
            .ok_or(anyhow!("hash index {} out of range for {} slots", index, len))?;
        *slot = hash;
        Ok(())
    }

    /// Returns the block number of every checkpoint slot, in order.
    pub fn block_numbers(&self) -> Vec<u64> {
        (0..self.hashes.len() as u64)
            .map(|i| self.start + i * self.degree)
            .collect()
    }
}
