//! Chunk addressing: the `<top>/<first>-<last>-<hash>` two-level directory
//! scheme.

use crate::hash::ShortHash;
use std::fmt;

/// Number of `(first, last, hash)` ranges a top directory holds before the
/// writer rolls to a new top.
pub const DEFAULT_TOP_DIR_SIZE: usize = 500;

/// Width, in zero-padded decimal digits, of a block number in a chunk path
/// component.
pub const BLOCK_NUMBER_WIDTH: usize = 10;

/// The address of one persisted chunk: a half-open (inclusive at both ends)
/// contiguous block range plus the short hash of its last block, filed under
/// a coarse `top` directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId {
    /// First block in the chunk, inclusive.
    pub first_block: u64,
    /// Last block in the chunk, inclusive.
    pub last_block: u64,
    /// Short hash of the last block's content hash.
    pub last_hash: ShortHash,
    /// The coarse top-level directory this chunk is filed under.
    pub top: u64,
}

impl ChunkId {
    /// Construct a new chunk id. Does not validate the layout invariants;
    /// callers combine this with `layout::validate_layout` for that.
    pub fn new(first_block: u64, last_block: u64, last_hash: ShortHash, top: u64) -> Self {
        Self {
            first_block,
            last_block,
            last_hash,
            top,
        }
    }

    /// The on-disk relative path for this chunk: `<top>/<first>-<last>-<hash>`.
    pub fn path(&self) -> String {
        format!(
            "{}/{}",
            format_block(self.top),
            self.range_dir_name()
        )
    }

    /// Just the range-encoding directory name, without the top prefix.
    pub fn range_dir_name(&self) -> String {
        format!(
            "{}-{}-{}",
            format_block(self.first_block),
            format_block(self.last_block),
            self.last_hash
        )
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Render a block number as a zero-padded, fixed-width decimal string.
pub fn format_block(block_number: u64) -> String {
    format!("{block_number:0width$}", width = BLOCK_NUMBER_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_matches_layout_scheme() {
        let chunk = ChunkId::new(17_881_390, 17_882_786, ShortHash::new("deadbeef"), 17_880_000);
        assert_eq!(chunk.path(), "0017880000/0017881390-0017882786-deadbeef");
    }
}
