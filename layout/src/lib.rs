//! The on-disk chunk layout: a flat listing backend
//! (`Layout`), the read-side queries over it (`validate_layout`,
//! `get_chunks`, `get_chunks_reversed`), and the append-only
//! [`ChunkWriter`] state machine that decides where the next chunk goes.

#![warn(missing_debug_implementations, missing_docs)]

use chain_types::chunk::{format_block, BLOCK_NUMBER_WIDTH, DEFAULT_TOP_DIR_SIZE};
use chain_types::{ChunkId, ShortHash};
use observability_deps::tracing::warn;
use snafu::Snafu;
use std::fs;
use std::path::{Path, PathBuf};

/// A `(first_block, last_block, last_hash)` range directory entry, as listed
/// under one top directory.
pub type RangeEntry = (u64, u64, ShortHash);

/// Storage backend abstraction over the chunk directory tree. Implemented
/// for a local filesystem root; a future object-store-backed implementation
/// can satisfy the same trait without touching the layout logic above it.
pub trait Layout {
    /// List top-level directory numbers present, ascending.
    fn list_tops(&self) -> std::io::Result<Vec<u64>>;

    /// List the `(first, last, hash)` range directories under `top`,
    /// ascending by `first`.
    fn list_top_ranges(&self, top: u64) -> std::io::Result<Vec<RangeEntry>>;

    /// List the file names present directly inside a chunk directory, used
    /// by the writer to sanity-check a possibly-partial last chunk.
    fn list_chunk_files(&self, chunk: &ChunkId) -> std::io::Result<Vec<String>>;

    /// Remove a chunk directory and everything under it.
    fn delete_chunk(&self, chunk: &ChunkId) -> std::io::Result<()>;
}

/// A [`Layout`] backed by a local filesystem directory.
#[derive(Debug, Clone)]
pub struct LocalLayout {
    root: PathBuf,
}

impl LocalLayout {
    /// Open a local directory as a chunk layout root. Does not require the
    /// directory to already exist.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The filesystem path backing this layout.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn list_dir_names(&self, dir: &Path) -> std::io::Result<Vec<String>> {
        match fs::read_dir(dir) {
            Ok(entries) => entries
                .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

fn parse_top_dir(name: &str) -> Option<u64> {
    if name.len() == BLOCK_NUMBER_WIDTH && name.bytes().all(|b| b.is_ascii_digit()) {
        name.parse().ok()
    } else {
        None
    }
}

fn parse_range_dir(name: &str) -> Option<RangeEntry> {
    let mut parts = name.splitn(3, '-');
    let first = parts.next()?;
    let last = parts.next()?;
    let hash = parts.next()?;
    if first.len() != BLOCK_NUMBER_WIDTH || last.len() != BLOCK_NUMBER_WIDTH || hash.len() != 8 {
        return None;
    }
    if !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((first.parse().ok()?, last.parse().ok()?, ShortHash::new(hash)))
}

impl Layout for LocalLayout {
    fn list_tops(&self) -> std::io::Result<Vec<u64>> {
        let mut tops: Vec<u64> = self
            .list_dir_names(&self.root)?
            .iter()
            .filter_map(|n| parse_top_dir(n))
            .collect();
        tops.sort_unstable();
        Ok(tops)
    }

    fn list_top_ranges(&self, top: u64) -> std::io::Result<Vec<RangeEntry>> {
        let dir = self.root.join(format_block(top));
        let mut ranges: Vec<RangeEntry> = self
            .list_dir_names(&dir)?
            .iter()
            .filter_map(|n| parse_range_dir(n))
            .collect();
        ranges.sort_unstable_by_key(|r| (r.0, r.1));
        Ok(ranges)
    }

    fn list_chunk_files(&self, chunk: &ChunkId) -> std::io::Result<Vec<String>> {
        self.list_dir_names(&self.root.join(chunk.path()))
    }

    fn delete_chunk(&self, chunk: &ChunkId) -> std::io::Result<()> {
        let dir = self.root.join(chunk.path());
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A structural violation of the layout invariants.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum LayoutError {
    /// A chunk's own `first_block > last_block`.
    #[snafu(display("invalid data chunk {chunk}: {first} > {last}"))]
    InvertedChunk { chunk: String, first: u64, last: u64 },

    /// A chunk starts before the top directory it's filed under.
    #[snafu(display("invalid data chunk {chunk}: top {top} > first block {first}"))]
    ChunkBeforeTop { chunk: String, top: u64, first: u64 },

    /// Two chunks within the same top directory overlap.
    #[snafu(display("overlapping ranges: {prev} and {next}"))]
    OverlappingRanges { prev: String, next: String },

    /// A chunk's range bleeds into the next top directory's block space.
    #[snafu(display("invalid data chunk {chunk}: range overlaps with {next_top} top dir"))]
    ChunkCrossesTopBoundary { chunk: String, next_top: String },
}

/// Validate the structural invariants of a layout across its entirety:
/// chunks within a top are ordered and non-overlapping, no chunk starts
/// before its top, and no chunk's range reaches into the next top.
pub fn validate_layout(layout: &dyn Layout) -> Result<(), LayoutError> {
    let tops = layout.list_tops().unwrap_or_default();

    for (i, &top) in tops.iter().enumerate() {
        let ranges = layout.list_top_ranges(top).unwrap_or_default();

        for (j, (beg, end, hash)) in ranges.iter().enumerate() {
            let chunk = ChunkId::new(*beg, *end, hash.clone(), top);

            if beg > end {
                return Err(LayoutError::InvertedChunk {
                    chunk: chunk.to_string(),
                    first: *beg,
                    last: *end,
                });
            }
            if *beg < top {
                return Err(LayoutError::ChunkBeforeTop {
                    chunk: chunk.to_string(),
                    top,
                    first: *beg,
                });
            }
            if j > 0 && ranges[j - 1].1 >= *beg {
                let prev = ChunkId::new(ranges[j - 1].0, ranges[j - 1].1, ranges[j - 1].2.clone(), top);
                return Err(LayoutError::OverlappingRanges {
                    prev: prev.to_string(),
                    next: chunk.to_string(),
                });
            }
            if let Some(&next_top) = tops.get(i + 1) {
                if next_top <= *end {
                    return Err(LayoutError::ChunkCrossesTopBoundary {
                        chunk: chunk.to_string(),
                        next_top: format_block(next_top),
                    });
                }
            }
        }
    }
    Ok(())
}

/// List chunks overlapping `[first_block, last_block]`, ascending.
pub fn get_chunks(layout: &dyn Layout, first_block: u64, last_block: u64) -> Vec<ChunkId> {
    assert!(first_block <= last_block);
    let tops = layout.list_tops().unwrap_or_default();
    let mut out = Vec::new();

    for (i, &top) in tops.iter().enumerate() {
        if last_block < top {
            break;
        }
        if let Some(&next_top) = tops.get(i + 1) {
            if next_top < first_block {
                continue;
            }
        }
        for (beg, end, hash) in layout.list_top_ranges(top).unwrap_or_default() {
            if last_block < beg {
                return out;
            }
            if first_block > end {
                continue;
            }
            out.push(ChunkId::new(beg, end, hash, top));
        }
    }
    out
}

/// List chunks overlapping `[first_block, last_block]`, descending — used by
/// the writer and the state manager to find the current tail chunk quickly
/// without scanning the whole layout.
pub fn get_chunks_reversed(layout: &dyn Layout, first_block: u64, last_block: u64) -> Vec<ChunkId> {
    assert!(first_block <= last_block);
    let tops = layout.list_tops().unwrap_or_default();
    let mut out = Vec::new();

    for &top in tops.iter().rev() {
        if top > last_block {
            continue;
        }
        for (beg, end, hash) in layout.list_top_ranges(top).unwrap_or_default().into_iter().rev() {
            if beg > last_block {
                continue;
            }
            if end < first_block {
                return out;
            }
            out.push(ChunkId::new(beg, end, hash, top));
        }
    }
    out
}

/// Errors raised when a [`ChunkWriter`] detects that another writer already
/// controls part of its assigned range.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum LayoutConflictError {
    /// The first chunk present doesn't start at the writer's assigned
    /// `first_block`.
    #[snafu(display(
        "first chunk of the range {first_block}-{last_block} is {found}; \
         perhaps part of this range is controlled by another writer"
    ))]
    RangeAlreadyStarted {
        first_block: u64,
        last_block: u64,
        found: String,
    },

    /// The last chunk present extends past the writer's assigned
    /// `last_block`.
    #[snafu(display(
        "chunk {found} is not aligned with the range {first_block}-{last_block}; \
         perhaps part of this range is controlled by another writer"
    ))]
    RangeMisaligned {
        first_block: u64,
        last_block: u64,
        found: String,
    },
}

/// The append-only chunk writer state machine: tracks
/// where the next chunk should be appended (which top directory, which
/// next block number) and rolls to a fresh top directory once the current
/// one accumulates [`DEFAULT_TOP_DIR_SIZE`] ranges.
#[derive(Debug)]
pub struct ChunkWriter {
    first_block: u64,
    last_block: u64,
    top: u64,
    ranges: Vec<RangeEntry>,
}

impl ChunkWriter {
    /// Open a writer for the half-open range `[first_block, last_block]`,
    /// validating against whatever chunks already exist in `layout`. If the
    /// apparent tail chunk is incomplete (fails `chunk_check`), it is
    /// deleted and the writer resumes from the chunk before it.
    pub fn open(
        layout: &dyn Layout,
        first_block: u64,
        last_block: u64,
        chunk_check: impl Fn(&[String]) -> bool,
    ) -> Result<Self, LayoutConflictError> {
        assert!(last_block >= first_block);

        let forward = get_chunks(layout, first_block, last_block);
        let mut backward = get_chunks_reversed(layout, first_block, last_block);

        if let Some(first_chunk) = forward.first() {
            if first_chunk.first_block != first_block {
                return Err(LayoutConflictError::RangeAlreadyStarted {
                    first_block,
                    last_block,
                    found: first_chunk.to_string(),
                });
            }
        }

        let mut last_chunk = backward.first().cloned();
        if let Some(chunk) = &last_chunk {
            if chunk.last_block > last_block {
                return Err(LayoutConflictError::RangeMisaligned {
                    first_block,
                    last_block,
                    found: chunk.to_string(),
                });
            }
        }

        if let Some(chunk) = &last_chunk {
            let files = layout.list_chunk_files(chunk).unwrap_or_default();
            if !chunk_check(&files) {
                warn!(chunk = %chunk, "deleting incomplete tail chunk");
                let _ = layout.delete_chunk(chunk);
                backward.remove(0);
                last_chunk = backward.first().cloned();
            }
        }

        let (top, ranges) = match &last_chunk {
            Some(chunk) => (chunk.top, layout.list_top_ranges(chunk.top).unwrap_or_default()),
            None => (first_block, Vec::new()),
        };

        Ok(Self {
            first_block,
            last_block,
            top,
            ranges,
        })
    }

    /// The next block number this writer expects to append.
    pub fn next_block(&self) -> u64 {
        match self.ranges.last() {
            Some((_, last, _)) => last + 1,
            None => self.top,
        }
    }

    /// The short hash of the last appended block, if any chunk exists yet.
    pub fn last_hash(&self) -> Option<&ShortHash> {
        self.ranges.last().map(|(_, _, h)| h)
    }

    /// Record a new chunk covering `[first_block, last_block]`, rolling to a
    /// fresh top directory once the current one holds
    /// [`DEFAULT_TOP_DIR_SIZE`] ranges (unless this chunk reaches the
    /// writer's assigned `last_block`, in which case it stays in the
    /// current top to avoid an end-of-range singleton directory).
    pub fn next_chunk(&mut self, first_block: u64, last_block: u64, last_hash: ShortHash) -> ChunkId {
        assert!(self.next_block() <= first_block);
        assert!(first_block <= last_block);
        assert!(last_block <= self.last_block);

        let top = if self.ranges.len() < DEFAULT_TOP_DIR_SIZE || self.last_block == last_block {
            self.top
        } else {
            self.ranges.clear();
            first_block
        };

        self.top = top;
        self.ranges.push((first_block, last_block, last_hash.clone()));
        ChunkId::new(first_block, last_block, last_hash, top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_types::Hash32;

    fn write_chunk(dir: &Path, chunk: &ChunkId) {
        let full = dir.join(chunk.path());
        fs::create_dir_all(&full).unwrap();
        fs::write(full.join("block.parquet"), b"ok").unwrap();
    }

    fn hash(n: u8) -> ShortHash {
        Hash32::new(format!("0x{:02x}{}", n, "0".repeat(62))).short()
    }

    #[test]
    fn empty_layout_has_no_tops_or_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = LocalLayout::new(dir.path());
        assert!(layout.list_tops().unwrap().is_empty());
        assert!(get_chunks(&layout, 0, 100).is_empty());
    }

    #[test]
    fn writer_resumes_after_existing_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let layout = LocalLayout::new(dir.path());
        let c1 = ChunkId::new(0, 9, hash(1), 0);
        write_chunk(dir.path(), &c1);

        let writer = ChunkWriter::open(&layout, 0, 1000, |files| !files.is_empty()).unwrap();
        assert_eq!(writer.next_block(), 10);
        assert_eq!(writer.last_hash(), Some(&hash(1)));
    }

    #[test]
    fn writer_deletes_incomplete_tail_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let layout = LocalLayout::new(dir.path());
        let c1 = ChunkId::new(0, 9, hash(1), 0);
        let c2 = ChunkId::new(10, 19, hash(2), 0);
        write_chunk(dir.path(), &c1);
        write_chunk(dir.path(), &c2);

        // treat c2 as incomplete regardless of its contents
        let writer = ChunkWriter::open(&layout, 0, 1000, |_files| false).unwrap();
        assert_eq!(writer.next_block(), 10);
        assert!(!dir.path().join(c2.path()).exists());
    }

    #[test]
    fn next_chunk_rolls_top_after_budget() {
        let dir = tempfile::tempdir().unwrap();
        let layout = LocalLayout::new(dir.path());
        let mut writer = ChunkWriter::open(&layout, 0, u64::MAX / 2, |_| true).unwrap();

        let mut last_top = 0;
        for i in 0..(DEFAULT_TOP_DIR_SIZE as u64 + 1) {
            let chunk = writer.next_chunk(i * 10, i * 10 + 9, hash((i % 250) as u8));
            last_top = chunk.top;
        }
        assert_eq!(last_top, DEFAULT_TOP_DIR_SIZE as u64 * 10);
    }

    #[test]
    fn rejects_writer_whose_range_already_started() {
        let dir = tempfile::tempdir().unwrap();
        let layout = LocalLayout::new(dir.path());
        let c1 = ChunkId::new(0, 9, hash(1), 0);
        write_chunk(dir.path(), &c1);

        let err = ChunkWriter::open(&layout, 0, 9, |_| true);
        assert!(err.is_ok(), "exact alignment should open cleanly");

        let err = ChunkWriter::open(&layout, 5, 100, |_| true);
        assert!(matches!(err, Err(LayoutConflictError::RangeAlreadyStarted { .. })));
    }
}
