//! Chunk writer: wraps [`layout::ChunkWriter`]'s
//! next-block/next-chunk bookkeeping with the atomic publish mechanism from
//! [`publish`] and the Parquet encoding parameters from [`encode`].

#![warn(missing_debug_implementations, missing_docs)]

pub mod batch;
pub mod encode;
pub mod publish;

use chain_time::TimeProvider;
use chain_types::ShortHash;
use layout::{ChunkWriter as LayoutChunkWriter, Layout, LayoutConflictError};
use publish::{PublishError, StagedChunk};
use std::path::Path;

/// One table's encoded bytes, ready to stage under a chunk directory.
#[derive(Debug)]
pub struct EncodedTable {
    /// File name within the chunk directory, e.g. `"blocks.parquet"`.
    pub file_name: &'static str,
    /// Parquet-encoded bytes.
    pub bytes: Vec<u8>,
}

/// Drives one ingest pipeline's append-only sequence of chunks: owns the
/// layout bookkeeping and stages + publishes each chunk's files atomically.
#[derive(Debug)]
pub struct ChunkPublisher<'a> {
    root: &'a Path,
    writer: LayoutChunkWriter,
}

impl<'a> ChunkPublisher<'a> {
    /// Open a publisher for `[first_block, last_block]` against an existing
    /// layout, validating against any chunks already on disk.
    pub fn open(
        layout: &dyn Layout,
        root: &'a Path,
        first_block: u64,
        last_block: u64,
        chunk_check: impl Fn(&[String]) -> bool,
    ) -> Result<Self, LayoutConflictError> {
        let writer = LayoutChunkWriter::open(layout, first_block, last_block, chunk_check)?;
        Ok(Self { root, writer })
    }

    /// The next block number this publisher expects to append.
    pub fn next_block(&self) -> u64 {
        self.writer.next_block()
    }

    /// The short hash of the last published block, if any.
    pub fn last_hash(&self) -> Option<&ShortHash> {
        self.writer.last_hash()
    }

    /// Stage and atomically publish a new chunk covering
    /// `[first_block, last_block]`. `tables` must already be sorted and
    /// Parquet-encoded by the caller (the chunk sink) in the
    /// order the table schemas specify.
    pub fn publish_chunk(
        &mut self,
        first_block: u64,
        last_block: u64,
        last_hash: ShortHash,
        tables: &[EncodedTable],
        time_provider: &dyn TimeProvider,
    ) -> Result<(), PublishError> {
        let chunk = self.writer.next_chunk(first_block, last_block, last_hash);
        let final_dir = self.root.join(chunk.path());

        let staged = StagedChunk::begin(&final_dir, time_provider)?;
        for table in tables {
            staged.write_file(table.file_name, &table.bytes)?;
        }
        staged.publish()?;
        Ok(())
    }
}
