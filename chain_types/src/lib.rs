//! Shared value types used across the archive workspace: block/chunk
//! identifiers, range-set algebra, the dataset wire encoding, and the
//! declarative query request shape.
#![warn(missing_debug_implementations, missing_docs)]

pub mod chunk;
pub mod dataset;
pub mod hash;
pub mod query;
pub mod range;

pub use chunk::{ChunkId, DEFAULT_TOP_DIR_SIZE};
pub use dataset::{dataset_decode, dataset_encode, DatasetDecodeError};
pub use hash::{short_hash, Hash32, ShortHash};
pub use query::{ArchiveQuery, Chain};
pub use range::{Range, RangeSet};
