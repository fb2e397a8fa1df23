//! A "meta" crate that re-exports the tracing/logging crates used throughout
//! the archive workspace, so every crate pulls the same versions and the set
//! can be swapped in one place.

pub use tracing;
