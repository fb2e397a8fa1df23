//! Query plan compiler: turns a validated
//! [`chain_types::query::ArchiveQuery`] into per-scan pushdown predicates and
//! per-item selection/weight descriptors the query executor runs against
//! each chunk directory, via an explicit Table/Scan/Item/Source model so
//! adding a chain means adding a [`model::Model`], not branching on chain
//! name in the compiler.

#![warn(missing_debug_implementations, missing_docs)]

pub mod compile;
pub mod model;

pub use compile::{compile, CompiledItem, CompiledScan, QueryPlan};
pub use model::{eth_model, Item, Model, Scan, Source};
