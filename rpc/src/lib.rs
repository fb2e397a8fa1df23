//! RPC transport and client for fetching chain data.
//!
//! [`transport`] carries per-endpoint capacity/RPS budgeting, response-time
//! tracking, and offline backoff. [`client`] layers a priority-ordered
//! JSON-RPC batch scheduler on top.

#![warn(missing_debug_implementations, missing_docs)]

pub mod client;
pub mod transport;

pub use client::{RpcClient, RpcError, RpcRequest};
pub use transport::{Endpoint, EndpointConfig, EndpointMetrics};
