//! The ingest loop: schedules overlapping block-range "strides"
//! against the chain, waits for the chain head to advance when it runs dry,
//! and hands completed strides back to the caller in block order even
//! though several strides fetch concurrently.

#![warn(missing_debug_implementations, missing_docs)]

use async_trait::async_trait;
use chain_time::TimeProvider;
use chunk_sink::IngestedBlock;
use observability_deps::tracing::{debug, info};
use snafu::Snafu;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Errors a [`ChainSource`] can raise while fetching chain data.
#[derive(Debug, Snafu)]
pub enum IngestError {
    /// The upstream RPC pool failed to serve a request.
    #[snafu(display("failed to fetch blocks {from_block}-{to_block}: {message}"))]
    Fetch {
        from_block: u64,
        to_block: u64,
        message: String,
    },

    /// Two consecutively-fetched blocks don't chain together.
    #[snafu(display("{source}"))]
    Continuity { source: chunk_sink::ChainContinuityError },

    /// A spawned stride task panicked or was cancelled.
    #[snafu(display("stride fetch task failed: {source}"))]
    Join { source: tokio::task::JoinError },

    /// An upstream RPC response field couldn't be decoded into its column
    /// type.
    #[snafu(display("failed to decode chain data: {message}"))]
    Decode { message: String },
}

/// The chain-data source the ingest loop drives: an RPC-backed
/// implementation lives in the binary crate, parameterized per target chain
/// (EVM, substrate, ...), so this loop stays chain-agnostic.
#[async_trait]
pub trait ChainSource: Send + Sync + 'static {
    /// The current chain head's block number.
    async fn chain_height(&self) -> Result<u64, IngestError>;

    /// Fetch every block in `[from_block, to_block]`, inclusive, in order.
    async fn fetch_stride(&self, from_block: u64, to_block: u64) -> Result<Vec<IngestedBlock>, IngestError>;
}

/// Ingest loop configuration, mirroring `Ingest.__init__`'s keyword
/// arguments.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// First block to ingest.
    pub from_block: u64,
    /// Last block to ingest, inclusive. `None` means "run forever".
    pub to_block: Option<u64>,
    /// Blocks to stay behind the chain head, so reorgs don't invalidate
    /// already-fetched data.
    pub finality_offset: u64,
    /// Blocks requested per stride.
    pub stride_size: u64,
    /// Max number of in-flight strides.
    pub max_strides: usize,
    /// Fetch transaction receipts, filling in the transaction table's
    /// receipt-derived columns (`gas_used`, `status`, ...).
    pub with_receipts: bool,
    /// Fetch call traces and populate the trace table.
    pub with_traces: bool,
    /// Fetch state diffs and populate the state-diff table.
    pub with_statediffs: bool,
    /// Use `trace_block` instead of `debug_traceBlockByNumber` to fetch
    /// traces.
    pub use_trace_api: bool,
    /// Use `debug_traceBlockByNumber` with a `prestateTracer` (instead of
    /// `trace_replayBlockTransactions`) to fetch state diffs.
    pub use_debug_api_for_statediffs: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            from_block: 0,
            to_block: None,
            finality_offset: 10,
            stride_size: 20,
            max_strides: 10,
            with_receipts: false,
            with_traces: false,
            with_statediffs: false,
            use_trace_api: false,
            use_debug_api_for_statediffs: false,
        }
    }
}

/// Drives the overlapping-stride scheduling state machine.
pub struct IngestLoop {
    source: std::sync::Arc<dyn ChainSource>,
    config: IngestConfig,
    height: i128,
    chain_height: u64,
    strides: VecDeque<JoinHandle<Result<Vec<IngestedBlock>, IngestError>>>,
}

impl std::fmt::Debug for IngestLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestLoop")
            .field("config", &self.config)
            .field("height", &self.height)
            .field("chain_height", &self.chain_height)
            .field("in_flight_strides", &self.strides.len())
            .finish()
    }
}

impl IngestLoop {
    /// Start a loop over `source` with the given configuration.
    pub fn new(source: std::sync::Arc<dyn ChainSource>, config: IngestConfig) -> Self {
        let height = config.from_block as i128 - 1;
        Self {
            source,
            config,
            height,
            chain_height: 0,
            strides: VecDeque::new(),
        }
    }

    fn dist(&self) -> i128 {
        self.chain_height as i128 - self.height
    }

    fn is_finished(&self) -> bool {
        match self.config.to_block {
            None => false,
            Some(to_block) => self.height >= to_block as i128,
        }
    }

    /// Schedule as many strides as the configured pipeline depth allows,
    /// spawning one task per stride. Mirrors `_schedule_strides`.
    fn schedule_strides(&mut self) {
        while self.strides.len() < self.config.max_strides.max(1) && !self.is_finished() && self.dist() > 0 {
            let from_block = (self.height + 1) as u64;
            let mut stride_size = self.config.stride_size.min(self.dist() as u64);
            if let Some(to_block) = self.config.to_block {
                stride_size = stride_size.min(to_block - self.height as u64);
            }
            let to_block = self.height as u64 + stride_size;

            let source = self.source.clone();
            let handle = tokio::spawn(async move { source.fetch_stride(from_block, to_block).await });
            self.strides.push_back(handle);
            self.height = to_block as i128;
        }
    }

    /// Wait until the chain head has advanced far enough to fill a whole
    /// stride (or the run is about to finish), polling `chain_height` on a
    /// fixed interval. Mirrors `_wait_chain`.
    async fn wait_chain(&mut self, time_provider: &dyn TimeProvider, poll_interval: Duration) -> Result<(), IngestError> {
        let mut stride_size = self.config.stride_size as i128;
        if let Some(to_block) = self.config.to_block {
            stride_size = stride_size.min(to_block as i128 - self.height);
        }

        while self.dist() < stride_size {
            let height = self.source.chain_height().await?;
            debug!(height, "polled chain height");
            self.chain_height = height;
            if self.dist() >= stride_size || self.is_finished() {
                break;
            }
            time_provider.sleep(poll_interval).await;
        }
        Ok(())
    }

    /// Produce the next completed stride's blocks, in order, or `None` once
    /// every block up to `to_block` has been delivered. Mirrors the
    /// `loop()` async generator.
    pub async fn next(&mut self, time_provider: &dyn TimeProvider, poll_interval: Duration) -> Result<Option<Vec<IngestedBlock>>, IngestError> {
        loop {
            if self.is_finished() && self.strides.is_empty() {
                return Ok(None);
            }

            match self.strides.pop_front() {
                None => {
                    self.wait_chain(time_provider, poll_interval).await?;
                    self.schedule_strides();
                }
                Some(handle) => {
                    let blocks = handle.await.context_join()?;
                    let blocks = blocks?;
                    self.schedule_strides();
                    info!(count = blocks.len(), "stride ingested");
                    return Ok(Some(blocks));
                }
            }
        }
    }
}

trait JoinResultExt<T> {
    fn context_join(self) -> Result<T, IngestError>;
}

impl<T> JoinResultExt<T> for Result<T, tokio::task::JoinError> {
    fn context_join(self) -> Result<T, IngestError> {
        self.map_err(|source| IngestError::Join { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_time::{SystemProvider, Time};
    use chunk_sink::IngestedBlock;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use table_builders::BlockRow;

    struct FakeSource {
        height: AtomicU64,
    }

    fn block_row(number: u64) -> BlockRow {
        BlockRow {
            number,
            hash: format!("0x{number:064x}"),
            parent_hash: format!("0x{:064x}", number.saturating_sub(1)),
            nonce: None,
            sha3_uncles: "0x".into(),
            logs_bloom: "0x".into(),
            transactions_root: "0x".into(),
            state_root: "0x".into(),
            receipts_root: "0x".into(),
            mix_hash: None,
            miner: "0xminer".into(),
            difficulty: None,
            total_difficulty: None,
            extra_data: "0x".into(),
            size: 1,
            gas_limit: "0x1".into(),
            gas_used: "0x1".into(),
            timestamp: number,
            base_fee_per_gas: None,
        }
    }

    #[async_trait]
    impl ChainSource for FakeSource {
        async fn chain_height(&self) -> Result<u64, IngestError> {
            Ok(self.height.load(Ordering::SeqCst))
        }

        async fn fetch_stride(&self, from_block: u64, to_block: u64) -> Result<Vec<IngestedBlock>, IngestError> {
            Ok((from_block..=to_block)
                .map(|n| IngestedBlock {
                    block: block_row(n),
                    transactions: vec![],
                    logs: vec![],
                    traces: vec![],
                    state_diffs: vec![],
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn delivers_full_range_in_order() {
        let source = Arc::new(FakeSource {
            height: AtomicU64::new(45),
        });
        let config = IngestConfig {
            from_block: 0,
            to_block: Some(44),
            finality_offset: 0,
            stride_size: 20,
            max_strides: 10,
            ..IngestConfig::default()
        };
        let mut loop_ = IngestLoop::new(source, config);

        let mut seen = Vec::new();
        while let Some(blocks) = loop_.next(&SystemProvider, Duration::from_millis(1)).await.unwrap() {
            seen.extend(blocks.into_iter().map(|b| b.block.number));
        }
        assert_eq!(seen, (0..=44).collect::<Vec<_>>());
    }

    #[test]
    fn dist_and_is_finished() {
        let source = Arc::new(FakeSource {
            height: AtomicU64::new(0),
        });
        let config = IngestConfig {
            from_block: 10,
            to_block: Some(20),
            ..IngestConfig::default()
        };
        let mut loop_ = IngestLoop::new(source, config);
        loop_.chain_height = 15;
        assert_eq!(loop_.dist(), 6);
        assert!(!loop_.is_finished());
        loop_.height = 20;
        assert!(loop_.is_finished());
    }
}
