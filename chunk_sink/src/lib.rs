//! Chunk sink: buffers appended blocks, enforces parent-hash
//! chain continuity, and decides when enough data has accumulated to freeze
//! and flush a chunk.

#![warn(missing_debug_implementations, missing_docs)]

use chain_types::{Hash32, ShortHash};
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::debug;
use snafu::Snafu;
use table_builders::{BlockRow, LogRow, StateDiffRow, TableBuilder, TraceRow, TransactionRow};

/// Buffered-byte and flush-count metrics, recorded the same way
/// `LifecycleManager` records `persist_memory_counter`/`persist_size_counter`/
/// `persist_age_counter`: one counter family per concern, with a recorder per
/// table name.
#[derive(Debug)]
struct ChunkSinkMetrics {
    buffered_bytes: Metric<U64Counter>,
    flushed_rows: Metric<U64Counter>,
}

impl ChunkSinkMetrics {
    fn new(registry: &Registry) -> Self {
        Self {
            buffered_bytes: registry.register_metric("chunk_sink_buffered_bytes", "estimated bytes buffered per append, by table"),
            flushed_rows: registry.register_metric("chunk_sink_flushed_rows", "rows handed to a frozen chunk, by table"),
        }
    }

    fn record_append(&self, table: &'static str, bytes: usize) {
        self.buffered_bytes.recorder(vec![("table", table.to_string())]).inc(bytes as u64);
    }

    fn record_flush(&self, table: &'static str, rows: usize) {
        self.flushed_rows.recorder(vec![("table", table.to_string())]).inc(rows as u64);
    }
}

/// A broken parent-hash chain: the next block's `parent_hash` doesn't match
/// the short hash of the previously-buffered block.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(display("broken chain: block {block_hash} is not a direct child of {expected_parent}"))]
pub struct ChainContinuityError {
    block_hash: String,
    expected_parent: String,
}

/// One fully-decoded block plus its transactions, logs, traces, and state
/// diffs, ready to append to the sink.
#[derive(Debug, Clone)]
pub struct IngestedBlock {
    /// The block row itself (its `hash`/`parent_hash` fields drive the
    /// continuity check).
    pub block: BlockRow,
    /// Transactions included in the block.
    pub transactions: Vec<TransactionRow>,
    /// Logs emitted in the block (from receipts or a bulk `eth_getLogs`
    /// call, already flattened by the ingest loop).
    pub logs: Vec<LogRow>,
    /// Call traces for the block, when trace fetching is enabled.
    pub traces: Vec<TraceRow>,
    /// State diffs for the block, when state-diff fetching is enabled.
    pub state_diffs: Vec<StateDiffRow>,
}

/// Buffers appended blocks across one or more chunks, accumulating table
/// rows and tracking buffered byte size for the chunk writer's flush
/// trigger.
#[derive(Debug)]
pub struct ChunkSink {
    blocks: table_builders::BlockTableBuilder,
    transactions: table_builders::TransactionTableBuilder,
    logs: table_builders::LogTableBuilder,
    traces: table_builders::TraceTableBuilder,
    state_diffs: table_builders::StateDiffTableBuilder,
    last_hash: Option<ShortHash>,
    registry: Registry,
    metrics: ChunkSinkMetrics,
}

/// The frozen, row-ordered contents of one chunk, ready for Parquet
/// encoding. Transactions are sorted by `(sighash, to, from, block_number,
/// transaction_index)` and logs by `(topic0, address, block_number,
/// log_index)`, matching `schema::TableSchema`'s declared sort keys.
#[derive(Debug)]
pub struct FrozenChunk {
    /// First block number in the chunk.
    pub first_block: u64,
    /// Last block number in the chunk.
    pub last_block: u64,
    /// Short hash of the chunk's last block.
    pub last_hash: ShortHash,
    /// Block rows, already sorted by block number (insertion order).
    pub blocks: table_builders::BlockTableBuilder,
    /// Transaction rows, sorted by `(sighash, to, from, block_number, transaction_index)`.
    pub transactions: table_builders::TransactionTableBuilder,
    /// Log rows, sorted by `(topic0, address, block_number, log_index)`.
    pub logs: table_builders::LogTableBuilder,
    /// Trace rows, in insertion (block) order.
    pub traces: table_builders::TraceTableBuilder,
    /// State-diff rows, in insertion (block) order.
    pub state_diffs: table_builders::StateDiffTableBuilder,
}

impl ChunkSink {
    /// An empty sink, optionally resuming chain-continuity checks from a
    /// previously-published chunk's last hash.
    pub fn new(resume_from: Option<ShortHash>) -> Self {
        let registry = Registry::new();
        let metrics = ChunkSinkMetrics::new(&registry);
        Self {
            blocks: Default::default(),
            transactions: Default::default(),
            logs: Default::default(),
            traces: Default::default(),
            state_diffs: Default::default(),
            last_hash: resume_from,
            registry,
            metrics,
        }
    }

    /// The sink's private metric registry, for callers that want to report
    /// registered metric names (e.g. at startup logging).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Append one block's worth of rows, enforcing that it is a direct
    /// child of the last-appended block.
    pub fn append(&mut self, block: IngestedBlock) -> Result<(), ChainContinuityError> {
        let block_hash = Hash32::new(block.block.hash.clone()).short();
        let parent_hash = Hash32::new(block.block.parent_hash.clone()).short();

        if let Some(expected) = &self.last_hash {
            if *expected != parent_hash {
                return Err(ChainContinuityError {
                    block_hash: block_hash.as_str().to_string(),
                    expected_parent: expected.as_str().to_string(),
                });
            }
        }

        let number = block.block.number;
        self.blocks.append(&block.block);
        self.metrics.record_append("block", self.blocks.buffered_bytes());
        for tx in &block.transactions {
            self.transactions.append(tx);
        }
        for log in &block.logs {
            self.logs.append(log);
        }
        for trace in &block.traces {
            self.traces.append(trace);
        }
        for state_diff in &block.state_diffs {
            self.state_diffs.append(state_diff);
        }
        self.metrics.record_append("transaction", self.transactions.buffered_bytes());
        self.metrics.record_append("log", self.logs.buffered_bytes());
        self.metrics.record_append("trace", self.traces.buffered_bytes());
        self.metrics.record_append("state_diff", self.state_diffs.buffered_bytes());
        self.last_hash = Some(block_hash);
        debug!(number, "appended block to chunk sink");
        Ok(())
    }

    /// Total estimated buffered bytes across all tables, the input to the
    /// chunk writer's flush-size trigger.
    pub fn buffered_bytes(&self) -> usize {
        self.blocks.buffered_bytes()
            + self.transactions.buffered_bytes()
            + self.logs.buffered_bytes()
            + self.traces.buffered_bytes()
            + self.state_diffs.buffered_bytes()
    }

    /// Number of blocks buffered so far.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Whether nothing has been buffered yet.
    pub fn is_empty(&self) -> bool {
        self.block_count() == 0
    }

    /// Freeze the buffered rows into a [`FrozenChunk`], resetting the sink
    /// for the next chunk (continuity state carries over).
    pub fn freeze(&mut self, first_block: u64, last_block: u64) -> FrozenChunk {
        let last_hash = self.last_hash.clone().expect("freeze called on an empty sink");

        let mut transactions = std::mem::take(&mut self.transactions);
        sort_transactions(&mut transactions);

        let mut logs = std::mem::take(&mut self.logs);
        sort_logs(&mut logs);

        let blocks = std::mem::take(&mut self.blocks);
        let traces = std::mem::take(&mut self.traces);
        let state_diffs = std::mem::take(&mut self.state_diffs);

        self.metrics.record_flush("block", blocks.len());
        self.metrics.record_flush("transaction", transactions.len());
        self.metrics.record_flush("log", logs.len());
        self.metrics.record_flush("trace", traces.len());
        self.metrics.record_flush("state_diff", state_diffs.len());

        FrozenChunk {
            first_block,
            last_block,
            last_hash,
            blocks,
            transactions,
            logs,
            traces,
            state_diffs,
        }
    }
}

/// The default flush-size threshold, in bytes: once a sink's
/// [`ChunkSink::buffered_bytes`] exceeds this, the ingest loop should freeze
/// and publish a chunk rather than keep accumulating rows in memory.
pub const DEFAULT_FLUSH_THRESHOLD_BYTES: usize = 20 * 1024 * 1024;

/// Whether a sink has accumulated enough data to flush, given a byte
/// threshold.
pub fn should_flush(sink: &ChunkSink, threshold_bytes: usize) -> bool {
    !sink.is_empty() && sink.buffered_bytes() >= threshold_bytes
}

/// Sorts a frozen transaction table by `(sighash, to, from, block_number,
/// transaction_index)`, matching `schema::TableSchema::transaction().sort_key`.
fn sort_transactions(builder: &mut table_builders::TransactionTableBuilder) {
    let sighash = builder.sighash.freeze();
    let to = builder.to.freeze();
    let from = builder.from.freeze();
    let block_number = builder.block_number.freeze();
    let transaction_index = builder.transaction_index.freeze();

    let len = sighash.len();
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&i, &j| {
        (
            sighash[i].as_deref(),
            to[i].as_deref(),
            &from[i],
            block_number[i],
            transaction_index[i],
        )
            .cmp(&(
                sighash[j].as_deref(),
                to[j].as_deref(),
                &from[j],
                block_number[j],
                transaction_index[j],
            ))
    });

    macro_rules! permute_opt {
        ($col:expr, $values:expr) => {{
            for &idx in &order {
                $col.append_opt($values[idx].clone());
            }
        }};
    }
    macro_rules! permute {
        ($col:expr, $values:expr) => {{
            for &idx in &order {
                $col.append($values[idx].clone());
            }
        }};
    }

    let hash = builder.hash.freeze();
    let gas = builder.gas.freeze();
    let gas_price = builder.gas_price.freeze();
    let max_fee_per_gas = builder.max_fee_per_gas.freeze();
    let max_priority_fee_per_gas = builder.max_priority_fee_per_gas.freeze();
    let input = builder.input.freeze();
    let nonce = builder.nonce.freeze();
    let value = builder.value.freeze();
    let v = builder.v.freeze();
    let r = builder.r.freeze();
    let s = builder.s.freeze();
    let y_parity = builder.y_parity.freeze();
    let chain_id = builder.chain_id.freeze();
    let gas_used = builder.gas_used.freeze();
    let cumulative_gas_used = builder.cumulative_gas_used.freeze();
    let effective_gas_price = builder.effective_gas_price.freeze();
    let tx_type = builder.tx_type.freeze();
    let status = builder.status.freeze();

    permute_opt!(builder.sighash, sighash);
    permute_opt!(builder.to, to);
    permute!(builder.from, from);
    permute!(builder.block_number, block_number);
    permute!(builder.transaction_index, transaction_index);
    permute!(builder.hash, hash);
    permute!(builder.gas, gas);
    permute_opt!(builder.gas_price, gas_price);
    permute_opt!(builder.max_fee_per_gas, max_fee_per_gas);
    permute_opt!(builder.max_priority_fee_per_gas, max_priority_fee_per_gas);
    permute!(builder.input, input);
    permute!(builder.nonce, nonce);
    permute!(builder.value, value);
    permute_opt!(builder.v, v);
    permute_opt!(builder.r, r);
    permute_opt!(builder.s, s);
    permute_opt!(builder.y_parity, y_parity);
    permute_opt!(builder.chain_id, chain_id);
    permute_opt!(builder.gas_used, gas_used);
    permute_opt!(builder.cumulative_gas_used, cumulative_gas_used);
    permute_opt!(builder.effective_gas_price, effective_gas_price);
    permute_opt!(builder.tx_type, tx_type);
    permute_opt!(builder.status, status);
}

/// Sorts a frozen log table by `(topic0, address, block_number, log_index)`,
/// matching `schema::TableSchema::log().sort_key`.
fn sort_logs(builder: &mut table_builders::LogTableBuilder) {
    let topic0 = builder.topic0.freeze();
    let address = builder.address.freeze();
    let block_number = builder.block_number.freeze();
    let log_index = builder.log_index.freeze();

    let len = topic0.len();
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by(|&i, &j| {
        (topic0[i].as_deref(), &address[i], block_number[i], log_index[i])
            .cmp(&(topic0[j].as_deref(), &address[j], block_number[j], log_index[j]))
    });

    macro_rules! permute_opt {
        ($col:expr, $values:expr) => {{
            for &idx in &order {
                $col.append_opt($values[idx].clone());
            }
        }};
    }
    macro_rules! permute {
        ($col:expr, $values:expr) => {{
            for &idx in &order {
                $col.append($values[idx].clone());
            }
        }};
    }

    let transaction_index = builder.transaction_index.freeze();
    let transaction_hash = builder.transaction_hash.freeze();
    let data = builder.data.freeze();
    let topic1 = builder.topic1.freeze();
    let topic2 = builder.topic2.freeze();
    let topic3 = builder.topic3.freeze();

    permute_opt!(builder.topic0, topic0);
    permute!(builder.address, address);
    permute!(builder.block_number, block_number);
    permute!(builder.log_index, log_index);
    permute!(builder.transaction_index, transaction_index);
    permute!(builder.transaction_hash, transaction_hash);
    permute!(builder.data, data);
    permute_opt!(builder.topic1, topic1);
    permute_opt!(builder.topic2, topic2);
    permute_opt!(builder.topic3, topic3);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent_hash: &str) -> IngestedBlock {
        IngestedBlock {
            block: BlockRow {
                number,
                hash: hash.into(),
                parent_hash: parent_hash.into(),
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
                timestamp: 0,
                base_fee_per_gas: None,
            },
            transactions: vec![],
            logs: vec![],
            traces: vec![],
            state_diffs: vec![],
        }
    }

    fn full_hash(byte: u8) -> String {
        format!("0x{:02x}{}", byte, "0".repeat(62))
    }

    #[test]
    fn accepts_direct_child_blocks() {
        let mut sink = ChunkSink::new(None);
        sink.append(block(1, &full_hash(1), &full_hash(0))).unwrap();
        sink.append(block(2, &full_hash(2), &full_hash(1))).unwrap();
        assert_eq!(sink.block_count(), 2);
    }

    #[test]
    fn rejects_broken_chain() {
        let mut sink = ChunkSink::new(None);
        sink.append(block(1, &full_hash(1), &full_hash(0))).unwrap();
        let err = sink.append(block(2, &full_hash(2), &full_hash(99))).unwrap_err();
        assert_eq!(err.block_hash, Hash32::new(full_hash(2)).short().as_str());
    }

    fn tx(transaction_index: u32, sighash_selector: &str, to: &str) -> TransactionRow {
        TransactionRow {
            block_number: 1,
            transaction_index,
            hash: format!("0x{transaction_index}"),
            from: "0xfrom".into(),
            to: Some(to.into()),
            gas: "0x1".into(),
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: format!("{sighash_selector}0000000000000000000000000000000000000000000000000000"),
            nonce: 0,
            value: "0x0".into(),
            v: None,
            r: None,
            s: None,
            y_parity: None,
            chain_id: None,
            gas_used: None,
            cumulative_gas_used: None,
            effective_gas_price: None,
            tx_type: None,
            status: None,
        }
    }

    #[test]
    fn freeze_sorts_transactions_by_sighash_then_to() {
        let mut sink = ChunkSink::new(None);
        let mut b = block(1, &full_hash(1), &full_hash(0));
        b.transactions = vec![
            tx(0, "0xbbbbbbbb", "0xaaa"),
            tx(1, "0xaaaaaaaa", "0xzzz"),
            tx(2, "0xaaaaaaaa", "0xaaa"),
        ];
        sink.append(b).unwrap();
        let frozen = sink.freeze(1, 1);
        let mut builder = frozen.transactions;
        assert_eq!(
            builder.sighash.freeze(),
            vec![
                Some("0xaaaaaaaa".to_string()),
                Some("0xaaaaaaaa".to_string()),
                Some("0xbbbbbbbb".to_string()),
            ]
        );
        assert_eq!(
            builder.to.freeze(),
            vec![Some("0xaaa".to_string()), Some("0xzzz".to_string()), Some("0xaaa".to_string())]
        );
    }

    #[test]
    fn should_flush_respects_threshold() {
        let sink = ChunkSink::new(None);
        assert!(!should_flush(&sink, 1));
    }
}
