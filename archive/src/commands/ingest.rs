//! `archive ingest`: drives [`ingest::IngestLoop`] against a JSON-RPC EVM
//! endpoint, buffers the result in a [`chunk_sink::ChunkSink`], and flushes
//! frozen chunks through [`chunk_writer::ChunkPublisher`] onto the local
//! chunk layout.

use archive_config::{BackoffConfig, IngestConfig, RpcConfig, SinkConfig};
use async_trait::async_trait;
use chain_time::SystemProvider;
use chunk_sink::{ChunkSink, IngestedBlock};
use ingest::{ChainSource, IngestError, IngestLoop};
use observability_deps::tracing::info;
use rpc::{RpcClient, RpcError};
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use table_builders::{BlockRow, LogRow, StateDiffRow, TraceRow, TransactionRow};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("ingest loop failed: {source}"))]
    Loop { source: IngestError },

    #[snafu(display("chain continuity violated: {source}"))]
    Continuity { source: chunk_sink::ChainContinuityError },

    #[snafu(display("failed to open chunk writer: {source}"))]
    OpenWriter { source: layout::LayoutConflictError },

    #[snafu(display("failed to encode chunk: {source}"))]
    Encode { source: chunk_writer::encode::EncodeError },

    #[snafu(display("failed to publish chunk: {source}"))]
    Publish { source: chunk_writer::publish::PublishError },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, clap::Parser)]
pub struct Config {
    #[clap(flatten)]
    rpc_config: RpcConfig,

    #[clap(flatten)]
    ingest_config: IngestConfig,

    #[clap(flatten)]
    sink_config: SinkConfig,

    #[clap(flatten)]
    backoff_config: BackoffConfig,
}

/// Fetches blocks (with full transaction objects), logs, and (depending on
/// `ingest::IngestConfig`'s flags) receipts/traces/state-diffs over
/// JSON-RPC: the `ChainSource` the binary plugs into the chain-agnostic
/// ingest loop.
struct EvmRpcSource {
    client: RpcClient,
    backoff_config: backoff::BackoffConfig,
    ingest_config: ingest::IngestConfig,
}

fn to_hex(n: u64) -> String {
    format!("0x{n:x}")
}

fn decode_error(value: &Value, field: &str, source: table_builders::QuantityError) -> IngestError {
    IngestError::Decode {
        message: format!("field {field:?} in {value}: {source}"),
    }
}

fn qty_opt(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn qty_u64(value: &Value, field: &str) -> std::result::Result<u64, IngestError> {
    let raw = value.get(field).and_then(Value::as_str).ok_or_else(|| IngestError::Decode {
        message: format!("missing or malformed quantity field {field:?} in {value}"),
    })?;
    table_builders::qty2int(raw).map_err(|source| decode_error(value, field, source))
}

fn qty_i8(value: &Value, field: &str) -> std::result::Result<Option<i8>, IngestError> {
    match value.get(field).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => table_builders::qty2int(raw)
            .map(|n| Some(n as i8))
            .map_err(|source| decode_error(value, field, source)),
    }
}

fn qty_i32(value: &Value, field: &str) -> std::result::Result<Option<i32>, IngestError> {
    match value.get(field).and_then(Value::as_str) {
        None => Ok(None),
        Some(raw) => table_builders::qty2int(raw)
            .map(|n| Some(n as i32))
            .map_err(|source| decode_error(value, field, source)),
    }
}

fn str_field(value: &Value, field: &str) -> std::result::Result<String, IngestError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| IngestError::Decode {
            message: format!("missing string field {field:?} in {value}"),
        })
}

fn block_row(raw: &Value) -> std::result::Result<BlockRow, IngestError> {
    Ok(BlockRow {
        number: qty_u64(raw, "number")?,
        hash: str_field(raw, "hash")?,
        parent_hash: str_field(raw, "parentHash")?,
        nonce: qty_opt(raw, "nonce"),
        sha3_uncles: str_field(raw, "sha3Uncles")?,
        logs_bloom: str_field(raw, "logsBloom")?,
        transactions_root: str_field(raw, "transactionsRoot")?,
        state_root: str_field(raw, "stateRoot")?,
        receipts_root: str_field(raw, "receiptsRoot")?,
        mix_hash: qty_opt(raw, "mixHash"),
        miner: str_field(raw, "miner")?,
        difficulty: qty_opt(raw, "difficulty"),
        total_difficulty: qty_opt(raw, "totalDifficulty"),
        extra_data: str_field(raw, "extraData")?,
        size: qty_u64(raw, "size")? as u32,
        gas_limit: str_field(raw, "gasLimit")?,
        gas_used: str_field(raw, "gasUsed")?,
        timestamp: qty_u64(raw, "timestamp")?,
        base_fee_per_gas: qty_opt(raw, "baseFeePerGas"),
    })
}

/// Builds one transaction row. `receipt`, when present, fills in the
/// receipt-derived columns (`gasUsed`, `cumulativeGasUsed`,
/// `effectiveGasPrice`, `status`); absent receipts leave them null, same as
/// a chain with no receipt fetch enabled.
fn transaction_row(raw: &Value, block_number: u64, receipt: Option<&Value>) -> std::result::Result<TransactionRow, IngestError> {
    let (gas_used, cumulative_gas_used, effective_gas_price, status) = match receipt {
        Some(r) => (
            qty_opt(r, "gasUsed"),
            qty_opt(r, "cumulativeGasUsed"),
            qty_opt(r, "effectiveGasPrice"),
            qty_i8(r, "status")?,
        ),
        None => (None, None, None, None),
    };

    Ok(TransactionRow {
        block_number,
        transaction_index: qty_u64(raw, "transactionIndex")? as u32,
        hash: str_field(raw, "hash")?,
        from: str_field(raw, "from")?,
        to: qty_opt(raw, "to"),
        gas: str_field(raw, "gas")?,
        gas_price: qty_opt(raw, "gasPrice"),
        max_fee_per_gas: qty_opt(raw, "maxFeePerGas"),
        max_priority_fee_per_gas: qty_opt(raw, "maxPriorityFeePerGas"),
        input: str_field(raw, "input")?,
        nonce: qty_u64(raw, "nonce")?,
        value: str_field(raw, "value")?,
        v: qty_opt(raw, "v"),
        r: qty_opt(raw, "r"),
        s: qty_opt(raw, "s"),
        y_parity: qty_i8(raw, "yParity")?,
        chain_id: qty_i32(raw, "chainId")?,
        gas_used,
        cumulative_gas_used,
        effective_gas_price,
        tx_type: qty_i8(raw, "type")?,
        status,
    })
}

fn log_row(raw: &Value) -> std::result::Result<LogRow, IngestError> {
    Ok(LogRow {
        block_number: qty_u64(raw, "blockNumber")?,
        log_index: qty_u64(raw, "logIndex")? as u32,
        transaction_index: qty_u64(raw, "transactionIndex")? as u32,
        transaction_hash: str_field(raw, "transactionHash")?,
        address: str_field(raw, "address")?,
        data: str_field(raw, "data")?,
        topics: raw
            .get("topics")
            .and_then(Value::as_array)
            .map(|topics| topics.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default(),
    })
}

/// Builds one trace row from a parity-style `trace_block`/
/// `trace_replayBlockTransactions` entry (`{action, result, error,
/// traceAddress, transactionPosition, type}`).
fn trace_row(raw: &Value) -> std::result::Result<TraceRow, IngestError> {
    let kind = str_field(raw, "type")?;
    let action = raw.get("action").cloned().unwrap_or(Value::Null);
    let result = raw.get("result").cloned();
    let transaction_index = raw.get("transactionPosition").and_then(Value::as_u64).map(|n| n as u32);
    let trace_address = raw
        .get("traceAddress")
        .and_then(Value::as_array)
        .map(|addrs| addrs.iter().filter_map(Value::as_u64).map(|n| n.to_string()).collect::<Vec<_>>().join("_"))
        .unwrap_or_default();

    let mut row = TraceRow {
        block_number: 0,
        transaction_index,
        trace_address,
        kind: kind.clone(),
        error: raw.get("error").and_then(Value::as_str).map(str::to_string),
        revert_reason: raw.get("revertReason").and_then(Value::as_str).map(str::to_string),
        call_from: None,
        call_to: None,
        call_value: None,
        call_gas: None,
        call_sighash: None,
        call_type: None,
        call_input: None,
        call_gas_used: None,
        call_output: None,
        create_from: None,
        create_value: None,
        create_gas: None,
        create_init: None,
        create_gas_used: None,
        create_result_address: None,
        create_result_code: None,
        suicide_address: None,
        suicide_refund_address: None,
        suicide_balance: None,
        reward_author: None,
        reward_value: None,
        reward_type: None,
    };

    match kind.as_str() {
        "call" => {
            let input = qty_opt(&action, "input");
            row.call_sighash = input.as_deref().filter(|s| s.len() >= 10).map(|s| s[..10].to_string());
            row.call_from = qty_opt(&action, "from");
            row.call_to = qty_opt(&action, "to");
            row.call_value = qty_opt(&action, "value");
            row.call_gas = qty_opt(&action, "gas");
            row.call_type = qty_opt(&action, "callType");
            row.call_input = input;
            row.call_gas_used = result.as_ref().and_then(|r| qty_opt(r, "gasUsed"));
            row.call_output = result.as_ref().and_then(|r| qty_opt(r, "output"));
        }
        "create" => {
            row.create_from = qty_opt(&action, "from");
            row.create_value = qty_opt(&action, "value");
            row.create_gas = qty_opt(&action, "gas");
            row.create_init = qty_opt(&action, "init");
            row.create_gas_used = result.as_ref().and_then(|r| qty_opt(r, "gasUsed"));
            row.create_result_address = result.as_ref().and_then(|r| qty_opt(r, "address"));
            row.create_result_code = result.as_ref().and_then(|r| qty_opt(r, "code"));
        }
        "suicide" => {
            row.suicide_address = qty_opt(&action, "address");
            row.suicide_refund_address = qty_opt(&action, "refundAddress");
            row.suicide_balance = qty_opt(&action, "balance");
        }
        "reward" => {
            row.reward_author = qty_opt(&action, "author");
            row.reward_value = qty_opt(&action, "value");
            row.reward_type = qty_opt(&action, "rewardType");
        }
        _ => {}
    }

    Ok(row)
}

/// Flattens a `debug_traceBlockByNumber` `callTracer` result tree (nested
/// `calls`) into one [`TraceRow`] per call, `trace_address` built from each
/// node's path from the root.
fn flatten_call_trace(node: &Value, block_number: u64, transaction_index: Option<u32>, path: &mut Vec<usize>, out: &mut Vec<TraceRow>) {
    let input = qty_opt(node, "input");
    let sighash = input.as_deref().filter(|s| s.len() >= 10).map(|s| s[..10].to_string());

    out.push(TraceRow {
        block_number,
        transaction_index,
        trace_address: path.iter().map(|n| n.to_string()).collect::<Vec<_>>().join("_"),
        kind: "call".to_string(),
        error: node.get("error").and_then(Value::as_str).map(str::to_string),
        revert_reason: node.get("revertReason").and_then(Value::as_str).map(str::to_string),
        call_from: qty_opt(node, "from"),
        call_to: qty_opt(node, "to"),
        call_value: qty_opt(node, "value"),
        call_gas: qty_opt(node, "gas"),
        call_sighash: sighash,
        call_type: node.get("type").and_then(Value::as_str).map(str::to_lowercase),
        call_input: input,
        call_gas_used: qty_opt(node, "gasUsed"),
        call_output: qty_opt(node, "output"),
        create_from: None,
        create_value: None,
        create_gas: None,
        create_init: None,
        create_gas_used: None,
        create_result_address: None,
        create_result_code: None,
        suicide_address: None,
        suicide_refund_address: None,
        suicide_balance: None,
        reward_author: None,
        reward_value: None,
        reward_type: None,
    });

    if let Some(calls) = node.get("calls").and_then(Value::as_array) {
        for (i, child) in calls.iter().enumerate() {
            path.push(i);
            flatten_call_trace(child, block_number, transaction_index, path, out);
            path.pop();
        }
    }
}

/// Builds every state-diff row for one address out of a
/// `trace_replayBlockTransactions` `stateDiff` entry:
/// `{"balance"|"nonce"|"code": {"*": {"from","to"}} | {"+": v} | {"-": v} | "="
/// , "storage": {"<slot>": same shape}}`.
fn state_diff_rows(block_number: u64, transaction_index: Option<u32>, address: &str, diff: &Value) -> Vec<StateDiffRow> {
    let mut rows = Vec::new();
    for field in ["balance", "nonce", "code"] {
        if let Some(change) = diff.get(field) {
            if let Some((prev, next)) = diff_change(change) {
                rows.push(StateDiffRow {
                    block_number,
                    transaction_index,
                    address: address.to_string(),
                    key: None,
                    kind: field.to_string(),
                    prev,
                    next,
                });
            }
        }
    }
    if let Some(storage) = diff.get("storage").and_then(Value::as_object) {
        for (slot, change) in storage {
            if let Some((prev, next)) = diff_change(change) {
                rows.push(StateDiffRow {
                    block_number,
                    transaction_index,
                    address: address.to_string(),
                    key: Some(slot.clone()),
                    kind: "storage".to_string(),
                    prev,
                    next,
                });
            }
        }
    }
    rows
}

fn diff_change(change: &Value) -> Option<(Option<String>, Option<String>)> {
    if let Some(pair) = change.get("*") {
        Some((qty_opt(pair, "from"), qty_opt(pair, "to")))
    } else if let Some(value) = change.get("+") {
        Some((None, value.as_str().map(str::to_string)))
    } else if let Some(value) = change.get("-") {
        Some((value.as_str().map(str::to_string), None))
    } else {
        // "=" means unchanged.
        None
    }
}

/// The `debug_traceBlockByNumber` `prestateTracer` (`diffMode: true`)
/// equivalent of [`state_diff_rows`]: compares a `pre`/`post` state pair
/// instead of reading an already-diffed shape.
fn prestate_diff_rows(block_number: u64, transaction_index: Option<u32>, address: &str, pre: &Value, post: &Value) -> Vec<StateDiffRow> {
    let mut rows = Vec::new();
    for field in ["balance", "nonce", "code"] {
        let prev = pre.get(field).and_then(Value::as_str).map(str::to_string);
        let next = post.get(field).and_then(Value::as_str).map(str::to_string);
        if prev != next {
            rows.push(StateDiffRow {
                block_number,
                transaction_index,
                address: address.to_string(),
                key: None,
                kind: field.to_string(),
                prev,
                next,
            });
        }
    }
    if let Some(post_storage) = post.get("storage").and_then(Value::as_object) {
        let empty = Map::new();
        let pre_storage = pre.get("storage").and_then(Value::as_object).unwrap_or(&empty);
        for (slot, next_value) in post_storage {
            rows.push(StateDiffRow {
                block_number,
                transaction_index,
                address: address.to_string(),
                key: Some(slot.clone()),
                kind: "storage".to_string(),
                prev: pre_storage.get(slot).and_then(Value::as_str).map(str::to_string),
                next: next_value.as_str().map(str::to_string),
            });
        }
    }
    rows
}

#[async_trait]
impl ChainSource for EvmRpcSource {
    async fn chain_height(&self) -> std::result::Result<u64, IngestError> {
        let result = self.retry(|| self.client.call("eth_blockNumber", None, 0)).await?;
        let raw = result.as_str().unwrap_or("0x0");
        table_builders::qty2int(raw).map_err(|source| decode_error(&result, "eth_blockNumber", source))
    }

    async fn fetch_stride(&self, from_block: u64, to_block: u64) -> std::result::Result<Vec<IngestedBlock>, IngestError> {
        let priority = from_block as i64;
        let mut blocks = Vec::with_capacity((to_block - from_block + 1) as usize);

        let logs_by_block = self.fetch_logs(from_block, to_block, priority).await?;

        for number in from_block..=to_block {
            let params = vec![Value::String(to_hex(number)), Value::Bool(true)];
            let raw = self
                .retry(|| self.client.call("eth_getBlockByNumber", Some(params.clone()), priority))
                .await?;

            let raw_transactions: Vec<Value> = raw.get("transactions").and_then(Value::as_array).cloned().unwrap_or_default();

            let receipts_by_hash = if self.ingest_config.with_receipts {
                let hashes: Vec<String> = raw_transactions.iter().filter_map(|tx| tx.get("hash").and_then(Value::as_str)).map(str::to_string).collect();
                self.fetch_receipts(&hashes, priority).await?
            } else {
                HashMap::new()
            };

            let transactions = raw_transactions
                .iter()
                .map(|tx| {
                    let receipt = tx.get("hash").and_then(Value::as_str).and_then(|h| receipts_by_hash.get(h));
                    transaction_row(tx, number, receipt)
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let traces = if self.ingest_config.with_traces {
                self.fetch_traces(number, priority).await?
            } else {
                Vec::new()
            };

            let state_diffs = if self.ingest_config.with_statediffs {
                self.fetch_statediffs(number, priority).await?
            } else {
                Vec::new()
            };

            blocks.push(IngestedBlock {
                block: block_row(&raw)?,
                transactions,
                logs: logs_by_block.get(&number).cloned().unwrap_or_default(),
                traces,
                state_diffs,
            });
        }

        Ok(blocks)
    }
}

impl EvmRpcSource {
    async fn retry<F, Fut, T>(&self, call: F) -> std::result::Result<T, IngestError>
    where
        F: Fn() -> Fut + Send,
        Fut: std::future::Future<Output = std::result::Result<T, RpcError>> + Send,
    {
        let mut backoff = backoff::Backoff::new(&self.backoff_config);
        match backoff.retry_all_errors("rpc call", &call).await {
            Ok(value) => Ok(value),
            Err(never) => match never {},
        }
    }

    async fn fetch_logs(&self, from_block: u64, to_block: u64, priority: i64) -> std::result::Result<HashMap<u64, Vec<LogRow>>, IngestError> {
        let params = vec![serde_json::json!({
            "fromBlock": to_hex(from_block),
            "toBlock": to_hex(to_block),
        })];
        let raw = self.retry(|| self.client.call("eth_getLogs", Some(params.clone()), priority)).await?;

        let mut by_block: HashMap<u64, Vec<LogRow>> = HashMap::new();
        if let Some(entries) = raw.as_array() {
            for entry in entries {
                let row = log_row(entry)?;
                by_block.entry(row.block_number).or_default().push(row);
            }
        }
        Ok(by_block)
    }

    /// Fetches one receipt per transaction hash as a single JSON-RPC batch,
    /// sized by [`RpcClient::max_batch_size`].
    async fn fetch_receipts(&self, hashes: &[String], priority: i64) -> std::result::Result<HashMap<String, Value>, IngestError> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let calls: Vec<(String, Option<Vec<Value>>)> = hashes
            .iter()
            .map(|hash| ("eth_getTransactionReceipt".to_string(), Some(vec![Value::String(hash.clone())])))
            .collect();
        let results = self.retry(|| self.client.batch_call(calls.clone(), priority)).await?;
        Ok(hashes.iter().cloned().zip(results).collect())
    }

    async fn fetch_traces(&self, number: u64, priority: i64) -> std::result::Result<Vec<TraceRow>, IngestError> {
        if self.ingest_config.use_trace_api {
            let params = vec![Value::String(to_hex(number))];
            let raw = self.retry(|| self.client.call("trace_block", Some(params.clone()), priority)).await?;
            raw.as_array()
                .into_iter()
                .flatten()
                .map(|entry| trace_row(entry).map(|mut row| {
                    row.block_number = number;
                    row
                }))
                .collect()
        } else {
            let params = vec![Value::String(to_hex(number)), serde_json::json!({"tracer": "callTracer"})];
            let raw = self
                .retry(|| self.client.call("debug_traceBlockByNumber", Some(params.clone()), priority))
                .await?;
            let mut rows = Vec::new();
            for (index, entry) in raw.as_array().into_iter().flatten().enumerate() {
                let result = entry.get("result").cloned().unwrap_or(Value::Null);
                flatten_call_trace(&result, number, Some(index as u32), &mut Vec::new(), &mut rows);
            }
            Ok(rows)
        }
    }

    async fn fetch_statediffs(&self, number: u64, priority: i64) -> std::result::Result<Vec<StateDiffRow>, IngestError> {
        if self.ingest_config.use_debug_api_for_statediffs {
            let params = vec![
                Value::String(to_hex(number)),
                serde_json::json!({"tracer": "prestateTracer", "tracerConfig": {"diffMode": true}}),
            ];
            let raw = self
                .retry(|| self.client.call("debug_traceBlockByNumber", Some(params.clone()), priority))
                .await?;
            let mut rows = Vec::new();
            for (index, entry) in raw.as_array().into_iter().flatten().enumerate() {
                let result = entry.get("result").cloned().unwrap_or(Value::Null);
                let empty = Map::new();
                let pre = result.get("pre").and_then(Value::as_object).unwrap_or(&empty).clone();
                let post = result.get("post").and_then(Value::as_object).unwrap_or(&empty).clone();
                for (address, post_state) in &post {
                    let empty_state = Value::Object(Map::new());
                    let pre_state = pre.get(address).cloned().unwrap_or(empty_state);
                    rows.extend(prestate_diff_rows(number, Some(index as u32), address, &pre_state, post_state));
                }
            }
            Ok(rows)
        } else {
            let params = vec![Value::String(to_hex(number)), Value::Array(vec![Value::String("stateDiff".into())])];
            let raw = self
                .retry(|| self.client.call("trace_replayBlockTransactions", Some(params.clone()), priority))
                .await?;
            let mut rows = Vec::new();
            for (index, entry) in raw.as_array().into_iter().flatten().enumerate() {
                if let Some(state_diff) = entry.get("stateDiff").and_then(Value::as_object) {
                    for (address, diff) in state_diff {
                        rows.extend(state_diff_rows(number, Some(index as u32), address, diff));
                    }
                }
            }
            Ok(rows)
        }
    }
}

pub async fn command(config: Config) -> Result<()> {
    let endpoints = config.rpc_config.endpoint_configs();
    let client = RpcClient::new(endpoints);
    let ingest_config: ingest::IngestConfig = config.ingest_config.into();
    let source = Arc::new(EvmRpcSource {
        client,
        backoff_config: config.backoff_config.into(),
        ingest_config: ingest_config.clone(),
    });

    for (name, description) in source.client.registry().registered() {
        info!(metric = name, description, "rpc metric registered");
    }

    let layout = layout::LocalLayout::new(&config.sink_config.data_dir);
    let from_block = ingest_config.from_block;
    let writer_ceiling = ingest_config.to_block.unwrap_or(u64::MAX);

    let mut writer =
        chunk_writer::ChunkPublisher::open(&layout, &config.sink_config.data_dir, from_block, writer_ceiling, |_| true).context(OpenWriterSnafu)?;
    let mut sink = ChunkSink::new(writer.last_hash().cloned());
    let mut first_block_in_chunk = writer.next_block();

    for (name, description) in sink.registry().registered() {
        info!(metric = name, description, "chunk sink metric registered");
    }

    let mut loop_driver = IngestLoop::new(source, ingest_config);
    let time_provider = SystemProvider;

    while let Some(blocks) = loop_driver.next(&time_provider, Duration::from_secs(2)).await.context(LoopSnafu)? {
        for block in blocks {
            let number = block.block.number;
            sink.append(block).context(ContinuitySnafu)?;

            if sink.buffered_bytes() >= config.sink_config.flush_threshold_bytes {
                flush_chunk(&mut writer, &mut sink, first_block_in_chunk, number, &time_provider)?;
                first_block_in_chunk = number + 1;
            }
        }
    }

    if !sink.is_empty() {
        let last_block = first_block_in_chunk + sink.block_count() as u64 - 1;
        flush_chunk(&mut writer, &mut sink, first_block_in_chunk, last_block, &time_provider)?;
    }

    Ok(())
}

fn flush_chunk(
    writer: &mut chunk_writer::ChunkPublisher<'_>,
    sink: &mut ChunkSink,
    first_block: u64,
    last_block: u64,
    time_provider: &dyn chain_time::TimeProvider,
) -> Result<()> {
    let mut frozen = sink.freeze(first_block, last_block);
    let tables = chunk_writer::batch::encode_frozen_chunk(&mut frozen).context(EncodeSnafu)?;
    writer
        .publish_chunk(first_block, last_block, frozen.last_hash, &tables, time_provider)
        .context(PublishSnafu)?;
    info!(first_block, last_block, "published chunk");
    Ok(())
}
