//! Query execution: turns a compiled [`query_plan::QueryPlan`] into bytes by
//! walking a dataset's chunks in ascending order, applying pushdown
//! predicates, joining items together and enforcing the response-size and
//! time budgets. Each chunk is scanned, selected, cutoff-checked, fetched,
//! assembled, and serialized in turn, stopping on the first chunk that
//! either blows the byte budget or the time budget.

#![warn(missing_debug_implementations)]

use chain_types::query::{ArchiveQuery, QueryValidationError};
use chain_types::ChunkId;
use layout::{get_chunks, Layout};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use predicate::{BinOp, Predicate};
use query_plan::{compile, Model, QueryPlan};
use schema::TableKind;
use serde_json::{Map, Value};
use sha3::{Digest, Sha3_256};
use snafu::{ResultExt, Snafu};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

/// Errors from executing a query.
#[derive(Debug, Snafu)]
pub enum ExecError {
    /// The request failed [`ArchiveQuery::validate`].
    #[snafu(display("invalid query: {source}"))]
    InvalidQuery { source: QueryValidationError },

    /// A selected field is not a column of the item's table.
    #[snafu(display("field {field:?} is not available on the {table} table"))]
    FieldNotAvailable { field: String, table: TableKind },

    /// A chunk directory is missing a table file a compiled scan or item
    /// needs.
    #[snafu(display("chunk {chunk} is missing required file {file}"))]
    MissingData { chunk: String, file: &'static str },

    /// Reading or decoding a table file failed.
    #[snafu(display("failed reading {file} in chunk {chunk}: {source}"))]
    Parquet {
        chunk: String,
        file: &'static str,
        source: parquet::errors::ParquetError,
    },

    /// Assembling or compressing the response failed.
    #[snafu(display("failed building response: {source}"))]
    Io { source: std::io::Error },
}

/// Tunables for one execution of [`execute_query`]: the three cutoff
/// budgets it enforces.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Cumulative per-row weight budget ("response-size cap"), ascending
    /// over the whole query. The cutoff block is the last block whose
    /// running total is still under this limit.
    pub size_limit_bytes: u64,
    /// Soft cap on serialized response bytes, checked after each chunk.
    pub response_byte_cap: u64,
    /// Wall-clock budget for the whole call.
    pub time_budget: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            size_limit_bytes: 40 * 1024 * 1024,
            response_byte_cap: 20 * 1024 * 1024,
            time_budget: Duration::from_secs(2),
        }
    }
}

/// The result of one [`execute_query`] call.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Gzip-compressed JSON array of block objects.
    pub compressed_bytes: Vec<u8>,
    /// Size, in bytes, of the uncompressed JSON before gzip.
    pub uncompressed_size: u64,
    /// SHA3-256 of `compressed_bytes`, computed only when requested.
    pub hash: Option<[u8; 32]>,
    /// Number of chunk directories visited.
    pub num_chunks_read: usize,
    /// Highest block number included in the response (or `from_block - 1`
    /// if nothing was).
    pub last_visited_block: i128,
    /// Wall-clock time spent in this call.
    pub elapsed: Duration,
}

/// Execute `query` against the dataset rooted at `root`, described by
/// `layout`, using `model` to resolve item relations. When `compute_hash` is
/// set the response bytes are also hashed with SHA3-256 for an
/// "x-chunk-hash"-style response attestation.
pub fn execute_query(
    layout: &dyn Layout,
    root: &Path,
    model: &Model,
    query: &ArchiveQuery,
    config: &ExecutorConfig,
    compute_hash: bool,
) -> Result<QueryResult, ExecError> {
    query.validate().context(InvalidQuerySnafu)?;
    let plan = compile(model, query);
    validate_selected_fields(&plan)?;

    let from_block = plan.block_range.0;
    let to_block = plan.block_range.1.unwrap_or(u64::MAX);
    let chunks = get_chunks(layout, from_block, to_block);

    let start = Instant::now();
    let mut blocks_out: Vec<Value> = Vec::new();
    let mut running_weight: u64 = 0;
    let mut num_chunks_read = 0usize;
    let mut last_visited_block: i128 = from_block as i128 - 1;

    'chunks: for chunk in chunks {
        if start.elapsed() >= config.time_budget {
            break;
        }
        if estimate_bytes(&blocks_out) as u64 >= config.response_byte_cap {
            break;
        }

        let chunk_dir = root.join(chunk.path());
        let chunk_name = chunk.to_string();

        let blocks_rows = read_table(&chunk_dir, &chunk_name, "blocks.parquet")?;
        let blocks_by_number = index_by(&blocks_rows, "number");

        let logs_scan_active = plan.scans.iter().any(|s| s.name == "logs" && s.predicate.is_some());
        let tx_scan_active = plan.scans.iter().any(|s| s.name == "transactions" && s.predicate.is_some());

        let logs_item = plan.items.iter().find(|i| i.name == "logs");
        let tx_item = plan.items.iter().find(|i| i.name == "transactions");
        let blocks_item = plan.items.iter().find(|i| i.name == "blocks").expect("blocks item always present");

        let need_logs = logs_scan_active;
        let need_tx = tx_scan_active || tx_item.map(|i| i.needs_ref_rel).unwrap_or(false);

        let logs_rows = if need_logs {
            read_table(&chunk_dir, &chunk_name, "logs.parquet")?
        } else {
            Vec::new()
        };
        let tx_rows = if need_tx {
            read_table(&chunk_dir, &chunk_name, "transactions.parquet")?
        } else {
            Vec::new()
        };

        let logs_predicate = plan.scans.iter().find(|s| s.name == "logs").and_then(|s| s.predicate.clone());
        let tx_predicate = plan.scans.iter().find(|s| s.name == "transactions").and_then(|s| s.predicate.clone());

        let logs_matched: Vec<&Map<String, Value>> = match &logs_predicate {
            Some(pred) => logs_rows.iter().filter(|r| matches(pred, r)).collect(),
            None => Vec::new(),
        };

        // transactions selected: directly matched rows, plus rows referenced
        // by a matched log (RefRel), keyed by (block_number, index) to
        // dedupe.
        let mut tx_selected: BTreeMap<(i64, i64), &Map<String, Value>> = BTreeMap::new();
        if let Some(pred) = &tx_predicate {
            for row in &tx_rows {
                if matches(pred, row) {
                    tx_selected.insert(tx_key(row), row);
                }
            }
        }
        if tx_item.map(|i| i.needs_ref_rel).unwrap_or(false) {
            let by_key = index_by_key(&tx_rows);
            for log in &logs_matched {
                let key = (get_i64(log, "block_number"), get_i64(log, "transaction_index"));
                if let Some(row) = by_key.get(&key) {
                    tx_selected.insert(key, row);
                }
            }
        }

        // block numbers reached through any active item, plus range
        // endpoints so an empty response still states the covered range,
        // plus every block in range when includeAllBlocks is set.
        let mut candidate_blocks: BTreeSet<u64> = BTreeSet::new();
        for log in &logs_matched {
            candidate_blocks.insert(get_i64(log, "block_number") as u64);
        }
        for (key, _) in &tx_selected {
            candidate_blocks.insert(key.0 as u64);
        }
        let lo = from_block.max(chunk.first_block);
        let hi = to_block.min(chunk.last_block);
        if lo <= hi {
            candidate_blocks.insert(lo);
            candidate_blocks.insert(hi);
            if plan.include_all_blocks {
                for bn in lo..=hi {
                    candidate_blocks.insert(bn);
                }
            }
        }

        // ascending cumulative weight cutoff, using each row's real
        // per-column weight (resolving `*_size` aux columns) rather than a
        // flat per-item estimate.
        let mut included_blocks: Vec<u64> = Vec::new();
        let mut chunk_cut_short = false;
        for bn in &candidate_blocks {
            let mut weight = blocks_by_number
                .get(bn)
                .map(|row| row_weight(TableKind::Block, row, required_fields(TableKind::Block), &blocks_item.selected_fields))
                .unwrap_or(0);
            if let Some(item) = logs_item {
                weight += logs_matched
                    .iter()
                    .filter(|r| get_i64(r, "block_number") as u64 == *bn)
                    .map(|r| row_weight(TableKind::Log, r, required_fields(TableKind::Log), &item.selected_fields))
                    .sum::<u64>();
            }
            if let Some(item) = tx_item {
                weight += tx_selected
                    .iter()
                    .filter(|(k, _)| k.0 as u64 == *bn)
                    .map(|(_, r)| row_weight(TableKind::Transaction, r, required_fields(TableKind::Transaction), &item.selected_fields))
                    .sum::<u64>();
            }
            if running_weight + weight > config.size_limit_bytes {
                chunk_cut_short = true;
                break;
            }
            running_weight += weight;
            included_blocks.push(*bn);
        }

        for bn in &included_blocks {
            let block_row = blocks_by_number.get(bn).ok_or_else(|| ExecError::MissingData {
                chunk: chunk_name.clone(),
                file: "blocks.parquet",
            })?;
            let mut obj = Map::new();
            obj.insert(
                "header".into(),
                project(block_row, required_fields(TableKind::Block), &blocks_item.selected_fields),
            );

            if let Some(item) = logs_item {
                if !item.source_scans.is_empty() {
                    let mut rows: Vec<&Map<String, Value>> = logs_matched
                        .iter()
                        .copied()
                        .filter(|r| get_i64(r, "block_number") as u64 == *bn)
                        .collect();
                    rows.sort_by_key(|r| get_i64(r, "log_index"));
                    let arr = rows
                        .into_iter()
                        .map(|r| project(r, required_fields(TableKind::Log), &item.selected_fields))
                        .collect();
                    obj.insert("logs".into(), Value::Array(arr));
                }
            }

            if let Some(item) = tx_item {
                if !item.source_scans.is_empty() || item.needs_ref_rel {
                    let mut rows: Vec<&Map<String, Value>> = tx_selected
                        .iter()
                        .filter(|(k, _)| k.0 as u64 == *bn)
                        .map(|(_, v)| *v)
                        .collect();
                    rows.sort_by_key(|r| get_i64(r, "transaction_index"));
                    let arr = rows
                        .into_iter()
                        .map(|r| project(r, required_fields(TableKind::Transaction), &item.selected_fields))
                        .collect();
                    obj.insert("transactions".into(), Value::Array(arr));
                }
            }

            blocks_out.push(Value::Object(obj));
            last_visited_block = *bn as i128;
        }

        num_chunks_read += 1;

        if chunk_cut_short {
            break 'chunks;
        }
        if estimate_bytes(&blocks_out) as u64 >= config.response_byte_cap {
            break 'chunks;
        }
    }

    let uncompressed = serde_json::to_vec(&blocks_out)?;
    let uncompressed_size = uncompressed.len() as u64;
    let compressed_bytes = gzip_fixed_mtime(&uncompressed)?;
    let hash = if compute_hash {
        let mut hasher = Sha3_256::new();
        hasher.update(&compressed_bytes);
        Some(hasher.finalize().into())
    } else {
        None
    };

    Ok(QueryResult {
        compressed_bytes,
        uncompressed_size,
        hash,
        num_chunks_read,
        last_visited_block,
        elapsed: start.elapsed(),
    })
}

impl From<serde_json::Error> for ExecError {
    fn from(source: serde_json::Error) -> Self {
        ExecError::Io {
            source: std::io::Error::new(std::io::ErrorKind::Other, source),
        }
    }
}

fn table_schema(table: TableKind) -> schema::TableSchema {
    match table {
        TableKind::Block => schema::TableSchema::block(),
        TableKind::Transaction => schema::TableSchema::transaction(),
        TableKind::Log => schema::TableSchema::log(),
        TableKind::Trace => schema::TableSchema::trace(),
        TableKind::StateDiff => schema::TableSchema::state_diff(),
    }
}

fn validate_selected_fields(plan: &QueryPlan) -> Result<(), ExecError> {
    for item in &plan.items {
        let table_schema = table_schema(item.table);
        for field in &item.selected_fields {
            if table_schema.column(field).is_none() {
                return Err(ExecError::FieldNotAvailable {
                    field: field.clone(),
                    table: item.table,
                });
            }
        }
    }
    Ok(())
}

fn required_fields(table: TableKind) -> &'static [&'static str] {
    match table {
        TableKind::Block => &["number"],
        TableKind::Transaction => &["block_number", "transaction_index"],
        TableKind::Log => &["block_number", "log_index", "transaction_index"],
        TableKind::Trace => &["block_number", "transaction_index", "trace_address"],
        TableKind::StateDiff => &["block_number"],
    }
}

/// Build the JSON object for one row, keeping `required` columns plus
/// anything in `selected_fields`.
fn project(row: &Map<String, Value>, required: &[&str], selected_fields: &[String]) -> Value {
    let mut out = Map::new();
    for key in required {
        if let Some(v) = row.get(*key) {
            out.insert((*key).to_string(), v.clone());
        }
    }
    for key in selected_fields {
        if let Some(v) = row.get(key) {
            out.insert(key.clone(), v.clone());
        }
    }
    Value::Object(out)
}

/// The real response-size weight of one row: required plus selected columns,
/// resolving `*_size` aux-column references against the row's own decoded
/// fields.
fn row_weight(table: TableKind, row: &Map<String, Value>, required: &[&str], selected_fields: &[String]) -> u64 {
    let schema = table_schema(table);
    let columns: Vec<&str> = required.iter().copied().chain(selected_fields.iter().map(String::as_str)).collect();
    schema.row_weight(&columns, |size_column| row.get(size_column).and_then(Value::as_u64))
}

fn tx_key(row: &Map<String, Value>) -> (i64, i64) {
    (get_i64(row, "block_number"), get_i64(row, "transaction_index"))
}

fn index_by_key(rows: &[Map<String, Value>]) -> BTreeMap<(i64, i64), &Map<String, Value>> {
    rows.iter().map(|r| (tx_key(r), r)).collect()
}

fn index_by<'a>(rows: &'a [Map<String, Value>], key: &str) -> BTreeMap<u64, &'a Map<String, Value>> {
    rows.iter().map(|r| (get_i64(r, key) as u64, r)).collect()
}

fn get_i64(row: &Map<String, Value>, key: &str) -> i64 {
    row.get(key).and_then(Value::as_i64).unwrap_or(0)
}

fn estimate_bytes(blocks: &[Value]) -> usize {
    blocks.iter().map(|b| serde_json::to_string(b).map(|s| s.len()).unwrap_or(0)).sum()
}

/// Evaluate a pushdown predicate against one decoded row. Numeric columns
/// (anything the parquet reader surfaced as a JSON number, e.g.
/// `block_number`) use numeric comparison; everything else (hex strings:
/// addresses, hashes, topics) uses string equality/membership.
fn matches(predicate: &Predicate, row: &Map<String, Value>) -> bool {
    match predicate {
        Predicate::True => true,
        Predicate::And(ops) => ops.iter().all(|p| matches(p, row)),
        Predicate::Or(ops) => !ops.is_empty() && ops.iter().any(|p| matches(p, row)),
        Predicate::Bin { column, op, literal } => match row.get(column) {
            Some(Value::Number(n)) => {
                let value = n.as_f64().unwrap_or(f64::NAN);
                let literal: f64 = literal.parse().unwrap_or(f64::NAN);
                match op {
                    BinOp::Eq => value == literal,
                    BinOp::Ge => value >= literal,
                    BinOp::Le => value <= literal,
                    BinOp::Gt => value > literal,
                    BinOp::Lt => value < literal,
                }
            }
            Some(Value::String(s)) => matches!(op, BinOp::Eq) && s == literal,
            _ => false,
        },
        Predicate::In { column, values } => match row.get(column) {
            Some(Value::String(s)) => values.iter().any(|v| v == s),
            Some(Value::Number(n)) => {
                let value = n.as_f64();
                values.iter().any(|v| v.parse::<f64>().ok() == value)
            }
            _ => false,
        },
    }
}

fn read_table(chunk_dir: &Path, chunk_name: &str, file: &'static str) -> Result<Vec<Map<String, Value>>, ExecError> {
    let path = chunk_dir.join(file);
    let handle = File::open(&path).map_err(|_| ExecError::MissingData {
        chunk: chunk_name.to_string(),
        file,
    })?;
    let reader = SerializedFileReader::new(handle).context(ParquetSnafu {
        chunk: chunk_name.to_string(),
        file,
    })?;
    let iter = reader.get_row_iter(None).context(ParquetSnafu {
        chunk: chunk_name.to_string(),
        file,
    })?;
    Ok(iter.map(|row| row_to_map(&row)).collect())
}

fn row_to_map(row: &parquet::record::Row) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, field) in row.get_column_iter() {
        map.insert(name.clone(), field_to_json(field));
    }
    map
}

fn field_to_json(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(v) => Value::Bool(*v),
        Field::Byte(v) => Value::from(*v as i64),
        Field::Short(v) => Value::from(*v as i64),
        Field::Int(v) => Value::from(*v as i64),
        Field::Long(v) => Value::from(*v),
        Field::UByte(v) => Value::from(*v as i64),
        Field::UShort(v) => Value::from(*v as i64),
        Field::UInt(v) => Value::from(*v as i64),
        Field::ULong(v) => Value::from(*v as i64),
        Field::Float(v) => serde_json::Number::from_f64(*v as f64).map(Value::Number).unwrap_or(Value::Null),
        Field::Double(v) => serde_json::Number::from_f64(*v).map(Value::Number).unwrap_or(Value::Null),
        Field::Str(v) => Value::String(v.clone()),
        Field::TimestampMillis(v) => Value::from(*v),
        Field::TimestampMicros(v) => Value::from(*v),
        other => Value::String(other.to_string()),
    }
}

fn gzip_fixed_mtime(body: &[u8]) -> Result<Vec<u8>, ExecError> {
    let mut encoder = flate2::GzBuilder::new().mtime(0).write(Vec::new(), flate2::Compression::default());
    encoder.write_all(body).context(IoSnafu)?;
    encoder.finish().context(IoSnafu)
}

/// Chunk ids visited, in ascending order, for a block range. Re-exported so
/// callers (e.g. the binary's query command) don't need to depend on
/// `layout` directly just to log which chunks a query touched.
pub fn chunk_ids_for_range(layout: &dyn Layout, from_block: u64, to_block: u64) -> Vec<ChunkId> {
    get_chunks(layout, from_block, to_block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int32Array, StringArray};
    use arrow::datatypes::{DataType, Field as ArrowField, Schema};
    use arrow::record_batch::RecordBatch;
    use chain_types::hash::ShortHash;
    use chain_types::query::{ArchiveQuery, Chain, FieldSelection, LogFilter};
    use chunk_writer::encode::{encode_table, WriterParams};
    use layout::LocalLayout;
    use query_plan::eth_model;
    use std::fs;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn write_blocks(dir: &Path, numbers: &[i32]) {
        let schema = Arc::new(Schema::new(vec![
            ArrowField::new("number", DataType::Int32, false),
            ArrowField::new("hash", DataType::Utf8, false),
        ]));
        let hashes: Vec<String> = numbers.iter().map(|n| format!("0xblock{n}")).collect();
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(numbers.to_vec())),
                Arc::new(StringArray::from(hashes)),
            ],
        )
        .unwrap();
        let bytes = encode_table(&batch, &WriterParams::with_dictionary_columns(vec![])).unwrap();
        fs::write(dir.join("blocks.parquet"), bytes).unwrap();
    }

    fn write_logs(dir: &Path, rows: &[(i32, i32, &str)]) {
        let schema = Arc::new(Schema::new(vec![
            ArrowField::new("block_number", DataType::Int32, false),
            ArrowField::new("log_index", DataType::Int32, false),
            ArrowField::new("transaction_index", DataType::Int32, false),
            ArrowField::new("address", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int32Array::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
                Arc::new(Int32Array::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
                Arc::new(Int32Array::from(vec![0; rows.len()])),
                Arc::new(StringArray::from(rows.iter().map(|r| r.2.to_string()).collect::<Vec<_>>())),
            ],
        )
        .unwrap();
        let bytes = encode_table(&batch, &WriterParams::with_dictionary_columns(vec!["address"])).unwrap();
        fs::write(dir.join("logs.parquet"), bytes).unwrap();
    }

    fn stage_chunk(root: &Path, first: u64, last: u64) -> std::path::PathBuf {
        let chunk = ChunkId::new(first, last, ShortHash::new("deadbeef"), 0);
        let dir = root.join(chunk.path());
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn query_with_log_address(address: &str) -> ArchiveQuery {
        ArchiveQuery {
            chain: Chain::Eth,
            from_block: 1,
            to_block: Some(5),
            include_all_blocks: false,
            logs: vec![LogFilter {
                address: vec![address.to_string()],
                topics: vec![],
            }],
            transactions: vec![],
            fields: FieldSelection::default(),
        }
    }

    #[test]
    fn matches_address_filter_and_assembles_block() {
        let tmp = tempdir().unwrap();
        let dir = stage_chunk(tmp.path(), 1, 5);
        write_blocks(&dir, &[1, 2, 3, 4, 5]);
        write_logs(&dir, &[(2, 0, "0xabc"), (4, 0, "0xdef")]);

        let layout = LocalLayout::new(tmp.path());
        let query = query_with_log_address("0xabc");
        let result = execute_query(&layout, tmp.path(), &eth_model(), &query, &ExecutorConfig::default(), true).unwrap();

        assert_eq!(result.num_chunks_read, 1);
        assert!(result.hash.is_some());

        let mut decoder = flate2::read::GzDecoder::new(&result.compressed_bytes[..]);
        let mut json = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut json).unwrap();
        let blocks: Vec<Value> = serde_json::from_str(&json).unwrap();

        // range endpoints (1, 5) are always present plus block 2 which has
        // the matching log.
        let numbers: BTreeSet<i64> = blocks
            .iter()
            .map(|b| b["header"]["number"].as_i64().unwrap())
            .collect();
        assert!(numbers.contains(&1));
        assert!(numbers.contains(&2));
        assert!(numbers.contains(&5));
        assert!(!numbers.contains(&4));

        let with_logs = blocks.iter().find(|b| b["header"]["number"] == 2).unwrap();
        assert_eq!(with_logs["logs"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn empty_query_still_reveals_range_endpoints() {
        let tmp = tempdir().unwrap();
        let dir = stage_chunk(tmp.path(), 1, 5);
        write_blocks(&dir, &[1, 2, 3, 4, 5]);
        write_logs(&dir, &[]);

        let layout = LocalLayout::new(tmp.path());
        let query = ArchiveQuery {
            chain: Chain::Eth,
            from_block: 1,
            to_block: Some(5),
            include_all_blocks: false,
            logs: vec![],
            transactions: vec![],
            fields: FieldSelection::default(),
        };
        let result = execute_query(&layout, tmp.path(), &eth_model(), &query, &ExecutorConfig::default(), false).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&result.compressed_bytes[..]);
        let mut json = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut json).unwrap();
        let blocks: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn rejects_invalid_query() {
        let tmp = tempdir().unwrap();
        let layout = LocalLayout::new(tmp.path());
        let query = ArchiveQuery {
            chain: Chain::Eth,
            from_block: 10,
            to_block: Some(5),
            include_all_blocks: false,
            logs: vec![],
            transactions: vec![],
            fields: FieldSelection::default(),
        };
        let err = execute_query(&layout, tmp.path(), &eth_model(), &query, &ExecutorConfig::default(), false).unwrap_err();
        assert!(matches!(err, ExecError::InvalidQuery { .. }));
    }

    #[test]
    fn rejects_unknown_selected_field() {
        let tmp = tempdir().unwrap();
        let layout = LocalLayout::new(tmp.path());
        let mut query = query_with_log_address("0xabc");
        query.fields.log = vec!["not_a_real_column".to_string()];
        let err = execute_query(&layout, tmp.path(), &eth_model(), &query, &ExecutorConfig::default(), false).unwrap_err();
        assert!(matches!(err, ExecError::FieldNotAvailable { .. }));
    }
}
