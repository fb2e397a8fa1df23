//! Column schemas for the chain archive's tables: block, transaction, log,
//! and trace. Fixes the exact column names and Arrow types each table
//! carries on disk.

#![warn(missing_debug_implementations, missing_docs)]

use arrow::datatypes::DataType;
use std::fmt;

/// One column in a table: its wire name and Arrow storage type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    /// The on-disk/wire column name (e.g. `"gasUsed"` is never used; these
    /// are the snake_case Parquet column names such as `gas_used`).
    pub name: &'static str,
    /// The Arrow type used to store this column.
    pub data_type: DataType,
    /// Whether the column may contain nulls. Most quantity/optional EIP-1559
    /// fields are nullable; block/tx identity columns are not.
    pub nullable: bool,
}

impl ColumnSchema {
    /// Shorthand constructor.
    pub const fn new(name: &'static str, data_type: DataType, nullable: bool) -> Self {
        Self {
            name,
            data_type,
            nullable,
        }
    }
}

/// One of the archive's fixed table kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    /// `block.parquet`
    Block,
    /// `transaction.parquet`
    Transaction,
    /// `log.parquet`
    Log,
    /// `trace.parquet`
    Trace,
    /// `state_diff.parquet` (emitted only when trace/state-diff fetching is
    /// enabled; chains without trace support never produce this table).
    StateDiff,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TableKind::Block => "block",
            TableKind::Transaction => "transaction",
            TableKind::Log => "log",
            TableKind::Trace => "trace",
            TableKind::StateDiff => "state_diff",
        };
        f.write_str(s)
    }
}

/// A column's contribution to a row's response-size weight: either a fixed
/// byte count, or a reference to an auxiliary `*_size` column that carries
/// the actual UTF-8 byte length of a wide, variable-length field (calldata,
/// log data, trace call input/output) for that row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnWeight {
    /// A fixed per-row byte cost, for columns whose encoded size barely
    /// varies (hashes, addresses, fixed-width quantities).
    Constant(u64),
    /// The real weight is the value of the named `*_size` auxiliary column
    /// for this row (0 when the field is null).
    SizeColumn(&'static str),
}

/// Fallback weight for a column with no explicit entry in a table's
/// `column_weights` map.
const DEFAULT_COLUMN_WEIGHT: u64 = 8;

/// Fallback weight used when a [`ColumnWeight::SizeColumn`] lookup comes back
/// empty (e.g. minimal test fixtures that don't emit aux columns).
const MISSING_SIZE_COLUMN_ESTIMATE: u64 = 32;

/// A table's full schema: its ordered column list, the columns that make up
/// its on-disk sort key, and the columns dictionary-encoded for storage.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// The table this schema describes.
    pub kind: TableKind,
    /// Columns in on-disk order.
    pub columns: Vec<ColumnSchema>,
    /// Columns the chunk writer sorts rows by before encoding, in order.
    pub sort_key: Vec<&'static str>,
    /// Columns written with dictionary encoding (`Column(..., dictionary=True)`
    /// equivalents): low-cardinality hex strings such as addresses.
    pub dictionary_encoded: Vec<&'static str>,
    /// Per-column response-size weight, used by [`TableSchema::row_weight`].
    /// Columns not listed fall back to [`DEFAULT_COLUMN_WEIGHT`].
    pub column_weights: Vec<(&'static str, ColumnWeight)>,
}

impl TableSchema {
    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Look up a column's configured weight, or the table-wide default.
    pub fn weight_of(&self, column: &str) -> ColumnWeight {
        self.column_weights
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, weight)| *weight)
            .unwrap_or(ColumnWeight::Constant(DEFAULT_COLUMN_WEIGHT))
    }

    /// The real per-row response-size weight for a row that projects
    /// `columns`, resolving every [`ColumnWeight::SizeColumn`] reference via
    /// `size_of` (typically a lookup into the row's decoded `*_size`
    /// auxiliary columns). Falls back to [`MISSING_SIZE_COLUMN_ESTIMATE`]
    /// when `size_of` returns `None`.
    pub fn row_weight(&self, columns: &[&str], size_of: impl Fn(&str) -> Option<u64>) -> u64 {
        columns
            .iter()
            .map(|column| match self.weight_of(column) {
                ColumnWeight::Constant(bytes) => bytes,
                ColumnWeight::SizeColumn(size_column) => size_of(size_column).unwrap_or(MISSING_SIZE_COLUMN_ESTIMATE),
            })
            .sum()
    }

    fn qty() -> DataType {
        DataType::Utf8
    }

    /// The `block` table schema.
    pub fn block() -> Self {
        use DataType::*;
        let qty = Self::qty;
        TableSchema {
            kind: TableKind::Block,
            columns: vec![
                ColumnSchema::new("number", Int32, false),
                ColumnSchema::new("hash", Utf8, false),
                ColumnSchema::new("parent_hash", Utf8, false),
                ColumnSchema::new("nonce", Utf8, true),
                ColumnSchema::new("sha3_uncles", Utf8, false),
                ColumnSchema::new("logs_bloom", Utf8, false),
                ColumnSchema::new("transactions_root", Utf8, false),
                ColumnSchema::new("state_root", Utf8, false),
                ColumnSchema::new("receipts_root", Utf8, false),
                ColumnSchema::new("mix_hash", Utf8, true),
                ColumnSchema::new("miner", Utf8, false),
                ColumnSchema::new("difficulty", qty(), true),
                ColumnSchema::new("total_difficulty", qty(), true),
                ColumnSchema::new("extra_data", Utf8, false),
                ColumnSchema::new("size", Int32, false),
                ColumnSchema::new("gas_limit", qty(), false),
                ColumnSchema::new("gas_used", qty(), false),
                ColumnSchema::new("timestamp", Timestamp(arrow::datatypes::TimeUnit::Second, None), false),
                ColumnSchema::new("base_fee_per_gas", qty(), true),
            ],
            sort_key: vec!["number"],
            dictionary_encoded: vec!["miner"],
            column_weights: vec![
                ("number", ColumnWeight::Constant(8)),
                ("hash", ColumnWeight::Constant(68)),
                ("parent_hash", ColumnWeight::Constant(68)),
                ("nonce", ColumnWeight::Constant(18)),
                ("sha3_uncles", ColumnWeight::Constant(68)),
                ("logs_bloom", ColumnWeight::Constant(514)),
                ("transactions_root", ColumnWeight::Constant(68)),
                ("state_root", ColumnWeight::Constant(68)),
                ("receipts_root", ColumnWeight::Constant(68)),
                ("mix_hash", ColumnWeight::Constant(68)),
                ("miner", ColumnWeight::Constant(42)),
                ("difficulty", ColumnWeight::Constant(20)),
                ("total_difficulty", ColumnWeight::Constant(24)),
                ("extra_data", ColumnWeight::SizeColumn("extra_data_size")),
                ("size", ColumnWeight::Constant(8)),
                ("gas_limit", ColumnWeight::Constant(12)),
                ("gas_used", ColumnWeight::Constant(12)),
                ("timestamp", ColumnWeight::Constant(8)),
                ("base_fee_per_gas", ColumnWeight::Constant(12)),
            ],
        }
    }

    /// The `transaction` table schema.
    pub fn transaction() -> Self {
        use DataType::*;
        let qty = Self::qty;
        TableSchema {
            kind: TableKind::Transaction,
            columns: vec![
                ColumnSchema::new("block_number", Int32, false),
                ColumnSchema::new("transaction_index", Int32, false),
                ColumnSchema::new("hash", Utf8, false),
                ColumnSchema::new("from", Utf8, false),
                ColumnSchema::new("to", Utf8, true),
                ColumnSchema::new("gas", qty(), false),
                ColumnSchema::new("gas_price", qty(), true),
                ColumnSchema::new("max_fee_per_gas", qty(), true),
                ColumnSchema::new("max_priority_fee_per_gas", qty(), true),
                ColumnSchema::new("input", Utf8, false),
                ColumnSchema::new("nonce", Int64, false),
                ColumnSchema::new("value", qty(), false),
                ColumnSchema::new("v", Utf8, true),
                ColumnSchema::new("r", Utf8, true),
                ColumnSchema::new("s", Utf8, true),
                ColumnSchema::new("y_parity", Int8, true),
                ColumnSchema::new("chain_id", Int32, true),
                ColumnSchema::new("sighash", Utf8, true),
                ColumnSchema::new("gas_used", qty(), true),
                ColumnSchema::new("cumulative_gas_used", qty(), true),
                ColumnSchema::new("effective_gas_price", qty(), true),
                ColumnSchema::new("type", Int8, true),
                ColumnSchema::new("status", Int8, true),
            ],
            sort_key: vec!["sighash", "to", "from", "block_number", "transaction_index"],
            dictionary_encoded: vec!["from", "to"],
            column_weights: vec![
                ("block_number", ColumnWeight::Constant(8)),
                ("transaction_index", ColumnWeight::Constant(8)),
                ("hash", ColumnWeight::Constant(68)),
                ("from", ColumnWeight::Constant(42)),
                ("to", ColumnWeight::Constant(42)),
                ("gas", ColumnWeight::Constant(12)),
                ("gas_price", ColumnWeight::Constant(12)),
                ("max_fee_per_gas", ColumnWeight::Constant(12)),
                ("max_priority_fee_per_gas", ColumnWeight::Constant(12)),
                ("input", ColumnWeight::SizeColumn("input_size")),
                ("nonce", ColumnWeight::Constant(8)),
                ("value", ColumnWeight::Constant(24)),
                ("v", ColumnWeight::Constant(10)),
                ("r", ColumnWeight::Constant(68)),
                ("s", ColumnWeight::Constant(68)),
                ("y_parity", ColumnWeight::Constant(1)),
                ("chain_id", ColumnWeight::Constant(4)),
                ("sighash", ColumnWeight::Constant(10)),
                ("gas_used", ColumnWeight::Constant(12)),
                ("cumulative_gas_used", ColumnWeight::Constant(12)),
                ("effective_gas_price", ColumnWeight::Constant(12)),
                ("type", ColumnWeight::Constant(1)),
                ("status", ColumnWeight::Constant(1)),
            ],
        }
    }

    /// The `log` table schema.
    pub fn log() -> Self {
        use DataType::*;
        TableSchema {
            kind: TableKind::Log,
            columns: vec![
                ColumnSchema::new("block_number", Int32, false),
                ColumnSchema::new("log_index", Int32, false),
                ColumnSchema::new("transaction_index", Int32, false),
                ColumnSchema::new("transaction_hash", Utf8, false),
                ColumnSchema::new("address", Utf8, false),
                ColumnSchema::new("data", Utf8, false),
                ColumnSchema::new("topic0", Utf8, true),
                ColumnSchema::new("topic1", Utf8, true),
                ColumnSchema::new("topic2", Utf8, true),
                ColumnSchema::new("topic3", Utf8, true),
            ],
            sort_key: vec!["topic0", "address", "block_number", "log_index"],
            dictionary_encoded: vec!["address", "topic0"],
            column_weights: vec![
                ("block_number", ColumnWeight::Constant(8)),
                ("log_index", ColumnWeight::Constant(8)),
                ("transaction_index", ColumnWeight::Constant(8)),
                ("transaction_hash", ColumnWeight::Constant(68)),
                ("address", ColumnWeight::Constant(42)),
                ("data", ColumnWeight::SizeColumn("data_size")),
                ("topic0", ColumnWeight::Constant(68)),
                ("topic1", ColumnWeight::Constant(68)),
                ("topic2", ColumnWeight::Constant(68)),
                ("topic3", ColumnWeight::Constant(68)),
            ],
        }
    }

    /// The `trace` table schema. Variant-specific columns (call/create/
    /// suicide/reward) are all carried nullable on one wide, flattened row.
    pub fn trace() -> Self {
        use DataType::*;
        let qty = Self::qty;
        TableSchema {
            kind: TableKind::Trace,
            columns: vec![
                ColumnSchema::new("block_number", Int32, false),
                ColumnSchema::new("transaction_index", Int32, true),
                ColumnSchema::new("trace_address", Utf8, false),
                ColumnSchema::new("type", Utf8, false),
                ColumnSchema::new("error", Utf8, true),
                ColumnSchema::new("revert_reason", Utf8, true),
                ColumnSchema::new("call_from", Utf8, true),
                ColumnSchema::new("call_to", Utf8, true),
                ColumnSchema::new("call_value", qty(), true),
                ColumnSchema::new("call_gas", qty(), true),
                ColumnSchema::new("call_sighash", Utf8, true),
                ColumnSchema::new("call_type", Utf8, true),
                ColumnSchema::new("call_input", Utf8, true),
                ColumnSchema::new("call_gas_used", qty(), true),
                ColumnSchema::new("call_output", Utf8, true),
                ColumnSchema::new("create_from", Utf8, true),
                ColumnSchema::new("create_value", qty(), true),
                ColumnSchema::new("create_gas", qty(), true),
                ColumnSchema::new("create_init", Utf8, true),
                ColumnSchema::new("create_gas_used", qty(), true),
                ColumnSchema::new("create_result_address", Utf8, true),
                ColumnSchema::new("create_result_code", Utf8, true),
                ColumnSchema::new("suicide_address", Utf8, true),
                ColumnSchema::new("suicide_refund_address", Utf8, true),
                ColumnSchema::new("suicide_balance", qty(), true),
                ColumnSchema::new("reward_author", Utf8, true),
                ColumnSchema::new("reward_value", qty(), true),
                ColumnSchema::new("reward_type", Utf8, true),
            ],
            sort_key: vec!["block_number", "transaction_index", "trace_address"],
            dictionary_encoded: vec!["type", "call_type"],
            column_weights: vec![
                ("block_number", ColumnWeight::Constant(8)),
                ("transaction_index", ColumnWeight::Constant(8)),
                ("trace_address", ColumnWeight::Constant(32)),
                ("type", ColumnWeight::Constant(10)),
                ("error", ColumnWeight::Constant(24)),
                ("revert_reason", ColumnWeight::Constant(24)),
                ("call_from", ColumnWeight::Constant(42)),
                ("call_to", ColumnWeight::Constant(42)),
                ("call_value", ColumnWeight::Constant(24)),
                ("call_gas", ColumnWeight::Constant(12)),
                ("call_sighash", ColumnWeight::Constant(10)),
                ("call_type", ColumnWeight::Constant(10)),
                ("call_input", ColumnWeight::SizeColumn("call_input_size")),
                ("call_gas_used", ColumnWeight::Constant(12)),
                ("call_output", ColumnWeight::SizeColumn("call_output_size")),
                ("create_from", ColumnWeight::Constant(42)),
                ("create_value", ColumnWeight::Constant(24)),
                ("create_gas", ColumnWeight::Constant(12)),
                ("create_init", ColumnWeight::SizeColumn("create_init_size")),
                ("create_gas_used", ColumnWeight::Constant(12)),
                ("create_result_address", ColumnWeight::Constant(42)),
                ("create_result_code", ColumnWeight::SizeColumn("create_result_code_size")),
                ("suicide_address", ColumnWeight::Constant(42)),
                ("suicide_refund_address", ColumnWeight::Constant(42)),
                ("suicide_balance", ColumnWeight::Constant(24)),
                ("reward_author", ColumnWeight::Constant(42)),
                ("reward_value", ColumnWeight::Constant(24)),
                ("reward_type", ColumnWeight::Constant(10)),
            ],
        }
    }

    /// The `state_diff` table schema: one row per changed storage slot,
    /// balance, nonce, or code, keyed by the block and the address/key pair.
    pub fn state_diff() -> Self {
        use DataType::*;
        TableSchema {
            kind: TableKind::StateDiff,
            columns: vec![
                ColumnSchema::new("block_number", Int32, false),
                ColumnSchema::new("transaction_index", Int32, true),
                ColumnSchema::new("address", Utf8, false),
                ColumnSchema::new("key", Utf8, true),
                ColumnSchema::new("kind", Utf8, false),
                ColumnSchema::new("prev", Utf8, true),
                ColumnSchema::new("next", Utf8, true),
            ],
            sort_key: vec!["block_number", "address", "key"],
            dictionary_encoded: vec!["kind", "address"],
            column_weights: vec![
                ("block_number", ColumnWeight::Constant(8)),
                ("transaction_index", ColumnWeight::Constant(8)),
                ("address", ColumnWeight::Constant(42)),
                ("key", ColumnWeight::Constant(68)),
                ("kind", ColumnWeight::Constant(10)),
                ("prev", ColumnWeight::SizeColumn("prev_size")),
                ("next", ColumnWeight::SizeColumn("next_size")),
            ],
        }
    }

    /// All table schemas for a full ingest configuration.
    pub fn all() -> Vec<TableSchema> {
        vec![
            TableSchema::block(),
            TableSchema::transaction(),
            TableSchema::log(),
            TableSchema::trace(),
            TableSchema::state_diff(),
        ]
    }
}

/// Per-table-kind "response weight" used by the query executor's size
/// budget: a rough bytes-per-row estimate used to decide how many blocks
/// a query's response can include before it's cut off.
pub fn row_weight(kind: TableKind) -> u64 {
    match kind {
        TableKind::Block => 500,
        TableKind::Transaction => 300,
        TableKind::Log => 200,
        TableKind::Trace => 300,
        TableKind::StateDiff => 200,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_schema_has_sort_key_column() {
        let schema = TableSchema::block();
        assert!(schema.column("number").is_some());
        assert_eq!(schema.sort_key, vec!["number"]);
    }

    #[test]
    fn transaction_sighash_is_nullable() {
        let schema = TableSchema::transaction();
        let sighash = schema.column("sighash").unwrap();
        assert!(sighash.nullable);
    }

    #[test]
    fn all_returns_five_tables() {
        assert_eq!(TableSchema::all().len(), 5);
    }

    #[test]
    fn transaction_sort_key_matches_spec_order() {
        let schema = TableSchema::transaction();
        assert_eq!(
            schema.sort_key,
            vec!["sighash", "to", "from", "block_number", "transaction_index"]
        );
    }

    #[test]
    fn log_sort_key_matches_spec_order() {
        let schema = TableSchema::log();
        assert_eq!(schema.sort_key, vec!["topic0", "address", "block_number", "log_index"]);
    }

    #[test]
    fn row_weight_sums_constant_and_size_columns() {
        let schema = TableSchema::transaction();
        let weight = schema.row_weight(&["from", "to", "input"], |col| {
            if col == "input_size" {
                Some(100)
            } else {
                None
            }
        });
        assert_eq!(weight, 42 + 42 + 100);
    }

    #[test]
    fn row_weight_falls_back_when_size_column_missing() {
        let schema = TableSchema::log();
        let weight = schema.row_weight(&["data"], |_| None);
        assert_eq!(weight, MISSING_SIZE_COLUMN_ESTIMATE);
    }

    #[test]
    fn unknown_column_uses_default_weight() {
        let schema = TableSchema::block();
        assert_eq!(schema.weight_of("not_a_real_column"), ColumnWeight::Constant(DEFAULT_COLUMN_WEIGHT));
    }
}
