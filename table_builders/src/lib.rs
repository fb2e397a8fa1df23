//! Column buffers that accumulate one chunk's worth of rows before the
//! chunk writer freezes and sorts them.

#![warn(missing_debug_implementations, missing_docs)]

use snafu::Snafu;

/// Errors from parsing an upstream RPC `0x`-prefixed hex quantity. Malformed
/// upstream data is classified, not fatal to the process: callers convert
/// this into the ingest error taxonomy rather than panicking.
#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum QuantityError {
    /// The value was missing its `0x` prefix.
    #[snafu(display("quantity not 0x-prefixed: {value}"))]
    NotHexPrefixed { value: String },

    /// The value was `0x`-prefixed but not valid hex.
    #[snafu(display("invalid hex quantity: {value}"))]
    InvalidHex { value: String },
}

/// Parse a `0x`-prefixed hex quantity into a `u64`.
pub fn qty2int(value: &str) -> Result<u64, QuantityError> {
    let hex = value.strip_prefix("0x").ok_or_else(|| QuantityError::NotHexPrefixed { value: value.to_string() })?;
    u64::from_str_radix(hex, 16).map_err(|_| QuantityError::InvalidHex { value: value.to_string() })
}

/// The largest integer that round-trips exactly through an `f64`/JS number;
/// quantities above this are kept as decimal-string text rather than a
/// numeric column so downstream JSON consumers don't silently lose
/// precision.
pub const MAX_SAFE_INTEGER: u128 = 1u128 << 53;

/// Render a `0x`-prefixed hex quantity as decimal text, used for `value`-
/// shaped columns (wei amounts, difficulty, ...) that can exceed 2^53 and so
/// are always stored as strings rather than a native integer column.
pub fn qty_as_decimal_text(value: &str) -> Result<String, QuantityError> {
    let hex = value.strip_prefix("0x").unwrap_or(value);
    let n = u128::from_str_radix(hex, 16).map_err(|_| QuantityError::InvalidHex { value: value.to_string() })?;
    Ok(n.to_string())
}

/// A growable column buffer for one output column. Generic over the Rust
/// value type; [`ColumnBuffer::freeze`] hands back the accumulated values
/// for a chunk and resets the buffer for the next one.
#[derive(Debug, Clone, Default)]
pub struct ColumnBuffer<T> {
    values: Vec<Option<T>>,
}

impl<T> ColumnBuffer<T> {
    /// An empty buffer.
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }

    /// Append a present value.
    pub fn append(&mut self, value: T) {
        self.values.push(Some(value));
    }

    /// Append a null.
    pub fn append_null(&mut self) {
        self.values.push(None);
    }

    /// Append an optional value.
    pub fn append_opt(&mut self, value: Option<T>) {
        self.values.push(value);
    }

    /// Number of rows buffered so far.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the buffer holds no rows.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Take the buffered values, leaving the buffer empty.
    pub fn freeze(&mut self) -> Vec<Option<T>> {
        std::mem::take(&mut self.values)
    }
}

/// A table builder accumulates rows for one table, tracks an approximate
/// buffered byte size for flush-trigger decisions, and freezes into
/// column-major data when the chunk writer rolls a chunk.
pub trait TableBuilder {
    /// The row type this builder accepts.
    type Row;

    /// Append one row.
    fn append(&mut self, row: &Self::Row);

    /// Number of rows buffered so far.
    fn len(&self) -> usize;

    /// Whether no rows are buffered.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A rough estimate of buffered memory, used by the chunk sink's flush
    /// trigger. Mirrors `TableBuilderBase.bytesize`.
    fn buffered_bytes(&self) -> usize;
}

/// One accumulated block row, matching `BlockTableBuilder.append`'s field
/// set.
#[derive(Debug, Clone)]
pub struct BlockRow {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub nonce: Option<String>,
    pub sha3_uncles: String,
    pub logs_bloom: String,
    pub transactions_root: String,
    pub state_root: String,
    pub receipts_root: String,
    pub mix_hash: Option<String>,
    pub miner: String,
    pub difficulty: Option<String>,
    pub total_difficulty: Option<String>,
    pub extra_data: String,
    pub size: u32,
    pub gas_limit: String,
    pub gas_used: String,
    pub timestamp: u64,
    pub base_fee_per_gas: Option<String>,
}

/// Column buffers for the `block` table.
#[derive(Debug, Default)]
pub struct BlockTableBuilder {
    pub number: ColumnBuffer<u64>,
    pub hash: ColumnBuffer<String>,
    pub parent_hash: ColumnBuffer<String>,
    pub nonce: ColumnBuffer<String>,
    pub sha3_uncles: ColumnBuffer<String>,
    pub logs_bloom: ColumnBuffer<String>,
    pub transactions_root: ColumnBuffer<String>,
    pub state_root: ColumnBuffer<String>,
    pub receipts_root: ColumnBuffer<String>,
    pub mix_hash: ColumnBuffer<String>,
    pub miner: ColumnBuffer<String>,
    pub difficulty: ColumnBuffer<String>,
    pub total_difficulty: ColumnBuffer<String>,
    pub extra_data: ColumnBuffer<String>,
    pub size: ColumnBuffer<u32>,
    pub gas_limit: ColumnBuffer<String>,
    pub gas_used: ColumnBuffer<String>,
    pub timestamp: ColumnBuffer<u64>,
    pub base_fee_per_gas: ColumnBuffer<String>,
}

impl TableBuilder for BlockTableBuilder {
    type Row = BlockRow;

    fn append(&mut self, row: &BlockRow) {
        self.number.append(row.number);
        self.hash.append(row.hash.clone());
        self.parent_hash.append(row.parent_hash.clone());
        self.nonce.append_opt(row.nonce.clone());
        self.sha3_uncles.append(row.sha3_uncles.clone());
        self.logs_bloom.append(row.logs_bloom.clone());
        self.transactions_root.append(row.transactions_root.clone());
        self.state_root.append(row.state_root.clone());
        self.receipts_root.append(row.receipts_root.clone());
        self.mix_hash.append_opt(row.mix_hash.clone());
        self.miner.append(row.miner.clone());
        self.difficulty.append_opt(row.difficulty.clone());
        self.total_difficulty.append_opt(row.total_difficulty.clone());
        self.extra_data.append(row.extra_data.clone());
        self.size.append(row.size);
        self.gas_limit.append(row.gas_limit.clone());
        self.gas_used.append(row.gas_used.clone());
        self.timestamp.append(row.timestamp);
        self.base_fee_per_gas.append_opt(row.base_fee_per_gas.clone());
    }

    fn len(&self) -> usize {
        self.number.len()
    }

    fn buffered_bytes(&self) -> usize {
        // A fixed per-row estimate stands in for summing each column's
        // actual byte size, since most columns here are short fixed-width
        // hex strings.
        self.len() * 256
    }
}

/// One accumulated transaction row, matching `TxTableBuilder.append`.
#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub block_number: u64,
    pub transaction_index: u32,
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub gas: String,
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub input: String,
    pub nonce: u64,
    pub value: String,
    pub v: Option<String>,
    pub r: Option<String>,
    pub s: Option<String>,
    pub y_parity: Option<i8>,
    pub chain_id: Option<i32>,
    pub gas_used: Option<String>,
    pub cumulative_gas_used: Option<String>,
    pub effective_gas_price: Option<String>,
    pub tx_type: Option<i8>,
    pub status: Option<i8>,
}

/// The first 4 bytes of calldata, used as the `sighash` column. Returns
/// `None` for calldata shorter than a selector (plain value transfers).
pub fn sighash_of(input: &str) -> Option<String> {
    if input.len() >= 10 {
        Some(input[..10].to_string())
    } else {
        None
    }
}

/// Column buffers for the `transaction` table.
#[derive(Debug, Default)]
pub struct TransactionTableBuilder {
    pub block_number: ColumnBuffer<u64>,
    pub transaction_index: ColumnBuffer<u32>,
    pub hash: ColumnBuffer<String>,
    pub from: ColumnBuffer<String>,
    pub to: ColumnBuffer<String>,
    pub gas: ColumnBuffer<String>,
    pub gas_price: ColumnBuffer<String>,
    pub max_fee_per_gas: ColumnBuffer<String>,
    pub max_priority_fee_per_gas: ColumnBuffer<String>,
    pub input: ColumnBuffer<String>,
    pub nonce: ColumnBuffer<u64>,
    pub value: ColumnBuffer<String>,
    pub v: ColumnBuffer<String>,
    pub r: ColumnBuffer<String>,
    pub s: ColumnBuffer<String>,
    pub y_parity: ColumnBuffer<i8>,
    pub chain_id: ColumnBuffer<i32>,
    pub sighash: ColumnBuffer<String>,
    pub gas_used: ColumnBuffer<String>,
    pub cumulative_gas_used: ColumnBuffer<String>,
    pub effective_gas_price: ColumnBuffer<String>,
    pub tx_type: ColumnBuffer<i8>,
    pub status: ColumnBuffer<i8>,
}

impl TableBuilder for TransactionTableBuilder {
    type Row = TransactionRow;

    fn append(&mut self, row: &TransactionRow) {
        self.block_number.append(row.block_number);
        self.transaction_index.append(row.transaction_index);
        self.hash.append(row.hash.clone());
        self.from.append(row.from.clone());
        self.to.append_opt(row.to.clone());
        self.gas.append(row.gas.clone());
        self.gas_price.append_opt(row.gas_price.clone());
        self.max_fee_per_gas.append_opt(row.max_fee_per_gas.clone());
        self.max_priority_fee_per_gas.append_opt(row.max_priority_fee_per_gas.clone());
        self.input.append(row.input.clone());
        self.nonce.append(row.nonce);
        self.value.append(row.value.clone());
        self.v.append_opt(row.v.clone());
        self.r.append_opt(row.r.clone());
        self.s.append_opt(row.s.clone());
        self.y_parity.append_opt(row.y_parity);
        self.chain_id.append_opt(row.chain_id);
        self.sighash.append_opt(sighash_of(&row.input));
        self.gas_used.append_opt(row.gas_used.clone());
        self.cumulative_gas_used.append_opt(row.cumulative_gas_used.clone());
        self.effective_gas_price.append_opt(row.effective_gas_price.clone());
        self.tx_type.append_opt(row.tx_type);
        self.status.append_opt(row.status);
    }

    fn len(&self) -> usize {
        self.block_number.len()
    }

    fn buffered_bytes(&self) -> usize {
        self.len() * 512
    }
}

/// One accumulated log row, matching `LogTableBuilder.append`.
#[derive(Debug, Clone)]
pub struct LogRow {
    pub block_number: u64,
    pub log_index: u32,
    pub transaction_index: u32,
    pub transaction_hash: String,
    pub address: String,
    pub data: String,
    pub topics: Vec<String>,
}

/// Column buffers for the `log` table.
#[derive(Debug, Default)]
pub struct LogTableBuilder {
    pub block_number: ColumnBuffer<u64>,
    pub log_index: ColumnBuffer<u32>,
    pub transaction_index: ColumnBuffer<u32>,
    pub transaction_hash: ColumnBuffer<String>,
    pub address: ColumnBuffer<String>,
    pub data: ColumnBuffer<String>,
    pub topic0: ColumnBuffer<String>,
    pub topic1: ColumnBuffer<String>,
    pub topic2: ColumnBuffer<String>,
    pub topic3: ColumnBuffer<String>,
}

impl TableBuilder for LogTableBuilder {
    type Row = LogRow;

    fn append(&mut self, row: &LogRow) {
        self.block_number.append(row.block_number);
        self.log_index.append(row.log_index);
        self.transaction_index.append(row.transaction_index);
        self.transaction_hash.append(row.transaction_hash.clone());
        self.address.append(row.address.clone());
        self.data.append(row.data.clone());
        self.topic0.append_opt(row.topics.first().cloned());
        self.topic1.append_opt(row.topics.get(1).cloned());
        self.topic2.append_opt(row.topics.get(2).cloned());
        self.topic3.append_opt(row.topics.get(3).cloned());
    }

    fn len(&self) -> usize {
        self.block_number.len()
    }

    fn buffered_bytes(&self) -> usize {
        self.len() * 384
    }
}

/// One accumulated trace row, matching `TraceTableBuilder.append`. Variant-
/// specific columns (call/create/suicide/reward) are all carried nullable on
/// one wide, flattened row, mirroring `schema::TableSchema::trace()`.
#[derive(Debug, Clone, Default)]
pub struct TraceRow {
    pub block_number: u64,
    pub transaction_index: Option<u32>,
    pub trace_address: String,
    pub kind: String,
    pub error: Option<String>,
    pub revert_reason: Option<String>,
    pub call_from: Option<String>,
    pub call_to: Option<String>,
    pub call_value: Option<String>,
    pub call_gas: Option<String>,
    pub call_sighash: Option<String>,
    pub call_type: Option<String>,
    pub call_input: Option<String>,
    pub call_gas_used: Option<String>,
    pub call_output: Option<String>,
    pub create_from: Option<String>,
    pub create_value: Option<String>,
    pub create_gas: Option<String>,
    pub create_init: Option<String>,
    pub create_gas_used: Option<String>,
    pub create_result_address: Option<String>,
    pub create_result_code: Option<String>,
    pub suicide_address: Option<String>,
    pub suicide_refund_address: Option<String>,
    pub suicide_balance: Option<String>,
    pub reward_author: Option<String>,
    pub reward_value: Option<String>,
    pub reward_type: Option<String>,
}

/// Column buffers for the `trace` table.
#[derive(Debug, Default)]
pub struct TraceTableBuilder {
    pub block_number: ColumnBuffer<u64>,
    pub transaction_index: ColumnBuffer<u32>,
    pub trace_address: ColumnBuffer<String>,
    pub kind: ColumnBuffer<String>,
    pub error: ColumnBuffer<String>,
    pub revert_reason: ColumnBuffer<String>,
    pub call_from: ColumnBuffer<String>,
    pub call_to: ColumnBuffer<String>,
    pub call_value: ColumnBuffer<String>,
    pub call_gas: ColumnBuffer<String>,
    pub call_sighash: ColumnBuffer<String>,
    pub call_type: ColumnBuffer<String>,
    pub call_input: ColumnBuffer<String>,
    pub call_gas_used: ColumnBuffer<String>,
    pub call_output: ColumnBuffer<String>,
    pub create_from: ColumnBuffer<String>,
    pub create_value: ColumnBuffer<String>,
    pub create_gas: ColumnBuffer<String>,
    pub create_init: ColumnBuffer<String>,
    pub create_gas_used: ColumnBuffer<String>,
    pub create_result_address: ColumnBuffer<String>,
    pub create_result_code: ColumnBuffer<String>,
    pub suicide_address: ColumnBuffer<String>,
    pub suicide_refund_address: ColumnBuffer<String>,
    pub suicide_balance: ColumnBuffer<String>,
    pub reward_author: ColumnBuffer<String>,
    pub reward_value: ColumnBuffer<String>,
    pub reward_type: ColumnBuffer<String>,
}

impl TableBuilder for TraceTableBuilder {
    type Row = TraceRow;

    fn append(&mut self, row: &TraceRow) {
        self.block_number.append(row.block_number);
        self.transaction_index.append_opt(row.transaction_index);
        self.trace_address.append(row.trace_address.clone());
        self.kind.append(row.kind.clone());
        self.error.append_opt(row.error.clone());
        self.revert_reason.append_opt(row.revert_reason.clone());
        self.call_from.append_opt(row.call_from.clone());
        self.call_to.append_opt(row.call_to.clone());
        self.call_value.append_opt(row.call_value.clone());
        self.call_gas.append_opt(row.call_gas.clone());
        self.call_sighash.append_opt(row.call_sighash.clone());
        self.call_type.append_opt(row.call_type.clone());
        self.call_input.append_opt(row.call_input.clone());
        self.call_gas_used.append_opt(row.call_gas_used.clone());
        self.call_output.append_opt(row.call_output.clone());
        self.create_from.append_opt(row.create_from.clone());
        self.create_value.append_opt(row.create_value.clone());
        self.create_gas.append_opt(row.create_gas.clone());
        self.create_init.append_opt(row.create_init.clone());
        self.create_gas_used.append_opt(row.create_gas_used.clone());
        self.create_result_address.append_opt(row.create_result_address.clone());
        self.create_result_code.append_opt(row.create_result_code.clone());
        self.suicide_address.append_opt(row.suicide_address.clone());
        self.suicide_refund_address.append_opt(row.suicide_refund_address.clone());
        self.suicide_balance.append_opt(row.suicide_balance.clone());
        self.reward_author.append_opt(row.reward_author.clone());
        self.reward_value.append_opt(row.reward_value.clone());
        self.reward_type.append_opt(row.reward_type.clone());
    }

    fn len(&self) -> usize {
        self.block_number.len()
    }

    fn buffered_bytes(&self) -> usize {
        self.len() * 640
    }
}

/// One accumulated state-diff row, matching `StateDiffTableBuilder.append`.
#[derive(Debug, Clone)]
pub struct StateDiffRow {
    pub block_number: u64,
    pub transaction_index: Option<u32>,
    pub address: String,
    pub key: Option<String>,
    pub kind: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Column buffers for the `state_diff` table.
#[derive(Debug, Default)]
pub struct StateDiffTableBuilder {
    pub block_number: ColumnBuffer<u64>,
    pub transaction_index: ColumnBuffer<u32>,
    pub address: ColumnBuffer<String>,
    pub key: ColumnBuffer<String>,
    pub kind: ColumnBuffer<String>,
    pub prev: ColumnBuffer<String>,
    pub next: ColumnBuffer<String>,
}

impl TableBuilder for StateDiffTableBuilder {
    type Row = StateDiffRow;

    fn append(&mut self, row: &StateDiffRow) {
        self.block_number.append(row.block_number);
        self.transaction_index.append_opt(row.transaction_index);
        self.address.append(row.address.clone());
        self.key.append_opt(row.key.clone());
        self.kind.append(row.kind.clone());
        self.prev.append_opt(row.prev.clone());
        self.next.append_opt(row.next.clone());
    }

    fn len(&self) -> usize {
        self.block_number.len()
    }

    fn buffered_bytes(&self) -> usize {
        self.len() * 192
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qty2int_parses_hex_quantity() {
        assert_eq!(qty2int("0x1a"), Ok(26));
        assert_eq!(qty2int("0x0"), Ok(0));
    }

    #[test]
    fn qty2int_rejects_missing_prefix() {
        assert_eq!(qty2int("1a"), Err(QuantityError::NotHexPrefixed { value: "1a".to_string() }));
    }

    #[test]
    fn qty2int_rejects_invalid_hex() {
        assert_eq!(qty2int("0xzz"), Err(QuantityError::InvalidHex { value: "0xzz".to_string() }));
    }

    #[test]
    fn qty_as_decimal_text_handles_values_above_2_53() {
        // 2^60, well past MAX_SAFE_INTEGER
        assert_eq!(qty_as_decimal_text("0x1000000000000000"), Ok("1152921504606846976".to_string()));
    }

    #[test]
    fn sighash_of_requires_four_selector_bytes() {
        assert_eq!(sighash_of("0xa9059cbb000000"), Some("0xa9059cbb".to_string()));
        assert_eq!(sighash_of("0x"), None);
    }

    #[test]
    fn block_builder_tracks_row_count() {
        let mut builder = BlockTableBuilder::default();
        assert!(builder.is_empty());
        builder.append(&BlockRow {
            number: 1,
            hash: "0x1".into(),
            parent_hash: "0x0".into(),
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
            size: 100,
            gas_limit: "0x1".into(),
            gas_used: "0x1".into(),
            timestamp: 1_700_000_000,
            base_fee_per_gas: None,
        });
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.number.freeze(), vec![Some(1)]);
    }

    #[test]
    fn log_builder_spreads_topics_across_fixed_columns() {
        let mut builder = LogTableBuilder::default();
        builder.append(&LogRow {
            block_number: 1,
            log_index: 0,
            transaction_index: 0,
            transaction_hash: "0xabc".into(),
            address: "0xaddr".into(),
            data: "0x".into(),
            topics: vec!["0x1".into(), "0x2".into()],
        });
        assert_eq!(builder.topic0.freeze(), vec![Some("0x1".to_string())]);
        assert_eq!(builder.topic2.freeze(), vec![None]);
    }

    #[test]
    fn trace_builder_tracks_row_count() {
        let mut builder = TraceTableBuilder::default();
        builder.append(&TraceRow {
            block_number: 1,
            transaction_index: Some(0),
            trace_address: "0".into(),
            kind: "call".into(),
            call_from: Some("0xfrom".into()),
            call_to: Some("0xto".into()),
            ..Default::default()
        });
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.kind.freeze(), vec![Some("call".to_string())]);
    }

    #[test]
    fn state_diff_builder_tracks_row_count() {
        let mut builder = StateDiffTableBuilder::default();
        builder.append(&StateDiffRow {
            block_number: 1,
            transaction_index: None,
            address: "0xaddr".into(),
            key: Some("0x0".into()),
            kind: "storage".into(),
            prev: None,
            next: Some("0x1".into()),
        });
        assert_eq!(builder.len(), 1);
        assert_eq!(builder.address.freeze(), vec![Some("0xaddr".to_string())]);
    }
}
