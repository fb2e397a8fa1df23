//! Converts a [`chunk_sink::FrozenChunk`]'s column buffers into Arrow
//! [`RecordBatch`]es and encodes them to the five table files a chunk
//! directory holds, using the per-table column ordering
//! [`schema::TableSchema`] defines, plus two kinds of auxiliary columns not
//! part of that semantic column list: a dense `_idx` row-position column and
//! one `<col>_size` column per wide variable-length field, both consumed by
//! the query executor's per-row response-weight accounting rather than by
//! any user-facing projection.
//!
//! These auxiliary columns are built here, not in [`schema::TableSchema`],
//! so they never appear in `validate_selected_fields`/`project()`'s
//! selectable column lists.

use crate::encode::{self, dictionary_columns, EncodeError, WriterParams};
use crate::EncodedTable;
use arrow::array::{Array, Int32Array, Int64Array, Int8Array, StringArray, TimestampSecondArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chunk_sink::FrozenChunk;
use std::sync::Arc;
use table_builders::{BlockTableBuilder, LogTableBuilder, StateDiffTableBuilder, TraceTableBuilder, TransactionTableBuilder};

fn base_fields(table: &schema::TableSchema) -> Vec<Field> {
    table.columns.iter().map(|c| Field::new(c.name, c.data_type.clone(), c.nullable)).collect()
}

fn opt_str_array(values: &[Option<String>]) -> Arc<StringArray> {
    Arc::new(StringArray::from(values.to_vec()))
}

/// A `<name>_size` auxiliary column: the UTF-8 byte length of each value in
/// `values`, 0 for a null.
fn size_column(name: &'static str, values: &[Option<String>]) -> (Field, Arc<dyn Array>) {
    let sizes: Vec<i32> = values.iter().map(|v| v.as_ref().map(|s| s.len() as i32).unwrap_or(0)).collect();
    (Field::new(name, DataType::Int32, false), Arc::new(Int32Array::from(sizes)))
}

/// The `_idx` auxiliary column: dense row positions `0..len`.
fn idx_column(len: usize) -> (Field, Arc<dyn Array>) {
    let idx: Vec<i32> = (0..len as i32).collect();
    (Field::new("_idx", DataType::Int32, false), Arc::new(Int32Array::from(idx)))
}

/// Appends `_idx` plus every `(name, values)` wide-column size pair's
/// `<name>_size` column to a table's base fields/columns and builds the
/// final [`RecordBatch`].
fn finish_batch(
    mut fields: Vec<Field>,
    mut columns: Vec<Arc<dyn Array>>,
    size_columns: &[(&'static str, &[Option<String>])],
    len: usize,
) -> RecordBatch {
    for (name, values) in size_columns {
        let (field, array) = size_column(name, values);
        fields.push(field);
        columns.push(array);
    }
    let (idx_field, idx_array) = idx_column(len);
    fields.push(idx_field);
    columns.push(idx_array);

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).expect("column count matches schema")
}

fn block_batch(blocks: &mut BlockTableBuilder) -> RecordBatch {
    let table = schema::TableSchema::block();
    let number: Vec<Option<i32>> = blocks.number.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let size: Vec<Option<i32>> = blocks.size.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let timestamp: Vec<Option<i64>> = blocks.timestamp.freeze().into_iter().map(|v| v.map(|n| n as i64)).collect();
    let extra_data = blocks.extra_data.freeze();
    let len = number.len();

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(Int32Array::from(number)),
        opt_str_array(&blocks.hash.freeze()),
        opt_str_array(&blocks.parent_hash.freeze()),
        opt_str_array(&blocks.nonce.freeze()),
        opt_str_array(&blocks.sha3_uncles.freeze()),
        opt_str_array(&blocks.logs_bloom.freeze()),
        opt_str_array(&blocks.transactions_root.freeze()),
        opt_str_array(&blocks.state_root.freeze()),
        opt_str_array(&blocks.receipts_root.freeze()),
        opt_str_array(&blocks.mix_hash.freeze()),
        opt_str_array(&blocks.miner.freeze()),
        opt_str_array(&blocks.difficulty.freeze()),
        opt_str_array(&blocks.total_difficulty.freeze()),
        opt_str_array(&extra_data),
        Arc::new(Int32Array::from(size)),
        opt_str_array(&blocks.gas_limit.freeze()),
        opt_str_array(&blocks.gas_used.freeze()),
        Arc::new(TimestampSecondArray::from(timestamp)),
        opt_str_array(&blocks.base_fee_per_gas.freeze()),
    ];

    finish_batch(base_fields(&table), columns, &[("extra_data_size", &extra_data)], len)
}

fn transaction_batch(transactions: &mut TransactionTableBuilder) -> RecordBatch {
    let table = schema::TableSchema::transaction();
    let block_number: Vec<Option<i32>> = transactions.block_number.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let transaction_index: Vec<Option<i32>> =
        transactions.transaction_index.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let nonce: Vec<Option<i64>> = transactions.nonce.freeze().into_iter().map(|v| v.map(|n| n as i64)).collect();
    let chain_id: Vec<Option<i32>> = transactions.chain_id.freeze();
    let tx_type: Vec<Option<i8>> = transactions.tx_type.freeze();
    let status: Vec<Option<i8>> = transactions.status.freeze();
    let input = transactions.input.freeze();
    let len = block_number.len();

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(Int32Array::from(block_number)),
        Arc::new(Int32Array::from(transaction_index)),
        opt_str_array(&transactions.hash.freeze()),
        opt_str_array(&transactions.from.freeze()),
        opt_str_array(&transactions.to.freeze()),
        opt_str_array(&transactions.gas.freeze()),
        opt_str_array(&transactions.gas_price.freeze()),
        opt_str_array(&transactions.max_fee_per_gas.freeze()),
        opt_str_array(&transactions.max_priority_fee_per_gas.freeze()),
        opt_str_array(&input),
        Arc::new(Int64Array::from(nonce)),
        opt_str_array(&transactions.value.freeze()),
        opt_str_array(&transactions.v.freeze()),
        opt_str_array(&transactions.r.freeze()),
        opt_str_array(&transactions.s.freeze()),
        Arc::new(Int8Array::from(transactions.y_parity.freeze())),
        Arc::new(Int32Array::from(chain_id)),
        opt_str_array(&transactions.sighash.freeze()),
        opt_str_array(&transactions.gas_used.freeze()),
        opt_str_array(&transactions.cumulative_gas_used.freeze()),
        opt_str_array(&transactions.effective_gas_price.freeze()),
        Arc::new(Int8Array::from(tx_type)),
        Arc::new(Int8Array::from(status)),
    ];

    finish_batch(base_fields(&table), columns, &[("input_size", &input)], len)
}

fn log_batch(logs: &mut LogTableBuilder) -> RecordBatch {
    let table = schema::TableSchema::log();
    let block_number: Vec<Option<i32>> = logs.block_number.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let log_index: Vec<Option<i32>> = logs.log_index.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let transaction_index: Vec<Option<i32>> = logs.transaction_index.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let data = logs.data.freeze();
    let len = block_number.len();

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(Int32Array::from(block_number)),
        Arc::new(Int32Array::from(log_index)),
        Arc::new(Int32Array::from(transaction_index)),
        opt_str_array(&logs.transaction_hash.freeze()),
        opt_str_array(&logs.address.freeze()),
        opt_str_array(&data),
        opt_str_array(&logs.topic0.freeze()),
        opt_str_array(&logs.topic1.freeze()),
        opt_str_array(&logs.topic2.freeze()),
        opt_str_array(&logs.topic3.freeze()),
    ];

    finish_batch(base_fields(&table), columns, &[("data_size", &data)], len)
}

fn trace_batch(traces: &mut TraceTableBuilder) -> RecordBatch {
    let table = schema::TableSchema::trace();
    let block_number: Vec<Option<i32>> = traces.block_number.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let transaction_index: Vec<Option<i32>> = traces.transaction_index.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let call_input = traces.call_input.freeze();
    let call_output = traces.call_output.freeze();
    let create_init = traces.create_init.freeze();
    let create_result_code = traces.create_result_code.freeze();
    let len = block_number.len();

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(Int32Array::from(block_number)),
        Arc::new(Int32Array::from(transaction_index)),
        opt_str_array(&traces.trace_address.freeze()),
        opt_str_array(&traces.kind.freeze()),
        opt_str_array(&traces.error.freeze()),
        opt_str_array(&traces.revert_reason.freeze()),
        opt_str_array(&traces.call_from.freeze()),
        opt_str_array(&traces.call_to.freeze()),
        opt_str_array(&traces.call_value.freeze()),
        opt_str_array(&traces.call_gas.freeze()),
        opt_str_array(&traces.call_sighash.freeze()),
        opt_str_array(&traces.call_type.freeze()),
        opt_str_array(&call_input),
        opt_str_array(&traces.call_gas_used.freeze()),
        opt_str_array(&call_output),
        opt_str_array(&traces.create_from.freeze()),
        opt_str_array(&traces.create_value.freeze()),
        opt_str_array(&traces.create_gas.freeze()),
        opt_str_array(&create_init),
        opt_str_array(&traces.create_gas_used.freeze()),
        opt_str_array(&traces.create_result_address.freeze()),
        opt_str_array(&create_result_code),
        opt_str_array(&traces.suicide_address.freeze()),
        opt_str_array(&traces.suicide_refund_address.freeze()),
        opt_str_array(&traces.suicide_balance.freeze()),
        opt_str_array(&traces.reward_author.freeze()),
        opt_str_array(&traces.reward_value.freeze()),
        opt_str_array(&traces.reward_type.freeze()),
    ];

    finish_batch(
        base_fields(&table),
        columns,
        &[
            ("call_input_size", &call_input),
            ("call_output_size", &call_output),
            ("create_init_size", &create_init),
            ("create_result_code_size", &create_result_code),
        ],
        len,
    )
}

fn state_diff_batch(state_diffs: &mut StateDiffTableBuilder) -> RecordBatch {
    let table = schema::TableSchema::state_diff();
    let block_number: Vec<Option<i32>> = state_diffs.block_number.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let transaction_index: Vec<Option<i32>> = state_diffs.transaction_index.freeze().into_iter().map(|v| v.map(|n| n as i32)).collect();
    let prev = state_diffs.prev.freeze();
    let next = state_diffs.next.freeze();
    let len = block_number.len();

    let columns: Vec<Arc<dyn arrow::array::Array>> = vec![
        Arc::new(Int32Array::from(block_number)),
        Arc::new(Int32Array::from(transaction_index)),
        opt_str_array(&state_diffs.address.freeze()),
        opt_str_array(&state_diffs.key.freeze()),
        opt_str_array(&state_diffs.kind.freeze()),
        opt_str_array(&prev),
        opt_str_array(&next),
    ];

    finish_batch(base_fields(&table), columns, &[("prev_size", &prev), ("next_size", &next)], len)
}

/// Encode a frozen chunk's five tables into Parquet bytes, ready to stage
/// under a chunk directory via [`crate::ChunkPublisher::publish_chunk`].
pub fn encode_frozen_chunk(chunk: &mut FrozenChunk) -> Result<Vec<EncodedTable>, EncodeError> {
    let blocks = encode::encode_table(&block_batch(&mut chunk.blocks), &WriterParams::with_dictionary_columns(dictionary_columns::BLOCK.to_vec()))?;
    let transactions = encode::encode_table(
        &transaction_batch(&mut chunk.transactions),
        &WriterParams::with_dictionary_columns(dictionary_columns::TRANSACTION.to_vec()),
    )?;
    let logs = encode::encode_table(&log_batch(&mut chunk.logs), &WriterParams::with_dictionary_columns(dictionary_columns::LOG.to_vec()))?;
    let traces = encode::encode_table(&trace_batch(&mut chunk.traces), &WriterParams::with_dictionary_columns(dictionary_columns::TRACE.to_vec()))?;
    let state_diffs = encode::encode_table(
        &state_diff_batch(&mut chunk.state_diffs),
        &WriterParams::with_dictionary_columns(dictionary_columns::STATE_DIFF.to_vec()),
    )?;

    Ok(vec![
        EncodedTable { file_name: "blocks.parquet", bytes: blocks },
        EncodedTable { file_name: "transactions.parquet", bytes: transactions },
        EncodedTable { file_name: "logs.parquet", bytes: logs },
        EncodedTable { file_name: "traces.parquet", bytes: traces },
        EncodedTable { file_name: "statediffs.parquet", bytes: state_diffs },
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use chain_types::ShortHash;
    use table_builders::{BlockRow, LogRow, StateDiffRow, TableBuilder, TraceRow, TransactionRow};

    fn sample_chunk() -> FrozenChunk {
        let mut blocks = BlockTableBuilder::default();
        blocks.append(&BlockRow {
            number: 1,
            hash: "0xblock1".into(),
            parent_hash: "0xblock0".into(),
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

        let mut transactions = TransactionTableBuilder::default();
        transactions.append(&TransactionRow {
            block_number: 1,
            transaction_index: 0,
            hash: "0xtx1".into(),
            from: "0xfrom".into(),
            to: Some("0xto".into()),
            gas: "0x1".into(),
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: "0xa9059cbb".into(),
            nonce: 1,
            value: "0".into(),
            v: None,
            r: None,
            s: None,
            y_parity: None,
            chain_id: Some(1),
            gas_used: None,
            cumulative_gas_used: None,
            effective_gas_price: None,
            tx_type: Some(2),
            status: Some(1),
        });

        let mut logs = LogTableBuilder::default();
        logs.append(&LogRow {
            block_number: 1,
            log_index: 0,
            transaction_index: 0,
            transaction_hash: "0xtx1".into(),
            address: "0xaddr".into(),
            data: "0x".into(),
            topics: vec!["0xtopic".into()],
        });

        let mut traces = TraceTableBuilder::default();
        traces.append(&TraceRow {
            block_number: 1,
            transaction_index: Some(0),
            trace_address: "0".into(),
            kind: "call".into(),
            error: None,
            revert_reason: None,
            call_from: Some("0xfrom".into()),
            call_to: Some("0xto".into()),
            call_value: Some("0".into()),
            call_gas: Some("0x1".into()),
            call_sighash: Some("0xa9059cbb".into()),
            call_type: Some("call".into()),
            call_input: Some("0xa9059cbb".into()),
            call_gas_used: Some("0x1".into()),
            call_output: Some("0x".into()),
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

        let mut state_diffs = StateDiffTableBuilder::default();
        state_diffs.append(&StateDiffRow {
            block_number: 1,
            transaction_index: Some(0),
            address: "0xaddr".into(),
            key: None,
            kind: "update".into(),
            prev: Some("0x0".into()),
            next: Some("0x1".into()),
        });

        FrozenChunk {
            first_block: 1,
            last_block: 1,
            last_hash: ShortHash::new("0xblock1"),
            blocks,
            transactions,
            logs,
            traces,
            state_diffs,
        }
    }

    #[test]
    fn encodes_five_parquet_files_with_magic_bytes() {
        let mut chunk = sample_chunk();
        let tables = encode_frozen_chunk(&mut chunk).unwrap();
        assert_eq!(tables.len(), 5);
        for table in &tables {
            assert_eq!(&table.bytes[0..4], b"PAR1", "{} missing parquet magic", table.file_name);
        }
    }
}
