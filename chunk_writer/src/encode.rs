//! Parquet encoding parameters: zstd level 12, 32KiB data pages, 15k-row
//! row groups, and a per-table dictionary-encoded column allowlist.

use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;
use parquet::schema::types::ColumnPath;
use snafu::{ResultExt, Snafu};

/// Errors from encoding a table into Parquet bytes.
#[derive(Debug, Snafu)]
pub enum EncodeError {
    /// The requested zstd compression level was out of range.
    #[snafu(display("invalid zstd compression level {level}: {source}"))]
    InvalidCompressionLevel { level: i32, source: parquet::errors::ParquetError },

    /// The Arrow writer failed to write or finalize the file.
    #[snafu(display("failed to write parquet table: {source}"))]
    Write { source: parquet::errors::ParquetError },
}

/// Encoding parameters for one table's Parquet file.
#[derive(Debug, Clone)]
pub struct WriterParams {
    /// Rows per row group. `etha`'s writer uses 15000 uniformly.
    pub row_group_size: usize,
    /// Target page size, in bytes. `etha`'s writer uses 32KiB.
    pub data_page_size: usize,
    /// Zstd compression level. `etha`'s writer uses 12.
    pub compression_level: i32,
    /// Columns to dictionary-encode; every other column is written plain.
    pub dictionary_columns: Vec<&'static str>,
}

impl WriterParams {
    /// The shared defaults every table uses, differing only in which
    /// columns are dictionary-encoded.
    pub fn with_dictionary_columns(dictionary_columns: Vec<&'static str>) -> Self {
        Self {
            row_group_size: 15_000,
            data_page_size: 32 * 1024,
            compression_level: 12,
            dictionary_columns,
        }
    }

    fn properties(&self) -> Result<WriterProperties, EncodeError> {
        let zstd_level =
            ZstdLevel::try_new(self.compression_level).context(InvalidCompressionLevelSnafu { level: self.compression_level })?;

        let mut builder = WriterProperties::builder()
            .set_compression(Compression::ZSTD(zstd_level))
            .set_data_page_size_limit(self.data_page_size)
            .set_max_row_group_size(self.row_group_size)
            .set_dictionary_enabled(false);

        for column in &self.dictionary_columns {
            builder = builder.set_column_dictionary_enabled(ColumnPath::from(column.to_string()), true);
        }

        Ok(builder.build())
    }
}

/// Encode a single Arrow [`RecordBatch`] (one table's worth of a chunk) to
/// Parquet bytes using `params`.
pub fn encode_table(batch: &RecordBatch, params: &WriterParams) -> Result<Vec<u8>, EncodeError> {
    let properties = params.properties()?;
    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buffer, batch.schema(), Some(properties)).context(WriteSnafu)?;
    writer.write(batch).context(WriteSnafu)?;
    writer.close().context(WriteSnafu)?;
    Ok(buffer)
}

/// The table-specific dictionary column sets used by the ingest pipeline.
pub mod dictionary_columns {
    /// `transactions.parquet`
    pub const TRANSACTION: &[&str] = &["to", "sighash"];
    /// `logs.parquet`
    pub const LOG: &[&str] = &["address", "topic0"];
    /// `traces.parquet`
    pub const TRACE: &[&str] = &["type", "call_from", "call_to", "call_type"];
    /// `statediffs.parquet`
    pub const STATE_DIFF: &[&str] = &["kind", "address"];
    /// `blocks.parquet` is written without dictionary encoding at all.
    pub const BLOCK: &[&str] = &[];
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::Int32Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    #[test]
    fn encodes_a_trivial_batch() {
        let schema = Arc::new(Schema::new(vec![Field::new("number", DataType::Int32, false)]));
        let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1, 2, 3]))]).unwrap();
        let params = WriterParams::with_dictionary_columns(vec![]);
        let bytes = encode_table(&batch, &params).unwrap();
        assert!(!bytes.is_empty());
        // Parquet files start with the magic bytes "PAR1".
        assert_eq!(&bytes[0..4], b"PAR1");
    }

    #[test]
    fn rejects_out_of_range_compression_level() {
        let params = WriterParams {
            compression_level: 999,
            ..WriterParams::with_dictionary_columns(vec![])
        };
        assert!(params.properties().is_err());
    }
}
