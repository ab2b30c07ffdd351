//! Parquet encoding for imported partitions.
//!
//! Unlike a fixed-schema snapshot, every file gets its own schema derived
//! from its column mapping: mapped columns keep their resolved type,
//! unmapped columns are floats. All columns are nullable because cell
//! coercion renders unparseable values as null rather than failing the
//! import.

use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType as ArrowType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use serde_json::Value;

use volta_core::{Error, Result};

use crate::entities::DataType;

/// An output column: name plus the type its cells were coerced to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputColumn {
    pub name: String,
    pub data_type: DataType,
}

fn arrow_type(data_type: DataType) -> ArrowType {
    match data_type {
        DataType::Int => ArrowType::Int64,
        DataType::Float => ArrowType::Float64,
        DataType::Bool => ArrowType::Boolean,
        DataType::Str | DataType::Datetime => ArrowType::Utf8,
    }
}

fn schema_for(columns: &[OutputColumn]) -> Arc<Schema> {
    Arc::new(Schema::new(
        columns
            .iter()
            .map(|c| Field::new(&c.name, arrow_type(c.data_type), true))
            .collect::<Vec<_>>(),
    ))
}

fn writer_properties() -> WriterProperties {
    let created_by = KeyValue {
        key: "created_by".to_string(),
        value: Some("volta-catalog".to_string()),
    };
    WriterProperties::builder()
        .set_key_value_metadata(Some(vec![created_by]))
        .build()
}

fn build_array(column: &OutputColumn, rows: &[BTreeMap<String, Value>]) -> Result<ArrayRef> {
    let cells = rows.iter().map(|row| row.get(&column.name));
    let array: ArrayRef = match column.data_type {
        DataType::Int => Arc::new(Int64Array::from(
            cells.map(|v| v.and_then(Value::as_i64)).collect::<Vec<_>>(),
        )),
        DataType::Float => Arc::new(Float64Array::from(
            cells.map(|v| v.and_then(Value::as_f64)).collect::<Vec<_>>(),
        )),
        DataType::Bool => Arc::new(BooleanArray::from(
            cells.map(|v| v.and_then(Value::as_bool)).collect::<Vec<_>>(),
        )),
        DataType::Str | DataType::Datetime => Arc::new(StringArray::from(
            cells
                .map(|v| v.and_then(Value::as_str).map(ToOwned::to_owned))
                .collect::<Vec<_>>(),
        )),
    };
    Ok(array)
}

/// Encodes rendered rows into a single-batch parquet payload.
pub fn encode_partition(
    columns: &[OutputColumn],
    rows: &[BTreeMap<String, Value>],
) -> Result<Bytes> {
    if columns.is_empty() {
        return Err(Error::bad_request("partition has no columns"));
    }
    let schema = schema_for(columns);
    let arrays = columns
        .iter()
        .map(|c| build_array(c, rows))
        .collect::<Result<Vec<_>>>()?;
    let batch = RecordBatch::try_new(schema.clone(), arrays)
        .map_err(|e| Error::internal(format!("record batch build failed: {e}")))?;

    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema, Some(writer_properties()))
        .map_err(|e| Error::internal(format!("parquet writer init failed: {e}")))?;
    writer
        .write(&batch)
        .map_err(|e| Error::internal(format!("parquet write failed: {e}")))?;
    writer
        .close()
        .map_err(|e| Error::internal(format!("parquet close failed: {e}")))?;
    Ok(Bytes::from(cursor.into_inner()))
}

/// Reads back the row count of a partition payload.
pub fn partition_row_count(bytes: &Bytes) -> Result<u64> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
        .map_err(|e| Error::internal(format!("parquet reader init failed: {e}")))?
        .build()
        .map_err(|e| Error::internal(format!("parquet reader build failed: {e}")))?;
    let mut rows = 0u64;
    for batch in reader {
        let batch =
            batch.map_err(|e| Error::internal(format!("parquet read batch failed: {e}")))?;
        rows += batch.num_rows() as u64;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn encodes_typed_columns_with_nulls() {
        let columns = vec![
            OutputColumn {
                name: "ElapsedTime_s".to_string(),
                data_type: DataType::Float,
            },
            OutputColumn {
                name: "step".to_string(),
                data_type: DataType::Float,
            },
        ];
        let rows = vec![
            row(&[("ElapsedTime_s", Value::from(0.0)), ("step", Value::from(1.0))]),
            row(&[("ElapsedTime_s", Value::from(0.5)), ("step", Value::Null)]),
        ];
        let bytes = encode_partition(&columns, &rows).expect("encode");
        assert_eq!(partition_row_count(&bytes).expect("row count"), 2);
    }

    #[test]
    fn empty_column_set_is_rejected() {
        let err = encode_partition(&[], &[]).unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
