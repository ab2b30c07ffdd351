//! CSV parsing and file summarization for direct uploads.
//!
//! Harvester-discovered files are summarized on the harvester; direct
//! uploads are summarized here, with the same output shape so summary
//! equality works across both ingestion routes.

use std::collections::BTreeMap;
use std::path::Path;

use bytes::Bytes;
use serde_json::Value;

use volta_core::{Error, Result};

use crate::entities::{ColumnSummary, DataType, FileSummary};

/// Rows sampled into a file summary.
pub const SUMMARY_ROWS: usize = 10;

/// A parsed delimited table: ordered headers plus rows keyed by header.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub headers: Vec<String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl ParsedTable {
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.rows.len() as u64
    }
}

/// Parses an in-memory CSV payload with a header row.
pub fn parse_csv(bytes: &Bytes) -> Result<ParsedTable> {
    parse_reader(reader_builder().from_reader(bytes.as_ref()))
}

/// Parses a spooled CSV payload from disk.
pub fn parse_csv_file(path: &Path) -> Result<ParsedTable> {
    let reader = reader_builder()
        .from_path(path)
        .map_err(|e| Error::storage_with_source("open spooled upload payload", e))?;
    parse_reader(reader)
}

fn reader_builder() -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    builder.has_headers(true).trim(csv::Trim::All);
    builder
}

fn parse_reader<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<ParsedTable> {
    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| Error::bad_request(format!("unreadable CSV header: {e}")))?
        .iter()
        .map(ToOwned::to_owned)
        .collect();
    if headers.is_empty() {
        return Err(Error::bad_request("CSV payload has no columns"));
    }
    let mut seen = std::collections::BTreeSet::new();
    for header in &headers {
        if !seen.insert(header.as_str()) {
            return Err(Error::bad_request(format!(
                "CSV payload repeats column '{header}'"
            )));
        }
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| Error::bad_request(format!("unreadable CSV row: {e}")))?;
        let row: BTreeMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();
        rows.push(row);
    }
    Ok(ParsedTable { headers, rows })
}

fn infer_type<'a>(values: impl Iterator<Item = &'a str> + Clone) -> DataType {
    let mut any = false;
    let mut all_int = true;
    let mut all_float = true;
    let mut all_bool = true;
    for value in values {
        if value.is_empty() {
            continue;
        }
        any = true;
        all_int &= value.parse::<i64>().is_ok();
        all_float &= value.parse::<f64>().is_ok();
        all_bool &= matches!(value.to_ascii_lowercase().as_str(), "true" | "false");
    }
    if !any {
        return DataType::Str;
    }
    if all_bool {
        DataType::Bool
    } else if all_int {
        DataType::Int
    } else if all_float {
        DataType::Float
    } else {
        DataType::Str
    }
}

fn typed_value(raw: &str, data_type: DataType) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match data_type {
        DataType::Int => raw.parse::<i64>().map_or(Value::Null, Value::from),
        DataType::Float => raw.parse::<f64>().map_or(Value::Null, Value::from),
        DataType::Bool => Value::Bool(raw.eq_ignore_ascii_case("true")),
        DataType::Str | DataType::Datetime => Value::from(raw),
    }
}

/// Summarizes a parsed table: per column, the inferred type and the
/// first [`SUMMARY_ROWS`] values.
#[must_use]
pub fn summarize(table: &ParsedTable) -> FileSummary {
    let sample = &table.rows[..table.rows.len().min(SUMMARY_ROWS)];
    let mut columns = BTreeMap::new();
    for header in &table.headers {
        let cells = sample
            .iter()
            .map(|row| row.get(header).map_or("", String::as_str));
        let data_type = infer_type(cells.clone());
        columns.insert(
            header.clone(),
            ColumnSummary {
                data_type,
                values: cells.map(|raw| typed_value(raw, data_type)).collect(),
            },
        );
    }
    FileSummary(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = "time,Ewe,cycle,note\n0.0,3.70,1,rest\n0.5,3.71,1,rest\n1.0,3.72,2,charge\n";

    #[test]
    fn parses_headers_and_rows() {
        let table = parse_csv(&Bytes::from(PAYLOAD)).expect("parse");
        assert_eq!(table.headers, vec!["time", "Ewe", "cycle", "note"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows[2]["note"], "charge");
    }

    #[test]
    fn summary_infers_column_types() {
        let table = parse_csv(&Bytes::from(PAYLOAD)).expect("parse");
        let summary = summarize(&table);
        assert_eq!(summary.0["time"].data_type, DataType::Float);
        assert_eq!(summary.0["cycle"].data_type, DataType::Int);
        assert_eq!(summary.0["note"].data_type, DataType::Str);
        assert_eq!(summary.0["Ewe"].values[0], Value::from(3.7));
    }

    #[test]
    fn identical_payloads_summarize_identically() {
        let a = summarize(&parse_csv(&Bytes::from(PAYLOAD)).expect("parse"));
        let b = summarize(&parse_csv(&Bytes::from(PAYLOAD)).expect("parse"));
        assert_eq!(a, b);

        let changed = PAYLOAD.replace("3.70", "3.75");
        let c = summarize(&parse_csv(&Bytes::from(changed)).expect("parse"));
        assert_ne!(a, c);
    }

    #[test]
    fn spooled_payloads_parse_like_buffers() {
        let path = std::env::temp_dir().join(format!("volta-tabular-{}.csv", uuid::Uuid::new_v4()));
        std::fs::write(&path, PAYLOAD).expect("write spool");
        let from_file = parse_csv_file(&path).expect("parse file");
        std::fs::remove_file(&path).expect("remove spool");

        let from_buffer = parse_csv(&Bytes::from(PAYLOAD)).expect("parse buffer");
        assert_eq!(from_file.headers, from_buffer.headers);
        assert_eq!(from_file.rows, from_buffer.rows);
        assert_eq!(summarize(&from_file), summarize(&from_buffer));
    }

    #[test]
    fn duplicate_headers_are_rejected() {
        let err = parse_csv(&Bytes::from("a,a\n1,2\n")).unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }

    #[test]
    fn headerless_garbage_is_a_bad_request() {
        assert!(parse_csv(&Bytes::from("")).is_err());
    }
}
