//! Row sources and sinks at the edges of a batch run
//!
//! Sources yield decoded rows in file order and know their length up front.
//! Sinks persist the augmented rows and hand back an opaque reference.

use crate::model::{InputRow, RowResult};
use async_trait::async_trait;
use csv::{ReaderBuilder, StringRecord, Trim, WriterBuilder};
use indexmap::IndexSet;
use serde_json::Value;
use std::collections::VecDeque;
use std::io;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

/// Finite, ordered supply of input rows
pub trait RowSource: Send {
    /// Number of rows the source will yield, read errors included
    fn total(&self) -> usize;

    /// Next row in input order, `None` when exhausted
    fn next_row(&mut self) -> Option<io::Result<InputRow>>;
}

/// Rows that are already decoded, e.g. from a JSON request body
#[derive(Debug, Default)]
pub struct MemoryRowSource {
    rows: VecDeque<InputRow>,
}

impl From<Vec<InputRow>> for MemoryRowSource {
    fn from(rows: Vec<InputRow>) -> Self {
        Self { rows: rows.into() }
    }
}

impl RowSource for MemoryRowSource {
    fn total(&self) -> usize {
        self.rows.len()
    }

    fn next_row(&mut self) -> Option<io::Result<InputRow>> {
        self.rows.pop_front().map(Ok)
    }
}

/// Comma-separated input with a header line
///
/// Records are read eagerly so the total is known before the first row is
/// validated; a malformed record is kept as an error and surfaces when reached.
pub struct CsvRowSource {
    records: VecDeque<io::Result<InputRow>>,
}

impl CsvRowSource {
    pub fn from_reader<R: io::Read>(reader: R) -> io::Result<Self> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let records: VecDeque<_> = reader
            .records()
            .map(|record| record.map(|record| to_row(&headers, &record)).map_err(io::Error::from))
            .collect();

        debug!("Read {} CSV record(s) with {} column(s)", records.len(), headers.len());
        Ok(Self { records })
    }
}

impl RowSource for CsvRowSource {
    fn total(&self) -> usize {
        self.records.len()
    }

    fn next_row(&mut self) -> Option<io::Result<InputRow>> {
        self.records.pop_front()
    }
}

fn to_row(headers: &StringRecord, record: &StringRecord) -> InputRow {
    record
        .iter()
        .enumerate()
        .map(|(index, field)| {
            let column = match headers.get(index) {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => format!("column_{}", index + 1),
            };
            (column, Value::String(field.to_string()))
        })
        .collect()
}

/// Destination for the augmented rows of a finished batch
#[async_trait]
pub trait RowSink: Send + Sync {
    /// Persist `rows` in order; the returned reference becomes `outputRef`
    async fn write(&self, batch_id: Uuid, rows: &[RowResult]) -> io::Result<Option<String>>;
}

/// Sink that keeps nothing; results only travel back to the caller
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardRowSink;

#[async_trait]
impl RowSink for DiscardRowSink {
    async fn write(&self, _batch_id: Uuid, _rows: &[RowResult]) -> io::Result<Option<String>> {
        Ok(None)
    }
}

/// Writes `validated_<batch id>.csv` into a directory
#[derive(Debug, Clone)]
pub struct CsvRowSink {
    output_dir: PathBuf,
}

impl CsvRowSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn file_name(batch_id: Uuid) -> String {
        format!("validated_{batch_id}.csv")
    }
}

#[async_trait]
impl RowSink for CsvRowSink {
    async fn write(&self, batch_id: Uuid, rows: &[RowResult]) -> io::Result<Option<String>> {
        let encoded = encode_csv(rows)?;

        tokio::fs::create_dir_all(&self.output_dir).await?;
        let path = self.output_dir.join(Self::file_name(batch_id));
        tokio::fs::write(&path, encoded).await?;

        info!("Wrote {} validated row(s) to {}", rows.len(), path.display());
        Ok(Some(path.display().to_string()))
    }
}

const RESULT_COLUMNS: [&str; 3] = ["email", "valid", "reason"];

/// Original columns in first-seen order, then the result columns
fn encode_csv(rows: &[RowResult]) -> io::Result<Vec<u8>> {
    let columns: IndexSet<&str> = rows
        .iter()
        .flat_map(|row| row.fields.keys().map(String::as_str))
        .filter(|column| !RESULT_COLUMNS.contains(column))
        .collect();

    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(columns.iter().copied().chain(RESULT_COLUMNS))?;

    for row in rows {
        let passthrough = columns
            .iter()
            .map(|column| row.fields.get(*column).map(cell).unwrap_or_default());
        let result = [
            row.email.clone(),
            row.valid.to_string(),
            row.reason.clone().unwrap_or_default(),
        ];
        writer.write_record(passthrough.chain(result))?;
    }

    writer.into_inner().map_err(|e| e.into_error())
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StageVerdict;
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn drain(mut source: impl RowSource) -> Vec<io::Result<InputRow>> {
        std::iter::from_fn(|| source.next_row()).collect()
    }

    fn result(fields: Value, email: &str, reason: Option<&str>) -> RowResult {
        RowResult {
            fields: serde_json::from_value(fields).unwrap(),
            email: email.to_string(),
            valid: reason.is_none(),
            reason: reason.map(str::to_string),
            stage_verdicts: IndexMap::from([("format".to_string(), StageVerdict::pass())]),
        }
    }

    #[test]
    fn test_memory_source_keeps_order() {
        let rows: Vec<InputRow> = vec![
            serde_json::from_value(json!({"email": "a@x.com"})).unwrap(),
            serde_json::from_value(json!({"email": "b@x.com"})).unwrap(),
        ];
        let source = MemoryRowSource::from(rows.clone());

        assert_eq!(source.total(), 2);
        let drained: Vec<_> = drain(source).into_iter().map(Result::unwrap).collect();
        assert_eq!(drained, rows);
    }

    #[test]
    fn test_csv_source_trims_and_names_columns() {
        let data = "name , email\nAda,  ada@example.com \nBob,bob@example.com,extra\n";
        let source = CsvRowSource::from_reader(data.as_bytes()).unwrap();
        assert_eq!(source.total(), 2);

        let rows: Vec<_> = drain(source).into_iter().map(Result::unwrap).collect();
        assert_eq!(rows[0]["name"], json!("Ada"));
        assert_eq!(rows[0]["email"], json!("ada@example.com"));
        assert_eq!(rows[1]["column_3"], json!("extra"));
        assert_eq!(rows[0].keys().collect::<Vec<_>>(), vec!["name", "email"]);
    }

    #[test]
    fn test_csv_source_empty_body() {
        let source = CsvRowSource::from_reader("email\n".as_bytes()).unwrap();
        assert_eq!(source.total(), 0);
    }

    #[test]
    fn test_csv_source_keeps_bad_record_as_error() {
        let data = b"email\nok@example.com\n\xff\xfe@example.com\n";
        let source = CsvRowSource::from_reader(&data[..]).unwrap();
        assert_eq!(source.total(), 2);

        let rows = drain(source);
        assert!(rows[0].is_ok());
        assert!(rows[1].is_err());
    }

    #[test]
    fn test_encode_csv_columns() {
        let rows = vec![
            result(json!({"name": "Ada", "email": "ada@good.com"}), "ada@good.com", None),
            result(json!({"name": "Bob", "team": "ops", "email": "bad"}), "bad", Some("format")),
        ];

        let encoded = String::from_utf8(encode_csv(&rows).unwrap()).unwrap();
        assert_eq!(
            encoded,
            "name,team,email,valid,reason\n\
             Ada,,ada@good.com,true,\n\
             Bob,ops,bad,false,format\n"
        );
    }

    #[tokio::test]
    async fn test_csv_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvRowSink::new(dir.path().join("out"));
        let batch_id = Uuid::new_v4();

        let output_ref = sink
            .write(batch_id, &[result(json!({"email": "a@x.com"}), "a@x.com", None)])
            .await
            .unwrap()
            .unwrap();

        assert!(output_ref.ends_with(&CsvRowSink::file_name(batch_id)));
        let written = std::fs::read_to_string(&output_ref).unwrap();
        assert_eq!(written, "email,valid,reason\na@x.com,true,\n");
    }

    #[tokio::test]
    async fn test_csv_sink_reports_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let sink = CsvRowSink::new(blocker.join("nested"));
        assert!(sink.write(Uuid::new_v4(), &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_discard_sink() {
        assert_eq!(DiscardRowSink.write(Uuid::new_v4(), &[]).await.unwrap(), None);
    }
}
