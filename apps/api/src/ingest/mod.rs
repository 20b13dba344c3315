//! Tabular ingestion: CSV and Excel uploads into a normalized [`ParsedTable`]
//! plus a bounded summary for prompt context.

pub mod cell;
mod csv_reader;
pub mod handlers;
mod ooxml;
pub mod summary;
mod workbook;

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::ingest::cell::Row;

/// Decoder family selected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Spreadsheet,
}

impl SourceFormat {
    pub fn from_file_name(name: &str) -> Result<Self, IngestError> {
        match file_extension(name).as_deref() {
            Some("csv") => Ok(SourceFormat::Csv),
            Some("xlsx") | Some("xls") => Ok(SourceFormat::Spreadsheet),
            other => Err(IngestError::UnsupportedFormat {
                extension: other.map(str::to_string),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Csv => "csv",
            SourceFormat::Spreadsheet => "spreadsheet",
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-cased text after the last `.`, or `None` when the name has no dot.
pub fn file_extension(name: &str) -> Option<String> {
    name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("unsupported file extension: {}", extension.as_deref().unwrap_or("<none>"))]
    UnsupportedFormat { extension: Option<String> },

    #[error("failed to decode {format} file: {reason}")]
    Decode { format: SourceFormat, reason: String },

    #[error("file has no data rows")]
    Empty,

    #[error("parse task failed: {0}")]
    Task(String),
}

impl IngestError {
    /// Message safe to show the uploader.
    pub fn user_message(&self) -> &'static str {
        match self {
            IngestError::UnsupportedFormat { .. } => {
                "Please upload a CSV or Excel file (.csv, .xlsx, .xls)"
            }
            IngestError::Decode { .. } | IngestError::Task(_) => {
                "Failed to parse file. Please ensure it's a valid CSV or Excel file."
            }
            IngestError::Empty => "File appears to be empty or has no data rows",
        }
    }
}

/// Output of a format reader, before validation and summarization.
#[derive(Debug, Clone, Default)]
pub(crate) struct DecodedTable {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

/// A successfully parsed upload. Never empty; read-only once built.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedTable {
    headers: Vec<String>,
    rows: Vec<Row>,
    row_count: usize,
    summary: String,
    source_file_name: String,
    source_format: SourceFormat,
}

impl ParsedTable {
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    #[cfg(test)]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn source_file_name(&self) -> &str {
        &self.source_file_name
    }

    #[cfg(test)]
    pub fn source_format(&self) -> SourceFormat {
        self.source_format
    }

    /// The first `n` rows, or all of them when fewer exist.
    pub fn sample_rows(&self, n: usize) -> &[Row] {
        &self.rows[..n.min(self.rows.len())]
    }
}

/// An upload as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub name: String,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Parses an upload off the async runtime.
///
/// The extension is checked before any decoding work is scheduled.
pub async fn parse_file(file: UploadedFile) -> Result<ParsedTable, IngestError> {
    SourceFormat::from_file_name(&file.name).inspect_err(|e| warn!(file = %file.name, "{e}"))?;

    tokio::task::spawn_blocking(move || parse_bytes(&file.name, &file.bytes))
        .await
        .map_err(|e| {
            error!("Parse task did not complete: {e}");
            IngestError::Task(e.to_string())
        })?
}

/// Synchronous core of [`parse_file`]: select the reader, decode, validate, summarize.
pub fn parse_bytes(file_name: &str, bytes: &[u8]) -> Result<ParsedTable, IngestError> {
    let format = SourceFormat::from_file_name(file_name)?;

    let decoded = match format {
        SourceFormat::Csv => csv_reader::read_csv(bytes),
        SourceFormat::Spreadsheet => workbook::read_first_sheet(bytes),
    }
    .inspect_err(|e| match e {
        IngestError::Empty => warn!(file = %file_name, "{e}"),
        _ => error!(file = %file_name, "File parsing error: {e}"),
    })?;

    if decoded.rows.is_empty() {
        warn!(file = %file_name, "File has headers but no data rows");
        return Err(IngestError::Empty);
    }

    let summary = summary::summarize(&decoded.headers, &decoded.rows);
    let row_count = decoded.rows.len();
    info!(
        file = %file_name,
        format = %format,
        rows = row_count,
        columns = decoded.headers.len(),
        "File parsed"
    );

    Ok(ParsedTable {
        headers: decoded.headers,
        rows: decoded.rows,
        row_count,
        summary,
        source_file_name: file_name.to_string(),
        source_format: format,
    })
}

#[cfg(test)]
mod tests {
    use rust_xlsxwriter::Workbook;

    use super::*;
    use crate::ingest::cell::CellValue;

    fn xlsx_bytes(rows: &[&[&str]]) -> Vec<u8> {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                sheet.write_string(r as u32, c as u16, *value).unwrap();
            }
        }
        workbook.save_to_buffer().unwrap()
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("ledger.CSV").as_deref(), Some("csv"));
        assert_eq!(file_extension("tb.2024.xlsx").as_deref(), Some("xlsx"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension("trailing."), Some(String::new()));
    }

    #[test]
    fn test_csv_header_and_row_counts() {
        let table = parse_bytes("ledger.csv", b"a,b,c\n1,2,3\n4,5,6\n7,8,9\n").unwrap();
        assert_eq!(table.headers(), &["a", "b", "c"]);
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows().len(), table.row_count());
        assert_eq!(table.source_format(), SourceFormat::Csv);
    }

    #[test]
    fn test_uppercase_extension_is_accepted() {
        let table = parse_bytes("LEDGER.CSV", b"a\n1\n").unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    fn test_unsupported_extension_is_rejected_before_decoding() {
        // Valid CSV content under the wrong name must still be refused.
        let err = parse_bytes("report.pdf", b"a,b\n1,2\n").unwrap_err();
        assert!(matches!(
            err,
            IngestError::UnsupportedFormat { extension: Some(ref ext) } if ext == "pdf"
        ));
        assert_eq!(
            err.user_message(),
            "Please upload a CSV or Excel file (.csv, .xlsx, .xls)"
        );

        let err = parse_bytes("noextension", b"a\n1\n").unwrap_err();
        assert!(matches!(err, IngestError::UnsupportedFormat { extension: None }));
    }

    #[test]
    fn test_header_only_csv_is_empty() {
        let err = parse_bytes("a.csv", b"a,b\n").unwrap_err();
        assert!(matches!(err, IngestError::Empty));
        assert_eq!(err.user_message(), "File appears to be empty or has no data rows");
    }

    #[test]
    fn test_zero_byte_csv_is_empty() {
        assert!(matches!(parse_bytes("a.csv", b""), Err(IngestError::Empty)));
    }

    #[test]
    fn test_header_only_workbook_is_empty() {
        let bytes = xlsx_bytes(&[&["Account", "Balance"]]);
        assert!(matches!(parse_bytes("tb.xlsx", &bytes), Err(IngestError::Empty)));
    }

    #[test]
    fn test_workbook_rows_are_parsed() {
        let bytes = xlsx_bytes(&[&["Account", "Type"], &["Cash", "Asset"], &["Loan", "Liability"]]);
        let table = parse_bytes("tb.xlsx", &bytes).unwrap();
        assert_eq!(table.source_format(), SourceFormat::Spreadsheet);
        assert_eq!(table.row_count(), 2);
        assert_eq!(
            table.rows()[1].get("Type"),
            Some(&CellValue::Text("Liability".into()))
        );
    }

    #[test]
    fn test_corrupt_workbook_reports_decode_message() {
        let err = parse_bytes("tb.xlsx", b"not a workbook at all").unwrap_err();
        assert!(matches!(err, IngestError::Decode { .. }));
        assert_eq!(
            err.user_message(),
            "Failed to parse file. Please ensure it's a valid CSV or Excel file."
        );
    }

    #[test]
    fn test_empty_rows_are_excluded() {
        let table = parse_bytes("a.csv", b"a,b\n1,2\n,\n\n3,4\n").unwrap();
        assert_eq!(table.row_count(), 2);
        assert!(table.rows().iter().all(|r| r.has_data()));
    }

    #[test]
    fn test_row_keys_are_subset_of_headers() {
        let table = parse_bytes("a.csv", b"a,,c\n1,2,3\n4\n").unwrap();
        for row in table.rows() {
            for (key, _) in row.iter() {
                assert!(table.headers().iter().any(|h| h == key));
            }
        }
    }

    #[test]
    fn test_name_revenue_scenario() {
        let table = parse_bytes("sales.csv", b"name,revenue\nA,100\nB,200\nC,abc\n").unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(
            table.summary(),
            "Dataset contains 3 records with 2 columns. Column analysis: \
             name: categorical (3 unique values); revenue: categorical (3 unique values)."
        );
    }

    #[test]
    fn test_numeric_column_summary() {
        let table = parse_bytes("tb.csv", b"account,debit\nCash,1500\nBank,2500\nRent,500\n").unwrap();
        assert_eq!(
            table.summary(),
            "Dataset contains 3 records with 2 columns. Column analysis: \
             account: categorical (3 unique values); debit: numeric (range 500-2.5K, avg 1.5K)."
        );
    }

    #[test]
    fn test_overflow_clause_for_wide_tables() {
        let table = parse_bytes("wide.csv", b"a,b,c,d,e,f,g,h\n1,2,3,4,5,6,7,8\n").unwrap();
        assert_eq!(table.headers().len(), 8);
        assert!(table.summary().ends_with(" and 3 more columns."));
    }

    #[test]
    fn test_parse_is_idempotent() {
        let input = b"name,amount\nA,10.5\nB,x\n";
        let first = serde_json::to_value(parse_bytes("a.csv", input).unwrap()).unwrap();
        let second = serde_json::to_value(parse_bytes("a.csv", input).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_sample_rows_is_bounded() {
        let table = parse_bytes("a.csv", b"a\n1\n2\n3\n").unwrap();
        assert_eq!(table.sample_rows(2).len(), 2);
        assert_eq!(table.sample_rows(20).len(), 3);
    }

    #[test]
    fn test_serialized_shape() {
        let table = parse_bytes("a.csv", b"k,v\nx,1\n").unwrap();
        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json["row_count"], 1);
        assert_eq!(json["source_format"], "csv");
        assert_eq!(json["source_file_name"], "a.csv");
        assert_eq!(json["rows"][0]["v"], "1");
    }

    #[tokio::test]
    async fn test_parse_file_runs_off_runtime() {
        let file = UploadedFile::new("ledger.csv", Bytes::from_static(b"a,b\n1,2\n"));
        let table = parse_file(file).await.unwrap();
        assert_eq!(table.row_count(), 1);
    }

    #[tokio::test]
    async fn test_parse_file_rejects_unsupported_extension() {
        let file = UploadedFile::new("notes.txt", Bytes::from_static(b"a\n1\n"));
        assert!(matches!(
            parse_file(file).await,
            Err(IngestError::UnsupportedFormat { .. })
        ));
    }
}
