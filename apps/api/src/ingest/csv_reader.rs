use csv::ReaderBuilder;
use tracing::{debug, warn};

use crate::ingest::cell::{CellValue, Row};
use crate::ingest::{DecodedTable, IngestError, SourceFormat};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reads delimited text with the first record as the header row.
///
/// Values are kept verbatim as text. Ragged records are tolerated: missing
/// trailing fields become absent keys and surplus fields are dropped, each
/// occurrence logged. Blank header columns are excluded from headers and records.
pub(crate) fn read_csv(bytes: &[u8]) -> Result<DecodedTable, IngestError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let header_record = reader
        .headers()
        .map_err(|e| IngestError::Decode {
            format: SourceFormat::Csv,
            reason: format!("failed to read header row: {e}"),
        })?
        .clone();

    let positional: Vec<Option<&str>> = header_record
        .iter()
        .map(|h| (!h.trim().is_empty()).then_some(h))
        .collect();
    let headers: Vec<String> = positional.iter().flatten().map(|h| h.to_string()).collect();

    let mut rows = Vec::new();
    let mut structural_errors = 0usize;

    for (index, result) in reader.records().enumerate() {
        let line = index + 2;
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!(line, "Skipping malformed CSV record: {e}");
                structural_errors += 1;
                continue;
            }
        };

        if record.len() != header_record.len() {
            warn!(
                line,
                expected = header_record.len(),
                found = record.len(),
                "CSV record field count does not match header"
            );
            structural_errors += 1;
        }

        let mut row = Row::new();
        for (idx, header) in positional.iter().enumerate() {
            let (Some(header), Some(value)) = (header, record.get(idx)) else {
                continue;
            };
            row.insert(*header, CellValue::Text(value.to_string()));
        }

        if row.has_data() {
            rows.push(row);
        }
    }

    if structural_errors > 0 {
        warn!(
            structural_errors,
            recovered_rows = rows.len(),
            "CSV parsed with structural errors"
        );
    }
    debug!(columns = headers.len(), rows = rows.len(), "CSV decoded");

    Ok(DecodedTable { headers, rows })
}
