use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::{NaiveDate, TimeDelta};
use tracing::debug;

use crate::ingest::cell::{CellValue, RawCell, Row};
use crate::ingest::ooxml::{self, SheetAnnotations};
use crate::ingest::{DecodedTable, IngestError, SourceFormat};

/// Random access to one worksheet's cells by zero-based absolute position.
pub(crate) trait CellSource {
    /// Last used (row, column), or `None` for an empty sheet.
    fn extent(&self) -> Option<(u32, u32)>;
    fn raw_cell(&self, row: u32, col: u32) -> RawCell;
}

/// calamine-backed view of the first worksheet, overlaid with formula presence
/// and the OOXML extras calamine does not surface.
struct SheetGrid {
    values: Range<Data>,
    formulas: Option<Range<String>>,
    annotations: SheetAnnotations,
}

impl CellSource for SheetGrid {
    fn extent(&self) -> Option<(u32, u32)> {
        self.values.end()
    }

    fn raw_cell(&self, row: u32, col: u32) -> RawCell {
        let pos = (row, col);
        let value = self
            .values
            .get_value(pos)
            .map(data_to_value)
            .unwrap_or(CellValue::Null);
        let has_formula = self
            .formulas
            .as_ref()
            .and_then(|f| f.get_value(pos))
            .is_some_and(|f| !f.is_empty());
        RawCell::classify(
            value,
            has_formula,
            self.annotations.rich_text.get(&pos).cloned(),
            self.annotations.hyperlinks.get(&pos).cloned(),
        )
    }
}

/// Decodes the first worksheet of an xlsx/xls workbook held in memory.
pub(crate) fn read_first_sheet(bytes: &[u8]) -> Result<DecodedTable, IngestError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(decode_error)?;

    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Err(IngestError::Empty);
    };
    let values = workbook.worksheet_range(&sheet_name).map_err(decode_error)?;
    let formulas = match workbook.worksheet_formula(&sheet_name) {
        Ok(range) => Some(range),
        Err(e) => {
            debug!(sheet = %sheet_name, "No formula data: {e}");
            None
        }
    };
    let annotations = if ooxml::is_zip_package(bytes) {
        ooxml::read_first_sheet_annotations(bytes).unwrap_or_else(|e| {
            debug!("Skipping hyperlink/rich-text extraction: {e:#}");
            SheetAnnotations::default()
        })
    } else {
        SheetAnnotations::default()
    };

    let grid = SheetGrid {
        values,
        formulas,
        annotations,
    };
    debug!(sheet = %sheet_name, extent = ?grid.extent(), "Workbook sheet loaded");
    extract_table(&grid)
}

/// Row 0 supplies headers; every later row is walked across all header positions.
/// Blank header positions hold their place during extraction and are dropped from
/// the output.
pub(crate) fn extract_table(source: &impl CellSource) -> Result<DecodedTable, IngestError> {
    let Some((last_row, last_col)) = source.extent() else {
        return Err(IngestError::Empty);
    };
    if last_row < 1 {
        return Err(IngestError::Empty);
    }

    let positional: Vec<String> = (0..=last_col)
        .map(|col| header_text(source.raw_cell(0, col).resolve()))
        .collect();

    let mut rows = Vec::new();
    for row_idx in 1..=last_row {
        let mut row = Row::new();
        for (col, header) in (0..=last_col).zip(&positional) {
            if header.is_empty() {
                continue;
            }
            row.insert(header.as_str(), source.raw_cell(row_idx, col).resolve());
        }
        if row.has_data() {
            rows.push(row);
        }
    }

    let headers = positional.into_iter().filter(|h| !h.is_empty()).collect();
    Ok(DecodedTable { headers, rows })
}

fn header_text(value: CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        other => other.display_string().trim().to_string(),
    }
}

fn data_to_value(data: &Data) -> CellValue {
    match data {
        Data::Empty => CellValue::Null,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => serial_to_iso(dt.as_f64())
            .map(CellValue::Text)
            .unwrap_or_else(|| CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
    }
}

/// Excel 1900-system serial to an ISO-8601 UTC timestamp with milliseconds.
fn serial_to_iso(serial: f64) -> Option<String> {
    if !serial.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    let millis = (serial * 86_400_000.0).round() as i64;
    let at = epoch.checked_add_signed(TimeDelta::try_milliseconds(millis)?)?;
    Some(at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

fn decode_error(e: impl std::fmt::Display) -> IngestError {
    IngestError::Decode {
        format: SourceFormat::Spreadsheet,
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rust_xlsxwriter::{Format, Formula, Workbook};

    use super::*;

    /// In-memory sheet for exercising extraction without a workbook file.
    struct Grid {
        cells: HashMap<(u32, u32), RawCell>,
        extent: Option<(u32, u32)>,
    }

    impl CellSource for Grid {
        fn extent(&self) -> Option<(u32, u32)> {
            self.extent
        }

        fn raw_cell(&self, row: u32, col: u32) -> RawCell {
            self.cells
                .get(&(row, col))
                .cloned()
                .unwrap_or(RawCell::Plain(CellValue::Null))
        }
    }

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn plain(s: &str) -> RawCell {
        RawCell::Plain(text(s))
    }

    #[test]
    fn test_extract_resolves_every_cell_kind() {
        let mut cells = HashMap::new();
        cells.insert((0, 0), plain(" Account "));
        cells.insert((0, 1), plain(""));
        cells.insert((0, 2), plain("Total"));
        cells.insert((0, 3), plain("Link"));
        cells.insert((1, 0), RawCell::RichText(vec!["Cash ".into(), "at bank".into()]));
        cells.insert((1, 1), plain("hidden"));
        cells.insert((1, 2), RawCell::Formula { cached: Some(CellValue::Number(250.0)) });
        cells.insert(
            (1, 3),
            RawCell::Hyperlink {
                display: None,
                target: "https://bank.test".into(),
            },
        );
        let grid = Grid {
            cells,
            extent: Some((1, 3)),
        };

        let table = extract_table(&grid).unwrap();
        assert_eq!(table.headers, vec!["Account", "Total", "Link"]);
        assert_eq!(table.rows.len(), 1);
        let row = &table.rows[0];
        assert_eq!(row.get("Account"), Some(&text("Cash at bank")));
        assert_eq!(row.get("Total"), Some(&CellValue::Number(250.0)));
        assert_eq!(row.get("Link"), Some(&text("https://bank.test")));
        assert_eq!(row.len(), 3);
    }

    #[test]
    fn test_extract_drops_rows_without_data() {
        let mut cells = HashMap::new();
        cells.insert((0, 0), plain("a"));
        cells.insert((1, 0), plain(""));
        cells.insert((2, 0), RawCell::Formula { cached: None });
        cells.insert((3, 0), plain("x"));
        let grid = Grid {
            cells,
            extent: Some((3, 0)),
        };
        let table = extract_table(&grid).unwrap();
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_extract_header_only_is_empty() {
        let mut cells = HashMap::new();
        cells.insert((0, 0), plain("a"));
        let grid = Grid {
            cells,
            extent: Some((0, 0)),
        };
        assert!(matches!(extract_table(&grid), Err(IngestError::Empty)));
    }

    #[test]
    fn test_serial_to_iso() {
        assert_eq!(serial_to_iso(45292.0).as_deref(), Some("2024-01-01T00:00:00.000Z"));
        assert_eq!(serial_to_iso(45292.5).as_deref(), Some("2024-01-01T12:00:00.000Z"));
    }

    #[test]
    fn test_reads_generated_xlsx() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Account").unwrap();
        sheet.write_string(0, 1, "Debit").unwrap();
        sheet.write_string(0, 2, "Total").unwrap();
        sheet.write_string(0, 3, "Statement").unwrap();
        sheet.write_string(1, 0, "Cash").unwrap();
        sheet.write_number(1, 1, 1500.0).unwrap();
        sheet
            .write_formula(1, 2, Formula::new("=B2*2").set_result("3000"))
            .unwrap();
        sheet
            .write_url_with_text(1, 3, "https://bank.test/stmt", "March statement")
            .unwrap();
        let bold = Format::new().set_bold();
        sheet
            .write_rich_string(2, 0, &[(&bold, "Accounts "), (&Format::default(), "payable")])
            .unwrap();
        sheet.write_number(2, 1, 20.5).unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let table = read_first_sheet(&bytes).unwrap();
        assert_eq!(table.headers, vec!["Account", "Debit", "Total", "Statement"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].get("Debit"), Some(&CellValue::Number(1500.0)));
        assert_eq!(table.rows[0].get("Total"), Some(&CellValue::Number(3000.0)));
        assert_eq!(table.rows[0].get("Statement"), Some(&text("March statement")));
        assert_eq!(table.rows[1].get("Account"), Some(&text("Accounts payable")));
        assert_eq!(table.rows[1].get("Statement"), Some(&CellValue::Null));
    }

    #[test]
    fn test_header_only_workbook_is_empty() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "Account").unwrap();
        sheet.write_string(0, 1, "Balance").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        assert!(matches!(read_first_sheet(&bytes), Err(IngestError::Empty)));
    }

    #[test]
    fn test_only_first_sheet_is_read() {
        let mut workbook = Workbook::new();
        let first = workbook.add_worksheet();
        first.write_string(0, 0, "first").unwrap();
        first.write_string(1, 0, "1").unwrap();
        let second = workbook.add_worksheet();
        second.write_string(0, 0, "second").unwrap();
        second.write_string(1, 0, "2").unwrap();
        second.write_string(2, 0, "3").unwrap();
        let bytes = workbook.save_to_buffer().unwrap();

        let table = read_first_sheet(&bytes).unwrap();
        assert_eq!(table.headers, vec!["first"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_corrupt_workbook_is_decode_error() {
        let err = read_first_sheet(b"PK\x03\x04 definitely not a workbook").unwrap_err();
        assert!(matches!(
            err,
            IngestError::Decode {
                format: SourceFormat::Spreadsheet,
                ..
            }
        ));
    }
}
