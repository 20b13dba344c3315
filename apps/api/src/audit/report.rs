//! Excel export of an audit session: a summary sheet, the findings and the
//! documents that were analyzed.

use chrono::{Datelike, NaiveDate};
use rust_xlsxwriter::{Color, Format, Workbook, Worksheet, XlsxError};

use crate::audit::context::DEFAULT_CURRENCY;
use crate::audit::sessions::SessionDetail;
use crate::ingest::cell::display_number;
use crate::models::audit::{AuditFileRow, AuditFindingRow, AuditSessionRow, Severity};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const HEADER_FILL: u32 = 0x3B82F6;
const NOT_AVAILABLE: &str = "N/A";

const SUMMARY_COLUMNS: &[(&str, f64)] = &[("Field", 30.0), ("Value", 50.0)];
const FINDING_COLUMNS: &[(&str, f64)] = &[
    ("Title", 30.0),
    ("Severity", 15.0),
    ("Category", 20.0),
    ("Description", 50.0),
    ("Recommendation", 50.0),
    ("Financial Impact", 20.0),
    ("AI Confidence", 15.0),
];
const DOCUMENT_COLUMNS: &[(&str, f64)] = &[
    ("File Name", 40.0),
    ("Category", 25.0),
    ("Row Count", 15.0),
    ("Status", 15.0),
];

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeverityCounts {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub info: usize,
}

impl SeverityCounts {
    /// Findings with a severity outside the known set are not counted.
    pub fn tally(findings: &[AuditFindingRow]) -> Self {
        let mut counts = Self::default();
        for finding in findings {
            match finding.severity.parse::<Severity>() {
                Ok(Severity::High) => counts.high += 1,
                Ok(Severity::Medium) => counts.medium += 1,
                Ok(Severity::Low) => counts.low += 1,
                Ok(Severity::Info) => counts.info += 1,
                Err(_) => {}
            }
        }
        counts
    }

    pub fn risk_level(&self) -> &'static str {
        if self.high > 3 {
            "Critical"
        } else if self.high > 0 {
            "High"
        } else if self.medium > 3 {
            "Medium"
        } else if self.medium > 0 {
            "Low-Medium"
        } else {
            "Low"
        }
    }
}

/// The stored score, or one derived from the finding mix when the session has
/// none (a stored zero counts as none).
pub fn risk_score(session: &AuditSessionRow, counts: &SeverityCounts) -> f64 {
    match session.risk_score {
        Some(score) if score != 0.0 && !score.is_nan() => score,
        _ => (counts.high * 25 + counts.medium * 10).min(100) as f64,
    }
}

pub fn total_financial_impact(findings: &[AuditFindingRow]) -> f64 {
    findings
        .iter()
        .filter_map(|f| f.financial_impact)
        .filter(|v| !v.is_nan())
        .sum()
}

/// Whole-unit amount with Indian digit grouping: `₹12,34,567`.
pub fn format_currency(amount: f64, currency: &str) -> String {
    let symbol = match currency.to_ascii_uppercase().as_str() {
        "INR" => "₹".to_string(),
        "USD" => "$".to_string(),
        "EUR" => "€".to_string(),
        "GBP" => "£".to_string(),
        other => format!("{other}\u{a0}"),
    };
    let rounded = amount.abs().round();
    let sign = if amount < 0.0 && rounded > 0.0 { "-" } else { "" };
    format!("{sign}{symbol}{}", group_indian(&format!("{rounded:.0}")))
}

/// Last three digits, then pairs: 1234567 -> 12,34,567.
fn group_indian(digits: &str) -> String {
    if digits.len() <= 3 {
        return digits.to_string();
    }
    let (head, tail) = digits.split_at(digits.len() - 3);
    let mut groups: Vec<&str> = Vec::new();
    let mut end = head.len();
    while end > 0 {
        let start = end.saturating_sub(2);
        groups.push(&head[start..end]);
        end = start;
    }
    groups.reverse();
    format!("{},{tail}", groups.join(","))
}

/// `d/m/yyyy`, no zero padding.
fn report_date(date: NaiveDate) -> String {
    format!("{}/{}/{}", date.day(), date.month(), date.year())
}

/// Download name: whitespace runs in the title become `_`, and characters that
/// cannot appear in a quoted header value are dropped.
pub fn report_file_name(title: &str, date: NaiveDate) -> String {
    let stem: String = title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .filter(|c| c.is_ascii_graphic() && *c != '"' && *c != '\\')
        .collect();
    let stem = if stem.is_empty() { "Session" } else { stem.as_str() };
    format!("Audit_Report_{stem}_{}.xlsx", date.format("%Y-%m-%d"))
}

fn or_not_available(value: Option<&str>) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

enum SummaryValue {
    Text(String),
    Count(usize),
}

fn summary_rows(detail: &SessionDetail, date: NaiveDate) -> Vec<(&'static str, SummaryValue)> {
    let session = &detail.session;
    let counts = SeverityCounts::tally(&detail.findings);
    let currency = session.currency.as_deref().unwrap_or(DEFAULT_CURRENCY);
    let text = SummaryValue::Text;

    vec![
        ("Audit Title", text(or_not_available(Some(session.title.as_str())))),
        ("Audit Type", text(session.audit_type.to_uppercase())),
        ("Accounting Standard", text(session.accounting_standard.to_uppercase())),
        ("Financial Year", text(or_not_available(session.financial_year.as_deref()))),
        ("Report Date", text(report_date(date))),
        ("Risk Level", text(counts.risk_level().to_string())),
        (
            "Risk Score",
            text(format!("{}%", display_number(risk_score(session, &counts)))),
        ),
        (
            "Total Financial Impact",
            text(format_currency(total_financial_impact(&detail.findings), currency)),
        ),
        ("High Risk Findings", SummaryValue::Count(counts.high)),
        ("Medium Risk Findings", SummaryValue::Count(counts.medium)),
        ("Low Risk Findings", SummaryValue::Count(counts.low)),
        ("Informational Findings", SummaryValue::Count(counts.info)),
    ]
}

fn finding_cells(finding: &AuditFindingRow, currency: &str) -> [String; 7] {
    let impact = match finding.financial_impact {
        Some(v) if v != 0.0 && !v.is_nan() => format_currency(v, currency),
        _ => NOT_AVAILABLE.to_string(),
    };
    let confidence = match finding.ai_confidence {
        Some(c) if c != 0.0 && !c.is_nan() => format!("{}%", display_number((c * 100.0).round())),
        _ => NOT_AVAILABLE.to_string(),
    };
    [
        finding.title.clone(),
        finding.severity.to_uppercase(),
        or_not_available(finding.category.as_deref()),
        finding.description.clone(),
        or_not_available(finding.recommendation.as_deref()),
        impact,
        confidence,
    ]
}

fn header_format() -> Format {
    Format::new()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL))
}

fn write_header(
    sheet: &mut Worksheet,
    columns: &[(&str, f64)],
    format: &Format,
) -> Result<(), XlsxError> {
    for (col, (title, width)) in columns.iter().enumerate() {
        let col = col as u16;
        sheet.set_column_width(col, *width)?;
        sheet.write_string_with_format(0, col, *title, format)?;
    }
    Ok(())
}

fn write_documents(sheet: &mut Worksheet, files: &[AuditFileRow]) -> Result<(), XlsxError> {
    for (i, file) in files.iter().enumerate() {
        let row = i as u32 + 1;
        sheet.write_string(row, 0, &file.file_name)?;
        sheet.write_string(row, 1, file.file_category.replacen('_', " ", 1))?;
        match file.row_count {
            Some(n) if n != 0 => sheet.write_number(row, 2, n as f64)?,
            _ => sheet.write_string(row, 2, NOT_AVAILABLE)?,
        };
        let status = if file.status.is_empty() {
            "Processed"
        } else {
            file.status.as_str()
        };
        sheet.write_string(row, 3, status)?;
    }
    Ok(())
}

/// Renders the report workbook. The findings and documents sheets are only
/// present when there is something to list.
pub fn build_report(detail: &SessionDetail, date: NaiveDate) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let header = header_format();
    let currency = detail
        .session
        .currency
        .as_deref()
        .unwrap_or(DEFAULT_CURRENCY);

    {
        let sheet = workbook.add_worksheet().set_name("Summary")?;
        write_header(sheet, SUMMARY_COLUMNS, &header)?;
        for (i, (field, value)) in summary_rows(detail, date).into_iter().enumerate() {
            let row = i as u32 + 1;
            sheet.write_string(row, 0, field)?;
            match value {
                SummaryValue::Text(s) => sheet.write_string(row, 1, s)?,
                SummaryValue::Count(n) => sheet.write_number(row, 1, n as f64)?,
            };
        }
    }

    if !detail.findings.is_empty() {
        let sheet = workbook.add_worksheet().set_name("Findings")?;
        write_header(sheet, FINDING_COLUMNS, &header)?;
        for (i, finding) in detail.findings.iter().enumerate() {
            for (col, cell) in finding_cells(finding, currency).iter().enumerate() {
                sheet.write_string(i as u32 + 1, col as u16, cell)?;
            }
        }
    }

    if !detail.files.is_empty() {
        let sheet = workbook.add_worksheet().set_name("Documents")?;
        write_header(sheet, DOCUMENT_COLUMNS, &header)?;
        write_documents(sheet, &detail.files)?;
    }

    workbook.save_to_buffer()
}
