//! Builds the plain-text audit context sent to the model, and the sanitizers for
//! model-bound and model-produced strings.

use serde_json::Value;

use crate::ingest::cell::display_number;
use crate::models::audit::{AuditFileRow, AuditSessionRow};

/// Rows per file included in the prompt.
pub const CONTEXT_SAMPLE_ROWS: usize = 20;
/// Hard cap on sanitized text, in characters.
pub const MAX_SANITIZED_CHARS: usize = 10_000;
pub const DEFAULT_CURRENCY: &str = "INR";

/// Session metadata that frames the analysis.
#[derive(Debug, Clone, Default)]
pub struct SessionProfile {
    pub title: Option<String>,
    pub audit_type: Option<String>,
    pub accounting_standard: Option<String>,
    pub industry: Option<String>,
    pub financial_year: Option<String>,
    pub currency: Option<String>,
}

impl SessionProfile {
    pub fn standard_label(&self) -> String {
        non_blank(&self.accounting_standard)
            .map(str::to_uppercase)
            .unwrap_or_else(|| "IFRS".to_string())
    }

    pub fn currency_label(&self) -> &str {
        non_blank(&self.currency).unwrap_or(DEFAULT_CURRENCY)
    }
}

impl From<&AuditSessionRow> for SessionProfile {
    fn from(row: &AuditSessionRow) -> Self {
        Self {
            title: Some(row.title.clone()),
            audit_type: Some(row.audit_type.clone()),
            accounting_standard: Some(row.accounting_standard.clone()),
            industry: row.industry.clone(),
            financial_year: row.financial_year.clone(),
            currency: row.currency.clone(),
        }
    }
}

/// One uploaded file as presented to the model.
#[derive(Debug, Clone, Default)]
pub struct FileBundle {
    pub name: String,
    pub category: String,
    pub headers: Vec<String>,
    pub row_count: Option<i64>,
    /// At most [`CONTEXT_SAMPLE_ROWS`] records.
    pub rows: Vec<serde_json::Map<String, Value>>,
}

impl From<&AuditFileRow> for FileBundle {
    fn from(file: &AuditFileRow) -> Self {
        let rows = match &file.raw_data {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object().cloned())
                .take(CONTEXT_SAMPLE_ROWS)
                .collect(),
            _ => Vec::new(),
        };
        Self {
            name: file.file_name.clone(),
            category: file.file_category.clone(),
            headers: file.headers.clone().unwrap_or_default(),
            row_count: file.row_count.map(i64::from),
            rows,
        }
    }
}

/// Renders the configuration block followed by one section per file, then
/// sanitizes the whole text.
pub fn build_audit_context(profile: &SessionProfile, files: &[FileBundle]) -> String {
    let mut context = format!(
        "AUDIT CONFIGURATION:\n\
         - Title: {}\n\
         - Type: {}\n\
         - Standard: {}\n\
         - Industry: {}\n\
         - Financial Year: {}\n\
         - Currency: {}\n\
         \n\
         UPLOADED FILES ANALYSIS:\n\n",
        non_blank(&profile.title).unwrap_or("Untitled Audit"),
        non_blank(&profile.audit_type).unwrap_or("financial"),
        profile.standard_label(),
        non_blank(&profile.industry).unwrap_or("Not specified"),
        non_blank(&profile.financial_year).unwrap_or("Not specified"),
        profile.currency_label(),
    );

    for file in files {
        let columns = if file.headers.is_empty() {
            "Unknown".to_string()
        } else {
            file.headers.join(", ")
        };
        let row_count = match file.row_count {
            Some(n) if n > 0 => n.to_string(),
            _ => "Unknown".to_string(),
        };
        context.push_str(&format!(
            "FILE: {}\nCategory: {}\nColumns: {}\nRow Count: {}\n\nSample Data (first {} rows):\n",
            file.name, file.category, columns, row_count, CONTEXT_SAMPLE_ROWS
        ));

        for (i, row) in file.rows.iter().take(CONTEXT_SAMPLE_ROWS).enumerate() {
            context.push_str(&format!("Row {}: {}\n", i + 1, render_row(row, &file.headers)));
        }

        context.push_str("\n---\n\n");
    }

    sanitize_input(&context)
}

/// `key: value` pairs joined by ` | `, in header order. Keys the headers do not
/// mention follow in map order.
fn render_row(row: &serde_json::Map<String, Value>, headers: &[String]) -> String {
    let known = headers
        .iter()
        .filter_map(|h| row.get(h).map(|v| (h.as_str(), v)));
    let extra = row
        .iter()
        .filter(|(k, _)| !headers.contains(*k))
        .map(|(k, v)| (k.as_str(), v));

    known
        .chain(extra)
        .map(|(k, v)| format!("{k}: {}", render_value(v)))
        .collect::<Vec<_>>()
        .join(" | ")
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n
            .as_f64()
            .map(display_number)
            .unwrap_or_else(|| n.to_string()),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(render_value)
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => value.to_string(),
    }
}

/// Sanitizes the model-bound context block. Newlines and tabs survive so the
/// rendered layout does; other control characters and `<>{}[]` are removed,
/// runs of three or more newlines collapse to two, and the result is trimmed
/// and capped.
pub fn sanitize_input(input: &str) -> String {
    sanitize(input, true)
}

/// Sanitizes a single stored field from the model reply. Every control
/// character goes, newlines and tabs included.
pub fn sanitize_field(input: &str) -> String {
    sanitize(input, false)
}

fn sanitize(input: &str, keep_layout: bool) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_SANITIZED_CHARS));
    let mut newlines = 0usize;

    for c in input.chars() {
        if c == '\n' && keep_layout {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
            continue;
        }
        let kept_tab = c == '\t' && keep_layout;
        if (c.is_ascii_control() && !kept_tab) || matches!(c, '<' | '>' | '{' | '}' | '[' | ']') {
            continue;
        }
        newlines = 0;
        out.push(c);
    }

    out.trim().chars().take(MAX_SANITIZED_CHARS).collect()
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn profile() -> SessionProfile {
        SessionProfile {
            title: Some("FY24 statutory audit".into()),
            audit_type: Some("financial".into()),
            accounting_standard: Some("gaap".into()),
            industry: None,
            financial_year: Some("2023-24".into()),
            currency: None,
        }
    }

    fn object(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sanitize_strips_injection_characters() {
        assert_eq!(sanitize_input("  <b>{ok}</b> [x] "), "bok/b x");
    }

    #[test]
    fn test_sanitize_removes_control_characters_but_keeps_layout() {
        assert_eq!(sanitize_input("a\u{0}b\u{7f}c\r\nd\te"), "abc\nd\te");
    }

    #[test]
    fn test_sanitize_field_strips_every_control_character() {
        assert_eq!(sanitize_field("Cash\nshortfall\tin <Q3>\r\n"), "Cashshortfallin Q3");
        assert_eq!(sanitize_field(" a\u{0}b\u{7f}c "), "abc");
    }

    #[test]
    fn test_sanitize_collapses_blank_runs() {
        assert_eq!(sanitize_input("a\n\n\n\n\nb\n\nc"), "a\n\nb\n\nc");
        // Stripped characters do not break a newline run.
        assert_eq!(sanitize_input("a\n\u{1}\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_sanitize_caps_length() {
        let long = "é".repeat(MAX_SANITIZED_CHARS + 50);
        assert_eq!(sanitize_input(&long).chars().count(), MAX_SANITIZED_CHARS);
    }

    #[test]
    fn test_context_configuration_block_defaults() {
        let context = build_audit_context(&SessionProfile::default(), &[]);
        assert!(context.starts_with("AUDIT CONFIGURATION:\n- Title: Untitled Audit\n- Type: financial\n- Standard: IFRS\n"));
        assert!(context.contains("- Industry: Not specified\n"));
        assert!(context.contains("- Currency: INR\n"));
        assert!(context.ends_with("UPLOADED FILES ANALYSIS:"));
    }

    #[test]
    fn test_context_renders_rows_in_header_order() {
        let file = FileBundle {
            name: "tb.csv".into(),
            category: "trial_balance".into(),
            headers: vec!["account".into(), "debit".into(), "note".into()],
            row_count: Some(2),
            rows: vec![
                object(json!({"note": null, "debit": 1500, "account": "Cash"})),
                object(json!({"account": "Rent", "debit": 12.5})),
            ],
        };
        let context = build_audit_context(&profile(), &[file]);

        assert!(context.contains("- Standard: GAAP\n"));
        assert!(context.contains(
            "FILE: tb.csv\nCategory: trial_balance\nColumns: account, debit, note\nRow Count: 2\n"
        ));
        assert!(context.contains("Row 1: account: Cash | debit: 1500 | note: null\n"));
        assert!(context.contains("Row 2: account: Rent | debit: 12.5\n"));
        assert!(context.ends_with("---"));
    }

    #[test]
    fn test_bundle_from_file_row_limits_sample() {
        let rows: Vec<Value> = (0..30).map(|i| json!({"n": i})).collect();
        let file = AuditFileRow {
            id: uuid::Uuid::new_v4(),
            session_id: uuid::Uuid::new_v4(),
            file_name: "gl.xlsx".into(),
            file_type: "xlsx".into(),
            file_category: "general_ledger".into(),
            file_size: Some(2048),
            headers: None,
            row_count: Some(0),
            raw_data: Some(Value::Array(rows)),
            status: "processed".into(),
            created_at: chrono::Utc::now(),
        };
        let bundle = FileBundle::from(&file);
        assert_eq!(bundle.rows.len(), CONTEXT_SAMPLE_ROWS);

        let context = build_audit_context(&profile(), &[bundle]);
        assert!(context.contains("Columns: Unknown\nRow Count: Unknown\n"));
        assert!(context.contains("Row 20: n: 19\n"));
        assert!(!context.contains("Row 21:"));
    }
}
