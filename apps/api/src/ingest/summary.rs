//! Column classification and the bounded dataset summary embedded in AI prompts.
//!
//! The exact output text is consumed downstream as prompt context, so the column
//! cap, sample window and numeric threshold are fixed constants.

use std::collections::HashSet;

use crate::ingest::cell::{display_number, CellValue, Row};

/// Only the leading columns get a detailed description.
pub const MAX_ANALYZED_COLUMNS: usize = 5;
/// Non-null values per column inspected for type detection.
pub const SAMPLE_SIZE: usize = 10;
/// Minimum share (percent) of numeric-convertible sample values for a numeric column.
pub const NUMERIC_SHARE_PCT: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

/// Builds the summary string for a parsed table.
pub fn summarize(headers: &[String], rows: &[Row]) -> String {
    let column_count = headers.len();

    let analysis: Vec<String> = headers
        .iter()
        .take(MAX_ANALYZED_COLUMNS)
        .filter_map(|header| describe_column(header, rows))
        .collect();

    let more_columns = if column_count > MAX_ANALYZED_COLUMNS {
        format!(" and {} more columns", column_count - MAX_ANALYZED_COLUMNS)
    } else {
        String::new()
    };

    format!(
        "Dataset contains {} records with {} columns. Column analysis: {}{}.",
        rows.len(),
        column_count,
        analysis.join("; "),
        more_columns
    )
}

/// Returns `None` for a numeric-looking column none of whose values yield a number
/// under prefix parsing (e.g. a column of empty strings).
fn describe_column(header: &str, rows: &[Row]) -> Option<String> {
    let values: Vec<&CellValue> = rows
        .iter()
        .filter_map(|row| row.get(header))
        .filter(|v| !v.is_null())
        .collect();
    let sample = &values[..values.len().min(SAMPLE_SIZE)];

    if classify_column(sample) == ColumnKind::Numeric && !values.is_empty() {
        let numbers: Vec<f64> = values.iter().filter_map(|v| parse_float_value(v)).collect();
        if numbers.is_empty() {
            return None;
        }
        let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
        let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let avg = numbers.iter().sum::<f64>() / numbers.len() as f64;
        return Some(format!(
            "{header}: numeric (range {}-{}, avg {})",
            format_number(min),
            format_number(max),
            format_number(avg)
        ));
    }

    let unique: HashSet<String> = values.iter().map(|v| v.display_string()).collect();
    Some(format!("{header}: categorical ({} unique values)", unique.len()))
}

/// Numeric when at least `NUMERIC_SHARE_PCT` of the sample converts to a number.
/// An empty sample is categorical.
pub fn classify_column(sample: &[&CellValue]) -> ColumnKind {
    if sample.is_empty() {
        return ColumnKind::Categorical;
    }
    let numeric = sample.iter().filter(|v| to_number(v).is_some()).count();
    if numeric * 100 >= sample.len() * NUMERIC_SHARE_PCT {
        ColumnKind::Numeric
    } else {
        ColumnKind::Categorical
    }
}

/// Compact rendering: `1.2M`, `2.3K`, `42`, `3.14`.
pub fn format_number(value: f64) -> String {
    if value.abs() >= 1_000_000.0 {
        format!("{}M", to_fixed(value / 1_000_000.0, 1))
    } else if value.abs() >= 1_000.0 {
        format!("{}K", to_fixed(value / 1_000.0, 1))
    } else if value.fract() == 0.0 {
        display_number(value)
    } else {
        to_fixed(value, 2)
    }
}

/// Fixed-point rendering with exact ties rounded away from zero.
fn to_fixed(value: f64, digits: usize) -> String {
    if !value.is_finite() {
        return display_number(value);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    let magnitude = value.abs();

    // Enough extra digits to expose the exact binary value's decimal tail.
    let expanded = format!("{:.*}", digits + 60, magnitude);
    let (int_part, frac_part) = expanded.split_once('.').unwrap_or((expanded.as_str(), ""));
    let (kept, tail) = frac_part.split_at(digits.min(frac_part.len()));
    let is_tie = tail.starts_with('5') && tail[1..].bytes().all(|b| b == b'0');

    if !is_tie {
        return format!("{sign}{:.*}", digits, magnitude);
    }

    let mut digits_buf: Vec<u8> = int_part.bytes().chain(kept.bytes()).collect();
    let mut carry = true;
    for d in digits_buf.iter_mut().rev() {
        if !carry {
            break;
        }
        if *d == b'9' {
            *d = b'0';
        } else {
            *d += 1;
            carry = false;
        }
    }
    if carry {
        digits_buf.insert(0, b'1');
    }
    let split = digits_buf.len() - kept.len();
    let int_str = String::from_utf8_lossy(&digits_buf[..split]);
    if kept.is_empty() {
        format!("{sign}{int_str}")
    } else {
        let frac_str = String::from_utf8_lossy(&digits_buf[split..]);
        format!("{sign}{int_str}.{frac_str}")
    }
}

/// Whole-value numeric conversion: surrounding whitespace ignored, an empty string
/// converts to zero, decimal, exponent, `Infinity` and 0x/0o/0b forms accepted.
pub fn to_number(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Null => Some(0.0),
        CellValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        CellValue::Number(n) => (!n.is_nan()).then_some(*n),
        CellValue::Text(s) => parse_number_str(s),
    }
}

fn parse_number_str(s: &str) -> Option<f64> {
    let t = s.trim();
    if t.is_empty() {
        return Some(0.0);
    }
    match t {
        "Infinity" | "+Infinity" => return Some(f64::INFINITY),
        "-Infinity" => return Some(f64::NEG_INFINITY),
        _ => {}
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = t.strip_prefix(prefix) {
            return u128::from_str_radix(digits, radix).ok().map(|n| n as f64);
        }
    }
    if scan_decimal(t.as_bytes()) == t.len() {
        t.parse::<f64>().ok()
    } else {
        None
    }
}

/// Leading-prefix numeric parse: `"12abc"` yields 12, booleans yield nothing.
pub fn parse_float_value(value: &CellValue) -> Option<f64> {
    match value {
        CellValue::Number(n) => (!n.is_nan()).then_some(*n),
        CellValue::Text(s) => parse_float_prefix(s),
        CellValue::Null | CellValue::Bool(_) => None,
    }
}

fn parse_float_prefix(s: &str) -> Option<f64> {
    let t = s.trim_start();
    for (prefix, value) in [
        ("Infinity", f64::INFINITY),
        ("+Infinity", f64::INFINITY),
        ("-Infinity", f64::NEG_INFINITY),
    ] {
        if t.starts_with(prefix) {
            return Some(value);
        }
    }
    let len = scan_decimal(t.as_bytes());
    if len == 0 {
        return None;
    }
    t[..len].parse::<f64>().ok()
}

/// Length of the longest prefix matching `[+-]? (digits [. digits?] | . digits) ([eE][+-]?digits)?`.
fn scan_decimal(bytes: &[u8]) -> usize {
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut mantissa_digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        let frac_start = i + 1;
        let mut j = frac_start;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        mantissa_digits += j - frac_start;
        if mantissa_digits > 0 {
            i = j;
        }
    }
    if mantissa_digits == 0 {
        return 0;
    }
    let end = i;
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        let mut j = i + 1;
        if j < bytes.len() && matches!(bytes[j], b'+' | b'-') {
            j += 1;
        }
        let exp_start = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j > exp_start {
            return j;
        }
    }
    end
}
