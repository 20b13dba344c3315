//! Cell-level value model shared by the CSV and workbook readers.

use serde::{ser::SerializeMap, Serialize, Serializer};

/// A loosely-typed scalar as it appears in a parsed record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Null or the empty string. Whitespace-only text is data.
    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Null => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// Canonical string rendering used for distinct-value counting and prompt context.
    pub fn display_string(&self) -> String {
        match self {
            CellValue::Null => "null".to_string(),
            CellValue::Bool(b) => b.to_string(),
            CellValue::Number(n) => display_number(*n),
            CellValue::Text(s) => s.clone(),
        }
    }
}

/// Renders a number the way a JSON-minded reader expects: integral values carry no
/// fractional part, everything else uses the shortest round-trip representation.
pub fn display_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{n}")
    }
}

/// One parsed record: header name -> value, in source column order.
///
/// Inserting an existing key replaces its value in place, so a duplicated header
/// keeps the right-most column's value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    cells: Vec<(String, CellValue)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: CellValue) {
        let key = key.into();
        match self.cells.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.cells.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&CellValue> {
        self.cells.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CellValue)> {
        self.cells.iter().map(|(k, v)| (k.as_str(), v))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// True when at least one cell holds a non-null, non-empty value.
    pub fn has_data(&self) -> bool {
        self.cells.iter().any(|(_, v)| !v.is_blank())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len()))?;
        for (key, value) in &self.cells {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// A workbook cell before reduction to a scalar.
///
/// Readers build one of these per cell with [`RawCell::classify`], which fixes the
/// precedence formula result > rich-text runs > link display text > link target.
#[derive(Debug, Clone, PartialEq)]
pub enum RawCell {
    Plain(CellValue),
    /// Computed cell; only the cached result is ever used, never the formula text.
    Formula { cached: Option<CellValue> },
    RichText(Vec<String>),
    Hyperlink {
        display: Option<String>,
        target: String,
    },
}

impl RawCell {
    pub fn classify(
        value: CellValue,
        has_formula: bool,
        rich_text: Option<Vec<String>>,
        hyperlink: Option<String>,
    ) -> Self {
        if has_formula {
            let cached = (!value.is_null()).then_some(value);
            return RawCell::Formula { cached };
        }
        if let Some(parts) = rich_text {
            return RawCell::RichText(parts);
        }
        if let Some(target) = hyperlink {
            let display = match value {
                CellValue::Null => None,
                other => Some(other.display_string()),
            };
            return RawCell::Hyperlink { display, target };
        }
        RawCell::Plain(value)
    }

    pub fn resolve(self) -> CellValue {
        match self {
            RawCell::Plain(value) => value,
            RawCell::Formula { cached } => cached.unwrap_or(CellValue::Null),
            RawCell::RichText(parts) => CellValue::Text(parts.concat()),
            RawCell::Hyperlink { display, target } => match display {
                Some(text) if !text.is_empty() => CellValue::Text(text),
                _ => CellValue::Text(target),
            },
        }
    }
}
