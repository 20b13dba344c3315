//! Reads the parts of an xlsx package that calamine flattens away: hyperlink
//! targets and rich-text runs of the first worksheet.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek};

use anyhow::{Context, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

/// Per-cell extras keyed by zero-based (row, column).
#[derive(Debug, Default)]
pub(crate) struct SheetAnnotations {
    pub hyperlinks: HashMap<(u32, u32), String>,
    pub rich_text: HashMap<(u32, u32), Vec<String>>,
}

pub(crate) fn is_zip_package(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

pub(crate) fn read_first_sheet_annotations(bytes: &[u8]) -> Result<SheetAnnotations> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).context("not a zip package")?;

    let workbook_xml =
        read_part(&mut archive, "xl/workbook.xml").context("workbook part missing")?;
    let workbook_rels = read_part(&mut archive, "xl/_rels/workbook.xml.rels")
        .context("workbook relationships missing")?;

    let Some(sheet_rid) = first_sheet_rid(&workbook_xml) else {
        return Ok(SheetAnnotations::default());
    };
    let Some(target) = relationship_targets(&workbook_rels).remove(&sheet_rid) else {
        return Ok(SheetAnnotations::default());
    };
    let sheet_path = resolve_part_path("xl", &target);

    let sheet_xml = read_part(&mut archive, &sheet_path)
        .with_context(|| format!("worksheet part {sheet_path} missing"))?;
    let sheet_rels = read_part(&mut archive, &rels_path_for(&sheet_path))
        .map(|xml| relationship_targets(&xml))
        .unwrap_or_default();
    let shared = read_part(&mut archive, "xl/sharedStrings.xml")
        .map(|xml| shared_string_runs(&xml))
        .unwrap_or_default();

    Ok(scan_sheet(&sheet_xml, &sheet_rels, &shared))
}

fn read_part<R: Read + Seek>(archive: &mut zip::ZipArchive<R>, path: &str) -> Option<String> {
    let mut file = archive.by_name(path).ok()?;
    let mut content = String::new();
    file.read_to_string(&mut content).ok()?;
    Some(content)
}

fn first_sheet_rid(workbook_xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(workbook_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.name().as_ref() == b"sheet" => {
                return e
                    .attributes()
                    .flatten()
                    .find(|a| a.key.as_ref() == b"r:id")
                    .map(|a| String::from_utf8_lossy(&a.value).to_string());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

fn relationship_targets(rels_xml: &str) -> HashMap<String, String> {
    let mut targets = HashMap::new();
    let mut reader = Reader::from_str(rels_xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"Relationship" =>
            {
                let mut id = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"Id" => id = Some(String::from_utf8_lossy(&attr.value).to_string()),
                        b"Target" => target = Some(unescape(&String::from_utf8_lossy(&attr.value))),
                        _ => {}
                    }
                }
                if let (Some(id), Some(target)) = (id, target) {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    targets
}

/// One entry per `<si>`: `Some(runs)` when the string is made of formatted runs.
fn shared_string_runs(xml: &str) -> Vec<Option<Vec<String>>> {
    let mut entries = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut runs: Vec<String> = Vec::new();
    let mut current = String::new();
    let (mut in_run, mut in_t) = (false, false);

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"si" => runs.clear(),
                b"r" => {
                    in_run = true;
                    current.clear();
                }
                b"t" if in_run => in_t = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_t => {
                current.push_str(&unescape(&String::from_utf8_lossy(e.as_ref())));
            }
            Ok(Event::GeneralRef(ref e)) if in_t => {
                current.push_str(&resolve_entity(&String::from_utf8_lossy(e.as_ref())));
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"t" => in_t = false,
                b"r" => {
                    in_run = false;
                    runs.push(std::mem::take(&mut current));
                }
                b"si" => {
                    let entry = (!runs.is_empty()).then(|| std::mem::take(&mut runs));
                    entries.push(entry);
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    entries
}

fn scan_sheet(
    sheet_xml: &str,
    rels: &HashMap<String, String>,
    shared: &[Option<Vec<String>>],
) -> SheetAnnotations {
    let mut annotations = SheetAnnotations::default();
    let mut reader = Reader::from_str(sheet_xml);
    let mut buf = Vec::new();

    let mut shared_cell: Option<(u32, u32)> = None;
    let mut in_v = false;
    let mut value = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"c" => {
                let mut cell_ref = None;
                let mut is_shared = false;
                for attr in e.attributes().flatten() {
                    match attr.key.as_ref() {
                        b"r" => cell_ref = parse_cell_ref(&String::from_utf8_lossy(&attr.value)),
                        b"t" => is_shared = attr.value.as_ref() == b"s",
                        _ => {}
                    }
                }
                shared_cell = if is_shared { cell_ref } else { None };
            }
            Ok(Event::Start(ref e)) if e.name().as_ref() == b"v" => {
                in_v = true;
                value.clear();
            }
            Ok(Event::Text(ref e)) if in_v => {
                value.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"v" => {
                    in_v = false;
                    let runs = shared_cell
                        .zip(value.trim().parse::<usize>().ok())
                        .and_then(|(pos, idx)| Some((pos, shared.get(idx)?.clone()?)));
                    if let Some((pos, runs)) = runs {
                        annotations.rich_text.insert(pos, runs);
                    }
                }
                b"c" => shared_cell = None,
                _ => {}
            },
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e))
                if e.name().as_ref() == b"hyperlink" =>
            {
                let mut range = None;
                let mut target = None;
                for attr in e.attributes().flatten() {
                    let raw = String::from_utf8_lossy(&attr.value).to_string();
                    match attr.key.as_ref() {
                        b"ref" => range = Some(raw),
                        b"r:id" => target = rels.get(&raw).cloned().or(target),
                        b"location" if target.is_none() => target = Some(format!("#{}", unescape(&raw))),
                        _ => {}
                    }
                }
                if let (Some(range), Some(target)) = (range, target) {
                    for pos in expand_range(&range) {
                        annotations.hyperlinks.insert(pos, target.clone());
                    }
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    annotations
}

/// `worksheets/sheet1.xml` relative to `xl/`, or an absolute `/xl/...` target.
fn resolve_part_path(base_dir: &str, target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("{base_dir}/{target}"),
    }
}

fn rels_path_for(part_path: &str) -> String {
    match part_path.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part_path}.rels"),
    }
}

/// `B12` -> (11, 1). Absolute markers (`$`) are ignored.
fn parse_cell_ref(cell_ref: &str) -> Option<(u32, u32)> {
    let cell_ref = cell_ref.replace('$', "");
    let split = cell_ref.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = cell_ref.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .chars()
        .try_fold(0u32, |acc, c| {
            acc.checked_mul(26)?
                .checked_add(c.to_ascii_uppercase() as u32 - 'A' as u32 + 1)
        })?
        .checked_sub(1)?;
    let row = digits.parse::<u32>().ok()?.checked_sub(1)?;
    Some((row, col))
}

fn expand_range(range: &str) -> Vec<(u32, u32)> {
    let (start, end) = match range.split_once(':') {
        Some((a, b)) => (parse_cell_ref(a), parse_cell_ref(b)),
        None => (parse_cell_ref(range), parse_cell_ref(range)),
    };
    let (Some((r1, c1)), Some((r2, c2))) = (start, end) else {
        return Vec::new();
    };
    (r1.min(r2)..=r1.max(r2))
        .flat_map(|r| (c1.min(c2)..=c1.max(c2)).map(move |c| (r, c)))
        .collect()
}

fn resolve_entity(name: &str) -> String {
    match name {
        "amp" => "&".to_string(),
        "lt" => "<".to_string(),
        "gt" => ">".to_string(),
        "quot" => "\"".to_string(),
        "apos" => "'".to_string(),
        _ => {
            let code = if let Some(hex) = name.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| format!("&{name};"))
        }
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find(';') {
            Some(end) if end <= 10 => {
                out.push_str(&resolve_entity(&after[..end]));
                rest = &after[end + 1..];
            }
            _ => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("A1"), Some((0, 0)));
        assert_eq!(parse_cell_ref("B12"), Some((11, 1)));
        assert_eq!(parse_cell_ref("AA3"), Some((2, 26)));
        assert_eq!(parse_cell_ref("$C$4"), Some((3, 2)));
        assert_eq!(parse_cell_ref("12"), None);
        assert_eq!(parse_cell_ref("A0"), None);
    }

    #[test]
    fn test_expand_range() {
        assert_eq!(expand_range("B2"), vec![(1, 1)]);
        assert_eq!(expand_range("A1:B2"), vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    }

    #[test]
    fn test_part_paths() {
        assert_eq!(resolve_part_path("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_part_path("xl", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(rels_path_for("xl/worksheets/sheet1.xml"), "xl/worksheets/_rels/sheet1.xml.rels");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a &amp; b &lt;c&gt; &#65;&#x42;"), "a & b <c> AB");
        assert_eq!(unescape("R&D"), "R&D");
    }

    #[test]
    fn test_shared_string_runs() {
        let xml = r#"<sst><si><t>plain</t></si><si><r><rPr><b/></rPr><t>Net </t></r><r><t xml:space="preserve">Sales</t></r></si></sst>"#;
        let runs = shared_string_runs(xml);
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0], None);
        assert_eq!(runs[1], Some(vec!["Net ".to_string(), "Sales".to_string()]));
    }

    #[test]
    fn test_scan_sheet_collects_links_and_rich_cells() {
        let sheet = r#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
            <row r="2"><c r="A2" t="str"><v>1</v></c></row>
            </sheetData>
            <hyperlinks><hyperlink ref="A2" r:id="rId1"/><hyperlink ref="B2" location="Sheet2!A1"/></hyperlinks>
            </worksheet>"#;
        let mut rels = HashMap::new();
        rels.insert("rId1".to_string(), "https://example.com/?a=1&b=2".to_string());
        let shared = vec![None, Some(vec!["x".to_string(), "y".to_string()])];

        let annotations = scan_sheet(sheet, &rels, &shared);
        assert_eq!(annotations.rich_text.len(), 1);
        assert_eq!(annotations.rich_text[&(0, 1)], vec!["x", "y"]);
        assert_eq!(annotations.hyperlinks[&(1, 0)], "https://example.com/?a=1&b=2");
        assert_eq!(annotations.hyperlinks[&(1, 1)], "#Sheet2!A1");
    }
}
