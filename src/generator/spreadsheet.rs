//! Spreadsheet (xlsx) sources
//!
//! Reads one worksheet of an Office Open XML workbook straight from its zip parts:
//! `xl/workbook.xml` names the sheets, `xl/_rels/workbook.xml.rels` maps them to
//! part files, and `xl/sharedStrings.xml` holds the string table.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::Value;
use tracing::debug;
use zip::ZipArchive;

use super::error::GeneratorError;
use super::source::read_bytes;
use super::{GeneratorContext, RawRows, RowGenerator, lazy};
use crate::location::AppUrl;
use crate::pipeline::Row;

// Worksheet limits of the xlsx format
const MAX_COLUMNS: usize = 16_384;
const MAX_ROWS: usize = 1_048_576;

/// Rows of one worksheet
///
/// The URL's segment selects the sheet by name, or by 0-based position when no sheet
/// has that name; without a segment the first sheet is read. Empty rows between
/// populated ones are kept so line numbers match the sheet.
#[derive(Debug, Clone)]
pub struct SpreadsheetGenerator {
    url: AppUrl,
    ctx: GeneratorContext,
}

impl SpreadsheetGenerator {
    pub fn new(url: AppUrl, ctx: GeneratorContext) -> Self {
        Self { url, ctx }
    }

    fn open(&self) -> Result<RawRows, GeneratorError> {
        let bytes = read_bytes(&self.url, &self.ctx)?;
        let mut workbook = Workbook::new(Cursor::new(bytes))?;
        let rows = workbook.read_sheet(&self.url, self.url.target_segment())?;
        Ok(Box::new(rows.into_iter().map(Ok)))
    }
}

impl RowGenerator for SpreadsheetGenerator {
    fn url(&self) -> &AppUrl {
        &self.url
    }

    fn rows(&self) -> RawRows {
        let this = self.clone();
        lazy(move || this.open())
    }
}

struct Workbook<R> {
    archive: ZipArchive<R>,
    shared_strings: Vec<String>,
}

impl<R: Read + Seek> Workbook<R> {
    fn new(reader: R) -> Result<Self, GeneratorError> {
        let mut archive = ZipArchive::new(reader)?;
        let shared_strings = match read_part(&mut archive, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml)?,
            None => Vec::new(),
        };
        Ok(Self {
            archive,
            shared_strings,
        })
    }

    /// Sheet names and part paths, in workbook order
    fn sheets(&mut self) -> Result<Vec<(String, String)>, GeneratorError> {
        let workbook = read_part(&mut self.archive, "xl/workbook.xml")?.ok_or_else(|| {
            GeneratorError::Xml {
                part: "xl/workbook.xml".to_string(),
                error: "missing".to_string(),
            }
        })?;
        let rels = read_part(&mut self.archive, "xl/_rels/workbook.xml.rels")?.unwrap_or_default();
        let targets = parse_relationships(&rels)?;

        parse_sheet_list(&workbook)?
            .into_iter()
            .enumerate()
            .map(|(i, (name, rel_id))| {
                let path = match targets.get(&rel_id) {
                    Some(target) if target.starts_with('/') => target.trim_start_matches('/').to_string(),
                    Some(target) => format!("xl/{}", target),
                    None => format!("xl/worksheets/sheet{}.xml", i + 1),
                };
                Ok((name, path))
            })
            .collect()
    }

    fn read_sheet(&mut self, url: &AppUrl, selector: Option<&str>) -> Result<Vec<Row>, GeneratorError> {
        let sheets = self.sheets()?;
        let chosen = match selector {
            None => sheets.first(),
            Some(selector) => sheets.iter().find(|(name, _)| name == selector).or_else(|| {
                selector.parse::<usize>().ok().and_then(|i| sheets.get(i))
            }),
        };
        let (name, path) = chosen.ok_or_else(|| GeneratorError::Sheet {
            url: url.to_string(),
            sheet: selector.unwrap_or("0").to_string(),
        })?;
        debug!("Reading sheet '{}' from {}", name, path);

        let xml = read_part(&mut self.archive, path)?.ok_or_else(|| GeneratorError::Sheet {
            url: url.to_string(),
            sheet: name.clone(),
        })?;
        parse_sheet(&xml, path, &self.shared_strings)
    }
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, GeneratorError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut xml = String::new();
    entry.read_to_string(&mut xml).map_err(|e| xml_error(name, e))?;
    Ok(Some(xml))
}

fn xml_error(part: &str, error: impl std::fmt::Display) -> GeneratorError {
    GeneratorError::Xml {
        part: part.to_string(),
        error: error.to_string(),
    }
}

fn attribute(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == name)
        .map(|attr| String::from_utf8_lossy(&attr.value).to_string())
}

fn parse_sheet_list(xml: &str) -> Result<Vec<(String, String)>, GeneratorError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut sheets = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"sheet" => {
                let name = attribute(e, b"name").unwrap_or_default();
                let rel_id = attribute(e, b"id").unwrap_or_default();
                sheets.push((name, rel_id));
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("xl/workbook.xml", e)),
            _ => {}
        }
    }
    Ok(sheets)
}

fn parse_relationships(xml: &str) -> Result<BTreeMap<String, String>, GeneratorError> {
    let mut targets = BTreeMap::new();
    if xml.is_empty() {
        return Ok(targets);
    }
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) | Ok(Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attribute(e, b"Id"), attribute(e, b"Target")) {
                    targets.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("xl/_rels/workbook.xml.rels", e)),
            _ => {}
        }
    }
    Ok(targets)
}

fn parse_shared_strings(xml: &str) -> Result<Vec<String>, GeneratorError> {
    let mut reader = Reader::from_str(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) if e.local_name().as_ref() == b"si" => strings.push(String::new()),
            Ok(Event::Text(ref t)) if in_text => {
                let text = t.unescape().map_err(|e| xml_error("xl/sharedStrings.xml", e))?;
                if let Some(current) = current.as_mut() {
                    current.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error("xl/sharedStrings.xml", e)),
            _ => {}
        }
    }
    Ok(strings)
}

/// Cell under construction while its children are read
struct PendingCell {
    column: Option<usize>,
    kind: String,
    text: String,
}

fn parse_sheet(xml: &str, part: &str, shared: &[String]) -> Result<Vec<Row>, GeneratorError> {
    let mut reader = Reader::from_str(xml);
    let mut rows: Vec<Row> = Vec::new();
    let mut row: Option<(usize, BTreeMap<usize, Value>)> = None;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"row" => row = Some((row_number(e, rows.len() + 1, part)?, BTreeMap::new())),
                b"c" => cell = Some(pending_cell(e, part)?),
                b"v" | b"t" => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"row" => {
                    let number = row_number(e, rows.len() + 1, part)?;
                    push_row(&mut rows, number, BTreeMap::new());
                }
                b"c" => {
                    let column = pending_cell(e, part)?.column;
                    if let (Some((_, cells)), Some(column)) = (row.as_mut(), column) {
                        cells.insert(column, Value::String(String::new()));
                    }
                }
                _ => {}
            },
            Ok(Event::Text(ref t)) if in_value => {
                let text = t.unescape().map_err(|e| xml_error(part, e))?;
                if let Some(cell) = cell.as_mut() {
                    cell.text.push_str(&text);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let (Some((_, cells)), Some(done)) = (row.as_mut(), cell.take()) {
                        let column = done.column.unwrap_or(cells.len());
                        if column >= MAX_COLUMNS {
                            return Err(xml_error(part, "row has more cells than a sheet allows"));
                        }
                        cells.insert(column, cell_value(done, shared));
                    }
                }
                b"row" => {
                    if let Some((number, cells)) = row.take() {
                        push_row(&mut rows, number, cells);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(xml_error(part, e)),
            _ => {}
        }
    }
    Ok(rows)
}

/// The `r` attribute of a row, else the next row number
///
/// Numbers outside the sheet limits are an error rather than a row to pad up to.
fn row_number(e: &BytesStart<'_>, next: usize, part: &str) -> Result<usize, GeneratorError> {
    let number = match attribute(e, b"r") {
        Some(r) => r
            .trim()
            .parse::<usize>()
            .map_err(|_| xml_error(part, format!("invalid row number '{}'", r)))?,
        None => next,
    };
    if number == 0 || number > MAX_ROWS {
        return Err(xml_error(part, format!("row number {} is out of range", number)));
    }
    Ok(number)
}

fn pending_cell(e: &BytesStart<'_>, part: &str) -> Result<PendingCell, GeneratorError> {
    let column = match attribute(e, b"r") {
        Some(r) => {
            let column = column_index(&r)
                .filter(|c| *c < MAX_COLUMNS)
                .ok_or_else(|| xml_error(part, format!("cell reference '{}' is out of range", r)))?;
            Some(column)
        }
        None => None,
    };
    Ok(PendingCell {
        column,
        kind: attribute(e, b"t").unwrap_or_default(),
        text: String::new(),
    })
}

/// Append a sheet row, padding gaps in both row numbers and columns
fn push_row(rows: &mut Vec<Row>, number: usize, cells: BTreeMap<usize, Value>) {
    while rows.len() + 1 < number {
        rows.push(Vec::new());
    }
    let width = cells.keys().next_back().map_or(0, |last| last + 1);
    let mut row = vec![Value::String(String::new()); width];
    for (column, value) in cells {
        row[column] = value;
    }
    rows.push(row);
}

fn cell_value(cell: PendingCell, shared: &[String]) -> Value {
    match cell.kind.as_str() {
        "s" => cell
            .text
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map_or(Value::Null, |s| Value::String(s.clone())),
        "b" => Value::Bool(cell.text.trim() == "1"),
        "str" | "inlineStr" | "e" => Value::String(cell.text),
        _ => numeric_value(&cell.text),
    }
}

fn numeric_value(text: &str) -> Value {
    let text = text.trim();
    if text.is_empty() {
        return Value::String(String::new());
    }
    if let Ok(i) = text.parse::<i64>() {
        return Value::from(i);
    }
    match text.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f.abs() < 1e15 => Value::from(f as i64),
        Ok(f) => serde_json::Number::from_f64(f).map_or(Value::String(text.to_string()), Value::Number),
        Err(_) => Value::String(text.to_string()),
    }
}

/// 0-based column index of a cell reference such as `AB12`
fn column_index(reference: &str) -> Option<usize> {
    let letters: Vec<u8> = reference
        .bytes()
        .take_while(u8::is_ascii_alphabetic)
        .map(|b| b.to_ascii_uppercase())
        .collect();
    if letters.is_empty() {
        return None;
    }
    letters
        .iter()
        .try_fold(0usize, |acc, b| {
            acc.checked_mul(26)?.checked_add((b - b'A') as usize + 1)
        })
        .map(|n| n - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support::{collect, context};
    use serde_json::json;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const WORKBOOK: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
  <sheets>
    <sheet name="People" sheetId="1" r:id="rId1"/>
    <sheet name="Totals" sheetId="2" r:id="rId2"/>
  </sheets>
</workbook>"#;

    const RELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
  <Relationship Id="rId1" Type="worksheet" Target="worksheets/sheet1.xml"/>
  <Relationship Id="rId2" Type="worksheet" Target="/xl/worksheets/sheet2.xml"/>
</Relationships>"#;

    const SHARED: &str = r#"<sst><si><t>id</t></si><si><t>name</t></si><si><r><t>Al</t></r><r><t>ice</t></r></si></sst>"#;

    const SHEET1: &str = r#"<worksheet><sheetData>
  <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
  <row r="2"><c r="A2"><v>1</v></c><c r="B2" t="s"><v>2</v></c></row>
  <row r="4"><c r="A4"><v>2.5</v></c><c r="C4" t="inlineStr"><is><t>Bob &amp; co</t></is></c></row>
</sheetData></worksheet>"#;

    const SHEET2: &str = r#"<worksheet><sheetData>
  <row r="1"><c r="A1" t="b"><v>1</v></c></row>
</sheetData></worksheet>"#;

    fn write_workbook(path: &Path) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, content) in [
            ("xl/workbook.xml", WORKBOOK),
            ("xl/_rels/workbook.xml.rels", RELS),
            ("xl/sharedStrings.xml", SHARED),
            ("xl/worksheets/sheet1.xml", SHEET1),
            ("xl/worksheets/sheet2.xml", SHEET2),
        ] {
            zip.start_file(name, SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("A1"), Some(0));
        assert_eq!(column_index("Z9"), Some(25));
        assert_eq!(column_index("AA10"), Some(26));
        assert_eq!(column_index("12"), None);
    }

    #[test]
    fn test_references_past_sheet_limits_are_errors() {
        let part = "xl/worksheets/sheet1.xml";
        let wide = r#"<worksheet><sheetData><row r="1"><c r="ZZZZZZZZZZZZ1" t="str"><v>x</v></c></row></sheetData></worksheet>"#;
        assert!(matches!(parse_sheet(wide, part, &[]), Err(GeneratorError::Xml { .. })));

        let tall = r#"<worksheet><sheetData><row r="99999999999"><c r="A1"><v>1</v></c></row></sheetData></worksheet>"#;
        assert!(matches!(parse_sheet(tall, part, &[]), Err(GeneratorError::Xml { .. })));

        let last = r#"<worksheet><sheetData><row r="1"><c r="XFD1"><v>1</v></c></row></sheetData></worksheet>"#;
        let rows = parse_sheet(last, part, &[]).unwrap();
        assert_eq!(rows[0].len(), MAX_COLUMNS);
        assert_eq!(rows[0][MAX_COLUMNS - 1], json!(1));
    }

    #[test]
    fn test_first_sheet_by_default() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.xlsx");
        write_workbook(&path);

        let generator = SpreadsheetGenerator::new(AppUrl::from_path(&path), context(&temp));
        assert_eq!(
            collect(&generator),
            vec![
                vec![json!("id"), json!("name")],
                vec![json!(1), json!("Alice")],
                vec![],
                vec![json!(2.5), json!(""), json!("Bob & co")],
            ]
        );
    }

    #[test]
    fn test_sheet_by_name_and_position() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.xlsx");
        write_workbook(&path);

        let by_name = AppUrl::from_path(&path).with_fragment(Some("Totals"));
        let generator = SpreadsheetGenerator::new(by_name, context(&temp));
        assert_eq!(collect(&generator), vec![vec![json!(true)]]);

        let by_position = AppUrl::from_path(&path).with_fragment(Some("1"));
        let generator = SpreadsheetGenerator::new(by_position, context(&temp));
        assert_eq!(collect(&generator), vec![vec![json!(true)]]);
    }

    #[test]
    fn test_missing_sheet() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("book.xlsx");
        write_workbook(&path);

        let url = AppUrl::from_path(&path).with_fragment(Some("Nope"));
        let generator = SpreadsheetGenerator::new(url, context(&temp));
        let mut rows = generator.rows();
        assert!(matches!(rows.next(), Some(Err(GeneratorError::Sheet { .. }))));
    }
}
