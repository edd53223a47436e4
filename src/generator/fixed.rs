//! Fixed-width text sources

use serde_json::Value;

use super::error::GeneratorError;
use super::source::read_text;
use super::{GeneratorContext, RawRows, RowGenerator, lazy};
use crate::location::AppUrl;
use crate::pipeline::Row;

/// Rows of a fixed-width text file, sliced by the schema's column widths
///
/// Widths count characters, not bytes, and fields are trimmed. Empty lines are skipped
/// the same way the delimited sources skip them, so line numbers count the same rows for
/// both; a line of spaces is a row of empty fields.
#[derive(Debug, Clone)]
pub struct FixedWidthGenerator {
    url: AppUrl,
    ctx: GeneratorContext,
    widths: Vec<usize>,
}

impl FixedWidthGenerator {
    pub fn new(url: AppUrl, ctx: GeneratorContext) -> Result<Self, GeneratorError> {
        let widths = ctx
            .schema
            .as_ref()
            .and_then(|schema| schema.source_widths())
            .filter(|widths| !widths.is_empty())
            .ok_or_else(|| GeneratorError::MissingWidths {
                url: url.to_string(),
            })?;
        Ok(Self { url, ctx, widths })
    }

    pub fn widths(&self) -> &[usize] {
        &self.widths
    }

    fn open(&self) -> Result<RawRows, GeneratorError> {
        let text = read_text(&self.url, &self.ctx)?;
        let rows: Vec<Result<Row, GeneratorError>> = text
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| Ok(split_fixed(line, &self.widths)))
            .collect();
        Ok(Box::new(rows.into_iter()))
    }
}

impl RowGenerator for FixedWidthGenerator {
    fn url(&self) -> &AppUrl {
        &self.url
    }

    fn rows(&self) -> RawRows {
        let this = self.clone();
        lazy(move || this.open())
    }
}

fn split_fixed(line: &str, widths: &[usize]) -> Vec<Value> {
    let chars: Vec<char> = line.chars().collect();
    let mut start = 0;
    widths
        .iter()
        .map(|width| {
            let end = (start + width).min(chars.len());
            let field: String = chars[start.min(end)..end].iter().collect();
            start += width;
            Value::String(field.trim().to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::test_support::{collect, context};
    use crate::models::{Column, Table};
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn schema(widths: &[Option<usize>]) -> Table {
        let columns = widths
            .iter()
            .enumerate()
            .map(|(i, w)| {
                let column = Column::new(format!("c{}", i));
                match w {
                    Some(w) => column.with_width(*w),
                    None => column,
                }
            })
            .collect();
        Table::new("t", columns)
    }

    #[test]
    fn test_split_fixed() {
        assert_eq!(
            split_fixed("0001Alice     NY", &[4, 10, 2]),
            vec![json!("0001"), json!("Alice"), json!("NY")]
        );
        assert_eq!(split_fixed("01", &[4, 10]), vec![json!("01"), json!("")]);
        assert_eq!(split_fixed("ñand", &[1, 3]), vec![json!("ñ"), json!("and")]);
    }

    #[test]
    fn test_fixed_width_rows() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("people.fwf");
        fs::write(&path, "id  name\n1   Alice\n\n2   Bob\n").unwrap();

        let ctx = context(&temp).with_schema(Some(schema(&[Some(4), Some(10)])));
        let generator = FixedWidthGenerator::new(AppUrl::from_path(&path), ctx).unwrap();
        assert_eq!(generator.widths(), &[4, 10]);
        assert_eq!(
            collect(&generator),
            vec![
                vec![json!("id"), json!("name")],
                vec![json!("1"), json!("Alice")],
                vec![json!("2"), json!("Bob")],
            ]
        );
    }

    #[test]
    fn test_lines_counted_like_delimited_sources() {
        let temp = TempDir::new().unwrap();
        let text = "id  name\n\n1   Alice\n    \n2   Bob\n";
        let path = temp.path().join("people.fwf");
        fs::write(&path, text).unwrap();

        let ctx = context(&temp).with_schema(Some(schema(&[Some(4), Some(10)])));
        let generator = FixedWidthGenerator::new(AppUrl::from_path(&path), ctx).unwrap();
        let fixed = collect(&generator);
        assert_eq!(fixed[2], vec![json!(""), json!("")]);
        assert_eq!(fixed[3], vec![json!("2"), json!("Bob")]);

        let delimited = crate::generator::delimited::parse_delimited(
            Box::new(std::io::Cursor::new(text.as_bytes().to_vec())),
            b',',
        )
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
        assert_eq!(fixed.len(), delimited.len());
    }

    #[test]
    fn test_missing_widths_fail_construction() {
        let temp = TempDir::new().unwrap();
        let url = AppUrl::parse("data/people.fwf").unwrap();

        let ctx = context(&temp).with_schema(Some(schema(&[Some(4), None])));
        let err = FixedWidthGenerator::new(url.clone(), ctx).unwrap_err();
        assert!(matches!(err, GeneratorError::MissingWidths { .. }));

        assert!(FixedWidthGenerator::new(url, context(&temp)).is_err());
    }
}
