//! Delimited text sources

use std::io::{Cursor, Read};

use csv::ReaderBuilder;
use serde_json::Value;

use super::error::GeneratorError;
use super::source::{open_text, read_text};
use super::{GeneratorContext, RawRows, RowGenerator, lazy};
use crate::location::AppUrl;
use crate::pipeline::Row;

const SNIFF_CANDIDATES: [u8; 4] = [b',', b'\t', b';', b'|'];

/// Rows of a CSV, TSV or plain text file
///
/// Every record becomes a row of string cells; records may differ in length.
#[derive(Debug, Clone)]
pub struct DelimitedGenerator {
    url: AppUrl,
    ctx: GeneratorContext,
    delimiter: Option<u8>,
}

impl DelimitedGenerator {
    /// `delimiter` of `None` sniffs the delimiter from the first line
    pub fn new(url: AppUrl, ctx: GeneratorContext, delimiter: Option<u8>) -> Self {
        Self {
            url,
            ctx,
            delimiter,
        }
    }

    fn open(&self) -> Result<RawRows, GeneratorError> {
        match self.delimiter {
            Some(delimiter) => Ok(parse_delimited(open_text(&self.url, &self.ctx)?, delimiter)),
            None => {
                let text = read_text(&self.url, &self.ctx)?;
                let delimiter = sniff_delimiter(&text);
                Ok(parse_delimited(Box::new(Cursor::new(text.into_bytes())), delimiter))
            }
        }
    }
}

impl RowGenerator for DelimitedGenerator {
    fn url(&self) -> &AppUrl {
        &self.url
    }

    fn rows(&self) -> RawRows {
        let this = self.clone();
        lazy(move || this.open())
    }
}

/// Parse delimited text into raw rows; no line is treated as a header
pub(crate) fn parse_delimited(reader: Box<dyn Read>, delimiter: u8) -> RawRows {
    let reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(reader);

    Box::new(reader.into_records().map(|record| {
        record
            .map(|r| r.iter().map(|field| Value::String(field.to_string())).collect::<Row>())
            .map_err(GeneratorError::from)
    }))
}

/// Most frequent candidate delimiter on the first non-blank line, comma on a tie
fn sniff_delimiter(text: &str) -> u8 {
    let Some(line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return b',';
    };
    SNIFF_CANDIDATES
        .iter()
        .copied()
        .map(|d| (line.bytes().filter(|b| *b == d).count(), d))
        .filter(|(count, _)| *count > 0)
        .max_by_key(|(count, d)| (*count, *d == b','))
        .map_or(b',', |(_, d)| d)
}
