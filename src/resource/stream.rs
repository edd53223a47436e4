//! Header-then-rows iteration over a resource

use std::collections::VecDeque;

use serde::Serialize;
use tracing::debug;

use super::error::ResourceError;
use super::headers::coalesce_headers;
use crate::generator::RawRows;
use crate::pipeline::{ErrorMap, Row, RowProcessor};

/// One item of a resource's row stream
///
/// The first item of every pass is the header; all later items are rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamItem {
    Header(Vec<String>),
    Row(Row),
}

impl StreamItem {
    pub fn into_row(self) -> Option<Row> {
        match self {
            StreamItem::Row(row) => Some(row),
            StreamItem::Header(_) => None,
        }
    }
}

/// How the header of a pass is obtained
pub(crate) enum HeaderPlan {
    /// From the schema
    Declared(Vec<String>),
    /// Coalesced from these physical lines of the source
    Intuit(Vec<usize>),
}

/// Where data rows come from
pub(crate) enum Body {
    /// Rows cast to the schema; the source is already positioned at the start line
    Typed(RowProcessor<RawRows>),
    /// Rows passed through as read; `line` is the index of the next row `rows` yields
    Raw {
        rows: RawRows,
        start: usize,
        line: usize,
        pending: VecDeque<Row>,
    },
}

impl Body {
    fn next_row(&mut self) -> Option<Result<Row, ResourceError>> {
        match self {
            Body::Typed(processor) => processor.next().map(|r| r.map_err(Into::into)),
            Body::Raw {
                rows,
                start,
                line,
                pending,
            } => {
                if let Some(row) = pending.pop_front() {
                    return Some(Ok(row));
                }
                while *line < *start {
                    *line += 1;
                    match rows.next()? {
                        Ok(_) => {}
                        Err(e) => return Some(Err(e.into())),
                    }
                }
                *line += 1;
                rows.next().map(|r| r.map_err(Into::into))
            }
        }
    }
}

enum State {
    NotStarted { header: HeaderPlan, body: Body },
    Rows(Body),
    Delegated(Box<RowStream>),
    Exhausted,
}

/// A single pass over a resource: the header, then every data row
///
/// The stream moves from not started, through the header, through the data rows, to
/// exhausted. A reference to a resource of another package hands the whole pass to that
/// resource's own stream. Start a new pass with [`Resource::rows`](super::Resource::rows).
pub struct RowStream {
    state: State,
}

impl RowStream {
    pub(crate) fn new(header: HeaderPlan, body: Body) -> Self {
        Self {
            state: State::NotStarted { header, body },
        }
    }

    pub(crate) fn delegated(inner: RowStream) -> Self {
        Self {
            state: State::Delegated(Box::new(inner)),
        }
    }

    /// Casting errors collected so far in this pass
    ///
    /// Once the stream is exhausted the same errors are on the resource.
    pub fn errors(&self) -> ErrorMap {
        match &self.state {
            State::NotStarted {
                body: Body::Typed(p),
                ..
            }
            | State::Rows(Body::Typed(p)) => p.errors().clone(),
            State::Delegated(inner) => inner.errors(),
            _ => ErrorMap::new(),
        }
    }

    /// Split off the header and collect every remaining row
    pub fn collect_rows(self) -> Result<(Vec<String>, Vec<Row>), ResourceError> {
        let mut header = Vec::new();
        let mut rows = Vec::new();
        for item in self {
            match item? {
                StreamItem::Header(h) => header = h,
                StreamItem::Row(r) => rows.push(r),
            }
        }
        Ok((header, rows))
    }
}

impl Iterator for RowStream {
    type Item = Result<StreamItem, ResourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.state, State::Exhausted) {
            State::NotStarted { header, mut body } => {
                let header = match header {
                    HeaderPlan::Declared(header) => header,
                    HeaderPlan::Intuit(lines) => match intuit(&lines, &mut body) {
                        Ok(header) => header,
                        Err(e) => return Some(Err(e)),
                    },
                };
                self.state = State::Rows(body);
                Some(Ok(StreamItem::Header(header)))
            }
            State::Rows(mut body) => {
                let item = body.next_row()?;
                self.state = State::Rows(body);
                Some(item.map(StreamItem::Row))
            }
            State::Delegated(mut inner) => {
                let item = inner.next()?;
                self.state = State::Delegated(inner);
                Some(item)
            }
            State::Exhausted => None,
        }
    }
}

/// Read the header lines off the front of a raw body
///
/// Rows at or past the start line that had to be read to reach the last header line
/// are kept for the data pass.
fn intuit(lines: &[usize], body: &mut Body) -> Result<Vec<String>, ResourceError> {
    let Body::Raw {
        rows,
        start,
        line,
        pending,
    } = body
    else {
        return Ok(Vec::new());
    };

    let last = lines.iter().copied().max().unwrap_or(0);
    let mut header_lines = Vec::with_capacity(lines.len());
    while *line <= last {
        let Some(row) = rows.next() else {
            break;
        };
        let row = row?;
        if *line >= *start {
            pending.push_back(row.clone());
        }
        if lines.contains(line) {
            header_lines.push(row);
        }
        *line += 1;
    }

    let header = coalesce_headers(&header_lines);
    debug!(lines = ?lines, header = ?header, "Intuited header");
    Ok(header)
}
