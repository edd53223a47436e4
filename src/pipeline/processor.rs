//! Type-casting row processor

use std::collections::BTreeMap;
use std::sync::PoisonError;

use serde_json::Value;
use tracing::{debug, warn};

use super::cast::cast_value;
use super::transform::{RowContext, TransformPlan};
use super::{ErrorMap, Row, SharedErrors};
use crate::models::Table;

/// Wraps a raw row iterator and coerces every row to a schema
///
/// Each output row has one field per schema column. Source fields are consumed in order
/// by the non-sentinel columns; sentinel columns start out null and are usually filled
/// by their transform. Missing source fields are null and surplus ones are dropped.
///
/// Field failures never end the stream: the field becomes null and a description is
/// recorded under the column's name. When the source is exhausted the collected errors
/// are published to the shared error map.
pub struct RowProcessor<I> {
    source: I,
    table: Table,
    plan: TransformPlan,
    source_headers: Vec<String>,
    env: BTreeMap<String, String>,
    errors: ErrorMap,
    sink: SharedErrors,
    line: usize,
    rows: usize,
    done: bool,
}

impl<I, E> RowProcessor<I>
where
    I: Iterator<Item = Result<Row, E>>,
{
    /// `first_line` is the 0-based source line of the first row `source` yields
    pub fn new(
        source: I,
        table: Table,
        plan: TransformPlan,
        env: BTreeMap<String, String>,
        sink: SharedErrors,
        first_line: usize,
    ) -> Self {
        let source_headers = table.source_headers();
        Self {
            source,
            table,
            plan,
            source_headers,
            env,
            errors: ErrorMap::new(),
            sink,
            line: first_line,
            rows: 0,
            done: false,
        }
    }

    /// Errors collected so far in this pass
    pub fn errors(&self) -> &ErrorMap {
        &self.errors
    }

    fn process(&mut self, raw: Row) -> Row {
        let ctx = RowContext {
            headers: &self.source_headers,
            row: &raw,
            env: &self.env,
        };
        let mut fields = raw.iter();
        let mut out = Vec::with_capacity(self.table.len());

        for (i, column) in self.table.columns.iter().enumerate() {
            let key = if column.is_sentinel() {
                column.header(i + 1)
            } else {
                column.name.clone()
            };

            let raw_value = if column.is_sentinel() {
                Value::Null
            } else {
                fields.next().cloned().unwrap_or(Value::Null)
            };

            let mut value = match cast_value(raw_value, column.cast_type().as_ref()) {
                Ok(v) => v,
                Err(e) => {
                    record(&mut self.errors, key.clone(), format!("line {}: {}", self.line, e));
                    Value::Null
                }
            };

            if let Some(transform) = self.plan.column(i) {
                value = match transform.apply(value, &ctx) {
                    Ok(v) => v,
                    Err(e) => {
                        record(&mut self.errors, key, format!("line {}: {:#}", self.line, e));
                        Value::Null
                    }
                };
            }
            out.push(value);
        }
        out
    }

    fn publish(&mut self) {
        if self.errors.is_empty() {
            debug!(table = %self.table.name, rows = self.rows, "Row stream exhausted");
        } else {
            warn!(
                table = %self.table.name,
                rows = self.rows,
                columns = ?self.errors.keys().collect::<Vec<_>>(),
                "Row stream finished with casting errors"
            );
        }
        let errors = std::mem::take(&mut self.errors);
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = errors;
    }
}

impl<I, E> Iterator for RowProcessor<I>
where
    I: Iterator<Item = Result<Row, E>>,
{
    type Item = Result<Row, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.source.next() {
            Some(Ok(raw)) => {
                let row = self.process(raw);
                self.line += 1;
                self.rows += 1;
                Some(Ok(row))
            }
            Some(Err(e)) => {
                self.line += 1;
                Some(Err(e))
            }
            None => {
                self.done = true;
                self.publish();
                None
            }
        }
    }
}

fn record(errors: &mut ErrorMap, key: String, message: String) {
    errors.entry(key).or_default().push(message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Column, DataType, EMPTY_SOURCE_HEADER};
    use crate::pipeline::TransformLibrary;
    use serde_json::json;

    fn people() -> Table {
        Table::new(
            "people",
            vec![
                Column::new("id").with_datatype(DataType::Integer),
                Column::new("name").with_datatype(DataType::Text),
            ],
        )
    }

    fn run(table: Table, rows: Vec<Row>) -> (Vec<Row>, ErrorMap) {
        let plan = TransformLibrary::new().compile_table(&table).unwrap();
        let sink = SharedErrors::default();
        let source = rows.into_iter().map(Ok::<_, String>);
        let processor = RowProcessor::new(source, table, plan, BTreeMap::new(), sink.clone(), 1);
        let out = processor.collect::<Result<Vec<_>, _>>().unwrap();
        let errors = sink.lock().unwrap().clone();
        (out, errors)
    }

    #[test]
    fn test_casts_rows() {
        let (rows, errors) = run(
            people(),
            vec![vec![json!("1"), json!("Alice")], vec![json!("2"), json!("Bob")]],
        );
        assert_eq!(rows, vec![vec![json!(1), json!("Alice")], vec![json!(2), json!("Bob")]]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_bad_field_is_recorded_not_raised() {
        let (rows, errors) = run(
            people(),
            vec![vec![json!("1"), json!("Alice")], vec![json!("x"), json!("Bob")]],
        );
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec![Value::Null, json!("Bob")]);
        assert_eq!(errors["id"].len(), 1);
        assert!(errors["id"][0].contains("line 2"));
    }

    #[test]
    fn test_short_and_long_rows() {
        let (rows, _) = run(
            people(),
            vec![vec![json!("1")], vec![json!("2"), json!("Bob"), json!("extra")]],
        );
        assert_eq!(rows[0], vec![json!(1), Value::Null]);
        assert_eq!(rows[1], vec![json!(2), json!("Bob")]);
    }

    #[test]
    fn test_sentinel_column_filled_by_transform() {
        let table = Table::new(
            "people",
            vec![
                Column::new("id").with_datatype(DataType::Integer),
                Column::new(EMPTY_SOURCE_HEADER).with_transform("field(name) | upper"),
                Column::new("name"),
            ],
        );
        let (rows, errors) = run(table, vec![vec![json!("7"), json!("ann")]]);
        assert_eq!(rows[0], vec![json!(7), json!("ANN"), json!("ann")]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_transform_failure_keyed_by_column() {
        let table = Table::new("t", vec![Column::new("amount").with_transform("int")]);
        let (rows, errors) = run(table, vec![vec![json!("12")], vec![json!("lots")]]);
        assert_eq!(rows[0], vec![json!(12)]);
        assert_eq!(rows[1], vec![Value::Null]);
        assert!(errors.contains_key("amount"));
    }
}
