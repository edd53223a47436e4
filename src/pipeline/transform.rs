//! Column transform expressions
//!
//! A transform is a pipeline of named functions applied to a field after casting:
//!
//! ```text
//! strip | replace(",", "") | int
//! ```
//!
//! Functions come from a [`TransformLibrary`] carried by the document, so packages can
//! register their own without touching global state. Expressions are compiled once per
//! schema; an unknown function name fails compilation rather than every row.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{Context, anyhow, bail};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use super::cast::cast_value;
use super::error::TransformError;
use crate::models::{DataType, Table};

static STEP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*(?:\((.*)\))?\s*$").unwrap()
});

/// What a transform function can see besides the value it transforms
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    /// Source headers, positionally matching `row`
    pub headers: &'a [String],
    /// The raw source row
    pub row: &'a [Value],
    /// The resource's execution environment
    pub env: &'a BTreeMap<String, String>,
}

impl<'a> RowContext<'a> {
    /// Raw source field by header
    pub fn field(&self, header: &str) -> Option<&'a Value> {
        let position = self.headers.iter().position(|h| h == header)?;
        self.row.get(position)
    }
}

/// Signature of a transform function: value, row context, literal arguments
pub type TransformFn =
    Arc<dyn Fn(Value, &RowContext<'_>, &[String]) -> anyhow::Result<Value> + Send + Sync>;

/// Registry of transform functions
#[derive(Clone)]
pub struct TransformLibrary {
    functions: BTreeMap<String, TransformFn>,
}

impl TransformLibrary {
    /// A library holding only the built-in functions
    pub fn new() -> Self {
        let mut library = Self::empty();
        library.register("strip", |v, _, _| Ok(map_text(v, |s| s.trim().to_string())));
        library.register("lower", |v, _, _| Ok(map_text(v, |s| s.to_lowercase())));
        library.register("upper", |v, _, _| Ok(map_text(v, |s| s.to_uppercase())));
        library.register("title", |v, _, _| Ok(map_text(v, title_case)));
        library.register("nullify", |v, _, _| Ok(nullify(v)));
        library.register("int", |v, _, _| Ok(cast_value(v, Some(&DataType::Integer))?));
        library.register("float", |v, _, _| Ok(cast_value(v, Some(&DataType::Number))?));
        library.register("str", |v, _, _| Ok(cast_value(v, Some(&DataType::Text))?));
        library.register("round", round);
        library.register("abs", abs);
        library.register("default", |v, _, args| {
            let fallback = args.first().context("default() takes one argument")?;
            Ok(match nullify(v) {
                Value::Null => serde_json::from_str(fallback)
                    .unwrap_or_else(|_| Value::String(fallback.clone())),
                other => other,
            })
        });
        library.register("replace", |v, _, args| {
            let [from, to] = args else {
                bail!("replace() takes two arguments");
            };
            Ok(map_text(v, |s| s.replace(from.as_str(), to)))
        });
        library.register("env", |_, ctx, args| {
            let name = args.first().context("env() takes one argument")?;
            Ok(ctx
                .env
                .get(name)
                .map(|v| Value::String(v.clone()))
                .unwrap_or(Value::Null))
        });
        library.register("field", |_, ctx, args| {
            let header = args.first().context("field() takes one argument")?;
            ctx.field(header)
                .cloned()
                .ok_or_else(|| anyhow!("no source field named '{}'", header))
        });
        library
    }

    /// A library with no functions at all
    pub fn empty() -> Self {
        Self {
            functions: BTreeMap::new(),
        }
    }

    /// Register a function, replacing any function of the same name
    pub fn register<F>(&mut self, name: &str, function: F)
    where
        F: Fn(Value, &RowContext<'_>, &[String]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.to_string(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// Compile one transform expression
    pub fn compile(&self, expression: &str) -> Result<CompiledTransform, TransformError> {
        let mut steps = Vec::new();
        for part in split_top_level(expression, '|') {
            if part.trim().is_empty() {
                return Err(TransformError::Parse {
                    expression: expression.to_string(),
                    reason: "empty step".to_string(),
                });
            }
            let caps = STEP_REGEX
                .captures(&part)
                .ok_or_else(|| TransformError::Parse {
                    expression: expression.to_string(),
                    reason: format!("cannot parse step '{}'", part.trim()),
                })?;

            let name = caps[1].to_string();
            let function = self.functions.get(&name).cloned().ok_or_else(|| {
                TransformError::UnknownFunction {
                    name: name.clone(),
                    expression: expression.to_string(),
                }
            })?;
            let args = caps
                .get(2)
                .map(|m| parse_args(m.as_str()))
                .unwrap_or_default();

            steps.push(TransformStep {
                name,
                args,
                function,
            });
        }
        Ok(CompiledTransform {
            expression: expression.to_string(),
            steps,
        })
    }

    /// Compile the transforms of every column of a schema
    ///
    /// The result is indexed by column position; columns without a transform get `None`.
    pub fn compile_table(&self, table: &Table) -> Result<TransformPlan, TransformError> {
        let columns = table
            .columns
            .iter()
            .map(|c| {
                c.transform
                    .as_deref()
                    .filter(|t| !t.trim().is_empty())
                    .map(|t| self.compile(t))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransformPlan {
            table: table.name.clone(),
            columns,
        })
    }
}

impl Default for TransformLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransformLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformLibrary")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Clone, Serialize)]
struct TransformStep {
    name: String,
    args: Vec<String>,
    #[serde(skip)]
    function: TransformFn,
}

/// A parsed transform pipeline bound to library functions
#[derive(Clone, Serialize)]
pub struct CompiledTransform {
    expression: String,
    steps: Vec<TransformStep>,
}

impl CompiledTransform {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every step in order; the first failing step aborts the pipeline
    pub fn apply(&self, value: Value, ctx: &RowContext<'_>) -> anyhow::Result<Value> {
        self.steps.iter().try_fold(value, |value, step| {
            (step.function)(value, ctx, &step.args)
                .with_context(|| format!("transform '{}' failed", step.name))
        })
    }
}

impl fmt::Debug for CompiledTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTransform")
            .field("expression", &self.expression)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Compiled transforms for every column of one schema
#[derive(Debug, Clone, Serialize)]
pub struct TransformPlan {
    table: String,
    columns: Vec<Option<CompiledTransform>>,
}

impl TransformPlan {
    pub fn column(&self, position: usize) -> Option<&CompiledTransform> {
        self.columns.get(position).and_then(Option::as_ref)
    }

    pub fn is_empty(&self) -> bool {
        self.columns.iter().all(Option::is_none)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

fn map_text(value: Value, f: impl Fn(&str) -> String) -> Value {
    match value {
        Value::String(s) => Value::String(f(&s)),
        other => other,
    }
}

fn nullify(value: Value) -> Value {
    match value {
        Value::String(s) if s.trim().is_empty() => Value::Null,
        other => other,
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn round(value: Value, _: &RowContext<'_>, args: &[String]) -> anyhow::Result<Value> {
    let digits: i32 = match args.first() {
        Some(d) => d.trim().parse().with_context(|| format!("invalid digits '{}'", d))?,
        None => 0,
    };
    let Value::Number(n) = cast_value(value, Some(&DataType::Number))? else {
        return Ok(Value::Null);
    };
    let factor = 10f64.powi(digits);
    let rounded = (n.as_f64().unwrap_or_default() * factor).round() / factor;
    if digits <= 0 {
        Ok(Value::from(rounded as i64))
    } else {
        Ok(serde_json::Number::from_f64(rounded).map_or(Value::Null, Value::Number))
    }
}

fn abs(value: Value, _: &RowContext<'_>, _: &[String]) -> anyhow::Result<Value> {
    match cast_value(value, Some(&DataType::Number))? {
        Value::Number(n) => match n.as_i64() {
            Some(i) => Ok(Value::from(i.unsigned_abs())),
            None => Ok(serde_json::Number::from_f64(n.as_f64().unwrap_or_default().abs())
                .map_or(Value::Null, Value::Number)),
        },
        other => Ok(other),
    }
}

/// Split on `separator` outside parentheses and quotes
fn split_top_level(input: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(') => depth += 1,
            (None, ')') => depth = depth.saturating_sub(1),
            (None, _) if c == separator && depth == 0 => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

fn parse_args(args: &str) -> Vec<String> {
    if args.trim().is_empty() {
        return Vec::new();
    }
    split_top_level(args, ',')
        .iter()
        .map(|arg| {
            let arg = arg.trim();
            let quoted = arg.len() >= 2
                && ((arg.starts_with('"') && arg.ends_with('"'))
                    || (arg.starts_with('\'') && arg.ends_with('\'')));
            if quoted {
                arg[1..arg.len() - 1].to_string()
            } else {
                arg.to_string()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Column;
    use serde_json::json;

    fn apply(expression: &str, value: Value) -> anyhow::Result<Value> {
        let headers = vec!["id".to_string(), "name".to_string()];
        let row = vec![json!("1"), json!("Alice")];
        let mut env = BTreeMap::new();
        env.insert("REGION".to_string(), "north".to_string());
        let ctx = RowContext {
            headers: &headers,
            row: &row,
            env: &env,
        };
        TransformLibrary::new().compile(expression).unwrap().apply(value, &ctx)
    }

    #[test]
    fn test_pipeline_of_builtins() {
        assert_eq!(apply("strip | upper", json!("  abc ")).unwrap(), json!("ABC"));
        assert_eq!(apply("replace(\",\", \"\") | int", json!("1,234")).unwrap(), json!(1234));
        assert_eq!(apply("title", json!("jane DOE")).unwrap(), json!("Jane Doe"));
        assert_eq!(apply("round(1)", json!("2.46")).unwrap(), json!(2.5));
        assert_eq!(apply("round", json!(2.5)).unwrap(), json!(3));
        assert_eq!(apply("abs", json!(-4)).unwrap(), json!(4));
    }

    #[test]
    fn test_default_and_nullify() {
        assert_eq!(apply("nullify", json!("  ")).unwrap(), Value::Null);
        assert_eq!(apply("default(0)", json!("")).unwrap(), json!(0));
        assert_eq!(apply("default('n/a')", Value::Null).unwrap(), json!("n/a"));
        assert_eq!(apply("default(0)", json!("5")).unwrap(), json!("5"));
    }

    #[test]
    fn test_context_functions() {
        assert_eq!(apply("env(REGION)", Value::Null).unwrap(), json!("north"));
        assert_eq!(apply("env(MISSING)", json!("x")).unwrap(), Value::Null);
        assert_eq!(apply("field(name) | lower", Value::Null).unwrap(), json!("alice"));
        assert!(apply("field(age)", Value::Null).is_err());
    }

    #[test]
    fn test_failing_step_reports_name() {
        let err = apply("strip | int", json!("abc")).unwrap_err();
        assert!(err.to_string().contains("int"));
    }

    #[test]
    fn test_unknown_function_fails_compilation() {
        let library = TransformLibrary::new();
        let err = library.compile("strip | shout").unwrap_err();
        assert!(matches!(err, TransformError::UnknownFunction { ref name, .. } if name == "shout"));
        assert!(matches!(library.compile("strip ||"), Err(TransformError::Parse { .. })));
    }

    #[test]
    fn test_registered_function() {
        let mut library = TransformLibrary::empty();
        library.register("double", |v, _, _| {
            let n = v.as_i64().context("not an integer")?;
            Ok(json!(n * 2))
        });
        assert!(library.contains("double"));
        assert!(!library.contains("strip"));
        let compiled = library.compile("double|double").unwrap();
        let env = BTreeMap::new();
        let ctx = RowContext {
            headers: &[],
            row: &[],
            env: &env,
        };
        assert_eq!(compiled.apply(json!(3), &ctx).unwrap(), json!(12));
    }

    #[test]
    fn test_compile_table_plan() {
        let table = Table::new(
            "people",
            vec![
                Column::new("id"),
                Column::new("name").with_transform("strip | title"),
            ],
        );
        let plan = TransformLibrary::new().compile_table(&table).unwrap();
        assert!(plan.column(0).is_none());
        assert_eq!(plan.column(1).unwrap().step_names(), vec!["strip", "title"]);
        assert!(!plan.is_empty());

        let json: Value = serde_json::from_str(&plan.to_json().unwrap()).unwrap();
        assert_eq!(json["table"], "people");
        assert_eq!(json["columns"][1]["steps"][1]["name"], "title");
    }
}
