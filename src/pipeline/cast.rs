//! Coercion of raw field values to declared column types

use serde_json::{Number, Value};

use super::error::CastError;
use crate::models::DataType;

/// Coerce `value` to `target`
///
/// Unknown or missing types pass the value through. Blank strings become null for
/// the numeric types; text keeps them.
pub fn cast_value(value: Value, target: Option<&DataType>) -> Result<Value, CastError> {
    match target {
        Some(DataType::Text) => Ok(to_text(value)),
        Some(DataType::Number) => to_number(value),
        Some(DataType::Integer) => to_integer(value),
        Some(DataType::Unknown(_)) | None => Ok(value),
    }
}

/// Render a value as plain text, without JSON quoting for strings
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_text(value: Value) -> Value {
    match value {
        Value::Null | Value::String(_) => value,
        other => Value::String(display_value(&other)),
    }
}

fn to_number(value: Value) -> Result<Value, CastError> {
    match &value {
        Value::Null => Ok(Value::Null),
        Value::Number(n) => Ok(Value::Number(n.clone())),
        Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| failure(&value, &DataType::Number)),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => {
            Err(failure(&value, &DataType::Number))
        }
    }
}

fn to_integer(value: Value) -> Result<Value, CastError> {
    let parsed = match &value {
        Value::Null => return Ok(Value::Null),
        Value::String(s) if s.trim().is_empty() => return Ok(Value::Null),
        Value::String(s) => parse_integer(s.trim()),
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::Bool(_) | Value::Array(_) | Value::Object(_) => None,
    };
    parsed
        .map(Value::from)
        .ok_or_else(|| failure(&value, &DataType::Integer))
}

fn parse_integer(s: &str) -> Option<i64> {
    s.parse::<i64>()
        .ok()
        .or_else(|| s.parse::<f64>().ok().and_then(integral))
}

// "3.0" is an integer; "3.5" is not
fn integral(f: f64) -> Option<i64> {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn failure(value: &Value, target: &DataType) -> CastError {
    CastError {
        value: display_value(value),
        target: target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integer_casting() {
        let int = Some(&DataType::Integer);
        assert_eq!(cast_value(json!("42"), int).unwrap(), json!(42));
        assert_eq!(cast_value(json!(" 7 "), int).unwrap(), json!(7));
        assert_eq!(cast_value(json!("3.0"), int).unwrap(), json!(3));
        assert_eq!(cast_value(json!(5.0), int).unwrap(), json!(5));
        assert_eq!(cast_value(json!(""), int).unwrap(), Value::Null);

        let err = cast_value(json!("x"), int).unwrap_err();
        assert_eq!(err.value, "x");
        assert_eq!(err.target, "integer");
        assert!(cast_value(json!("3.5"), int).is_err());
    }

    #[test]
    fn test_number_casting() {
        let num = Some(&DataType::Number);
        assert_eq!(cast_value(json!("1.5"), num).unwrap(), json!(1.5));
        assert_eq!(cast_value(json!(2), num).unwrap(), json!(2));
        assert!(cast_value(json!("NaN"), num).is_err());
        assert!(cast_value(json!(true), num).is_err());
    }

    #[test]
    fn test_text_and_passthrough() {
        assert_eq!(cast_value(json!(12), Some(&DataType::Text)).unwrap(), json!("12"));
        assert_eq!(cast_value(json!(""), Some(&DataType::Text)).unwrap(), json!(""));
        let geometry = DataType::Unknown("geometry".to_string());
        assert_eq!(cast_value(json!("POINT(1 2)"), Some(&geometry)).unwrap(), json!("POINT(1 2)"));
        assert_eq!(cast_value(json!("x"), None).unwrap(), json!("x"));
    }
}
