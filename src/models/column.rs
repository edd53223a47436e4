//! Column model for resource schemas

use std::fmt;

use serde::{Deserialize, Serialize};

/// Column name marking a schema-only field with no physical source column
pub const EMPTY_SOURCE_HEADER: &str = "_NONE_";

/// Declared column type
///
/// Names from the metadata vocabulary map onto the three casting targets; anything
/// else is kept verbatim and passes values through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// `string`, `text` or `str`
    Text,
    /// `number`, `float` or `real`
    Number,
    /// `integer` or `int`
    Integer,
    /// Any other declaration
    Unknown(String),
}

impl DataType {
    /// Parse a declared datatype or valuetype name
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "string" | "text" | "str" => DataType::Text,
            "number" | "float" | "real" => DataType::Number,
            "integer" | "int" => DataType::Integer,
            other => DataType::Unknown(other.to_string()),
        }
    }

    /// Check whether values of this type are coerced by the row processor
    pub fn is_known(&self) -> bool {
        !matches!(self, DataType::Unknown(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            DataType::Text => "string",
            DataType::Number => "number",
            DataType::Integer => "integer",
            DataType::Unknown(name) => name,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A column of a resource schema
///
/// # Example
///
/// ```rust
/// use data_package_sdk::models::{Column, DataType};
///
/// let column = Column::new("id").with_datatype(DataType::Integer);
/// assert_eq!(column.header(1), "id");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Canonical header, or [`EMPTY_SOURCE_HEADER`] for schema-only fields
    pub name: String,
    /// Output header override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt_name: Option<String>,
    /// Declared datatype; `None` passes values through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datatype: Option<DataType>,
    /// Finer-grained semantic type, independent of the datatype
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valuetype: Option<String>,
    /// Transform expression applied after casting
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    /// Field width for fixed-width sources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<usize>,
    /// Dotted path used when building nested structures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json: Option<String>,
    #[serde(default)]
    pub description: String,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alt_name: None,
            datatype: None,
            valuetype: None,
            transform: None,
            width: None,
            json: None,
            description: String::new(),
        }
    }

    pub fn with_datatype(mut self, datatype: DataType) -> Self {
        self.datatype = Some(datatype);
        self
    }

    pub fn with_alt_name(mut self, alt_name: impl Into<String>) -> Self {
        self.alt_name = Some(alt_name.into());
        self
    }

    pub fn with_transform(mut self, transform: impl Into<String>) -> Self {
        self.transform = Some(transform.into());
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    /// True for a schema-only column that consumes no source field
    pub fn is_sentinel(&self) -> bool {
        self.name == EMPTY_SOURCE_HEADER
    }

    /// Output header: the alt-name, else the name, else `col<position>`
    ///
    /// `position` is 1-based.
    pub fn header(&self, position: usize) -> String {
        if let Some(alt) = self.alt_name.as_deref().filter(|a| !a.is_empty()) {
            return alt.to_string();
        }
        if !self.name.is_empty() && !self.is_sentinel() {
            return self.name.clone();
        }
        format!("col{}", position)
    }

    /// Type used for coercion: a recognised valuetype wins over the datatype
    pub fn cast_type(&self) -> Option<DataType> {
        match self.valuetype.as_deref().map(DataType::parse) {
            Some(vt) if vt.is_known() => Some(vt),
            _ => self.datatype.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_datatype_vocabulary() {
        assert_eq!(DataType::parse("string"), DataType::Text);
        assert_eq!(DataType::parse("Text"), DataType::Text);
        assert_eq!(DataType::parse("number"), DataType::Number);
        assert_eq!(DataType::parse("integer"), DataType::Integer);
        assert_eq!(
            DataType::parse("geometry"),
            DataType::Unknown("geometry".to_string())
        );
    }

    #[test]
    fn test_header_fallbacks() {
        assert_eq!(Column::new("id").header(1), "id");
        assert_eq!(Column::new("id").with_alt_name("ident").header(1), "ident");
        assert_eq!(Column::new(EMPTY_SOURCE_HEADER).header(3), "col3");
        assert_eq!(Column::new("").header(2), "col2");
    }

    #[test]
    fn test_cast_type_prefers_known_valuetype() {
        let mut column = Column::new("count").with_datatype(DataType::Text);
        column.valuetype = Some("int".to_string());
        assert_eq!(column.cast_type(), Some(DataType::Integer));

        column.valuetype = Some("label".to_string());
        assert_eq!(column.cast_type(), Some(DataType::Text));
    }
}
