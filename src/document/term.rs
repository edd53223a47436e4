//! Terms: typed metadata declarations

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use tracing::warn;

use super::error::DocumentError;

/// Kind of a term, derived from its qualified type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// `Root.Datafile`
    Resource,
    /// `Root.Reference`
    Reference,
    /// `Root.Distribution`
    Distribution,
    /// `Root.Table`
    Table,
    /// `Table.Column`
    Column,
    Other,
}

impl TermKind {
    pub fn of(term: &str) -> Self {
        match term.to_lowercase().as_str() {
            "root.datafile" => TermKind::Resource,
            "root.reference" => TermKind::Reference,
            "root.distribution" => TermKind::Distribution,
            "root.table" => TermKind::Table,
            "table.column" => TermKind::Column,
            _ => TermKind::Other,
        }
    }

    /// Properties this kind of term is expected to carry
    ///
    /// `None` means any property is acceptable.
    pub fn known_properties(&self) -> Option<&'static [&'static str]> {
        match self {
            TermKind::Resource | TermKind::Reference => Some(&[
                "name",
                "schema",
                "title",
                "description",
                "headerlines",
                "startline",
                "encoding",
                "format",
                "datatype",
            ]),
            TermKind::Distribution => Some(&["description", "type"]),
            TermKind::Table => Some(&["name", "description", "title"]),
            TermKind::Column => Some(&[
                "name",
                "altname",
                "datatype",
                "valuetype",
                "transform",
                "width",
                "json",
                "description",
                "title",
            ]),
            TermKind::Other => None,
        }
    }
}

/// A single metadata declaration: a qualified type, a value, properties and children
///
/// Property names are lower-case; lookups are case-insensitive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Term {
    term: String,
    value: Option<String>,
    properties: BTreeMap<String, String>,
    children: Vec<Term>,
}

impl Term {
    /// Create a term; an unqualified type is placed under `Root`
    pub fn new(term: &str, value: impl Into<String>) -> Self {
        Self {
            term: qualify(term, "Root"),
            value: Some(value.into()),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn with_property(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_property(name, value);
        self
    }

    /// Add a child; an unqualified child type is placed under this term's record type
    pub fn with_child(mut self, child: Term) -> Self {
        self.add_child(child);
        self
    }

    pub fn set_property(&mut self, name: &str, value: impl Into<String>) {
        self.properties.insert(name.to_lowercase(), value.into());
    }

    pub fn add_child(&mut self, mut child: Term) {
        if child.parent_term() == "Root" && !child.is_root_kind() {
            let record = child.record_term().to_string();
            child.term = qualify(&record, self.record_term());
        }
        self.children.push(child);
    }

    /// Qualified type, such as `Root.Datafile`
    pub fn term(&self) -> &str {
        &self.term
    }

    /// Part of the type before the dot
    pub fn parent_term(&self) -> &str {
        self.term.split_once('.').map_or("Root", |(parent, _)| parent)
    }

    /// Part of the type after the dot
    pub fn record_term(&self) -> &str {
        self.term.split_once('.').map_or(self.term.as_str(), |(_, record)| record)
    }

    pub fn kind(&self) -> TermKind {
        TermKind::of(&self.term)
    }

    /// Case-insensitive match against a qualified or bare record type
    pub fn term_is(&self, term: &str) -> bool {
        if term.contains('.') {
            self.term.eq_ignore_ascii_case(term)
        } else {
            self.record_term().eq_ignore_ascii_case(term)
        }
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// The `name` property
    pub fn name(&self) -> Option<&str> {
        self.get_value("name")
    }

    /// Property by name; blank values count as absent
    pub fn get_value(&self, property: &str) -> Option<&str> {
        self.properties
            .get(&property.to_lowercase())
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    /// Property by name, with a declared default
    pub fn get_value_or<'a>(&'a self, property: &str, default: &'a str) -> &'a str {
        self.get_value(property).unwrap_or(default)
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn children(&self) -> &[Term] {
        &self.children
    }

    /// Children of a given type, in document order
    pub fn find_children<'a>(&'a self, term: &'a str) -> impl Iterator<Item = &'a Term> + 'a {
        self.children.iter().filter(move |c| c.term_is(term))
    }

    /// Log properties that this kind of term does not declare
    pub fn warn_unknown_properties(&self) {
        if let Some(known) = self.kind().known_properties() {
            for name in self.properties.keys() {
                if !known.contains(&name.as_str()) {
                    warn!(term = %self.term, property = %name, "Unknown property");
                }
            }
        }
        for child in &self.children {
            child.warn_unknown_properties();
        }
    }

    fn is_root_kind(&self) -> bool {
        matches!(
            self.kind(),
            TermKind::Resource | TermKind::Reference | TermKind::Distribution | TermKind::Table
        )
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.term, self.value.as_deref().unwrap_or(""))
    }
}

fn qualify(term: &str, parent: &str) -> String {
    if term.contains('.') {
        term.to_string()
    } else {
        format!("{}.{}", parent, term)
    }
}

/// On-disk shape of a term
#[derive(Debug, Deserialize)]
pub(crate) struct RawTerm {
    term: String,
    #[serde(default)]
    value: Option<serde_yaml::Value>,
    #[serde(default)]
    children: Vec<RawTerm>,
    #[serde(flatten)]
    properties: BTreeMap<String, serde_yaml::Value>,
}

impl RawTerm {
    pub(crate) fn into_term(self, parent: &str) -> Result<Term, DocumentError> {
        let term = qualify(&self.term, parent);
        let value = match self.value {
            Some(v) => scalar_to_string(&term, "value", &v)?,
            None => None,
        };

        let mut properties = BTreeMap::new();
        for (name, raw) in &self.properties {
            if let Some(v) = scalar_to_string(&term, name, raw)? {
                properties.insert(name.to_lowercase(), v);
            }
        }

        let record = term.split_once('.').map_or(term.as_str(), |(_, r)| r).to_string();
        let children = self
            .children
            .into_iter()
            .map(|child| child.into_term(&record))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Term {
            term,
            value,
            properties,
            children,
        })
    }
}

/// Scalars become strings; lists of scalars are joined with commas
fn scalar_to_string(
    term: &str,
    property: &str,
    value: &serde_yaml::Value,
) -> Result<Option<String>, DocumentError> {
    use serde_yaml::Value as Yaml;

    let invalid = || DocumentError::InvalidProperty {
        term: term.to_string(),
        property: property.to_string(),
    };
    match value {
        Yaml::Null => Ok(None),
        Yaml::Bool(b) => Ok(Some(b.to_string())),
        Yaml::Number(n) => Ok(Some(n.to_string())),
        Yaml::String(s) => Ok(Some(s.clone())),
        Yaml::Sequence(items) => {
            let parts = items
                .iter()
                .map(|item| match item {
                    Yaml::Sequence(_) | Yaml::Mapping(_) => Err(invalid()),
                    scalar => Ok(scalar_to_string(term, property, scalar)?.unwrap_or_default()),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(parts.join(",")))
        }
        Yaml::Mapping(_) | Yaml::Tagged(_) => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qualified_types() {
        let term = Term::new("Datafile", "data/a.csv").with_property("Name", "people");
        assert_eq!(term.term(), "Root.Datafile");
        assert_eq!(term.record_term(), "Datafile");
        assert_eq!(term.parent_term(), "Root");
        assert_eq!(term.kind(), TermKind::Resource);
        assert!(term.term_is("root.datafile"));
        assert!(term.term_is("datafile"));
        assert_eq!(term.name(), Some("people"));
    }

    #[test]
    fn test_children_take_parent_record() {
        let table = Term::new("Table", "people").with_child(Term::new("Column", "id"));
        assert_eq!(table.children()[0].term(), "Table.Column");
        assert_eq!(table.children()[0].kind(), TermKind::Column);
        assert_eq!(table.find_children("Column").count(), 1);
    }

    #[test]
    fn test_get_value_defaults() {
        let term = Term::new("Datafile", "x.csv")
            .with_property("startline", "2")
            .with_property("encoding", " ");
        assert_eq!(term.get_value("StartLine"), Some("2"));
        assert_eq!(term.get_value("encoding"), None);
        assert_eq!(term.get_value_or("headerlines", "0"), "0");
    }

    #[test]
    fn test_raw_term_conversion() {
        let yaml = r#"
term: Datafile
value: data/people.csv
name: people
startline: 2
headerlines: [0, 1]
children:
  - term: Note
    value: hello
"#;
        let raw: RawTerm = serde_yaml::from_str(yaml).unwrap();
        let term = raw.into_term("Root").unwrap();
        assert_eq!(term.term(), "Root.Datafile");
        assert_eq!(term.get_value("startline"), Some("2"));
        assert_eq!(term.get_value("headerlines"), Some("0,1"));
        assert_eq!(term.children()[0].term(), "Datafile.Note");
    }

    #[test]
    fn test_nested_mapping_property_rejected() {
        let raw: RawTerm = serde_yaml::from_str("term: Datafile\nvalue: a.csv\nextra: {a: 1}\n").unwrap();
        assert!(matches!(
            raw.into_term("Root"),
            Err(DocumentError::InvalidProperty { .. })
        ));
    }
}
