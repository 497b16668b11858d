//! Query templates: relation queries built from a resource's own fields.
//!
//! Grammar for string values in a template:
//! ```text
//! Reference ::= ':' Identifier        substitute the resource's field
//! Escaped   ::= '\:' Rest             the literal string ':' Rest
//! Literal   ::= anything else         used verbatim
//! ```
//! Non-string values (numbers, arrays, objects) are always literals.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use conduit_types::{ConduitError, Query, Record, Result};

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^:([A-Za-z_$][A-Za-z0-9_$]*)$").expect("reference pattern is valid")
    })
}

/// One entry of a [`QueryTemplate`].
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateValue {
    Literal(Value),
    /// Substitute the named field of the resource at hydration time.
    Reference(String),
    /// A string that looks like a reference but is meant verbatim.
    /// Holds the value with the escape already removed.
    Escaped(String),
}

impl TemplateValue {
    pub fn parse(value: &Value) -> Result<TemplateValue> {
        let Some(text) = value.as_str() else {
            return Ok(TemplateValue::Literal(value.clone()));
        };
        if let Some(rest) = text.strip_prefix("\\:") {
            return Ok(TemplateValue::Escaped(format!(":{rest}")));
        }
        if text.starts_with(':') {
            return match reference_pattern().captures(text) {
                Some(caps) => Ok(TemplateValue::Reference(caps[1].to_string())),
                None => Err(ConduitError::Configuration(format!(
                    "invalid field reference '{text}' in query template"
                ))),
            };
        }
        Ok(TemplateValue::Literal(value.clone()))
    }

    /// The template's source form: references keep their `:` prefix and
    /// escaped literals get their backslash back.
    pub fn to_raw(&self) -> Value {
        match self {
            TemplateValue::Literal(value) => value.clone(),
            TemplateValue::Reference(field) => Value::String(format!(":{field}")),
            TemplateValue::Escaped(text) => Value::String(format!("\\{text}")),
        }
    }
}

/// A query whose values may refer to fields of the resource it is hydrated
/// against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryTemplate {
    entries: BTreeMap<String, TemplateValue>,
}

impl QueryTemplate {
    pub fn parse(query: &Query) -> Result<QueryTemplate> {
        let entries = query
            .iter()
            .map(|(key, value)| Ok((key.clone(), TemplateValue::parse(value)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(QueryTemplate { entries })
    }

    pub fn get(&self, key: &str) -> Option<&TemplateValue> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &TemplateValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of the resource fields the template reads.
    pub fn references(&self) -> Vec<&str> {
        self.entries
            .values()
            .filter_map(|v| match v {
                TemplateValue::Reference(field) => Some(field.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a concrete query for `resource`. A referenced field the resource
    /// lacks is an error.
    pub fn hydrate(&self, resource: &Record) -> Result<Query> {
        let mut query = Query::new();
        for (key, entry) in &self.entries {
            let value = match entry {
                TemplateValue::Reference(field) => resource
                    .get(field)
                    .cloned()
                    .ok_or_else(|| ConduitError::TemplateFieldNotFound {
                        field: field.clone(),
                    })?,
                TemplateValue::Escaped(text) => Value::String(text.clone()),
                TemplateValue::Literal(value) => value.clone(),
            };
            query.insert(key.clone(), value);
        }
        Ok(query)
    }

    pub fn to_raw(&self) -> Query {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_raw()))
            .collect()
    }
}
