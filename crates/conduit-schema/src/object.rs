use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::{json, Map, Value};

use crate::error::{SchemaError, Violation};
use crate::field::{FieldSchema, FieldType};
use crate::validate::{self, ValidatorCache};

/// Schema for a JSON object: a set of named properties plus a policy for
/// properties it does not declare.
///
/// Every transform returns a new schema; the receiver is never modified.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    title: Option<String>,
    properties: BTreeMap<String, FieldSchema>,
    additional_properties: bool,
    validator: ValidatorCache,
}

impl ObjectSchema {
    /// An empty schema that accepts only `{}`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Add (or replace) a property.
    pub fn property(mut self, name: impl Into<String>, field: FieldSchema) -> Self {
        self.properties.insert(name.into(), field);
        self.validator = ValidatorCache::default();
        self
    }

    /// Accept properties that are not declared.
    pub fn allow_additional(mut self) -> Self {
        self.additional_properties = true;
        self.validator = ValidatorCache::default();
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&FieldSchema> {
        self.properties.get(name)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn properties(&self) -> impl Iterator<Item = (&str, &FieldSchema)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn property_names(&self) -> Vec<&str> {
        self.properties.keys().map(String::as_str).collect()
    }

    pub fn accepts_additional(&self) -> bool {
        self.additional_properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// No declared properties and no additional-properties allowance.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty() && !self.additional_properties
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Validate `value` with a `jsonschema` validator compiled from
    /// [`to_json_schema`](Self::to_json_schema), compiled once per schema.
    pub fn validate(&self, value: &Value) -> Result<(), SchemaError> {
        let mut out = Vec::new();
        self.collect(value, "", &mut out);
        SchemaError::from_violations(out)
    }

    pub fn validate_record(&self, record: &Map<String, Value>) -> Result<(), SchemaError> {
        self.validate(&Value::Object(record.clone()))
    }

    /// Validate every record, reporting violations with an index prefix.
    pub fn validate_list(&self, records: &[Map<String, Value>]) -> Result<(), SchemaError> {
        let mut out = Vec::new();
        for (i, record) in records.iter().enumerate() {
            self.collect(&Value::Object(record.clone()), &format!("[{i}]"), &mut out);
        }
        SchemaError::from_violations(out)
    }

    fn collect(&self, value: &Value, prefix: &str, out: &mut Vec<Violation>) {
        match self.validator.get_or_compile(|| self.to_json_schema()) {
            Ok(validator) => validate::collect(validator, value, prefix, out),
            Err(message) => out.push(Violation::new(prefix, format!("invalid schema: {message}"))),
        }
    }

    // -----------------------------------------------------------------------
    // Transforms
    // -----------------------------------------------------------------------

    /// Union of both property sets. On a name collision `other` wins.
    pub fn merge(&self, other: &ObjectSchema) -> ObjectSchema {
        let mut merged = self.clone();
        for (name, field) in &other.properties {
            if merged.properties.insert(name.clone(), field.clone()).is_some() {
                tracing::trace!(property = %name, "Merged schema property overridden");
            }
        }
        merged.additional_properties |= other.additional_properties;
        if merged.title.is_none() {
            merged.title = other.title.clone();
        }
        merged
    }

    /// Property names declared by both schemas.
    pub fn collisions(&self, other: &ObjectSchema) -> Vec<String> {
        self.properties
            .keys()
            .filter(|name| other.properties.contains_key(*name))
            .cloned()
            .collect()
    }

    pub fn pick(&self, names: &[&str]) -> ObjectSchema {
        ObjectSchema {
            title: self.title.clone(),
            properties: self
                .properties
                .iter()
                .filter(|(name, _)| names.contains(&name.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            additional_properties: self.additional_properties,
            validator: ValidatorCache::default(),
        }
    }

    pub fn omit(&self, names: &[&str]) -> ObjectSchema {
        ObjectSchema {
            title: self.title.clone(),
            properties: self
                .properties
                .iter()
                .filter(|(name, _)| !names.contains(&name.as_str()))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            additional_properties: self.additional_properties,
            validator: ValidatorCache::default(),
        }
    }

    /// Every scalar property additionally accepts a list of its values.
    pub fn to_array_properties(&self) -> ObjectSchema {
        self.map_fields(FieldSchema::or_array)
    }

    /// Make the named properties optional. Unknown names are ignored.
    pub fn with_optional(&self, names: &[&str]) -> ObjectSchema {
        let mut schema = self.clone();
        for (name, field) in schema.properties.iter_mut() {
            if names.contains(&name.as_str()) {
                field.required = false;
            }
        }
        schema
    }

    /// Make every top-level property optional.
    pub fn all_optional(&self) -> ObjectSchema {
        self.map_fields(|field| field.clone().optional())
    }

    /// Make every property optional, recursing into nested objects and arrays.
    pub fn deep_optional(&self) -> ObjectSchema {
        self.map_fields(FieldSchema::deep_optional)
    }

    /// Allow `null` for every top-level property.
    pub fn nullable_properties(&self) -> ObjectSchema {
        self.map_fields(|field| field.clone().nullable())
    }

    fn map_fields(&self, f: impl Fn(&FieldSchema) -> FieldSchema) -> ObjectSchema {
        ObjectSchema {
            title: self.title.clone(),
            properties: self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), f(v)))
                .collect(),
            additional_properties: self.additional_properties,
            validator: ValidatorCache::default(),
        }
    }

    // -----------------------------------------------------------------------
    // Output
    // -----------------------------------------------------------------------

    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json_schema()))
            .collect();
        let required: Vec<&str> = self
            .properties
            .iter()
            .filter(|(_, v)| v.required)
            .map(|(k, _)| k.as_str())
            .collect();
        let mut schema = json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": self.additional_properties,
        });
        if let Some(obj) = schema.as_object_mut() {
            if !required.is_empty() {
                obj.insert("required".into(), json!(required));
            }
            if let Some(title) = &self.title {
                obj.insert("title".into(), json!(title));
            }
        }
        schema
    }

    /// Indented, human-readable listing of the properties.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, 0);
        out
    }

    fn describe_into(&self, out: &mut String, depth: usize) {
        let pad = "  ".repeat(depth);
        if self.properties.is_empty() {
            let _ = writeln!(out, "{pad}(no properties)");
        }
        for (name, field) in &self.properties {
            let marker = if field.required { "" } else { "?" };
            let _ = write!(out, "{pad}{name}{marker}: {}", field.type_name());
            if let Some(description) = &field.description {
                let _ = write!(out, "  # {description}");
            }
            out.push('\n');
            if let FieldType::Object(nested) = &field.field_type {
                nested.describe_into(out, depth + 1);
            }
        }
        if self.additional_properties {
            let _ = writeln!(out, "{pad}...: any");
        }
    }
}
