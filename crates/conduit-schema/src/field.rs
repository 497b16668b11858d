use serde_json::{json, Value};

use crate::object::ObjectSchema;

/// The type a single property accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Any,
    String,
    Integer,
    Number,
    Boolean,
    Object(ObjectSchema),
    Array(Box<FieldSchema>),
    /// Accepts a value matching any of the variants.
    OneOf(Vec<FieldSchema>),
}

/// A property definition inside an [`ObjectSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    pub field_type: FieldType,
    pub required: bool,
    pub nullable: bool,
    pub description: Option<String>,
    /// Lower bound for integer and number fields.
    pub minimum: Option<i64>,
}

impl FieldSchema {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            nullable: false,
            description: None,
            minimum: None,
        }
    }

    pub fn any() -> Self {
        Self::new(FieldType::Any)
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn object(schema: ObjectSchema) -> Self {
        Self::new(FieldType::Object(schema))
    }

    pub fn array(items: FieldSchema) -> Self {
        Self::new(FieldType::Array(Box::new(items)))
    }

    pub fn one_of(variants: Vec<FieldSchema>) -> Self {
        Self::new(FieldType::OneOf(variants))
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn minimum(mut self, minimum: i64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    pub fn is_array(&self) -> bool {
        matches!(self.field_type, FieldType::Array(_))
    }

    /// Wrap this field so it accepts either a single value or a list of values.
    /// For array fields the single value is one item of the array.
    pub(crate) fn or_array(&self) -> FieldSchema {
        let item = match &self.field_type {
            FieldType::Array(items) => (**items).clone(),
            _ => FieldSchema {
                required: true,
                description: None,
                ..self.clone()
            },
        };
        FieldSchema {
            field_type: FieldType::OneOf(vec![item.clone(), FieldSchema::array(item)]),
            required: self.required,
            nullable: self.nullable,
            description: self.description.clone(),
            minimum: None,
        }
    }

    pub(crate) fn deep_optional(&self) -> FieldSchema {
        let field_type = match &self.field_type {
            FieldType::Object(schema) => FieldType::Object(schema.deep_optional()),
            FieldType::Array(items) => FieldType::Array(Box::new(items.deep_optional())),
            FieldType::OneOf(variants) => {
                FieldType::OneOf(variants.iter().map(FieldSchema::deep_optional).collect())
            }
            other => other.clone(),
        };
        FieldSchema {
            field_type,
            required: false,
            ..self.clone()
        }
    }

    pub fn type_name(&self) -> String {
        let base = match &self.field_type {
            FieldType::Any => "any".to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Integer => "integer".to_string(),
            FieldType::Number => "number".to_string(),
            FieldType::Boolean => "boolean".to_string(),
            FieldType::Object(_) => "object".to_string(),
            FieldType::Array(items) => format!("{}[]", items.type_name()),
            FieldType::OneOf(variants) => variants
                .iter()
                .map(FieldSchema::type_name)
                .collect::<Vec<_>>()
                .join(" | "),
        };
        if self.nullable {
            format!("{base} | null")
        } else {
            base
        }
    }

    pub(crate) fn to_json_schema(&self) -> Value {
        let mut schema = match &self.field_type {
            FieldType::Any => json!({}),
            FieldType::String => json!({"type": "string"}),
            FieldType::Integer => json!({"type": "integer"}),
            FieldType::Number => json!({"type": "number"}),
            FieldType::Boolean => json!({"type": "boolean"}),
            FieldType::Object(schema) => schema.to_json_schema(),
            FieldType::Array(items) => json!({"type": "array", "items": items.to_json_schema()}),
            FieldType::OneOf(variants) => json!({
                "anyOf": variants.iter().map(FieldSchema::to_json_schema).collect::<Vec<_>>()
            }),
        };
        if let (Some(minimum), Some(obj)) = (self.minimum, schema.as_object_mut()) {
            if matches!(self.field_type, FieldType::Integer | FieldType::Number) {
                obj.insert("minimum".into(), json!(minimum));
            }
        }
        if self.nullable {
            schema = json!({"anyOf": [schema, {"type": "null"}]});
        }
        if let (Some(description), Some(obj)) = (&self.description, schema.as_object_mut()) {
            obj.insert("description".into(), Value::String(description.clone()));
        }
        schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Violation;

    fn violations(field: FieldSchema, value: Value) -> Vec<Violation> {
        ObjectSchema::new()
            .property("f", field)
            .validate(&json!({ "f": value }))
            .err()
            .map(|e| e.violations)
            .unwrap_or_default()
    }

    #[test]
    fn scalar_types_accept_matching_values() {
        assert!(violations(FieldSchema::string(), json!("a")).is_empty());
        assert!(violations(FieldSchema::integer(), json!(3)).is_empty());
        assert!(violations(FieldSchema::number(), json!(3.5)).is_empty());
        assert!(violations(FieldSchema::boolean(), json!(true)).is_empty());
        assert!(violations(FieldSchema::any(), json!({"x": 1})).is_empty());
    }

    #[test]
    fn integer_rejects_float() {
        let out = violations(FieldSchema::integer(), json!(1.5));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "f");
    }

    #[test]
    fn null_requires_nullable() {
        assert_eq!(violations(FieldSchema::string(), Value::Null).len(), 1);
        assert!(violations(FieldSchema::string().nullable(), Value::Null).is_empty());
    }

    #[test]
    fn array_reports_item_paths() {
        let out = violations(FieldSchema::array(FieldSchema::string()), json!(["a", 2]));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "f[1]");
    }

    #[test]
    fn minimum_bounds_integers() {
        let field = FieldSchema::integer().minimum(0);
        assert!(violations(field.clone(), json!(0)).is_empty());
        assert_eq!(violations(field, json!(-1)).len(), 1);
        assert_eq!(
            FieldSchema::integer().minimum(0).to_json_schema(),
            json!({"type": "integer", "minimum": 0})
        );
    }

    #[test]
    fn or_array_accepts_scalar_or_list() {
        let field = FieldSchema::string().or_array();
        assert!(violations(field.clone(), json!("a")).is_empty());
        assert!(violations(field.clone(), json!(["a", "b"])).is_empty());
        assert_eq!(violations(field, json!(5)).len(), 1);
    }

    #[test]
    fn or_array_on_array_accepts_single_item() {
        let field = FieldSchema::array(FieldSchema::string()).or_array();
        assert!(violations(field.clone(), json!("a")).is_empty());
        assert!(violations(field.clone(), json!(["a"])).is_empty());
        assert_eq!(violations(field, json!([1])).len(), 1);
    }

    #[test]
    fn or_array_on_any_accepts_lists() {
        let field = FieldSchema::any().or_array();
        assert!(violations(field, json!(["a", 1])).is_empty());
    }

    #[test]
    fn json_schema_for_nullable_field() {
        let schema = FieldSchema::string().nullable().to_json_schema();
        assert_eq!(schema, json!({"anyOf": [{"type": "string"}, {"type": "null"}]}));
    }

    #[test]
    fn json_schema_for_variants() {
        let schema = FieldSchema::string().or_array().to_json_schema();
        assert_eq!(
            schema,
            json!({"anyOf": [{"type": "string"}, {"type": "array", "items": {"type": "string"}}]})
        );
    }
}
