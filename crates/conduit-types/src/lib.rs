//! Shared types, errors, and operation vocabulary for Conduit pipelines.
//!
//! This crate provides the foundational types used across the other Conduit crates:
//! - `ConduitError`: unified error taxonomy
//! - `Operation` / `Capabilities`: the five CRUD operations and per-stage support sets
//! - `Record`, `Query`, `Options`: the keyed values flowing through a pipeline
//! - `ResultPage`: the `{ data, meta }` wrapper every operation returns

use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of the identity field every resource carries once stored.
pub const ID_FIELD: &str = "id";

/// Unified error type for all Conduit subsystems.
#[derive(Debug, thiserror::Error)]
pub enum ConduitError {
    // === Request Errors ===
    #[error("Validation failed in {pipeline}::{operation}: {source}")]
    Validation {
        pipeline: String,
        operation: Operation,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Resource '{id}' not found")]
    NotFound { id: String },

    #[error("Resource '{id}' already exists")]
    Conflict { id: String },

    #[error("Pipeline '{pipeline}' does not implement '{operation}'")]
    NotImplemented {
        pipeline: String,
        operation: Operation,
    },

    #[error("Unauthorized {operation} on '{pipeline}': {reason}")]
    Unauthorized {
        pipeline: String,
        operation: Operation,
        reason: String,
    },

    #[error("Unsupported query on field '{field}': {message}")]
    UnsupportedQuery { field: String, message: String },

    // === Relation Errors ===
    #[error("Field '{field}' not found while hydrating query template")]
    TemplateFieldNotFound { field: String },

    // === Configuration Errors ===
    #[error("Pipeline configuration error: {0}")]
    Configuration(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

/// Stable, machine-checkable classification of a [`ConduitError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    NotImplemented,
    Unauthorized,
    UnsupportedQuery,
    TemplateFieldNotFound,
    Configuration,
    Internal,
}

impl ConduitError {
    /// Wrap a schema violation with the rejecting pipeline and operation.
    pub fn validation(
        pipeline: impl Into<String>,
        operation: Operation,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        ConduitError::Validation {
            pipeline: pipeline.into(),
            operation,
            source: Box::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ConduitError::Validation { .. } => ErrorKind::Validation,
            ConduitError::NotFound { .. } => ErrorKind::NotFound,
            ConduitError::Conflict { .. } => ErrorKind::Conflict,
            ConduitError::NotImplemented { .. } => ErrorKind::NotImplemented,
            ConduitError::Unauthorized { .. } => ErrorKind::Unauthorized,
            ConduitError::UnsupportedQuery { .. } => ErrorKind::UnsupportedQuery,
            ConduitError::TemplateFieldNotFound { .. } => ErrorKind::TemplateFieldNotFound,
            ConduitError::Configuration(_) => ErrorKind::Configuration,
            ConduitError::Io(_) | ConduitError::Json(_) | ConduitError::Other(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Returns `true` for errors caused by how the pipelines were assembled
    /// rather than by the request being processed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConduitError::Configuration(_) | ConduitError::NotImplemented { .. }
        )
    }

    /// Maps the error to an HTTP status code for transport layers.
    pub fn http_status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation | ErrorKind::UnsupportedQuery => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::NotImplemented => 501,
            ErrorKind::TemplateFieldNotFound
            | ErrorKind::Configuration
            | ErrorKind::Internal => 500,
        }
    }
}

/// A convenience alias for `Result<T, ConduitError>`.
pub type Result<T> = std::result::Result<T, ConduitError>;

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Read,
    Replace,
    Patch,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Create,
        Operation::Read,
        Operation::Replace,
        Operation::Patch,
        Operation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Read => "read",
            Operation::Replace => "replace",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
        }
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// The subset of operations a stage implements, declared at construction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const fn none() -> Self {
        Self(0)
    }

    pub const fn all() -> Self {
        Self(0b1_1111)
    }

    pub fn of(operations: &[Operation]) -> Self {
        operations.iter().fold(Self::none(), |caps, op| caps.with(*op))
    }

    pub fn with(self, operation: Operation) -> Self {
        Self(self.0 | operation.bit())
    }

    pub fn contains(&self, operation: Operation) -> bool {
        self.0 & operation.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        Operation::ALL.into_iter().filter(|op| self.contains(*op))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|op| op.as_str()).collect();
        write!(f, "{{{}}}", names.join(", "))
    }
}

// ---------------------------------------------------------------------------
// Records and results
// ---------------------------------------------------------------------------

/// A keyed resource record.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Field constraints for `read`, `patch`, and `delete`.
pub type Query = serde_json::Map<String, serde_json::Value>;

/// Per-call options consumed by stages.
pub type Options = serde_json::Map<String, serde_json::Value>;

/// Identity of a record, if it carries one. Numeric ids are rendered as strings.
pub fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// The `{ data, meta }` wrapper returned by every operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPage {
    pub data: Vec<Record>,
    #[serde(default)]
    pub meta: serde_json::Map<String, serde_json::Value>,
}

impl ResultPage {
    pub fn new(data: Vec<Record>) -> Self {
        Self {
            data,
            meta: serde_json::Map::new(),
        }
    }

    /// Attach an extra result field, replacing any previous value under `key`.
    pub fn with_meta(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn first(&self) -> Option<&Record> {
        self.data.first()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, thiserror::Error)]
    #[error("name: expected string")]
    struct FakeViolation;

    #[test]
    fn error_display_validation() {
        let err = ConduitError::validation("authors", Operation::Create, FakeViolation);
        assert_eq!(
            err.to_string(),
            "Validation failed in authors::create: name: expected string"
        );
    }

    #[test]
    fn validation_preserves_source() {
        use std::error::Error;
        let err = ConduitError::validation("authors", Operation::Read, FakeViolation);
        let source = err.source().expect("validation error keeps its cause");
        assert_eq!(source.to_string(), "name: expected string");
    }

    #[test]
    fn error_display_not_found() {
        let err = ConduitError::NotFound { id: "42".into() };
        assert_eq!(err.to_string(), "Resource '42' not found");
    }

    #[test]
    fn error_display_conflict() {
        let err = ConduitError::Conflict { id: "x".into() };
        assert_eq!(err.to_string(), "Resource 'x' already exists");
    }

    #[test]
    fn error_display_not_implemented() {
        let err = ConduitError::NotImplemented {
            pipeline: "books".into(),
            operation: Operation::Delete,
        };
        assert_eq!(
            err.to_string(),
            "Pipeline 'books' does not implement 'delete'"
        );
    }

    #[test]
    fn error_display_template_field() {
        let err = ConduitError::TemplateFieldNotFound {
            field: "authorId".into(),
        };
        assert_eq!(
            err.to_string(),
            "Field 'authorId' not found while hydrating query template"
        );
    }

    // --- kind / http_status ---

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            ConduitError::Conflict { id: "a".into() }.kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            ConduitError::Configuration("bad".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(ConduitError::Other("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn kind_serializes_to_snake_case() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::NotImplemented).unwrap(),
            "\"not_implemented\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorKind::TemplateFieldNotFound).unwrap(),
            "\"template_field_not_found\""
        );
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            ConduitError::validation("p", Operation::Read, FakeViolation).http_status(),
            400
        );
        assert_eq!(ConduitError::NotFound { id: "1".into() }.http_status(), 404);
        assert_eq!(ConduitError::Conflict { id: "1".into() }.http_status(), 409);
        assert_eq!(
            ConduitError::NotImplemented {
                pipeline: "p".into(),
                operation: Operation::Patch
            }
            .http_status(),
            501
        );
        assert_eq!(
            ConduitError::Unauthorized {
                pipeline: "p".into(),
                operation: Operation::Delete,
                reason: "read only".into()
            }
            .http_status(),
            401
        );
        assert_eq!(ConduitError::Other("boom".into()).http_status(), 500);
    }

    #[test]
    fn terminal_configuration_error() {
        assert!(ConduitError::Configuration("cycle".into()).is_terminal());
        assert!(!ConduitError::NotFound { id: "1".into() }.is_terminal());
    }

    #[test]
    fn from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: ConduitError = json_err.into();
        assert!(matches!(err, ConduitError::Json(_)));
    }

    // --- Operation / Capabilities ---

    #[test]
    fn operation_display_and_serde() {
        assert_eq!(Operation::Replace.to_string(), "replace");
        assert_eq!(
            serde_json::to_string(&Operation::Patch).unwrap(),
            "\"patch\""
        );
        let op: Operation = serde_json::from_str("\"delete\"").unwrap();
        assert_eq!(op, Operation::Delete);
    }

    #[test]
    fn capabilities_contains_declared_operations() {
        let caps = Capabilities::of(&[Operation::Read, Operation::Create]);
        assert!(caps.contains(Operation::Read));
        assert!(caps.contains(Operation::Create));
        assert!(!caps.contains(Operation::Delete));
        assert_eq!(
            caps.iter().collect::<Vec<_>>(),
            vec![Operation::Create, Operation::Read]
        );
    }

    #[test]
    fn capabilities_all_and_none() {
        assert!(Operation::ALL.iter().all(|op| Capabilities::all().contains(*op)));
        assert!(Capabilities::none().is_empty());
        assert_eq!(Capabilities::all().to_string(), "{create, read, replace, patch, delete}");
    }

    // --- Records ---

    #[test]
    fn record_id_accepts_strings_and_numbers() {
        let rec = json!({"id": "abc"}).as_object().cloned().unwrap();
        assert_eq!(record_id(&rec), Some("abc".to_string()));
        let rec = json!({"id": 7}).as_object().cloned().unwrap();
        assert_eq!(record_id(&rec), Some("7".to_string()));
        let rec = json!({"name": "x"}).as_object().cloned().unwrap();
        assert_eq!(record_id(&rec), None);
    }

    #[test]
    fn result_page_serializes_data_and_meta() {
        let rec = json!({"id": "1"}).as_object().cloned().unwrap();
        let page = ResultPage::new(vec![rec]).with_meta("count", json!(1));
        assert_eq!(
            serde_json::to_value(&page).unwrap(),
            json!({"data": [{"id": "1"}], "meta": {"count": 1}})
        );
        assert_eq!(page.len(), 1);
        assert!(!page.is_empty());
    }
}
