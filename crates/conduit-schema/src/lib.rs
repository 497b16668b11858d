//! Fluent object-schema builder used to describe and validate pipeline inputs.
//!
//! Provides [`ObjectSchema`] and [`FieldSchema`] plus the transforms pipelines
//! need when composing: merge, pick/omit, to-array, (deep) optional, nullable.
//! Validation compiles the exported JSON Schema with `jsonschema`.
//!
//! # Example
//! ```
//! use conduit_schema::{FieldSchema, ObjectSchema};
//! use serde_json::json;
//!
//! let author = ObjectSchema::titled("Author")
//!     .property("id", FieldSchema::string())
//!     .property("firstName", FieldSchema::string());
//! assert!(author.validate(&json!({"id": "1", "firstName": "Jules"})).is_ok());
//! assert!(author.validate(&json!({"id": 1})).is_err());
//! ```

mod error;
mod field;
mod object;
mod validate;

pub use error::{SchemaError, Violation};
pub use field::{FieldSchema, FieldType};
pub use object::ObjectSchema;
