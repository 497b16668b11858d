//! Composable CRUD pipelines.
//!
//! This crate implements the Conduit pipeline core: stage chaining with
//! capability-based dispatch, per-slot schema merging and input validation,
//! query templates, and relations between pipelines. It also ships an
//! in-memory source, a pipeline registry, and a few general-purpose stages.
//!
//! # Example
//! ```
//! use conduit_pipeline::{stages::Paginate, MemorySource, Pipeline};
//! use conduit_schema::{FieldSchema, ObjectSchema};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let model = ObjectSchema::titled("Author").property("name", FieldSchema::string());
//! let authors = Pipeline::new(MemorySource::new("authors", model))
//!     .pipe(Paginate::new())
//!     .unwrap();
//!
//! let created = authors
//!     .create(vec![json!({"name": "Jules"}).as_object().cloned().unwrap()], None)
//!     .await
//!     .unwrap();
//! assert!(created.first().unwrap().contains_key("id"));
//!
//! let page = authors.read(None, None).await.unwrap();
//! assert_eq!(page.meta["count"], json!(1));
//! # });
//! ```

pub mod memory;
pub mod pipeline;
pub mod registry;
pub mod relation;
pub mod slots;
pub mod stage;
pub mod stages;
pub mod template;

pub use memory::{apply_merge_patch, matches_query, IdStrategy, MemorySource, MemorySourceConfig};
pub use pipeline::{Pipeline, WeakPipeline};
pub use registry::PipelineRegistry;
pub use relation::{infer_cardinality, Cardinality, Relation, RelationDef, RelationDescriptor, TargetFn};
pub use slots::{MergeRule, SchemaSlot, SchemaSlots};
pub use stage::{Next, Stage};
pub use template::{QueryTemplate, TemplateValue};

pub use conduit_types::{
    Capabilities, ConduitError, Operation, Options, Query, Record, Result, ResultPage,
};
