//! Pipeline composition and the validated CRUD entry points.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use conduit_schema::{ObjectSchema, SchemaError};
use conduit_types::{
    Capabilities, ConduitError, Operation, Options, Query, Record, Result, ResultPage,
};

use crate::relation::{Relation, RelationDef};
use crate::slots::{SchemaSlot, SchemaSlots};
use crate::stage::{Next, Stage};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Schema cache and relation map owned by a node.
struct NodeState {
    /// Resolved once when the node is composed; never invalidated because
    /// composition always produces a new node.
    slots: SchemaSlots,
    relations: RwLock<BTreeMap<String, Arc<Relation>>>,
}

pub(crate) struct Node {
    pipeline: String,
    stage: Box<dyn Stage>,
    parent: Option<Arc<Node>>,
    state: NodeState,
}

impl Node {
    pub(crate) fn stage(&self) -> &dyn Stage {
        self.stage.as_ref()
    }

    pub(crate) fn parent(&self) -> Option<&Node> {
        self.parent.as_deref()
    }

    /// Iterate from this node toward the source.
    fn chain(&self) -> impl Iterator<Item = &Node> {
        std::iter::successors(Some(self), |node| node.parent())
    }
}

// ---------------------------------------------------------------------------
// WeakPipeline
// ---------------------------------------------------------------------------

/// Non-owning handle from [`Pipeline::downgrade`]. Relations that point back
/// at their own pipeline hold one of these to avoid a reference cycle.
#[derive(Clone)]
pub struct WeakPipeline {
    pipeline: String,
    node: Weak<Node>,
}

impl WeakPipeline {
    pub fn name(&self) -> &str {
        &self.pipeline
    }

    pub fn upgrade(&self) -> Option<Pipeline> {
        self.node.upgrade().map(|node| Pipeline { node })
    }
}

impl fmt::Debug for WeakPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPipeline")
            .field("pipeline", &self.pipeline)
            .field("alive", &(self.node.strong_count() > 0))
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// A composed chain of stages exposing the five CRUD operations.
///
/// Cloning yields another handle to the **same** chain. [`pipe`](Self::pipe)
/// consumes the handle and returns a new outer node, so a stage can only ever
/// be attached once.
#[derive(Clone)]
pub struct Pipeline {
    node: Arc<Node>,
}

impl Pipeline {
    /// Start a chain with its terminal stage. The pipeline takes the stage's name.
    pub fn new(source: impl Stage + 'static) -> Self {
        let name = source.name().to_string();
        Self::named(name, source)
    }

    pub fn named(name: impl Into<String>, source: impl Stage + 'static) -> Self {
        let name = name.into();
        let slots = SchemaSlots::root(&source.schemas());
        tracing::debug!(
            pipeline = %name,
            stage = %source.name(),
            capabilities = %source.capabilities(),
            "Created pipeline"
        );
        Self {
            node: Arc::new(Node {
                pipeline: name,
                stage: Box::new(source),
                parent: None,
                state: NodeState {
                    slots,
                    relations: RwLock::new(BTreeMap::new()),
                },
            }),
        }
    }

    /// Wrap the chain with `stage`. The stage's hooks run before and after
    /// everything already in the chain.
    ///
    /// Fails if `stage` redeclares an option the chain already defines.
    pub fn pipe(self, stage: impl Stage + 'static) -> Result<Self> {
        let declared = stage.schemas_over(&self.node.state.slots);
        let slots = SchemaSlots::compose(&self.node.state.slots, &declared, stage.name())?;
        tracing::debug!(
            pipeline = %self.node.pipeline,
            stage = %stage.name(),
            capabilities = %stage.capabilities(),
            "Piped stage"
        );
        Ok(Self {
            node: Arc::new(Node {
                pipeline: self.node.pipeline.clone(),
                stage: Box::new(stage),
                parent: Some(self.node),
                state: NodeState {
                    slots,
                    relations: RwLock::new(BTreeMap::new()),
                },
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.node.pipeline
    }

    /// A handle that does not keep the chain alive.
    pub fn downgrade(&self) -> WeakPipeline {
        WeakPipeline {
            pipeline: self.node.pipeline.clone(),
            node: Arc::downgrade(&self.node),
        }
    }

    /// Stage names, outermost first.
    pub fn stages(&self) -> Vec<&str> {
        self.node.chain().map(|n| n.stage.name()).collect()
    }

    /// Operations at least one stage implements.
    pub fn capabilities(&self) -> Capabilities {
        self.node.chain().fold(Capabilities::none(), |caps, node| {
            node.stage.capabilities().iter().fold(caps, Capabilities::with)
        })
    }

    // -----------------------------------------------------------------------
    // Schema introspection
    // -----------------------------------------------------------------------

    pub fn schemas(&self) -> &SchemaSlots {
        &self.node.state.slots
    }

    pub fn schema(&self, slot: SchemaSlot) -> Option<&ObjectSchema> {
        self.node.state.slots.get(slot)
    }

    pub fn model(&self) -> Option<&ObjectSchema> {
        self.node.state.slots.model()
    }

    pub fn description(&self, operation: Operation) -> Option<&str> {
        self.node.state.slots.description(operation)
    }

    // -----------------------------------------------------------------------
    // Relations
    // -----------------------------------------------------------------------

    /// Declare a relation on this node. It is visible here and on every
    /// pipeline later composed on top of it.
    ///
    /// Only this node and its inner nodes are checked for a clash. Outer
    /// pipelines that already declare a relation of the same name keep
    /// theirs, since lookups stop at the nearest declaration.
    pub fn add_relation(&self, def: RelationDef) -> Result<Arc<Relation>> {
        if self.relation(&def.name).is_some() {
            return Err(ConduitError::Configuration(format!(
                "relation '{}' is already declared on pipeline '{}'",
                def.name,
                self.name()
            )));
        }
        let relation = Arc::new(Relation::declare(def, self.model())?);
        tracing::info!(
            pipeline = %self.name(),
            relation = %relation.name(),
            cardinality = %relation.cardinality(),
            "Registered relation"
        );
        self.node
            .state
            .relations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(relation.name().to_string(), relation.clone());
        Ok(relation)
    }

    pub fn relation(&self, name: &str) -> Option<Arc<Relation>> {
        self.node.chain().find_map(|node| {
            node.state
                .relations
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(name)
                .cloned()
        })
    }

    /// Every relation visible on this pipeline, keyed by name.
    pub fn relations(&self) -> BTreeMap<String, Arc<Relation>> {
        let mut all = BTreeMap::new();
        for node in self.node.chain() {
            let relations = node
                .state
                .relations
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, relation) in relations.iter() {
                all.entry(name.clone()).or_insert_with(|| relation.clone());
            }
        }
        all
    }

    // -----------------------------------------------------------------------
    // CRUD entry points
    // -----------------------------------------------------------------------

    fn entry(&self) -> Next<'_> {
        Next::new(Some(self.node.as_ref()), &self.node.pipeline)
    }

    /// Run `check` against the resolved slots, wrapping any violation with
    /// this pipeline's name and the operation.
    fn validate(
        &self,
        operation: Operation,
        check: impl FnOnce(&SchemaSlots) -> std::result::Result<(), SchemaError>,
    ) -> Result<()> {
        check(&self.node.state.slots).map_err(|err| {
            tracing::warn!(
                pipeline = %self.name(),
                operation = %operation,
                error = %err,
                "Rejected invalid input"
            );
            ConduitError::validation(self.name(), operation, err)
        })
    }

    fn check_options(
        slots: &SchemaSlots,
        operation: Operation,
        options: &Options,
    ) -> std::result::Result<(), SchemaError> {
        match slots.options(operation) {
            Some(schema) => schema.validate_record(options),
            None => ObjectSchema::new().validate_record(options),
        }
    }

    pub async fn create(
        &self,
        values: Vec<Record>,
        options: Option<Options>,
    ) -> Result<ResultPage> {
        let options = options.unwrap_or_default();
        self.validate(Operation::Create, |slots| {
            if let Some(schema) = slots.values(Operation::Create) {
                schema.validate_list(&values)?;
            }
            Self::check_options(slots, Operation::Create, &options)
        })?;
        self.entry().create(values, options).await
    }

    pub async fn read(&self, query: Option<Query>, options: Option<Options>) -> Result<ResultPage> {
        let query = query.unwrap_or_default();
        let options = options.unwrap_or_default();
        self.validate(Operation::Read, |slots| {
            if let Some(schema) = slots.query(Operation::Read) {
                schema.validate_record(&query)?;
            }
            Self::check_options(slots, Operation::Read, &options)
        })?;
        self.entry().read(query, options).await
    }

    pub async fn replace(
        &self,
        id: impl Into<String>,
        values: Record,
        options: Option<Options>,
    ) -> Result<ResultPage> {
        let id = id.into();
        let options = options.unwrap_or_default();
        self.validate(Operation::Replace, |slots| {
            if let Some(schema) = slots.values(Operation::Replace) {
                schema.validate_record(&values)?;
            }
            Self::check_options(slots, Operation::Replace, &options)
        })?;
        self.entry().replace(id, values, options).await
    }

    pub async fn patch(
        &self,
        query: Query,
        values: Record,
        options: Option<Options>,
    ) -> Result<ResultPage> {
        let options = options.unwrap_or_default();
        self.validate(Operation::Patch, |slots| {
            if let Some(schema) = slots.query(Operation::Patch) {
                schema.validate_record(&query)?;
            }
            if let Some(schema) = slots.values(Operation::Patch) {
                schema.validate_record(&values)?;
            }
            Self::check_options(slots, Operation::Patch, &options)
        })?;
        self.entry().patch(query, values, options).await
    }

    pub async fn delete(&self, query: Query, options: Option<Options>) -> Result<ResultPage> {
        let options = options.unwrap_or_default();
        self.validate(Operation::Delete, |slots| {
            if let Some(schema) = slots.query(Operation::Delete) {
                schema.validate_record(&query)?;
            }
            Self::check_options(slots, Operation::Delete, &options)
        })?;
        self.entry().delete(query, options).await
    }

    // -----------------------------------------------------------------------
    // Diagnostics
    // -----------------------------------------------------------------------

    /// Human-readable dump of the chain, resolved schemas, and relations.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "pipeline {}", self.name());

        let _ = writeln!(out, "stages (outermost first):");
        for node in self.node.chain() {
            let _ = writeln!(
                out,
                "  {} {}",
                node.stage.name(),
                node.stage.capabilities()
            );
        }

        for operation in Operation::ALL {
            if let Some(text) = self.description(operation) {
                let _ = writeln!(out, "{operation}: {text}");
            }
        }

        for (slot, schema) in self.node.state.slots.iter() {
            let _ = writeln!(out, "[{slot}]");
            for line in schema.describe().lines() {
                let _ = writeln!(out, "  {line}");
            }
        }

        let relations = self.relations();
        if !relations.is_empty() {
            let _ = writeln!(out, "relations:");
            for relation in relations.values() {
                let query = serde_json::Value::Object(relation.template().to_raw());
                let _ = writeln!(
                    out,
                    "  {} ({}) {}",
                    relation.name(),
                    relation.cardinality(),
                    query
                );
            }
        }
        out
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name())
            .field("stages", &self.stages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conduit_schema::FieldSchema;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    /// Terminal stage that answers reads with a fixed record.
    struct Fixed;

    #[async_trait]
    impl Stage for Fixed {
        fn name(&self) -> &str {
            "Fixed"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::of(&[Operation::Read])
        }

        fn schemas(&self) -> SchemaSlots {
            SchemaSlots::for_source(ObjectSchema::new().property("title", FieldSchema::string()))
        }

        async fn read(&self, _query: Query, _options: Options, _next: Next<'_>) -> Result<ResultPage> {
            Ok(ResultPage::new(vec![rec(json!({"id": "1", "title": "Dune"}))]))
        }
    }

    /// Records the order in which its hooks run.
    struct Trace {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Stage for Trace {
        fn name(&self) -> &str {
            self.label
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::of(&[Operation::Read])
        }

        async fn read(&self, query: Query, options: Options, next: Next<'_>) -> Result<ResultPage> {
            self.log.lock().unwrap().push(format!("{}:before", self.label));
            let page = next.read(query, options).await?;
            self.log.lock().unwrap().push(format!("{}:after", self.label));
            Ok(page.with_meta(self.label, json!(true)))
        }
    }

    /// Declares a read option without implementing anything.
    struct Opt(&'static str);

    #[async_trait]
    impl Stage for Opt {
        fn name(&self) -> &str {
            self.0
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::none()
        }

        fn schemas(&self) -> SchemaSlots {
            SchemaSlots::new().with_options(
                Operation::Read,
                ObjectSchema::new().property(self.0, FieldSchema::boolean().optional()),
            )
        }
    }

    #[tokio::test]
    async fn hooks_run_in_onion_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::new(Fixed)
            .pipe(Trace { label: "inner", log: log.clone() })
            .unwrap()
            .pipe(Trace { label: "outer", log: log.clone() })
            .unwrap();

        let page = pipeline.read(None, None).await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["outer:before", "inner:before", "inner:after", "outer:after"]
        );
        assert_eq!(page.meta.get("inner"), Some(&json!(true)));
        assert_eq!(page.meta.get("outer"), Some(&json!(true)));
        assert_eq!(pipeline.stages(), vec!["outer", "inner", "Fixed"]);
    }

    #[tokio::test]
    async fn unimplemented_operation_names_pipeline_and_method() {
        let pipeline = Pipeline::named("books", Fixed);
        let err = pipeline.delete(Query::new(), None).await.unwrap_err();
        match err {
            ConduitError::NotImplemented { pipeline, operation } => {
                assert_eq!(pipeline, "books");
                assert_eq!(operation, Operation::Delete);
            }
            other => panic!("expected NotImplemented, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_query_is_rejected_before_dispatch() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::named("books", Fixed)
            .pipe(Trace { label: "t", log: log.clone() })
            .unwrap();
        let err = pipeline
            .read(Some(rec(json!({"title": 5}))), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConduitError::Validation { ref pipeline, operation: Operation::Read, .. } if pipeline == "books"
        ));
        assert!(err.to_string().contains("title"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn undeclared_options_are_rejected() {
        let pipeline = Pipeline::new(Fixed);
        let err = pipeline
            .read(None, Some(rec(json!({"limit": 3}))))
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::Validation { .. }));
    }

    #[tokio::test]
    async fn composed_options_accept_both_stages() {
        let pipeline = Pipeline::new(Fixed).pipe(Opt("a")).unwrap().pipe(Opt("b")).unwrap();
        assert!(pipeline.read(None, Some(rec(json!({"a": true})))).await.is_ok());
        assert!(pipeline.read(None, Some(rec(json!({"b": true})))).await.is_ok());
        assert!(pipeline
            .read(None, Some(rec(json!({"a": true, "b": false}))))
            .await
            .is_ok());
    }

    #[test]
    fn option_collision_fails_pipe() {
        let err = Pipeline::new(Fixed).pipe(Opt("a")).unwrap().pipe(Opt("a")).unwrap_err();
        assert!(matches!(err, ConduitError::Configuration(_)));
    }

    #[test]
    fn capabilities_union_over_chain() {
        let pipeline = Pipeline::new(Fixed).pipe(Opt("a")).unwrap();
        assert_eq!(pipeline.capabilities(), Capabilities::of(&[Operation::Read]));
    }

    #[test]
    fn relations_are_inherited_forward_only() {
        let base = Pipeline::named("books", Fixed);
        base.add_relation(RelationDef::weak("self", &base, rec(json!({"id": ":id"}))))
            .unwrap();

        let outer = base.clone().pipe(Opt("a")).unwrap();
        outer
            .add_relation(RelationDef::weak("more", &base, rec(json!({"title": ":title"}))))
            .unwrap();

        assert!(outer.relation("self").is_some());
        assert_eq!(
            outer.relations().keys().collect::<Vec<_>>(),
            vec!["more", "self"]
        );
        assert!(base.relation("more").is_none());
    }

    #[test]
    fn duplicate_relation_name_is_rejected() {
        let pipeline = Pipeline::new(Fixed);
        pipeline
            .add_relation(RelationDef::weak("r", &pipeline, rec(json!({"id": ":id"}))))
            .unwrap();
        let err = pipeline
            .add_relation(RelationDef::weak("r", &pipeline, rec(json!({"id": ":id"}))))
            .unwrap_err();
        assert!(matches!(err, ConduitError::Configuration(_)));

        let outer = pipeline.clone().pipe(Opt("a")).unwrap();
        let err = outer
            .add_relation(RelationDef::weak("r", &pipeline, rec(json!({"id": ":id"}))))
            .unwrap_err();
        assert!(matches!(err, ConduitError::Configuration(_)));
    }

    #[test]
    fn inner_relation_declared_later_is_shadowed_by_outer() {
        let base = Pipeline::named("books", Fixed);
        let outer = base.clone().pipe(Opt("a")).unwrap();
        outer
            .add_relation(RelationDef::weak("r", &base, rec(json!({"title": ":title"}))))
            .unwrap();
        base.add_relation(RelationDef::weak("r", &base, rec(json!({"id": ":id"}))))
            .unwrap();

        let seen = outer.relation("r").unwrap();
        assert_eq!(seen.template().to_raw(), rec(json!({"title": ":title"})));
        assert_eq!(
            base.relation("r").unwrap().template().to_raw(),
            rec(json!({"id": ":id"}))
        );
        assert_eq!(outer.relations().len(), 1);
    }

    #[test]
    fn self_relation_through_weak_handle_does_not_leak() {
        let pipeline = Pipeline::named("books", Fixed);
        pipeline
            .add_relation(RelationDef::weak("self", &pipeline, rec(json!({"id": ":id"}))))
            .unwrap();
        let handle = pipeline.downgrade();
        assert_eq!(handle.name(), "books");
        assert!(handle.upgrade().is_some());

        let relation = pipeline.relation("self").unwrap();
        assert_eq!(relation.target().unwrap().name(), "books");
        drop(pipeline);
        assert!(handle.upgrade().is_none());
        assert!(matches!(relation.target(), Err(ConduitError::Configuration(_))));
    }

    #[test]
    fn describe_lists_stages_slots_and_relations() {
        let pipeline = Pipeline::named("books", Fixed).pipe(Opt("a")).unwrap();
        pipeline
            .add_relation(RelationDef::weak("same", &pipeline, rec(json!({"id": ":id"}))))
            .unwrap();
        let text = pipeline.describe();
        assert!(text.starts_with("pipeline books\n"));
        assert!(text.contains("  a {}\n"));
        assert!(text.contains("  Fixed {read}\n"));
        assert!(text.contains("[read.options]\n  a?: boolean\n"));
        assert!(text.contains("same (one) {\"id\":\":id\"}"));
    }
}
