//! The stage trait and the continuation handed to each stage.

use async_trait::async_trait;

use conduit_types::{
    Capabilities, ConduitError, Operation, Options, Query, Record, Result, ResultPage,
};

use crate::pipeline::Node;
use crate::slots::SchemaSlots;

// ---------------------------------------------------------------------------
// Stage trait
// ---------------------------------------------------------------------------

/// One link in a CRUD chain.
///
/// A stage only receives the operations listed in [`Stage::capabilities`];
/// the others pass straight through to the next stage. Each hook gets a
/// [`Next`] continuation that runs the rest of the chain, so a stage can act
/// before it, after it, or instead of it.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Identifier used in logs and the structural description.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Schemas this stage contributes to the chain.
    fn schemas(&self) -> SchemaSlots {
        SchemaSlots::default()
    }

    /// Schemas this stage contributes when piped onto a chain with the given
    /// resolved slots. Stages that widen the chain's input slots override
    /// this; the default is [`Stage::schemas`].
    fn schemas_over(&self, _chain: &SchemaSlots) -> SchemaSlots {
        self.schemas()
    }

    async fn create(
        &self,
        values: Vec<Record>,
        options: Options,
        next: Next<'_>,
    ) -> Result<ResultPage> {
        next.create(values, options).await
    }

    async fn read(&self, query: Query, options: Options, next: Next<'_>) -> Result<ResultPage> {
        next.read(query, options).await
    }

    async fn replace(
        &self,
        id: String,
        values: Record,
        options: Options,
        next: Next<'_>,
    ) -> Result<ResultPage> {
        next.replace(id, values, options).await
    }

    async fn patch(
        &self,
        query: Query,
        values: Record,
        options: Options,
        next: Next<'_>,
    ) -> Result<ResultPage> {
        next.patch(query, values, options).await
    }

    async fn delete(&self, query: Query, options: Options, next: Next<'_>) -> Result<ResultPage> {
        next.delete(query, options).await
    }
}

// ---------------------------------------------------------------------------
// Next
// ---------------------------------------------------------------------------

/// The remainder of the chain below the current stage.
///
/// Calling an operation on `Next` skips every stage that does not declare
/// it and runs the first one that does. If none does, the call fails with
/// [`ConduitError::NotImplemented`].
#[derive(Clone, Copy)]
pub struct Next<'a> {
    node: Option<&'a Node>,
    pipeline: &'a str,
}

impl<'a> Next<'a> {
    pub(crate) fn new(node: Option<&'a Node>, pipeline: &'a str) -> Self {
        Self { node, pipeline }
    }

    /// Name of the pipeline the call entered through.
    pub fn pipeline(&self) -> &str {
        self.pipeline
    }

    /// `true` if no stage remains below this point.
    pub fn is_end(&self) -> bool {
        self.node.is_none()
    }

    fn resolve(&self, operation: Operation) -> Result<(&'a Node, Next<'a>)> {
        let mut cursor = self.node;
        while let Some(node) = cursor {
            if node.stage().capabilities().contains(operation) {
                tracing::trace!(
                    pipeline = %self.pipeline,
                    stage = %node.stage().name(),
                    operation = %operation,
                    "Dispatching to stage"
                );
                return Ok((node, Next::new(node.parent(), self.pipeline)));
            }
            cursor = node.parent();
        }
        Err(ConduitError::NotImplemented {
            pipeline: self.pipeline.to_string(),
            operation,
        })
    }

    pub async fn create(self, values: Vec<Record>, options: Options) -> Result<ResultPage> {
        let (node, next) = self.resolve(Operation::Create)?;
        node.stage().create(values, options, next).await
    }

    pub async fn read(self, query: Query, options: Options) -> Result<ResultPage> {
        let (node, next) = self.resolve(Operation::Read)?;
        node.stage().read(query, options, next).await
    }

    pub async fn replace(self, id: String, values: Record, options: Options) -> Result<ResultPage> {
        let (node, next) = self.resolve(Operation::Replace)?;
        node.stage().replace(id, values, options, next).await
    }

    pub async fn patch(self, query: Query, values: Record, options: Options) -> Result<ResultPage> {
        let (node, next) = self.resolve(Operation::Patch)?;
        node.stage().patch(query, values, options, next).await
    }

    pub async fn delete(self, query: Query, options: Options) -> Result<ResultPage> {
        let (node, next) = self.resolve(Operation::Delete)?;
        node.stage().delete(query, options, next).await
    }
}
