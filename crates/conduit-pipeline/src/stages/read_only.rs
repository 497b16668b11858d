use async_trait::async_trait;

use conduit_types::{
    Capabilities, ConduitError, Operation, Options, Query, Record, Result, ResultPage,
};

use crate::slots::SchemaSlots;
use crate::stage::{Next, Stage};

/// Rejects every write with [`ConduitError::Unauthorized`]; reads pass through.
#[derive(Debug, Clone)]
pub struct ReadOnly {
    reason: String,
}

impl ReadOnly {
    pub fn new() -> Self {
        Self {
            reason: "pipeline is read-only".into(),
        }
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn deny(&self, operation: Operation, next: Next<'_>) -> ConduitError {
        tracing::warn!(
            pipeline = %next.pipeline(),
            operation = %operation,
            "Rejected write on read-only pipeline"
        );
        ConduitError::Unauthorized {
            pipeline: next.pipeline().to_string(),
            operation,
            reason: self.reason.clone(),
        }
    }
}

impl Default for ReadOnly {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for ReadOnly {
    fn name(&self) -> &str {
        "ReadOnly"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[
            Operation::Create,
            Operation::Replace,
            Operation::Patch,
            Operation::Delete,
        ])
    }

    fn schemas(&self) -> SchemaSlots {
        SchemaSlots::new()
            .describe(Operation::Create, "Disabled: read-only")
            .describe(Operation::Replace, "Disabled: read-only")
            .describe(Operation::Patch, "Disabled: read-only")
            .describe(Operation::Delete, "Disabled: read-only")
    }

    async fn create(&self, _values: Vec<Record>, _options: Options, next: Next<'_>) -> Result<ResultPage> {
        Err(self.deny(Operation::Create, next))
    }

    async fn replace(
        &self,
        _id: String,
        _values: Record,
        _options: Options,
        next: Next<'_>,
    ) -> Result<ResultPage> {
        Err(self.deny(Operation::Replace, next))
    }

    async fn patch(
        &self,
        _query: Query,
        _values: Record,
        _options: Options,
        next: Next<'_>,
    ) -> Result<ResultPage> {
        Err(self.deny(Operation::Patch, next))
    }

    async fn delete(&self, _query: Query, _options: Options, next: Next<'_>) -> Result<ResultPage> {
        Err(self.deny(Operation::Delete, next))
    }
}
