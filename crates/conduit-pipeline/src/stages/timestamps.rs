use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use conduit_schema::{FieldSchema, ObjectSchema};
use conduit_types::{
    Capabilities, ConduitError, Operation, Options, Query, Record, Result, ResultPage, ID_FIELD,
};

use crate::slots::SchemaSlots;
use crate::stage::{Next, Stage};

pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Stamps `createdAt` on create and `updatedAt` on every write, as RFC 3339
/// strings.
#[derive(Clone)]
pub struct Timestamps {
    clock: Clock,
}

impl Timestamps {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(Utc::now),
        }
    }

    /// Use `clock` instead of the system time.
    pub fn with_clock(clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }

    fn now(&self) -> Value {
        Value::String((self.clock)().to_rfc3339_opts(SecondsFormat::Millis, true))
    }
}

fn stamp_fields() -> ObjectSchema {
    ObjectSchema::new()
        .property(CREATED_AT, FieldSchema::string().describe("RFC 3339 creation time"))
        .property(UPDATED_AT, FieldSchema::string().describe("RFC 3339 last write time"))
}

impl Default for Timestamps {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Timestamps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timestamps").finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for Timestamps {
    fn name(&self) -> &str {
        "Timestamps"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Operation::Create, Operation::Replace, Operation::Patch])
    }

    fn schemas(&self) -> SchemaSlots {
        SchemaSlots::new().with_model(stamp_fields())
    }

    /// Widens the chain's replace/patch values and read/patch/delete queries
    /// with optional timestamp fields, so records read back can be written
    /// back and filtered by time.
    fn schemas_over(&self, chain: &SchemaSlots) -> SchemaSlots {
        let values = stamp_fields().all_optional();
        let query = values.to_array_properties();
        let mut slots = self.schemas();
        for operation in [Operation::Replace, Operation::Patch] {
            if let Some(schema) = chain.values(operation) {
                slots = slots.with_values(operation, schema.merge(&values));
            }
        }
        for operation in [Operation::Read, Operation::Patch, Operation::Delete] {
            if let Some(schema) = chain.query(operation) {
                slots = slots.with_query(operation, schema.merge(&query));
            }
        }
        slots
    }

    async fn create(&self, mut values: Vec<Record>, options: Options, next: Next<'_>) -> Result<ResultPage> {
        let now = self.now();
        for record in &mut values {
            record.insert(CREATED_AT.into(), now.clone());
            record.insert(UPDATED_AT.into(), now.clone());
        }
        next.create(values, options).await
    }

    /// Keeps the stored `createdAt` when the replacement omits it.
    async fn replace(
        &self,
        id: String,
        mut values: Record,
        options: Options,
        next: Next<'_>,
    ) -> Result<ResultPage> {
        if !values.contains_key(CREATED_AT) {
            let mut lookup = Map::new();
            lookup.insert(ID_FIELD.into(), Value::String(id.clone()));
            match next.read(lookup, Options::new()).await {
                Ok(page) => {
                    if let Some(created) = page.first().and_then(|r| r.get(CREATED_AT)) {
                        values.insert(CREATED_AT.into(), created.clone());
                    }
                }
                Err(ConduitError::NotImplemented { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        values.insert(UPDATED_AT.into(), self.now());
        next.replace(id, values, options).await
    }

    async fn patch(
        &self,
        query: Query,
        mut values: Record,
        options: Options,
        next: Next<'_>,
    ) -> Result<ResultPage> {
        values.insert(UPDATED_AT.into(), self.now());
        next.patch(query, values, options).await
    }
}
