use async_trait::async_trait;

use conduit_schema::ObjectSchema;
use conduit_types::{Capabilities, Operation, Options, Record, Result, ResultPage};

use crate::slots::SchemaSlots;
use crate::stage::{Next, Stage};

/// Fills fields missing from created records with fixed default values.
#[derive(Debug, Clone)]
pub struct Defaults {
    values: Record,
    create_values: Option<ObjectSchema>,
}

impl Defaults {
    pub fn new(values: Record) -> Self {
        Self {
            values,
            create_values: None,
        }
    }

    /// Declare `schema` (typically the chain's create values) as this stage's
    /// create values with every defaulted field made optional, so callers may
    /// omit them.
    pub fn relaxing(mut self, schema: &ObjectSchema) -> Self {
        let names: Vec<&str> = self.values.keys().map(String::as_str).collect();
        self.create_values = Some(schema.with_optional(&names));
        self
    }
}

#[async_trait]
impl Stage for Defaults {
    fn name(&self) -> &str {
        "Defaults"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Operation::Create])
    }

    fn schemas(&self) -> SchemaSlots {
        match &self.create_values {
            Some(schema) => SchemaSlots::new().with_values(Operation::Create, schema.clone()),
            None => SchemaSlots::new(),
        }
    }

    async fn create(&self, mut values: Vec<Record>, options: Options, next: Next<'_>) -> Result<ResultPage> {
        for record in &mut values {
            for (key, value) in &self.values {
                record.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
        next.create(values, options).await
    }
}
