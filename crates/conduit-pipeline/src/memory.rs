//! In-memory terminal stage: resources kept in a map keyed by identity.
//!
//! Every write takes the store's write lock for its whole check-and-mutate
//! step, so two concurrent creates of the same id cannot both succeed and a
//! batch either applies completely or not at all.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use conduit_schema::ObjectSchema;
use conduit_types::{
    record_id, Capabilities, ConduitError, Operation, Options, Query, Record, Result, ResultPage,
    ID_FIELD,
};

use crate::slots::SchemaSlots;
use crate::stage::{Next, Stage};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How a source invents ids for records created without one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdStrategy {
    /// Random UUID v4 strings.
    #[default]
    Uuid,
    /// "1", "2", ... skipping ids already in use.
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySourceConfig {
    pub name: String,
    #[serde(default)]
    pub id_strategy: IdStrategy,
    /// Records present when the source is built.
    #[serde(default)]
    pub seed: Vec<Record>,
}

impl MemorySourceConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id_strategy: IdStrategy::default(),
            seed: Vec::new(),
        }
    }

    /// Read a config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        Ok(config)
    }

    /// Serialize this config to JSON and write it to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Store {
    resources: BTreeMap<String, Record>,
    sequence: u64,
}

impl Store {
    fn generate_id(&mut self, strategy: IdStrategy) -> String {
        match strategy {
            IdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
            IdStrategy::Sequential => loop {
                self.sequence += 1;
                let candidate = self.sequence.to_string();
                if !self.resources.contains_key(&candidate) {
                    break candidate;
                }
            },
        }
    }

    fn matching_keys(&self, query: &Query) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for (key, resource) in &self.resources {
            if matches_query(resource, query)? {
                keys.push(key.clone());
            }
        }
        Ok(keys)
    }
}

pub struct MemorySource {
    name: String,
    model: ObjectSchema,
    id_strategy: IdStrategy,
    store: RwLock<Store>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, model: ObjectSchema) -> Self {
        Self {
            name: name.into(),
            model,
            id_strategy: IdStrategy::default(),
            store: RwLock::new(Store::default()),
        }
    }

    pub fn with_id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    /// Build a source from config, inserting its seed records. Seed records
    /// without an id get one; duplicate ids fail with `Conflict`.
    pub fn from_config(config: MemorySourceConfig, model: ObjectSchema) -> Result<Self> {
        let source = Self::new(config.name, model).with_id_strategy(config.id_strategy);
        source.seed(config.seed)?;
        Ok(source)
    }

    /// Insert records before the source is shared.
    pub fn seed(&self, records: Vec<Record>) -> Result<()> {
        let mut store = self.store.try_write().map_err(|_| {
            ConduitError::Other(format!("source '{}' is busy; seed before use", self.name))
        })?;
        insert_all(&mut store, records, self.id_strategy)?;
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.resources.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy of every stored record, ordered by id.
    pub async fn snapshot(&self) -> Vec<Record> {
        self.store.read().await.resources.values().cloned().collect()
    }
}

fn insert_all(store: &mut Store, records: Vec<Record>, strategy: IdStrategy) -> Result<Vec<Record>> {
    let mut batch = BTreeSet::new();
    let mut prepared = Vec::with_capacity(records.len());
    for mut record in records {
        let id = match record_id(&record) {
            Some(id) => id,
            None => {
                let id = store.generate_id(strategy);
                record.insert(ID_FIELD.into(), Value::String(id.clone()));
                id
            }
        };
        if store.resources.contains_key(&id) || !batch.insert(id.clone()) {
            return Err(ConduitError::Conflict { id });
        }
        prepared.push((id, record));
    }
    let created: Vec<Record> = prepared.iter().map(|(_, r)| r.clone()).collect();
    store.resources.extend(prepared);
    Ok(created)
}

#[async_trait]
impl Stage for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn schemas(&self) -> SchemaSlots {
        SchemaSlots::for_source(self.model.clone())
            .describe(Operation::Create, "Insert records, generating ids where absent")
            .describe(Operation::Read, "List records matching every query field")
            .describe(Operation::Replace, "Overwrite one record by id")
            .describe(Operation::Patch, "Merge-patch every matching record")
            .describe(Operation::Delete, "Remove matching records and return them")
    }

    async fn create(&self, values: Vec<Record>, _options: Options, _next: Next<'_>) -> Result<ResultPage> {
        let mut store = self.store.write().await;
        let created = insert_all(&mut store, values, self.id_strategy)?;
        tracing::debug!(source = %self.name, count = created.len(), "Created resources");
        Ok(ResultPage::new(created))
    }

    async fn read(&self, query: Query, _options: Options, _next: Next<'_>) -> Result<ResultPage> {
        let store = self.store.read().await;
        let data = store
            .matching_keys(&query)?
            .iter()
            .filter_map(|key| store.resources.get(key).cloned())
            .collect::<Vec<_>>();
        tracing::trace!(source = %self.name, count = data.len(), "Read resources");
        Ok(ResultPage::new(data))
    }

    async fn replace(
        &self,
        id: String,
        mut values: Record,
        _options: Options,
        _next: Next<'_>,
    ) -> Result<ResultPage> {
        let mut store = self.store.write().await;
        let current_id = store
            .resources
            .get(&id)
            .and_then(|r| r.get(ID_FIELD))
            .cloned()
            .ok_or_else(|| ConduitError::NotFound { id: id.clone() })?;
        if !values.contains_key(ID_FIELD) {
            values.insert(ID_FIELD.into(), current_id);
        }
        let new_id = record_id(&values).ok_or_else(|| ConduitError::UnsupportedQuery {
            field: ID_FIELD.into(),
            message: "replacement id must be a string or number".into(),
        })?;
        if new_id != id && store.resources.contains_key(&new_id) {
            return Err(ConduitError::Conflict { id: new_id });
        }
        store.resources.remove(&id);
        store.resources.insert(new_id.clone(), values.clone());
        if new_id != id {
            tracing::debug!(source = %self.name, from = %id, to = %new_id, "Migrated resource id");
        }
        Ok(ResultPage::new(vec![values]))
    }

    async fn patch(
        &self,
        query: Query,
        values: Record,
        _options: Options,
        _next: Next<'_>,
    ) -> Result<ResultPage> {
        let mut store = self.store.write().await;
        let keys = store.matching_keys(&query)?;

        let mut patched = Vec::with_capacity(keys.len());
        for key in &keys {
            let Some(original) = store.resources.get(key) else {
                continue;
            };
            let mut record = original.clone();
            apply_merge_patch(&mut record, &values);
            if !record.contains_key(ID_FIELD) {
                if let Some(id) = original.get(ID_FIELD) {
                    record.insert(ID_FIELD.into(), id.clone());
                }
            }
            let new_key = record_id(&record).unwrap_or_else(|| key.clone());
            patched.push((new_key, record));
        }

        let moving: BTreeSet<&String> = keys.iter().collect();
        let mut targets = BTreeSet::new();
        for (new_key, _) in &patched {
            let taken = store.resources.contains_key(new_key) && !moving.contains(new_key);
            if taken || !targets.insert(new_key.clone()) {
                return Err(ConduitError::Conflict { id: new_key.clone() });
            }
        }

        for key in &keys {
            store.resources.remove(key);
        }
        let data: Vec<Record> = patched.iter().map(|(_, r)| r.clone()).collect();
        store.resources.extend(patched);
        tracing::debug!(source = %self.name, count = data.len(), "Patched resources");
        Ok(ResultPage::new(data))
    }

    async fn delete(&self, query: Query, _options: Options, _next: Next<'_>) -> Result<ResultPage> {
        let mut store = self.store.write().await;
        let keys = store.matching_keys(&query)?;
        let removed: Vec<Record> = keys
            .iter()
            .filter_map(|key| store.resources.remove(key))
            .collect();
        tracing::debug!(source = %self.name, count = removed.len(), "Deleted resources");
        Ok(ResultPage::new(removed))
    }
}

// ---------------------------------------------------------------------------
// Query matching and merge-patch
// ---------------------------------------------------------------------------

/// Whether `resource` satisfies every field of `query`.
///
/// Scalars compare by equality. A list in the query matches any of its
/// members; a list in the resource matches if it contains the queried
/// scalar. A list on both sides is rejected.
pub fn matches_query(resource: &Record, query: &Query) -> Result<bool> {
    let mut all = true;
    for (field, expected) in query {
        let actual = resource.get(field).unwrap_or(&Value::Null);
        let matched = match (expected, actual) {
            (Value::Array(_), Value::Array(_)) => {
                return Err(ConduitError::UnsupportedQuery {
                    field: field.clone(),
                    message: "cannot match a list of values against a list field".into(),
                });
            }
            (Value::Array(candidates), scalar) => candidates.contains(scalar),
            (scalar, Value::Array(members)) => members.contains(scalar),
            (expected, actual) => expected == actual,
        };
        all &= matched;
    }
    Ok(all)
}

/// Apply an RFC 7396 merge patch to a record: `null` removes a field,
/// objects merge recursively, anything else replaces.
pub fn apply_merge_patch(record: &mut Record, patch: &Record) {
    for (key, value) in patch {
        if value.is_null() {
            record.remove(key);
        } else {
            merge_value(record.entry(key.clone()).or_insert(Value::Null), value);
        }
    }
}

fn merge_value(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        apply_merge_patch(target_map, patch_map);
    }
}
