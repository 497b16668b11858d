//! Name → pipeline lookup, used to point relations at pipelines that are
//! built later or that point back at each other.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use conduit_types::{ConduitError, Result};

use crate::pipeline::Pipeline;

type Entries = RwLock<HashMap<String, Pipeline>>;

#[derive(Clone, Default)]
pub struct PipelineRegistry {
    entries: Arc<Entries>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `pipeline` under its own name. Registering a second pipeline
    /// with the same name is an error.
    pub fn register(&self, pipeline: Pipeline) -> Result<()> {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let name = pipeline.name().to_string();
        if entries.contains_key(&name) {
            return Err(ConduitError::Configuration(format!(
                "pipeline '{name}' is already registered"
            )));
        }
        tracing::debug!(pipeline = %name, "Registered pipeline");
        entries.insert(name, pipeline);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Pipeline> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A relation target that looks `name` up when the relation is used.
    ///
    /// The thunk holds only a weak handle on the registry, so pipelines that
    /// relate to each other through it do not keep each other alive.
    pub fn lazy(&self, name: impl Into<String>) -> impl Fn() -> Result<Pipeline> + Send + Sync + 'static {
        let entries: Weak<Entries> = Arc::downgrade(&self.entries);
        let name = name.into();
        move || {
            let entries = entries.upgrade().ok_or_else(|| {
                ConduitError::Configuration(format!(
                    "registry holding pipeline '{name}' has been dropped"
                ))
            })?;
            let found = entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&name)
                .cloned();
            found.ok_or_else(|| {
                ConduitError::Configuration(format!("pipeline '{name}' is not registered"))
            })
        }
    }
}

impl std::fmt::Debug for PipelineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRegistry")
            .field("pipelines", &self.names())
            .finish()
    }
}
