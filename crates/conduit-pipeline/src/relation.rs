//! Declarative links from one pipeline's resources to another pipeline.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;

use conduit_schema::ObjectSchema;
use conduit_types::{ConduitError, Options, Query, Record, Result, ResultPage, ID_FIELD};

use crate::pipeline::Pipeline;
use crate::template::{QueryTemplate, TemplateValue};

/// Resolves the target pipeline when the relation is first used. Lets a
/// relation point at a pipeline that is built later, or at its own pipeline.
pub type TargetFn = Arc<dyn Fn() -> Result<Pipeline> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cardinality::One => f.write_str("one"),
            Cardinality::Many => f.write_str("many"),
        }
    }
}

// ---------------------------------------------------------------------------
// RelationDef
// ---------------------------------------------------------------------------

pub struct RelationDef {
    pub name: String,
    pub target: TargetFn,
    pub query: Query,
    pub options: Options,
}

impl RelationDef {
    pub fn new(
        name: impl Into<String>,
        target: impl Fn() -> Result<Pipeline> + Send + Sync + 'static,
        query: Query,
    ) -> Self {
        Self {
            name: name.into(),
            target: Arc::new(target),
            query,
            options: Options::new(),
        }
    }

    /// Relation to a pipeline that already exists.
    ///
    /// The relation keeps `target` alive. A relation declared on `target`
    /// itself, or on a pipeline `target` relates back to, forms a reference
    /// cycle; use [`weak`](Self::weak) or [`PipelineRegistry::lazy`] there.
    ///
    /// [`PipelineRegistry::lazy`]: crate::PipelineRegistry::lazy
    pub fn to(name: impl Into<String>, target: &Pipeline, query: Query) -> Self {
        let target = target.clone();
        Self::new(name, move || Ok(target.clone()), query)
    }

    /// Relation through a non-owning handle on `target`. Resolving it fails
    /// once every [`Pipeline`] handle on the target has been dropped.
    pub fn weak(name: impl Into<String>, target: &Pipeline, query: Query) -> Self {
        let target = target.downgrade();
        Self::new(
            name,
            move || {
                target.upgrade().ok_or_else(|| {
                    ConduitError::Configuration(format!(
                        "pipeline '{}' has been dropped",
                        target.name()
                    ))
                })
            },
            query,
        )
    }

    /// Options passed to every `read` against the target.
    pub fn with_options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }
}

// ---------------------------------------------------------------------------
// Relation
// ---------------------------------------------------------------------------

pub struct Relation {
    name: String,
    target: TargetFn,
    template: QueryTemplate,
    options: Options,
    cardinality: Cardinality,
}

/// Serializable view of a relation for consumers that expose relations in
/// their own protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: Option<String>,
    pub cardinality: Cardinality,
    pub query: Query,
    pub options: Options,
}

impl Relation {
    /// Validate a definition against the declaring pipeline's model and infer
    /// its cardinality.
    pub(crate) fn declare(def: RelationDef, model: Option<&ObjectSchema>) -> Result<Relation> {
        let template = QueryTemplate::parse(&def.query)?;
        if let Some(model) = model.filter(|m| !m.accepts_additional()) {
            if let Some(unknown) = template.references().into_iter().find(|f| !model.has_property(f)) {
                return Err(ConduitError::Configuration(format!(
                    "relation '{}' references unknown field '{unknown}'",
                    def.name
                )));
            }
        }
        let cardinality = infer_cardinality(&template, model);
        Ok(Relation {
            name: def.name,
            target: def.target,
            template,
            options: def.options,
            cardinality,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    pub fn template(&self) -> &QueryTemplate {
        &self.template
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn target(&self) -> Result<Pipeline> {
        (self.target)()
    }

    pub fn descriptor(&self) -> RelationDescriptor {
        RelationDescriptor {
            name: self.name.clone(),
            target: self.target().ok().map(|p| p.name().to_string()),
            cardinality: self.cardinality,
            query: self.template.to_raw(),
            options: self.options.clone(),
        }
    }

    fn build_query(&self, resource: &Record, extra: Option<&Query>) -> Result<Query> {
        let mut query = self.template.hydrate(resource)?;
        if let Some(extra) = extra {
            query.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(query)
    }

    fn build_options(&self, extra: Option<&Options>) -> Options {
        let mut options = self.options.clone();
        if let Some(extra) = extra {
            options.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        options
    }

    /// Read the resources related to `resource`. Caller-supplied query and
    /// options keys override the relation's own.
    pub async fn fetch(
        &self,
        resource: &Record,
        extra_query: Option<&Query>,
        extra_options: Option<&Options>,
    ) -> Result<ResultPage> {
        let query = self.build_query(resource, extra_query)?;
        let options = self.build_options(extra_options);
        let target = self.target()?;
        tracing::debug!(
            relation = %self.name,
            target = %target.name(),
            "Fetching relation"
        );
        target.read(Some(query), Some(options)).await
    }

    /// Fetch and store the result on `resource` under the relation's name.
    pub async fn assign_to_resource(
        &self,
        resource: &mut Record,
        extra_query: Option<&Query>,
        extra_options: Option<&Options>,
    ) -> Result<()> {
        let page = self.fetch(resource, extra_query, extra_options).await?;
        self.assign_page(resource, page);
        Ok(())
    }

    /// [`assign_to_resource`](Self::assign_to_resource) for many resources.
    ///
    /// Fetches run concurrently; resource `i` always receives result `i`.
    /// Every query is hydrated before any fetch starts, so a missing field
    /// fails the call without touching the target.
    pub async fn assign_to_resources(
        &self,
        resources: &mut [Record],
        extra_query: Option<&Query>,
        extra_options: Option<&Options>,
    ) -> Result<()> {
        if resources.is_empty() {
            return Ok(());
        }
        let queries = resources
            .iter()
            .map(|resource| self.build_query(resource, extra_query))
            .collect::<Result<Vec<_>>>()?;
        let options = self.build_options(extra_options);
        let target = self.target()?;

        let mut tasks = JoinSet::new();
        for (index, query) in queries.into_iter().enumerate() {
            let target = target.clone();
            let options = options.clone();
            tasks.spawn(async move { (index, target.read(Some(query), Some(options)).await) });
        }

        let mut pages: Vec<Option<ResultPage>> = vec![None; resources.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, page) = joined
                .map_err(|e| ConduitError::Other(format!("relation fetch task failed: {e}")))?;
            pages[index] = Some(page?);
        }

        tracing::debug!(
            relation = %self.name,
            count = resources.len(),
            "Assigned relation to resources"
        );
        for (resource, page) in resources.iter_mut().zip(pages) {
            if let Some(page) = page {
                self.assign_page(resource, page);
            }
        }
        Ok(())
    }

    fn assign_page(&self, resource: &mut Record, page: ResultPage) {
        let value = match self.cardinality {
            Cardinality::One => page
                .data
                .into_iter()
                .next()
                .map(Value::Object)
                .unwrap_or(Value::Null),
            Cardinality::Many => Value::Array(page.data.into_iter().map(Value::Object).collect()),
        };
        resource.insert(self.name.clone(), value);
    }
}

impl fmt::Debug for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("cardinality", &self.cardinality)
            .field("template", &self.template)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// `One` only when the target's identity is pinned to a single value: a
/// non-array literal, an escaped literal, or a reference to a non-array
/// field of the declaring model. Everything else is `Many`.
pub fn infer_cardinality(template: &QueryTemplate, model: Option<&ObjectSchema>) -> Cardinality {
    match template.get(ID_FIELD) {
        None => Cardinality::Many,
        Some(TemplateValue::Literal(value)) if value.is_array() => Cardinality::Many,
        Some(TemplateValue::Literal(_)) | Some(TemplateValue::Escaped(_)) => Cardinality::One,
        Some(TemplateValue::Reference(field)) => {
            match model.and_then(|m| m.get(field)) {
                Some(schema) if schema.is_array() => Cardinality::Many,
                _ => Cardinality::One,
            }
        }
    }
}
