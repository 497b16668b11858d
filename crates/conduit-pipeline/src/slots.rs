//! Schema slot registry: the named schemas a stage declares and the rules for
//! merging them when stages are composed.
//!
//! Input slots (`values`, `query`) resolve to the nearest declaration walking
//! toward the source. `model` and `wrapper` slots are unions of every
//! declaration along the chain. `options` slots are unions too, but a property
//! declared twice is a configuration error.

use std::collections::BTreeMap;
use std::fmt;

use conduit_schema::{FieldSchema, ObjectSchema};
use conduit_types::{ConduitError, Operation, Result, ID_FIELD};

// ---------------------------------------------------------------------------
// SchemaSlot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SchemaSlot {
    Model,
    /// Values accepted by `create`, `replace`, and `patch`.
    Values(Operation),
    /// Query accepted by `read`, `patch`, and `delete`.
    Query(Operation),
    Options(Operation),
    /// Extra fields a stage adds to the `meta` part of a result.
    Wrapper(Operation),
}

/// How a slot combines across a composed chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    Nearest,
    Union,
    DisjointUnion,
}

impl SchemaSlot {
    /// Every valid slot, model first, then grouped by operation.
    pub fn all() -> Vec<SchemaSlot> {
        let mut slots = vec![SchemaSlot::Model];
        for op in Operation::ALL {
            slots.extend(SchemaSlot::inputs(op));
            slots.push(SchemaSlot::Options(op));
            slots.push(SchemaSlot::Wrapper(op));
        }
        slots
    }

    /// The input slots validated by an operation's entry point.
    pub fn inputs(operation: Operation) -> Vec<SchemaSlot> {
        match operation {
            Operation::Create | Operation::Replace => vec![SchemaSlot::Values(operation)],
            Operation::Read | Operation::Delete => vec![SchemaSlot::Query(operation)],
            Operation::Patch => vec![
                SchemaSlot::Query(operation),
                SchemaSlot::Values(operation),
            ],
        }
    }

    pub fn is_valid(&self) -> bool {
        match self {
            SchemaSlot::Values(op) => {
                matches!(op, Operation::Create | Operation::Replace | Operation::Patch)
            }
            SchemaSlot::Query(op) => {
                matches!(op, Operation::Read | Operation::Patch | Operation::Delete)
            }
            _ => true,
        }
    }

    pub fn merge_rule(&self) -> MergeRule {
        match self {
            SchemaSlot::Values(_) | SchemaSlot::Query(_) => MergeRule::Nearest,
            SchemaSlot::Model | SchemaSlot::Wrapper(_) => MergeRule::Union,
            SchemaSlot::Options(_) => MergeRule::DisjointUnion,
        }
    }
}

impl fmt::Display for SchemaSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaSlot::Model => f.write_str("model"),
            SchemaSlot::Values(op) => write!(f, "{op}.values"),
            SchemaSlot::Query(op) => write!(f, "{op}.query"),
            SchemaSlot::Options(op) => write!(f, "{op}.options"),
            SchemaSlot::Wrapper(op) => write!(f, "{op}.wrapper"),
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaSlots
// ---------------------------------------------------------------------------

/// The schemas (and operation descriptions) declared by one stage, or the
/// resolved view of a whole chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaSlots {
    slots: BTreeMap<SchemaSlot, ObjectSchema>,
    descriptions: BTreeMap<Operation, String>,
}

impl SchemaSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slots for a terminal stage, derived from its model.
    ///
    /// The model gains a string `id` if it does not declare one. Create and
    /// replace values make `id` optional; queries accept every model property
    /// as a value or a list of values; patch values are deep-optional and
    /// nullable (null removes the field), except `id`.
    pub fn for_source(model: ObjectSchema) -> Self {
        let model = if model.has_property(ID_FIELD) {
            model
        } else {
            model.property(ID_FIELD, FieldSchema::string())
        };
        let id_field = model
            .get(ID_FIELD)
            .cloned()
            .unwrap_or_else(FieldSchema::string)
            .optional();
        let query = model.to_array_properties().all_optional();
        let patch_values = model
            .deep_optional()
            .nullable_properties()
            .property(ID_FIELD, id_field);

        Self::new()
            .with_values(Operation::Create, model.with_optional(&[ID_FIELD]))
            .with_query(Operation::Read, query.clone())
            .with_values(Operation::Replace, model.with_optional(&[ID_FIELD]))
            .with_query(Operation::Patch, query.clone())
            .with_values(Operation::Patch, patch_values)
            .with_query(Operation::Delete, query)
            .with_model(model)
    }

    // --- builder ---

    pub fn with_model(self, schema: ObjectSchema) -> Self {
        self.with_slot(SchemaSlot::Model, schema)
    }

    pub fn with_values(self, operation: Operation, schema: ObjectSchema) -> Self {
        self.with_slot(SchemaSlot::Values(operation), schema)
    }

    pub fn with_query(self, operation: Operation, schema: ObjectSchema) -> Self {
        self.with_slot(SchemaSlot::Query(operation), schema)
    }

    pub fn with_options(self, operation: Operation, schema: ObjectSchema) -> Self {
        self.with_slot(SchemaSlot::Options(operation), schema)
    }

    pub fn with_wrapper(self, operation: Operation, schema: ObjectSchema) -> Self {
        self.with_slot(SchemaSlot::Wrapper(operation), schema)
    }

    /// Attach a human-readable description to an operation.
    pub fn describe(mut self, operation: Operation, text: impl Into<String>) -> Self {
        self.descriptions.insert(operation, text.into());
        self
    }

    pub fn with_slot(mut self, slot: SchemaSlot, schema: ObjectSchema) -> Self {
        if slot.is_valid() {
            self.slots.insert(slot, schema);
        } else {
            tracing::warn!(slot = %slot, "Ignoring schema for a slot the operation does not have");
        }
        self
    }

    // --- accessors ---

    pub fn get(&self, slot: SchemaSlot) -> Option<&ObjectSchema> {
        self.slots.get(&slot)
    }

    pub fn model(&self) -> Option<&ObjectSchema> {
        self.get(SchemaSlot::Model)
    }

    pub fn values(&self, operation: Operation) -> Option<&ObjectSchema> {
        self.get(SchemaSlot::Values(operation))
    }

    pub fn query(&self, operation: Operation) -> Option<&ObjectSchema> {
        self.get(SchemaSlot::Query(operation))
    }

    pub fn options(&self, operation: Operation) -> Option<&ObjectSchema> {
        self.get(SchemaSlot::Options(operation))
    }

    pub fn wrapper(&self, operation: Operation) -> Option<&ObjectSchema> {
        self.get(SchemaSlot::Wrapper(operation))
    }

    pub fn description(&self, operation: Operation) -> Option<&str> {
        self.descriptions.get(&operation).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SchemaSlot, &ObjectSchema)> {
        self.slots.iter().map(|(slot, schema)| (*slot, schema))
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.descriptions.is_empty()
    }

    // --- composition ---

    /// Resolve the slots of a chain whose innermost stage declared `declared`.
    pub fn root(declared: &SchemaSlots) -> SchemaSlots {
        SchemaSlots {
            slots: declared
                .slots
                .iter()
                .filter(|(_, schema)| !schema.is_empty())
                .map(|(slot, schema)| (*slot, schema.clone()))
                .collect(),
            descriptions: declared.descriptions.clone(),
        }
    }

    /// Resolve the slots of `stage_name` piped on top of an already resolved
    /// chain. Fails if the stage redeclares an option the chain already has.
    pub fn compose(
        resolved: &SchemaSlots,
        declared: &SchemaSlots,
        stage_name: &str,
    ) -> Result<SchemaSlots> {
        let mut slots = BTreeMap::new();
        for slot in SchemaSlot::all() {
            let inner = resolved.get(slot).filter(|s| !s.is_empty());
            let outer = declared.get(slot).filter(|s| !s.is_empty());
            let merged = match (inner, outer) {
                (None, None) => continue,
                (Some(schema), None) | (None, Some(schema)) => schema.clone(),
                (Some(inner), Some(outer)) => match slot.merge_rule() {
                    MergeRule::Nearest => outer.clone(),
                    MergeRule::Union => inner.merge(outer),
                    MergeRule::DisjointUnion => {
                        let clashes = inner.collisions(outer);
                        if !clashes.is_empty() {
                            return Err(ConduitError::Configuration(format!(
                                "stage '{stage_name}' redeclares {slot} already provided by the chain: {}",
                                clashes.join(", ")
                            )));
                        }
                        inner.merge(outer)
                    }
                },
            };
            slots.insert(slot, merged);
        }

        let mut descriptions = resolved.descriptions.clone();
        descriptions.extend(
            declared
                .descriptions
                .iter()
                .map(|(op, text)| (*op, text.clone())),
        );

        Ok(SchemaSlots {
            slots,
            descriptions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn author_model() -> ObjectSchema {
        ObjectSchema::titled("Author")
            .property("firstName", FieldSchema::string())
            .property("tags", FieldSchema::array(FieldSchema::string()).optional())
    }

    #[test]
    fn all_slots_are_valid_and_unique() {
        let slots = SchemaSlot::all();
        assert_eq!(slots.len(), 1 + 6 + 5 * 2);
        assert!(slots.iter().all(SchemaSlot::is_valid));
        let unique: std::collections::BTreeSet<_> = slots.iter().collect();
        assert_eq!(unique.len(), slots.len());
    }

    #[test]
    fn slot_display() {
        assert_eq!(SchemaSlot::Model.to_string(), "model");
        assert_eq!(SchemaSlot::Query(Operation::Read).to_string(), "read.query");
        assert_eq!(
            SchemaSlot::Options(Operation::Patch).to_string(),
            "patch.options"
        );
    }

    #[test]
    fn invalid_slot_is_ignored() {
        let slots = SchemaSlots::new().with_values(Operation::Read, author_model());
        assert!(slots.get(SchemaSlot::Values(Operation::Read)).is_none());
    }

    #[test]
    fn for_source_adds_id_and_derives_inputs() {
        let slots = SchemaSlots::for_source(author_model());
        let model = slots.model().unwrap();
        assert!(model.has_property("id"));

        let create = slots.values(Operation::Create).unwrap();
        assert!(create.validate(&json!({"firstName": "Jules"})).is_ok());

        let read = slots.query(Operation::Read).unwrap();
        assert!(read.validate(&json!({"id": ["1", "2"]})).is_ok());
        assert!(read.validate(&json!({"tags": "sci-fi"})).is_ok());
        assert!(read.validate(&json!({"unknown": 1})).is_err());

        let patch = slots.values(Operation::Patch).unwrap();
        assert!(patch.validate(&json!({"tags": null})).is_ok());
        assert!(patch.validate(&json!({"id": null})).is_err());
    }

    #[test]
    fn compose_input_slots_take_nearest() {
        let inner = SchemaSlots::root(&SchemaSlots::for_source(author_model()));
        let narrow = ObjectSchema::new().property("firstName", FieldSchema::string());
        let declared = SchemaSlots::new().with_values(Operation::Create, narrow.clone());

        let resolved = SchemaSlots::compose(&inner, &declared, "Narrow").unwrap();
        assert_eq!(resolved.values(Operation::Create), Some(&narrow));
        assert_eq!(resolved.query(Operation::Read), inner.query(Operation::Read));
    }

    #[test]
    fn compose_options_are_a_union() {
        let a = SchemaSlots::root(&SchemaSlots::new().with_options(
            Operation::Read,
            ObjectSchema::new().property("a", FieldSchema::string().optional()),
        ));
        let b = SchemaSlots::new().with_options(
            Operation::Read,
            ObjectSchema::new().property("b", FieldSchema::string().optional()),
        );
        let resolved = SchemaSlots::compose(&a, &b, "B").unwrap();
        let options = resolved.options(Operation::Read).unwrap();
        assert!(options.validate(&json!({"a": "x"})).is_ok());
        assert!(options.validate(&json!({"b": "y"})).is_ok());
        assert!(options.validate(&json!({"a": "x", "b": "y"})).is_ok());
    }

    #[test]
    fn compose_option_collision_is_configuration_error() {
        let opts = ObjectSchema::new().property("limit", FieldSchema::integer().optional());
        let a = SchemaSlots::root(&SchemaSlots::new().with_options(Operation::Read, opts.clone()));
        let b = SchemaSlots::new().with_options(Operation::Read, opts);
        let err = SchemaSlots::compose(&a, &b, "Paginate").unwrap_err();
        assert!(matches!(err, ConduitError::Configuration(_)));
        assert!(err.to_string().contains("read.options"));
        assert!(err.to_string().contains("limit"));
    }

    #[test]
    fn compose_wrapper_and_model_merge_with_outer_precedence() {
        let inner = SchemaSlots::root(
            &SchemaSlots::new()
                .with_model(ObjectSchema::new().property("x", FieldSchema::string()))
                .with_wrapper(
                    Operation::Read,
                    ObjectSchema::new().property("count", FieldSchema::string()),
                ),
        );
        let declared = SchemaSlots::new()
            .with_model(ObjectSchema::new().property("createdAt", FieldSchema::string()))
            .with_wrapper(
                Operation::Read,
                ObjectSchema::new().property("count", FieldSchema::integer()),
            );
        let resolved = SchemaSlots::compose(&inner, &declared, "Stage").unwrap();
        assert_eq!(
            resolved.model().unwrap().property_names(),
            vec!["createdAt", "x"]
        );
        assert_eq!(
            resolved.wrapper(Operation::Read).unwrap().get("count"),
            Some(&FieldSchema::integer())
        );
    }

    #[test]
    fn compose_keeps_descriptions() {
        let inner = SchemaSlots::root(&SchemaSlots::new().describe(Operation::Read, "List"));
        let declared = SchemaSlots::new().describe(Operation::Create, "Add");
        let resolved = SchemaSlots::compose(&inner, &declared, "S").unwrap();
        assert_eq!(resolved.description(Operation::Read), Some("List"));
        assert_eq!(resolved.description(Operation::Create), Some("Add"));
    }
}
