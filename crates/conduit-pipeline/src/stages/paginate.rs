use async_trait::async_trait;
use serde_json::Value;

use conduit_schema::{FieldSchema, ObjectSchema};
use conduit_types::{Capabilities, Operation, Options, Query, Result, ResultPage};

use crate::slots::SchemaSlots;
use crate::stage::{Next, Stage};

const OFFSET: &str = "offset";
const LIMIT: &str = "limit";
const COUNT: &str = "count";

/// Slices read results by the `offset` and `limit` options and reports the
/// unsliced total as `meta.count`.
#[derive(Debug, Clone, Default)]
pub struct Paginate {
    default_limit: Option<u64>,
}

impl Paginate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit applied when a read passes none.
    pub fn with_default_limit(mut self, limit: u64) -> Self {
        self.default_limit = Some(limit);
        self
    }
}

#[async_trait]
impl Stage for Paginate {
    fn name(&self) -> &str {
        "Paginate"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::of(&[Operation::Read])
    }

    fn schemas(&self) -> SchemaSlots {
        SchemaSlots::new()
            .with_options(
                Operation::Read,
                ObjectSchema::new()
                    .property(
                        OFFSET,
                        FieldSchema::integer().minimum(0).optional().describe("records to skip"),
                    )
                    .property(
                        LIMIT,
                        FieldSchema::integer().minimum(0).optional().describe("maximum records returned"),
                    ),
            )
            .with_wrapper(
                Operation::Read,
                ObjectSchema::new()
                    .property(COUNT, FieldSchema::integer().describe("matches before slicing"))
                    .property(OFFSET, FieldSchema::integer())
                    .property(LIMIT, FieldSchema::integer().nullable()),
            )
    }

    async fn read(&self, query: Query, mut options: Options, next: Next<'_>) -> Result<ResultPage> {
        let offset = options.remove(OFFSET).and_then(|v| v.as_u64()).unwrap_or(0);
        let limit = options
            .remove(LIMIT)
            .and_then(|v| v.as_u64())
            .or(self.default_limit);

        let page = next.read(query, options).await?;
        let count = page.data.len();
        let ResultPage { data, meta } = page;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = limit
            .map(|l| usize::try_from(l).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        let data: Vec<_> = data.into_iter().skip(skip).take(take).collect();

        tracing::trace!(
            pipeline = %next.pipeline(),
            count,
            offset,
            returned = data.len(),
            "Paginated read"
        );
        let mut sliced = ResultPage::new(data)
            .with_meta(COUNT, Value::from(count))
            .with_meta(OFFSET, Value::from(offset))
            .with_meta(LIMIT, limit.map(Value::from).unwrap_or(Value::Null));
        for (key, value) in meta {
            sliced.meta.entry(key).or_insert(value);
        }
        Ok(sliced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySource;
    use crate::pipeline::Pipeline;
    use conduit_types::{ConduitError, Record};
    use serde_json::json;

    fn rec(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn numbers() -> Pipeline {
        let source = MemorySource::new("numbers", ObjectSchema::new());
        source
            .seed((1..=5).map(|i| rec(json!({"id": i.to_string()}))).collect())
            .unwrap();
        Pipeline::new(source).pipe(Paginate::new()).unwrap()
    }

    #[tokio::test]
    async fn slices_and_reports_total() {
        let page = numbers()
            .read(None, Some(rec(json!({"offset": 1, "limit": 2}))))
            .await
            .unwrap();
        let ids: Vec<_> = page.data.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!("2"), json!("3")]);
        assert_eq!(page.meta["count"], json!(5));
        assert_eq!(page.meta["offset"], json!(1));
        assert_eq!(page.meta["limit"], json!(2));
    }

    #[tokio::test]
    async fn no_options_returns_everything() {
        let page = numbers().read(None, None).await.unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page.meta["limit"], Value::Null);
    }

    #[tokio::test]
    async fn default_limit_applies() {
        let source = MemorySource::new("numbers", ObjectSchema::new());
        source
            .seed((1..=5).map(|i| rec(json!({"id": i.to_string()}))).collect())
            .unwrap();
        let pipeline = Pipeline::new(source)
            .pipe(Paginate::new().with_default_limit(3))
            .unwrap();
        assert_eq!(pipeline.read(None, None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn non_integer_limit_is_rejected() {
        let err = numbers()
            .read(None, Some(rec(json!({"limit": "ten"}))))
            .await
            .unwrap_err();
        assert!(matches!(err, ConduitError::Validation { .. }));
    }

    #[tokio::test]
    async fn negative_offset_or_limit_is_rejected() {
        for options in [json!({"offset": -1}), json!({"limit": -2})] {
            let err = numbers().read(None, Some(rec(options))).await.unwrap_err();
            assert!(matches!(err, ConduitError::Validation { .. }), "{err}");
        }
        let page = numbers()
            .read(None, Some(rec(json!({"offset": 0, "limit": 0}))))
            .await
            .unwrap();
        assert_eq!(page.len(), 0);
        assert_eq!(page.meta["count"], json!(5));
    }

    #[test]
    fn declares_read_wrapper() {
        let pipeline = numbers();
        let wrapper = pipeline.schemas().wrapper(Operation::Read).unwrap();
        assert_eq!(wrapper.property_names(), vec!["count", "limit", "offset"]);
    }
}
