//! Turns a batch of change records into an ordered batch of write operations.

use futures::{StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::cutover::{NeverSkip, SkipPredicate};
use crate::dynamodb::{ChangeRecord, OperationType};
use crate::transform::{derive_id, Mapper, RouteCache, Router};
use crate::writer::{WriteKind, WriteOperation};
use crate::{Error, Result};

/// A record after identity derivation and document conversion, still
/// waiting for its destination.
#[derive(Debug)]
struct Transformed {
    kind: WriteKind,
    id: String,
    document: Map<String, Value>,
    provenance: String,
}

pub struct RecordProcessor {
    mapper: Arc<Mapper>,
    router: Router,
    skip: Arc<dyn SkipPredicate>,
    concurrency: usize,
}

impl RecordProcessor {
    pub fn new(mapper: Mapper, router: Router) -> Self {
        Self {
            mapper: Arc::new(mapper),
            router,
            skip: Arc::new(NeverSkip),
            concurrency: 1,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let mapper = Mapper::new(&config.index.excluded_paths);
        let router = Router::with_pattern(&config.index.prefix, &config.index.table_pattern)?;

        let mut processor =
            Self::new(mapper, router).with_concurrency(config.processing.concurrency);
        if let Some(rule) = &config.cutover {
            processor = processor.with_skip_predicate(Arc::new(rule.clone()));
        }
        Ok(processor)
    }

    pub fn with_skip_predicate(mut self, skip: Arc<dyn SkipPredicate>) -> Self {
        self.skip = skip;
        self
    }

    /// Number of records transformed at once. `1` keeps everything on the
    /// calling task.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Processes one invocation's records.
    ///
    /// Fails with [`Error::EmptyBatch`] on empty input and
    /// [`Error::AllSkipped`] when the skip predicate drops every record. The
    /// first record that cannot be converted aborts the whole batch.
    pub async fn process(&self, records: Vec<ChangeRecord>) -> Result<Vec<WriteOperation>> {
        if records.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let received = records.len();
        let kept: Vec<ChangeRecord> = records
            .into_iter()
            .filter(|record| {
                let skip = self.skip.should_skip(record);
                if skip {
                    debug!(
                        event_id = %record.event_id,
                        aws_region = %record.aws_region,
                        "Skipping record"
                    );
                }
                !skip
            })
            .collect();

        if kept.is_empty() {
            warn!(records = received, "Every record in the batch was skipped");
            return Err(Error::AllSkipped);
        }

        let transformed = if self.concurrency > 1 && kept.len() > 1 {
            self.transform_parallel(kept).await?
        } else {
            kept.iter()
                .map(|record| transform(&self.mapper, record))
                .collect::<Result<Vec<_>>>()?
        };

        let mut routes = RouteCache::new(&self.router);
        let operations: Vec<WriteOperation> = transformed
            .into_iter()
            .flatten()
            .map(|t| WriteOperation {
                destination: routes.route(&t.provenance),
                kind: t.kind,
                id: t.id,
                document: t.document,
            })
            .collect();

        let operations = collapse_superseded(operations);
        debug!(records = received, operations = operations.len(), "Batch assembled");
        Ok(operations)
    }

    /// Runs transformations on the blocking pool, at most `concurrency` at a
    /// time. Results come back in input order.
    async fn transform_parallel(
        &self,
        records: Vec<ChangeRecord>,
    ) -> Result<Vec<Option<Transformed>>> {
        let mapper = Arc::clone(&self.mapper);

        futures::stream::iter(records)
            .map(move |record| {
                let mapper = Arc::clone(&mapper);
                tokio::task::spawn_blocking(move || transform(&mapper, &record))
            })
            .buffered(self.concurrency)
            .map(|joined| joined.map_err(Error::from).and_then(|result| result))
            .try_collect()
            .await
    }
}

fn transform(mapper: &Mapper, record: &ChangeRecord) -> Result<Option<Transformed>> {
    let id = derive_id(&record.keys, mapper)?;

    let kind = match &record.operation {
        OperationType::Insert | OperationType::Modify => WriteKind::Upsert,
        OperationType::Remove => WriteKind::Delete,
        OperationType::Unknown => {
            trace!(event_id = %record.event_id, "Record without event name");
            return Ok(None);
        }
        OperationType::Other(tag) => {
            return Err(Error::UnsupportedOperation {
                operation: tag.clone(),
            })
        }
    };

    let document = match kind {
        WriteKind::Upsert => mapper.convert_image(&record.new_image),
        WriteKind::Delete => Map::new(),
    };

    Ok(Some(Transformed {
        kind,
        id,
        document,
        provenance: record.provenance.clone(),
    }))
}

/// Drops every operation that a later one in the batch overwrites, i.e.
/// one with the same destination and id. Survivors keep their order.
fn collapse_superseded(operations: Vec<WriteOperation>) -> Vec<WriteOperation> {
    let total = operations.len();
    let mut seen = HashSet::with_capacity(total);
    let mut kept: Vec<WriteOperation> = Vec::with_capacity(total);

    for op in operations.into_iter().rev() {
        if seen.insert((op.destination.clone(), op.id.clone())) {
            kept.push(op);
        }
    }
    kept.reverse();

    if kept.len() < total {
        debug!(superseded = total - kept.len(), "Collapsed repeated document ids");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamodb::AttributeValue;
    use serde_json::json;

    const ARN: &str = "arn:aws:dynamodb:us-east-1:123456789012:table/orders/stream/2024-01-01T00:00:00.000";

    fn processor() -> RecordProcessor {
        RecordProcessor::new(Mapper::default(), Router::new("ddb-"))
    }

    fn upsert(id: &str, name: &str) -> ChangeRecord {
        ChangeRecord::new(OperationType::Modify, ARN)
            .with_key("id", AttributeValue::string(id))
            .with_attribute("id", AttributeValue::string(id))
            .with_attribute("name", AttributeValue::string(name))
    }

    #[tokio::test]
    async fn test_empty_batch_is_an_error() {
        let err = processor().process(vec![]).await.unwrap_err();
        assert!(matches!(err, Error::EmptyBatch));
    }

    #[tokio::test]
    async fn test_all_skipped_is_distinct_from_empty() {
        let processor = processor().with_skip_predicate(Arc::new(|_: &ChangeRecord| true));
        let err = processor.process(vec![upsert("a", "x")]).await.unwrap_err();
        assert!(matches!(err, Error::AllSkipped));
    }

    #[tokio::test]
    async fn test_unknown_operations_are_dropped_silently() {
        let mut unknown = upsert("a", "x");
        unknown.operation = OperationType::Unknown;

        let ops = processor().process(vec![unknown, upsert("b", "y")]).await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, "b");
    }

    #[tokio::test]
    async fn test_only_unknown_operations_yield_empty_batch() {
        let mut unknown = upsert("a", "x");
        unknown.operation = OperationType::Unknown;

        let ops = processor().process(vec![unknown]).await.unwrap();
        assert!(ops.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_operation_aborts_batch() {
        let mut odd = upsert("a", "x");
        odd.operation = OperationType::Other("TRUNCATE".to_string());

        let err = processor().process(vec![upsert("b", "y"), odd]).await.unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedOperation { operation } if operation == "TRUNCATE"
        ));
    }

    #[tokio::test]
    async fn test_operation_kinds_and_documents() {
        let insert = ChangeRecord::new(OperationType::Insert, ARN)
            .with_key("id", AttributeValue::string("i"))
            .with_attribute("n", AttributeValue::number("3"));
        let remove = ChangeRecord::new(OperationType::Remove, ARN)
            .with_key("id", AttributeValue::string("r"));

        let ops = processor().process(vec![insert, remove]).await.unwrap();

        assert_eq!(ops[0].kind, WriteKind::Upsert);
        assert_eq!(Value::Object(ops[0].document.clone()), json!({"n": "3"}));
        assert_eq!(ops[1].kind, WriteKind::Delete);
        assert!(ops[1].document.is_empty());
        assert!(ops.iter().all(|op| op.destination == "ddb-orders"));
    }

    #[tokio::test]
    async fn test_later_record_wins_on_same_id() {
        let ops = processor()
            .process(vec![upsert("a", "first"), upsert("b", "other"), upsert("a", "second")])
            .await
            .unwrap();

        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].id, "b");
        assert_eq!(ops[1].id, "a");
        assert_eq!(ops[1].document["name"], json!("second"));
    }

    #[tokio::test]
    async fn test_same_id_in_different_tables_is_kept() {
        let other_table = ChangeRecord::new(
            OperationType::Insert,
            "arn:aws:dynamodb:us-east-1:123456789012:table/users/stream/2024",
        )
        .with_key("id", AttributeValue::string("a"));

        let ops = processor().process(vec![upsert("a", "x"), other_table]).await.unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].destination, "ddb-users");
    }

    #[tokio::test]
    async fn test_parallel_matches_sequential() {
        let mut records: Vec<ChangeRecord> = (0..50)
            .map(|i| upsert(&format!("id-{}", i % 20), &format!("v{}", i)))
            .collect();
        records.push(
            ChangeRecord::new(OperationType::Remove, "unroutable")
                .with_key("id", AttributeValue::string("id-3")),
        );

        let sequential = processor().process(records.clone()).await.unwrap();
        let parallel = processor().with_concurrency(8).process(records).await.unwrap();

        assert_eq!(sequential, parallel);
        assert_eq!(sequential.len(), 21);
        assert!(parallel
            .iter()
            .any(|op| op.destination == "ddb--unknown-table-name" && op.kind == WriteKind::Delete));
    }

    #[tokio::test]
    async fn test_parallel_fails_fast_on_bad_record() {
        let mut records: Vec<ChangeRecord> = (0..10).map(|i| upsert(&i.to_string(), "v")).collect();
        records[4].operation = OperationType::Other("BOGUS".to_string());

        let err = processor().with_concurrency(4).process(records).await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_collapse_keeps_order_of_survivors() {
        let ops = vec![
            WriteOperation::delete("a", "x"),
            WriteOperation::delete("b", "x"),
            WriteOperation::upsert("a", "x", Map::new()),
            WriteOperation::delete("c", "x"),
        ];

        let ids: Vec<String> = collapse_superseded(ops).into_iter().map(|op| op.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }
}
