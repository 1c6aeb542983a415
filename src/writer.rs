//! Bulk submission of write operations with partial-failure classification.
//!
//! The [`BatchWriter`] hands a whole batch to a [`Destination`] in one call
//! and sorts the per-item answers into a [`BatchResult`]. It never retries:
//! a failed invocation is redelivered by the stream, and document ids are
//! deterministic, so redelivery converges on the same index state.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::{Error, Result};

const NO_RESULT_REASON: &str = "no result reported";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteKind {
    Upsert,
    Delete,
}

/// One document change addressed to a destination index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOperation {
    pub kind: WriteKind,
    pub id: String,
    pub destination: String,
    /// Empty for deletes.
    pub document: Map<String, Value>,
}

impl WriteOperation {
    pub fn upsert(
        id: impl Into<String>,
        destination: impl Into<String>,
        document: Map<String, Value>,
    ) -> Self {
        Self {
            kind: WriteKind::Upsert,
            id: id.into(),
            destination: destination.into(),
            document,
        }
    }

    pub fn delete(id: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            kind: WriteKind::Delete,
            id: id.into(),
            destination: destination.into(),
            document: Map::new(),
        }
    }
}

/// Outcome reported by the destination for one submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResponse {
    pub id: String,
    pub status: u16,
    pub error_type: Option<String>,
    pub reason: Option<String>,
}

impl ItemResponse {
    pub fn ok(id: impl Into<String>, status: u16) -> Self {
        Self {
            id: id.into(),
            status,
            error_type: None,
            reason: None,
        }
    }

    pub fn failed(id: impl Into<String>, status: u16, error_type: &str, reason: &str) -> Self {
        Self {
            id: id.into(),
            status,
            error_type: Some(error_type.to_string()),
            reason: Some(reason.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Per-item results of one bulk submission, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub items: Vec<ItemResponse>,
}

/// The capability the writer submits batches through.
///
/// Implementations report transport-level failures as `Err` and item-level
/// failures inside the returned [`BulkResponse`].
#[async_trait]
pub trait Destination: Send + Sync {
    async fn submit_batch(&self, operations: &[WriteOperation]) -> Result<BulkResponse>;
}

#[async_trait]
impl<D: Destination + ?Sized> Destination for Arc<D> {
    async fn submit_batch(&self, operations: &[WriteOperation]) -> Result<BulkResponse> {
        (**self).submit_batch(operations).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchResult {
    Success,
    PartialFailure(Vec<ItemFailure>),
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchResult::Success)
    }

    /// Turns a partial failure into [`Error::PartialWrite`], attaching a
    /// snapshot of the attempted batch of at most `max_snapshot_bytes`.
    pub fn into_result(
        self,
        attempted: &[WriteOperation],
        max_snapshot_bytes: usize,
    ) -> Result<()> {
        match self {
            BatchResult::Success => Ok(()),
            BatchResult::PartialFailure(failures) => Err(Error::PartialWrite {
                failures,
                attempted: snapshot(attempted, max_snapshot_bytes),
            }),
        }
    }
}

/// JSON rendering of a batch for logs, cut at a char boundary once it
/// exceeds `max_bytes`.
pub fn snapshot(operations: &[WriteOperation], max_bytes: usize) -> String {
    match serde_json::to_string(operations) {
        Ok(json) => truncate_for_log(json, max_bytes),
        Err(e) => format!("<unserializable batch: {}>", e),
    }
}

pub(crate) fn truncate_for_log(mut text: String, max_bytes: usize) -> String {
    if text.len() > max_bytes {
        let mut cut = max_bytes;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
        text.push_str("...");
    }
    text
}

pub struct BatchWriter<D> {
    destination: D,
}

impl<D: Destination> BatchWriter<D> {
    pub fn new(destination: D) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Submits the batch as one bulk request.
    ///
    /// An empty batch succeeds without touching the destination. If `cancel`
    /// fires first the in-flight submission is dropped and
    /// [`Error::Cancelled`] is returned.
    #[instrument(skip_all, fields(operations = operations.len()))]
    pub async fn write(
        &self,
        operations: &[WriteOperation],
        cancel: &CancellationToken,
    ) -> Result<BatchResult> {
        if operations.is_empty() {
            debug!("Empty batch, nothing to submit");
            return Ok(BatchResult::Success);
        }

        let response = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Submission cancelled before the destination answered");
                return Err(Error::Cancelled);
            }

            response = self.destination.submit_batch(operations) => match response {
                Ok(response) => response,
                Err(e) => {
                    error!(error_type = "UNKNOWN", error_reason = %e, "write-failed");
                    return Err(e);
                }
            },
        };

        let result = classify(operations, &response);
        if result.is_success() {
            debug!("Bulk submission succeeded");
        }
        Ok(result)
    }
}

/// Sorts item responses into successes and failures.
///
/// Items answer operations by position. An operation left without an item
/// is a failure with status `0`, since the destination never confirmed it.
/// A 404 answering a delete means the document is already gone, which is
/// the state the delete asked for.
pub fn classify(operations: &[WriteOperation], response: &BulkResponse) -> BatchResult {
    let mut failures = Vec::new();

    if response.items.len() != operations.len() {
        warn!(
            operations = operations.len(),
            items = response.items.len(),
            "Bulk response item count does not match the batch"
        );
    }

    for (index, op) in operations.iter().enumerate() {
        let Some(item) = response.items.get(index) else {
            error!(doc_id = %op.id, destination = %op.destination, "document-result-missing");
            failures.push(ItemFailure {
                id: op.id.clone(),
                status: 0,
                reason: NO_RESULT_REASON.to_string(),
            });
            continue;
        };

        if item.is_success() {
            continue;
        }

        if op.kind == WriteKind::Delete && item.status == 404 {
            debug!(doc_id = %op.id, "Delete of missing document");
            continue;
        }

        let reason = item.reason.clone().unwrap_or_else(|| "UNKNOWN".to_string());
        error!(
            error_type = item.error_type.as_deref().unwrap_or("UNKNOWN"),
            doc_id = %op.id,
            status = item.status,
            error_reason = %reason,
            "document-write-failed"
        );
        failures.push(ItemFailure {
            id: op.id.clone(),
            status: item.status,
            reason,
        });
    }

    if failures.is_empty() {
        BatchResult::Success
    } else {
        BatchResult::PartialFailure(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StubDestination {
        calls: AtomicUsize,
        answer: fn(&[WriteOperation]) -> Result<BulkResponse>,
    }

    impl StubDestination {
        fn new(answer: fn(&[WriteOperation]) -> Result<BulkResponse>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer,
            }
        }
    }

    #[async_trait]
    impl Destination for StubDestination {
        async fn submit_batch(&self, operations: &[WriteOperation]) -> Result<BulkResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.answer)(operations)
        }
    }

    struct HangingDestination;

    #[async_trait]
    impl Destination for HangingDestination {
        async fn submit_batch(&self, _operations: &[WriteOperation]) -> Result<BulkResponse> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(BulkResponse::default())
        }
    }

    fn all_ok(operations: &[WriteOperation]) -> Result<BulkResponse> {
        Ok(BulkResponse {
            items: operations.iter().map(|op| ItemResponse::ok(&op.id, 200)).collect(),
        })
    }

    fn doc(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn test_empty_batch_skips_destination() {
        let writer = BatchWriter::new(StubDestination::new(all_ok));
        let result = writer.write(&[], &CancellationToken::new()).await.unwrap();

        assert_eq!(result, BatchResult::Success);
        assert_eq!(writer.destination().calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_batch_is_one_call() {
        let writer = BatchWriter::new(StubDestination::new(all_ok));
        let ops = vec![
            WriteOperation::upsert("a", "idx", doc(json!({"x": "1"}))),
            WriteOperation::delete("b", "idx"),
        ];

        let result = writer.write(&ops, &CancellationToken::new()).await.unwrap();

        assert!(result.is_success());
        assert_eq!(writer.destination().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_item_failures_are_collected() {
        fn answer(_: &[WriteOperation]) -> Result<BulkResponse> {
            Ok(BulkResponse {
                items: vec![
                    ItemResponse::ok("a", 201),
                    ItemResponse::failed(
                        "b",
                        400,
                        "mapper_parsing_exception",
                        "failed to parse [age]",
                    ),
                    ItemResponse {
                        id: "c".to_string(),
                        status: 500,
                        error_type: None,
                        reason: None,
                    },
                ],
            })
        }

        let writer = BatchWriter::new(StubDestination::new(answer));
        let ops = vec![
            WriteOperation::upsert("a", "idx", Map::new()),
            WriteOperation::upsert("b", "idx", Map::new()),
            WriteOperation::upsert("c", "idx", Map::new()),
        ];

        let result = writer.write(&ops, &CancellationToken::new()).await.unwrap();

        assert_eq!(
            result,
            BatchResult::PartialFailure(vec![
                ItemFailure {
                    id: "b".to_string(),
                    status: 400,
                    reason: "failed to parse [age]".to_string(),
                },
                ItemFailure {
                    id: "c".to_string(),
                    status: 500,
                    reason: "UNKNOWN".to_string(),
                },
            ])
        );
    }

    #[test]
    fn test_delete_of_missing_document_is_success() {
        let ops = vec![
            WriteOperation::delete("gone", "idx"),
            WriteOperation::upsert("missing-index", "idx", Map::new()),
        ];
        let response = BulkResponse {
            items: vec![
                ItemResponse::ok("gone", 404),
                ItemResponse::failed(
                    "missing-index",
                    404,
                    "index_not_found_exception",
                    "no such index",
                ),
            ],
        };

        match classify(&ops, &response) {
            BatchResult::PartialFailure(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].id, "missing-index");
            }
            BatchResult::Success => panic!("upsert 404 must be a failure"),
        }
    }

    #[tokio::test]
    async fn test_unanswered_operations_are_failures() {
        fn empty(_: &[WriteOperation]) -> Result<BulkResponse> {
            Ok(BulkResponse::default())
        }

        let writer = BatchWriter::new(StubDestination::new(empty));
        let ops = vec![
            WriteOperation::upsert("a", "idx", Map::new()),
            WriteOperation::upsert("b", "idx", Map::new()),
        ];

        let result = writer.write(&ops, &CancellationToken::new()).await.unwrap();

        assert!(!result.is_success());
        assert_eq!(
            result,
            BatchResult::PartialFailure(vec![
                ItemFailure {
                    id: "a".to_string(),
                    status: 0,
                    reason: "no result reported".to_string(),
                },
                ItemFailure {
                    id: "b".to_string(),
                    status: 0,
                    reason: "no result reported".to_string(),
                },
            ])
        );
    }

    #[test]
    fn test_short_response_fails_the_tail() {
        let ops = vec![
            WriteOperation::upsert("a", "idx", Map::new()),
            WriteOperation::delete("b", "idx"),
            WriteOperation::upsert("c", "idx", Map::new()),
        ];
        let response = BulkResponse {
            items: vec![ItemResponse::ok("a", 201), ItemResponse::ok("b", 404)],
        };

        match classify(&ops, &response) {
            BatchResult::PartialFailure(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].id, "c");
                assert_eq!(failures[0].status, 0);
            }
            BatchResult::Success => panic!("unanswered upsert must be a failure"),
        }
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        fn answer(_: &[WriteOperation]) -> Result<BulkResponse> {
            Err(Error::Transport("connection refused".to_string()))
        }

        let writer = BatchWriter::new(StubDestination::new(answer));
        let ops = vec![WriteOperation::delete("a", "idx")];

        let err = writer.write(&ops, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(writer.destination().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_submission() {
        let writer = BatchWriter::new(HangingDestination);
        let cancel = CancellationToken::new();
        let ops = vec![WriteOperation::delete("a", "idx")];

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(Duration::from_secs(5), writer.write(&ops, &cancel))
            .await
            .expect("cancellation should end the write promptly")
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_into_result_attaches_snapshot() {
        let ops = vec![WriteOperation::upsert("a", "idx", doc(json!({"k": "v"})))];
        let failures = vec![ItemFailure {
            id: "a".to_string(),
            status: 400,
            reason: "bad".to_string(),
        }];

        let err = BatchResult::PartialFailure(failures.clone())
            .into_result(&ops, 4096)
            .unwrap_err();

        match err {
            Error::PartialWrite { failures: got, attempted } => {
                assert_eq!(got, failures);
                assert_eq!(
                    attempted,
                    r#"[{"kind":"upsert","id":"a","destination":"idx","document":{"k":"v"}}]"#
                );
            }
            other => panic!("unexpected error: {other}"),
        }

        assert!(BatchResult::Success.into_result(&ops, 4096).is_ok());
    }

    #[test]
    fn test_snapshot_truncates_on_char_boundary() {
        let ops = vec![WriteOperation::upsert("é", "idx", doc(json!({"name": "ééééé"})))];

        let full = snapshot(&ops, usize::MAX);
        assert!(!full.ends_with("..."));

        let short = snapshot(&ops, 9);
        assert!(short.ends_with("..."));
        assert!(short.len() <= 12);
    }
}
