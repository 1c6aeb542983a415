#![allow(dead_code)]

use async_trait::async_trait;
use ddb_to_es::dynamodb::{AttributeValue, ChangeRecord, OperationType};
use ddb_to_es::writer::{BulkResponse, ItemResponse};
use ddb_to_es::{Destination, Error, Result, WriteKind, WriteOperation};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const ORDERS_ARN: &str =
    "arn:aws:dynamodb:us-east-1:123456789012:table/orders/stream/2024-01-01T00:00:00.000";

/// In-memory destination that applies batches to a map of indexes, so
/// tests can assert on the final document state.
#[derive(Default)]
pub struct MockDestination {
    pub batches: Mutex<Vec<Vec<WriteOperation>>>,
    pub indexes: Mutex<HashMap<String, HashMap<String, Map<String, Value>>>>,
    pub reject_ids: HashSet<String>,
    pub unreachable: bool,
}

impl MockDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(ids: &[&str]) -> Self {
        Self {
            reject_ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn unreachable() -> Self {
        Self {
            unreachable: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.indexes
            .lock()
            .unwrap()
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.indexes
            .lock()
            .unwrap()
            .get(index)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl Destination for MockDestination {
    async fn submit_batch(&self, operations: &[WriteOperation]) -> Result<BulkResponse> {
        if self.unreachable {
            return Err(Error::Transport("connection refused".to_string()));
        }

        self.batches.lock().unwrap().push(operations.to_vec());
        let mut indexes = self.indexes.lock().unwrap();
        let mut items = Vec::with_capacity(operations.len());

        for op in operations {
            if self.reject_ids.contains(&op.id) {
                items.push(ItemResponse::failed(
                    &op.id,
                    400,
                    "mapper_parsing_exception",
                    "failed to parse",
                ));
                continue;
            }

            let index = indexes.entry(op.destination.clone()).or_default();
            match op.kind {
                WriteKind::Upsert => {
                    let status = if index.insert(op.id.clone(), op.document.clone()).is_some() {
                        200
                    } else {
                        201
                    };
                    items.push(ItemResponse::ok(&op.id, status));
                }
                WriteKind::Delete => {
                    let status = if index.remove(&op.id).is_some() { 200 } else { 404 };
                    items.push(ItemResponse::ok(&op.id, status));
                }
            }
        }

        Ok(BulkResponse { items })
    }
}

pub fn string_key_record(operation: OperationType, id: &str) -> ChangeRecord {
    ChangeRecord::new(operation, ORDERS_ARN).with_key("id", AttributeValue::string(id))
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("ddb_to_es=debug")
        .with_test_writer()
        .try_init()
        .ok();
}
