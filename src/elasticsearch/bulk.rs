//! Encoding of bulk request bodies and decoding of bulk responses.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::writer::{BulkResponse, ItemResponse, WriteKind, WriteOperation};
use crate::{Error, Result};

const UNKNOWN_INDEX: &str = "unknown";

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum BulkAction<'a> {
    Index(ActionMeta<'a>),
    Delete(ActionMeta<'a>),
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Index names must be lowercase and non-empty.
pub fn index_name(destination: &str) -> String {
    if destination.is_empty() {
        UNKNOWN_INDEX.to_string()
    } else {
        destination.to_lowercase()
    }
}

/// Builds the NDJSON body of a `_bulk` request: an action line per
/// operation, followed by the document source for upserts.
pub fn encode_bulk_body(operations: &[WriteOperation]) -> Result<Bytes> {
    let mut body = BytesMut::with_capacity(operations.len() * 256);

    for op in operations {
        let index = index_name(&op.destination);
        let meta = ActionMeta {
            index: &index,
            id: &op.id,
        };

        match op.kind {
            WriteKind::Upsert => {
                serde_json::to_writer((&mut body).writer(), &BulkAction::Index(meta))?;
                body.put_u8(b'\n');
                serde_json::to_writer((&mut body).writer(), &op.document)?;
                body.put_u8(b'\n');
            }
            WriteKind::Delete => {
                serde_json::to_writer((&mut body).writer(), &BulkAction::Delete(meta))?;
                body.put_u8(b'\n');
            }
        }
    }

    Ok(body.freeze())
}

#[derive(Debug, Deserialize)]
struct RawBulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<HashMap<String, RawBulkItem>>,
}

#[derive(Debug, Deserialize)]
struct RawBulkItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    status: u16,
    #[serde(default)]
    error: Option<RawItemError>,
}

#[derive(Debug, Deserialize)]
struct RawItemError {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

/// Parses a `_bulk` response. Items are matched to operations by position,
/// which is the order Elasticsearch answers in.
pub fn decode_bulk_response(body: &[u8], operations: &[WriteOperation]) -> Result<BulkResponse> {
    let raw: RawBulkResponse = serde_json::from_slice(body)
        .map_err(|e| Error::Transport(format!("malformed bulk response: {}", e)))?;

    if raw.items.len() != operations.len() {
        return Err(Error::Transport(format!(
            "bulk response has {} items for {} operations",
            raw.items.len(),
            operations.len()
        )));
    }

    let mut items = Vec::with_capacity(raw.items.len());
    for (entry, op) in raw.items.into_iter().zip(operations) {
        let Some((_, item)) = entry.into_iter().next() else {
            return Err(Error::Transport("bulk response item without action".to_string()));
        };

        let (error_type, reason) = match item.error {
            Some(err) => (err.error_type, err.reason),
            None => (None, None),
        };
        items.push(ItemResponse {
            id: item.id.unwrap_or_else(|| op.id.clone()),
            status: item.status,
            error_type,
            reason,
        });
    }

    if !raw.errors && items.iter().any(|item| !item.is_success()) {
        tracing::debug!("Bulk response reports no errors but carries non-2xx items");
    }

    Ok(BulkResponse { items })
}
