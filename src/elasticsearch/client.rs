use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::bulk::{decode_bulk_response, encode_bulk_body};
use crate::config::ElasticsearchConfig;
use crate::writer::{truncate_for_log, BulkResponse, Destination, WriteOperation};
use crate::{Error, Result};

const NDJSON: &str = "application/x-ndjson";
const MAX_ERROR_BODY_BYTES: usize = 1024;

/// Elasticsearch destination speaking the `_bulk` API over HTTP.
///
/// The inner `reqwest::Client` pools connections, so one instance should be
/// shared across invocations.
#[derive(Debug, Clone)]
pub struct ElasticsearchClient {
    http: reqwest::Client,
    base_url: String,
}

impl ElasticsearchClient {
    /// Builds the client and checks that the cluster answers.
    pub async fn connect(config: &ElasticsearchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let client = Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
        };

        client.ping().await.map_err(|e| {
            Error::Transport(format!("Could not connect to cluster at {}: {}", client.base_url, e))
        })?;
        info!(url = %client.base_url, "Connected to Elasticsearch");

        Ok(client)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn ping(&self) -> Result<()> {
        let response = self.http.get(&self.base_url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("cluster answered {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl Destination for ElasticsearchClient {
    #[instrument(skip_all, fields(operations = operations.len()))]
    async fn submit_batch(&self, operations: &[WriteOperation]) -> Result<BulkResponse> {
        let body = encode_bulk_body(operations)?;
        debug!(bytes = body.len(), "Sending bulk request");

        let response = self
            .http
            .post(format!("{}/_bulk", self.base_url))
            .header(CONTENT_TYPE, NDJSON)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let payload = response.bytes().await?;

        if !status.is_success() {
            let text = String::from_utf8_lossy(&payload).into_owned();
            return Err(Error::Transport(format!(
                "bulk request rejected with {}: {}",
                status,
                truncate_for_log(text, MAX_ERROR_BODY_BYTES)
            )));
        }

        decode_bulk_response(&payload, operations)
    }
}
