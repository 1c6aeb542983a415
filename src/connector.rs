use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::ProcessingConfig;
use crate::dynamodb::{ChangeRecord, StreamEvent};
use crate::processor::RecordProcessor;
use crate::writer::{snapshot, truncate_for_log, BatchWriter, Destination};
use crate::{Error, Result};

const MAX_ERROR_SUMMARY_BYTES: usize = 2048;

/// Handles one stream invocation end to end: records in, bulk write out.
pub struct Connector<D> {
    processor: RecordProcessor,
    writer: BatchWriter<D>,
    settings: ProcessingConfig,
}

impl<D: Destination> Connector<D> {
    pub fn new(processor: RecordProcessor, destination: D, settings: ProcessingConfig) -> Self {
        Self {
            processor,
            writer: BatchWriter::new(destination),
            settings,
        }
    }

    /// Entry point for a delivered event.
    ///
    /// With `fail_on_error` unset, processing errors are logged and the
    /// invocation reports success. Cancellation is always returned since the
    /// batch was not fully handled.
    pub async fn handle(&self, event: StreamEvent, cancel: &CancellationToken) -> Result<()> {
        match self.process_records(event.into_records(), cancel).await {
            Ok(()) => Ok(()),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) if self.settings.fail_on_error => Err(e),
            Err(e) => {
                error!(
                    message = %truncate_for_log(e.to_string(), MAX_ERROR_SUMMARY_BYTES),
                    "failed-process-records-but-continue"
                );
                Ok(())
            }
        }
    }

    /// Converts the records and writes them as one batch. Any failure after
    /// the batch was built logs the attempted operations first.
    pub async fn process_records(
        &self,
        records: Vec<ChangeRecord>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let operations = self.processor.process(records).await?;
        let max_bytes = self.settings.max_logged_batch_bytes;

        let outcome = self
            .writer
            .write(&operations, cancel)
            .await
            .and_then(|result| result.into_result(&operations, max_bytes));

        match outcome {
            Ok(()) => {
                info!(documents = operations.len(), "batch-written");
                Ok(())
            }
            Err(e) => {
                let attempted = match &e {
                    Error::PartialWrite { attempted, .. } => attempted.clone(),
                    _ => snapshot(&operations, max_bytes),
                };
                error!(%attempted, error = %e, "batch-write-failed");
                Err(e)
            }
        }
    }
}
