//! Error types and result handling for ddb-to-es.
//!
//! This module defines the main error type [`Error`] and a convenience
//! [`Result`] type alias used throughout the crate.
//!
//! # Example
//!
//! ```rust
//! use ddb_to_es::{Error, Result};
//!
//! fn process_nothing() -> Result<()> {
//!     Err(Error::EmptyBatch)
//! }
//!
//! match process_nothing() {
//!     Ok(()) => println!("Processed"),
//!     Err(Error::EmptyBatch) => eprintln!("Nothing to process"),
//!     Err(e) => eprintln!("Other error: {}", e),
//! }
//! ```

use crate::writer::ItemFailure;
use thiserror::Error;

/// The main error type for ddb-to-es operations.
///
/// Batch-level outcomes (`EmptyBatch`, `AllSkipped`, `PartialWrite`) are
/// errors too: the caller decides whether they fail the invocation.
#[derive(Error, Debug)]
pub enum Error {
    /// The stream event carried zero records.
    #[error("no records contained in event")]
    EmptyBatch,

    /// Every record was filtered out by the skip predicate.
    #[error("all records in event were skipped")]
    AllSkipped,

    /// A record carried an operation tag this connector does not handle.
    #[error("Unsupported eventName {operation}")]
    UnsupportedOperation {
        /// The raw operation tag
        operation: String,
    },

    /// Key attributes could not be serialized into an identifier.
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The destination rejected some items of a bulk submission.
    #[error("errors during write: {} of the submitted documents failed", failures.len())]
    PartialWrite {
        /// Every failed item, in submission order
        failures: Vec<ItemFailure>,
        /// JSON snapshot of the attempted batch, possibly truncated
        attempted: String,
    },

    /// The destination could not be reached or rejected the whole request.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error, from the config file or environment variables.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// The incoming stream event could not be decoded.
    #[error("Invalid event: {message}")]
    InvalidEvent {
        /// Description of what was invalid
        message: String,
    },

    /// I/O error, typically from reading the event file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record transformation worker panicked or was aborted.
    #[error("Worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// The invocation deadline passed or shutdown was requested
    /// while a submission was in flight.
    #[error("Submission cancelled")]
    Cancelled,
}

impl Error {
    /// Configuration error that did not come from the config loader itself.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(config::ConfigError::Message(message.into()))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

/// A convenient Result type alias for ddb-to-es operations.
///
/// This is equivalent to `std::result::Result<T, ddb_to_es::Error>`.
pub type Result<T> = std::result::Result<T, Error>;
