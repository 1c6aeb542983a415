//! DynamoDB Streams to Elasticsearch change-data-capture connector.
//!
//! A batch of stream records goes through the [`RecordProcessor`], which
//! derives a deterministic document id per record, converts the new image
//! into a JSON document and picks the destination index. The resulting
//! operations are submitted in one bulk request by the [`BatchWriter`]
//! through any [`Destination`], usually an
//! [`ElasticsearchClient`](elasticsearch::ElasticsearchClient).

pub mod config;
pub mod connector;
pub mod cutover;
pub mod error;
pub mod processor;
pub mod writer;

pub mod dynamodb;
pub mod elasticsearch;
pub mod transform;

pub use config::Config;
pub use connector::Connector;
pub use error::{Error, Result};
pub use processor::RecordProcessor;
pub use writer::{BatchResult, BatchWriter, Destination, WriteKind, WriteOperation};
