pub mod bulk;
pub mod client;

pub use bulk::{decode_bulk_response, encode_bulk_body, index_name};
pub use client::ElasticsearchClient;
