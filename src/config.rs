use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::cutover::CutoverRule;
use crate::transform::{DEFAULT_EXCLUDED_PATH, DEFAULT_TABLE_PATTERN};

const ENV_PREFIX: &str = "DDB_TO_ES";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub elasticsearch: ElasticsearchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    /// Only set while two consumers share a stream during a migration.
    #[serde(default)]
    pub cutover: Option<CutoverRule>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ElasticsearchConfig {
    pub url: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IndexConfig {
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_excluded_paths")]
    pub excluded_paths: Vec<String>,
    #[serde(default = "default_table_pattern")]
    pub table_pattern: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            excluded_paths: default_excluded_paths(),
            table_pattern: default_table_pattern(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Return processing errors to the caller so the stream redelivers the
    /// batch. When false, errors are logged and the batch is acknowledged.
    #[serde(default)]
    pub fail_on_error: bool,
    #[serde(default = "default_max_logged_batch_bytes")]
    pub max_logged_batch_bytes: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            fail_on_error: false,
            max_logged_batch_bytes: default_max_logged_batch_bytes(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        Self::load(Some(path.as_ref()))
    }

    /// Loads the optional config file, then lets `DDB_TO_ES_*` environment
    /// variables override it (`DDB_TO_ES_INDEX__PREFIX=prod-`).
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("index.excluded_paths")
                    .source(env),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.elasticsearch.url.trim().is_empty() {
            return Err(config::ConfigError::Message(
                "elasticsearch.url must not be empty".to_string(),
            ));
        }
        if self.processing.concurrency == 0 {
            return Err(config::ConfigError::Message(
                "processing.concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_excluded_paths() -> Vec<String> {
    vec![DEFAULT_EXCLUDED_PATH.to_string()]
}

fn default_table_pattern() -> String {
    DEFAULT_TABLE_PATTERN.to_string()
}

fn default_concurrency() -> usize {
    1
}

fn default_max_logged_batch_bytes() -> usize {
    16_384
}
