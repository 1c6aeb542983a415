use regex::Regex;
use std::collections::HashMap;
use tracing::warn;

use crate::{Error, Result};

/// Recognizes the table name inside a DynamoDB stream ARN.
pub const DEFAULT_TABLE_PATTERN: &str = r"arn:aws:dynamodb:.*?:.*?:table/([0-9a-zA-Z_-]+)/.+";

pub const UNKNOWN_TABLE_SUFFIX: &str = "-unknown-table-name";

/// Maps a record's provenance to the index it is written to.
#[derive(Debug, Clone)]
pub struct Router {
    prefix: String,
    pattern: Regex,
}

impl Router {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            pattern: default_pattern(),
        }
    }

    /// Builds a router with a custom pattern. The first capture group names
    /// the collection.
    pub fn with_pattern(prefix: impl Into<String>, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::config(format!("invalid table pattern: {}", e)))?;
        if pattern.captures_len() < 2 {
            return Err(Error::config("table pattern needs a capture group for the table name"));
        }
        Ok(Self {
            prefix: prefix.into(),
            pattern,
        })
    }

    pub fn fallback(&self) -> String {
        format!("{}{}", self.prefix, UNKNOWN_TABLE_SUFFIX)
    }

    /// Extracts the table name, or `None` when the provenance is not a
    /// recognizable stream locator.
    pub fn table_name<'a>(&self, provenance: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(provenance)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }

    /// Never fails: unroutable records go to the fallback index.
    pub fn route(&self, provenance: &str) -> String {
        match self.table_name(provenance) {
            Some(table) => format!("{}{}", self.prefix, table),
            None => {
                warn!(record_event_source = %provenance, "table-name-not-found");
                self.fallback()
            }
        }
    }
}

fn default_pattern() -> Regex {
    Regex::new(DEFAULT_TABLE_PATTERN).expect("default table pattern compiles")
}

/// Caches routing decisions for the duration of one batch, so each
/// unroutable source is reported once.
#[derive(Debug)]
pub struct RouteCache<'r> {
    router: &'r Router,
    routes: HashMap<String, String>,
}

impl<'r> RouteCache<'r> {
    pub fn new(router: &'r Router) -> Self {
        Self {
            router,
            routes: HashMap::new(),
        }
    }

    pub fn route(&mut self, provenance: &str) -> String {
        if let Some(destination) = self.routes.get(provenance) {
            return destination.clone();
        }
        let destination = self.router.route(provenance);
        self.routes
            .insert(provenance.to_string(), destination.clone());
        destination
    }
}
