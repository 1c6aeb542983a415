//! Conversion of DynamoDB attribute values into JSON document trees.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

use super::sanitize::sanitize;
use crate::dynamodb::AttributeValue;

/// Path of the step-function state machine nested in workflow records. Its
/// keys are user-defined state names, which blows up the index mapping.
pub const DEFAULT_EXCLUDED_PATH: &str = "Workflow.workflowDefinition.stateMachine";

/// Converts attribute values to JSON, dropping nulls and excluded paths.
#[derive(Debug, Clone)]
pub struct Mapper {
    excluded_paths: HashSet<String>,
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new([DEFAULT_EXCLUDED_PATH])
    }
}

impl Mapper {
    /// Builds a mapper dropping every map entry whose dotted path is listed.
    ///
    /// A leading `.` on a configured path is ignored, so `.a.b` and `a.b`
    /// name the same field.
    pub fn new<I, S>(excluded_paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded_paths: excluded_paths
                .into_iter()
                .map(|p| p.as_ref().trim_start_matches('.').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.excluded_paths.contains(path)
    }

    /// Converts one value found at `path`. Returns `None` for values that
    /// should not appear in the document at all.
    pub fn convert(&self, value: &AttributeValue, path: &str) -> Option<Value> {
        match value {
            AttributeValue::Null => None,
            AttributeValue::Bool(b) => Some(Value::Bool(*b)),
            AttributeValue::Number(n) => Some(Value::String(n.clone())),
            AttributeValue::String(s) => Some(Value::String(s.clone())),
            AttributeValue::Binary(b) => Some(Value::String(STANDARD.encode(b))),
            AttributeValue::NumberSet(set) | AttributeValue::StringSet(set) => Some(Value::Array(
                set.iter().cloned().map(Value::String).collect(),
            )),
            AttributeValue::BinarySet(set) => Some(Value::Array(
                set.iter()
                    .map(|b| Value::String(STANDARD.encode(b)))
                    .collect(),
            )),
            AttributeValue::List(items) => Some(Value::Array(
                items
                    .iter()
                    .filter_map(|item| self.convert(item, path))
                    .collect(),
            )),
            AttributeValue::Map(fields) => Some(Value::Object(self.convert_map(fields, path))),
        }
    }

    /// Converts a full record image, which is a map rooted at the empty path.
    pub fn convert_image(&self, image: &HashMap<String, AttributeValue>) -> Map<String, Value> {
        self.convert_map(image, "")
    }

    fn convert_map(
        &self,
        fields: &HashMap<String, AttributeValue>,
        path: &str,
    ) -> Map<String, Value> {
        let mut doc = Map::new();
        let mut names: Vec<&String> = fields.keys().collect();
        names.sort();

        for name in names {
            let value = &fields[name];
            let child_path = join_path(path, name);
            if self.is_excluded(&child_path) {
                continue;
            }
            if let Some(converted) = self.convert(value, &child_path) {
                doc.insert(sanitize(name).into_owned(), converted);
            }
        }

        doc
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}
