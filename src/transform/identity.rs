use std::collections::HashMap;
use tracing::trace;

use super::mapper::Mapper;
use crate::dynamodb::AttributeValue;
use crate::Result;

const SEGMENT_SEPARATOR: &str = "|";

/// Derives the document id from a record's key attributes.
///
/// Key names are visited in sorted order so the id does not depend on map
/// iteration order; redelivered records therefore overwrite their earlier
/// copy instead of duplicating it.
///
/// Number-typed keys contribute nothing to the id. Existing indexes were
/// built with this rule, so changing it would re-key every document.
pub fn derive_id(keys: &HashMap<String, AttributeValue>, mapper: &Mapper) -> Result<String> {
    let mut names: Vec<&String> = keys.keys().collect();
    names.sort();

    let mut segments = Vec::with_capacity(names.len());

    for name in names {
        let value = &keys[name];
        if let Some(segment) = id_segment(value, mapper)? {
            segments.push(segment);
        } else {
            trace!(key = %name, kind = value.type_tag(), "Key attribute not part of id");
        }
    }

    Ok(segments.join(SEGMENT_SEPARATOR))
}

fn id_segment(value: &AttributeValue, mapper: &Mapper) -> Result<Option<String>> {
    if value.is_collection() {
        return match mapper.convert(value, "") {
            Some(converted) => Ok(Some(serde_json::to_string(&converted)?)),
            None => Ok(None),
        };
    }

    Ok(match value {
        AttributeValue::String(s) => Some(s.clone()),
        AttributeValue::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}
