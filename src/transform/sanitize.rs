use std::borrow::Cow;

/// Field names Elasticsearch reserves for document metadata.
pub const RESERVED_FIELDS: &[&str] = &[
    "uid",
    "_id",
    "_type",
    "_source",
    "_all",
    "_parent",
    "_fieldnames",
    "_routing",
    "_index",
    "_size",
    "_timestamp",
    "_ttl",
];

/// Prefixes a reserved field name with a single underscore.
///
/// This is a single pass: `_index` becomes `__index`, and `__index` is left
/// alone because it is not itself reserved.
pub fn sanitize(name: &str) -> Cow<'_, str> {
    if is_reserved(name) {
        Cow::Owned(format!("_{}", name))
    } else {
        Cow::Borrowed(name)
    }
}

pub fn is_reserved(name: &str) -> bool {
    RESERVED_FIELDS.contains(&name)
}
