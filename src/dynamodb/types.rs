use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// A self-describing DynamoDB attribute value.
///
/// On the wire this is DynamoDB JSON (`{"S": "abc"}`, `{"N": "1.50"}`,
/// `{"M": {...}}`, ...). Exactly one type tag must be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireAttributeValue", into = "WireAttributeValue")]
pub enum AttributeValue {
    Null,
    Bool(bool),
    /// Numbers keep their string encoding so no precision is lost.
    Number(String),
    String(String),
    Binary(Vec<u8>),
    List(Vec<AttributeValue>),
    Map(HashMap<String, AttributeValue>),
    NumberSet(Vec<String>),
    StringSet(Vec<String>),
    BinarySet(Vec<Vec<u8>>),
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        AttributeValue::String(value.into())
    }

    pub fn number(value: impl Into<String>) -> Self {
        AttributeValue::Number(value.into())
    }

    /// Collection-shaped values, including raw binary, serialize to JSON
    /// when they take part in a document identifier.
    pub fn is_collection(&self) -> bool {
        matches!(
            self,
            AttributeValue::Binary(_)
                | AttributeValue::List(_)
                | AttributeValue::Map(_)
                | AttributeValue::NumberSet(_)
                | AttributeValue::StringSet(_)
                | AttributeValue::BinarySet(_)
        )
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            AttributeValue::Null => "NULL",
            AttributeValue::Bool(_) => "BOOL",
            AttributeValue::Number(_) => "N",
            AttributeValue::String(_) => "S",
            AttributeValue::Binary(_) => "B",
            AttributeValue::List(_) => "L",
            AttributeValue::Map(_) => "M",
            AttributeValue::NumberSet(_) => "NS",
            AttributeValue::StringSet(_) => "SS",
            AttributeValue::BinarySet(_) => "BS",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireAttributeValue {
    #[serde(rename = "NULL", skip_serializing_if = "Option::is_none")]
    null: Option<bool>,
    #[serde(rename = "BOOL", skip_serializing_if = "Option::is_none")]
    bool: Option<bool>,
    #[serde(rename = "N", skip_serializing_if = "Option::is_none")]
    n: Option<String>,
    #[serde(rename = "S", skip_serializing_if = "Option::is_none")]
    s: Option<String>,
    #[serde(rename = "B", skip_serializing_if = "Option::is_none")]
    b: Option<String>,
    #[serde(rename = "L", skip_serializing_if = "Option::is_none")]
    l: Option<Vec<AttributeValue>>,
    #[serde(rename = "M", skip_serializing_if = "Option::is_none")]
    m: Option<HashMap<String, AttributeValue>>,
    #[serde(rename = "NS", skip_serializing_if = "Option::is_none")]
    ns: Option<Vec<String>>,
    #[serde(rename = "SS", skip_serializing_if = "Option::is_none")]
    ss: Option<Vec<String>>,
    #[serde(rename = "BS", skip_serializing_if = "Option::is_none")]
    bs: Option<Vec<String>>,
}

impl TryFrom<WireAttributeValue> for AttributeValue {
    type Error = String;

    fn try_from(wire: WireAttributeValue) -> Result<Self, Self::Error> {
        let mut found = Vec::with_capacity(1);

        if wire.null.is_some() {
            found.push(AttributeValue::Null);
        }
        if let Some(b) = wire.bool {
            found.push(AttributeValue::Bool(b));
        }
        if let Some(n) = wire.n {
            found.push(AttributeValue::Number(n));
        }
        if let Some(s) = wire.s {
            found.push(AttributeValue::String(s));
        }
        if let Some(b) = wire.b {
            found.push(AttributeValue::Binary(decode_binary(&b)?));
        }
        if let Some(l) = wire.l {
            found.push(AttributeValue::List(l));
        }
        if let Some(m) = wire.m {
            found.push(AttributeValue::Map(m));
        }
        if let Some(ns) = wire.ns {
            found.push(AttributeValue::NumberSet(ns));
        }
        if let Some(ss) = wire.ss {
            found.push(AttributeValue::StringSet(ss));
        }
        if let Some(bs) = wire.bs {
            let decoded = bs
                .iter()
                .map(|b| decode_binary(b))
                .collect::<Result<Vec<_>, _>>()?;
            found.push(AttributeValue::BinarySet(decoded));
        }

        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err("attribute value carries no type tag".to_string()),
            n => Err(format!("attribute value carries {} type tags, expected one", n)),
        }
    }
}

impl From<AttributeValue> for WireAttributeValue {
    fn from(value: AttributeValue) -> Self {
        let mut wire = WireAttributeValue::default();
        match value {
            AttributeValue::Null => wire.null = Some(true),
            AttributeValue::Bool(b) => wire.bool = Some(b),
            AttributeValue::Number(n) => wire.n = Some(n),
            AttributeValue::String(s) => wire.s = Some(s),
            AttributeValue::Binary(b) => wire.b = Some(STANDARD.encode(b)),
            AttributeValue::List(l) => wire.l = Some(l),
            AttributeValue::Map(m) => wire.m = Some(m),
            AttributeValue::NumberSet(ns) => wire.ns = Some(ns),
            AttributeValue::StringSet(ss) => wire.ss = Some(ss),
            AttributeValue::BinarySet(bs) => {
                wire.bs = Some(bs.into_iter().map(|b| STANDARD.encode(b)).collect())
            }
        }
        wire
    }
}

fn decode_binary(encoded: &str) -> Result<Vec<u8>, String> {
    STANDARD
        .decode(encoded)
        .map_err(|e| format!("invalid base64 binary attribute: {}", e))
}

/// The kind of change a stream record describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum OperationType {
    Insert,
    Modify,
    Remove,
    /// Empty event name. Such records are skipped.
    #[default]
    Unknown,
    /// Any other event name, rejected by the processor.
    Other(String),
}

impl From<String> for OperationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "INSERT" => OperationType::Insert,
            "MODIFY" => OperationType::Modify,
            "REMOVE" => OperationType::Remove,
            "" => OperationType::Unknown,
            _ => OperationType::Other(value),
        }
    }
}

impl From<OperationType> for String {
    fn from(value: OperationType) -> Self {
        match value {
            OperationType::Insert => "INSERT".to_string(),
            OperationType::Modify => "MODIFY".to_string(),
            OperationType::Remove => "REMOVE".to_string(),
            OperationType::Unknown => String::new(),
            OperationType::Other(tag) => tag,
        }
    }
}

/// One change-stream entry, as consumed by the record processor.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    pub operation: OperationType,
    pub keys: HashMap<String, AttributeValue>,
    pub new_image: HashMap<String, AttributeValue>,
    /// Source locator, the stream ARN for DynamoDB.
    pub provenance: String,
    pub approximate_change_time: Option<DateTime<Utc>>,
    pub event_id: String,
    pub aws_region: String,
}

impl ChangeRecord {
    pub fn new(operation: OperationType, provenance: impl Into<String>) -> Self {
        Self {
            operation,
            keys: HashMap::new(),
            new_image: HashMap::new(),
            provenance: provenance.into(),
            approximate_change_time: None,
            event_id: String::new(),
            aws_region: String::new(),
        }
    }

    pub fn with_key(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.keys.insert(name.into(), value);
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.new_image.insert(name.into(), value);
        self
    }

    pub fn with_change_time(mut self, at: DateTime<Utc>) -> Self {
        self.approximate_change_time = Some(at);
        self
    }
}

/// A DynamoDB Streams event as delivered to a Lambda handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(rename = "Records", default)]
    pub records: Vec<StreamRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamRecord {
    #[serde(rename = "eventID", default)]
    pub event_id: String,
    #[serde(rename = "eventName", default)]
    pub event_name: OperationType,
    #[serde(rename = "eventSourceARN", default)]
    pub event_source_arn: String,
    #[serde(rename = "awsRegion", default)]
    pub aws_region: String,
    #[serde(default)]
    pub dynamodb: StreamChange,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamChange {
    #[serde(rename = "Keys", default)]
    pub keys: HashMap<String, AttributeValue>,
    #[serde(rename = "NewImage", default)]
    pub new_image: HashMap<String, AttributeValue>,
    #[serde(
        rename = "ApproximateCreationDateTime",
        default,
        deserialize_with = "deserialize_epoch_seconds"
    )]
    pub approximate_creation_date_time: Option<DateTime<Utc>>,
}

impl StreamEvent {
    pub fn from_slice(bytes: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| crate::Error::InvalidEvent {
            message: e.to_string(),
        })
    }

    pub fn into_records(self) -> Vec<ChangeRecord> {
        self.records.into_iter().map(ChangeRecord::from).collect()
    }
}

impl From<StreamRecord> for ChangeRecord {
    fn from(record: StreamRecord) -> Self {
        ChangeRecord {
            operation: record.event_name,
            keys: record.dynamodb.keys,
            new_image: record.dynamodb.new_image,
            provenance: record.event_source_arn,
            approximate_change_time: record.dynamodb.approximate_creation_date_time,
            event_id: record.event_id,
            aws_region: record.aws_region,
        }
    }
}

fn deserialize_epoch_seconds<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let secs: Option<f64> = Option::deserialize(deserializer)?;
    Ok(secs.and_then(|s| DateTime::from_timestamp_millis((s * 1000.0).round() as i64)))
}
