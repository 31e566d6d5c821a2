// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Wire-format documents and change events.
//!
//! These are the shapes delivered by the change feed. A notification is a
//! JSON object carrying the document snapshot after the change (`value`)
//! and/or before it (`oldValue`):
//!
//! ```json
//! {
//!   "value": {
//!     "name": "proj/x/regions/us/documents/orders/42",
//!     "fields": {
//!       "total":  { "integerValue": 1200 },
//!       "status": { "stringValue": "paid" }
//!     },
//!     "updateTime": { "seconds": 1718000000, "nanos": 0 }
//!   }
//! }
//! ```
//!
//! Each field value is a one-of object, exactly one key set. An object with
//! no recognised key decodes to [`Value::Unset`], the feed's "field not set"
//! sentinel.

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Field name → value mapping of a document.
pub type Fields = BTreeMap<String, Value>;

/// A point in time with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn new(seconds: i64, nanos: i32) -> Self {
        Self { seconds, nanos }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from(chrono::Utc::now())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos() as i32,
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// Latitude/longitude pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// A field value as carried by the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawValue", into = "RawValue")]
pub enum Value {
    Null,
    Boolean(bool),
    Bytes(Vec<u8>),
    Double(f64),
    Integer(i64),
    String(String),
    Timestamp(Timestamp),
    GeoPoint(GeoPoint),
    Array(Vec<Value>),
    Map(Fields),
    /// Fully-qualified resource id of another document.
    Reference(String),
    /// No value type set.
    Unset,
}

impl Value {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<Timestamp> {
        match self {
            Value::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum NullValue {
    #[serde(rename = "NULL_VALUE")]
    NullValue,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArrayValue {
    #[serde(default)]
    values: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapValue {
    #[serde(default)]
    fields: Fields,
}

/// One-of object as it appears on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    null_value: Option<NullValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    boolean_value: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes_value: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    double_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    integer_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    string_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp_value: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    geo_point_value: Option<GeoPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_value: Option<ArrayValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    map_value: Option<MapValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_value: Option<String>,
}

impl From<RawValue> for Value {
    fn from(raw: RawValue) -> Self {
        if raw.null_value.is_some() {
            Value::Null
        } else if let Some(b) = raw.boolean_value {
            Value::Boolean(b)
        } else if let Some(bytes) = raw.bytes_value {
            Value::Bytes(bytes)
        } else if let Some(d) = raw.double_value {
            Value::Double(d)
        } else if let Some(i) = raw.integer_value {
            Value::Integer(i)
        } else if let Some(s) = raw.string_value {
            Value::String(s)
        } else if let Some(ts) = raw.timestamp_value {
            Value::Timestamp(ts)
        } else if let Some(geo) = raw.geo_point_value {
            Value::GeoPoint(geo)
        } else if let Some(array) = raw.array_value {
            Value::Array(array.values)
        } else if let Some(map) = raw.map_value {
            Value::Map(map.fields)
        } else if let Some(reference) = raw.reference_value {
            Value::Reference(reference)
        } else {
            Value::Unset
        }
    }
}

impl From<Value> for RawValue {
    fn from(value: Value) -> Self {
        let mut raw = RawValue::default();
        match value {
            Value::Null => raw.null_value = Some(NullValue::NullValue),
            Value::Boolean(b) => raw.boolean_value = Some(b),
            Value::Bytes(bytes) => raw.bytes_value = Some(bytes),
            Value::Double(d) => raw.double_value = Some(d),
            Value::Integer(i) => raw.integer_value = Some(i),
            Value::String(s) => raw.string_value = Some(s),
            Value::Timestamp(ts) => raw.timestamp_value = Some(ts),
            Value::GeoPoint(geo) => raw.geo_point_value = Some(geo),
            Value::Array(values) => raw.array_value = Some(ArrayValue { values }),
            Value::Map(fields) => raw.map_value = Some(MapValue { fields }),
            Value::Reference(reference) => raw.reference_value = Some(reference),
            Value::Unset => {}
        }
        raw
    }
}

/// A document snapshot from the change feed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Fully-qualified resource id.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<Timestamp>,
    /// Store-assigned modification time of this snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<Timestamp>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Builder-style field setter.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn with_update_time(mut self, update_time: Timestamp) -> Self {
        self.update_time = Some(update_time);
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }
}

/// The kind of mutation a [`ChangeEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "insert",
            ChangeKind::Update => "update",
            ChangeKind::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document mutation as delivered by the change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert { after: Document },
    Update { before: Document, after: Document },
    Delete { before: Document },
}

/// The JSON envelope of a change-feed notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentEventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_value: Option<Document>,
}

impl ChangeEvent {
    /// Decode a raw change-feed notification.
    pub fn from_notification(bytes: &[u8]) -> Result<Self> {
        let data: DocumentEventData = serde_json::from_slice(bytes)
            .map_err(|e| ReplicationError::MalformedInput(format!("notification: {}", e)))?;

        let event = match (data.old_value, data.value) {
            (None, Some(after)) => ChangeEvent::Insert { after },
            (Some(before), Some(after)) => ChangeEvent::Update { before, after },
            (Some(before), None) => ChangeEvent::Delete { before },
            (None, None) => {
                return Err(ReplicationError::MalformedInput(
                    "notification carries neither value nor oldValue".to_string(),
                ))
            }
        };

        if event.resource_id().is_empty() {
            return Err(ReplicationError::MalformedInput(
                "notification document has no resource name".to_string(),
            ));
        }

        Ok(event)
    }

    /// Encode back into the change-feed notification format.
    pub fn to_notification(&self) -> Vec<u8> {
        let data = match self {
            ChangeEvent::Insert { after } => DocumentEventData {
                value: Some(after.clone()),
                old_value: None,
            },
            ChangeEvent::Update { before, after } => DocumentEventData {
                value: Some(after.clone()),
                old_value: Some(before.clone()),
            },
            ChangeEvent::Delete { before } => DocumentEventData {
                value: None,
                old_value: Some(before.clone()),
            },
        };
        // Only maps with string keys and finite-or-null numbers; cannot fail.
        serde_json::to_vec(&data).unwrap_or_default()
    }

    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert { .. } => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    /// Resource id of the affected document (current snapshot first).
    pub fn resource_id(&self) -> &str {
        match self {
            ChangeEvent::Insert { after } | ChangeEvent::Update { after, .. } => &after.name,
            ChangeEvent::Delete { before } => &before.name,
        }
    }

    /// The snapshot after the change, if any.
    pub fn after(&self) -> Option<&Document> {
        match self {
            ChangeEvent::Insert { after } | ChangeEvent::Update { after, .. } => Some(after),
            ChangeEvent::Delete { .. } => None,
        }
    }

    /// The snapshot before the change, if any.
    pub fn before(&self) -> Option<&Document> {
        match self {
            ChangeEvent::Update { before, .. } | ChangeEvent::Delete { before } => Some(before),
            ChangeEvent::Insert { .. } => None,
        }
    }
}
