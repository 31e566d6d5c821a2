// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document value codec.
//!
//! Converts wire documents into the store's native representation and back.
//! Both directions are exhaustive matches over closed enums, so a new value
//! type does not compile until every conversion handles it.
//!
//! # Reference Resolution
//!
//! A reference on the wire is a fully-qualified resource id that names the
//! *source* region. When written locally it must point at the local copy,
//! so only the document path is kept and the store builds its own handle.
//! References that do not parse are dropped with a warning, the same way
//! unset values are dropped.

use crate::document::{Fields, Value};
use crate::resource::extract_path;
use crate::store::{ReferenceFactory, StoreRecord, StoreValue};
use tracing::warn;

/// Convert wire fields into a store record.
pub fn to_store<R: ReferenceFactory + ?Sized>(fields: &Fields, refs: &R) -> StoreRecord {
    fields
        .iter()
        .filter_map(|(name, value)| value_to_store(value, refs).map(|v| (name.clone(), v)))
        .collect()
}

/// Convert a store record back into wire fields.
pub fn to_wire(record: &StoreRecord) -> Fields {
    record
        .iter()
        .map(|(name, value)| (name.clone(), value_to_wire(value)))
        .collect()
}

fn value_to_store<R: ReferenceFactory + ?Sized>(value: &Value, refs: &R) -> Option<StoreValue> {
    let converted = match value {
        Value::Null => StoreValue::Null,
        Value::Boolean(b) => StoreValue::Boolean(*b),
        Value::Bytes(bytes) => StoreValue::Bytes(bytes.clone()),
        Value::Double(d) => StoreValue::Double(*d),
        Value::Integer(i) => StoreValue::Integer(*i),
        Value::String(s) => StoreValue::String(s.clone()),
        Value::Timestamp(ts) => StoreValue::Timestamp(*ts),
        Value::GeoPoint(geo) => StoreValue::GeoPoint(*geo),
        Value::Array(values) => StoreValue::Array(
            values
                .iter()
                .filter_map(|v| value_to_store(v, refs))
                .collect(),
        ),
        Value::Map(fields) => StoreValue::Map(to_store(fields, refs)),
        Value::Reference(resource_id) => match extract_path(resource_id) {
            Ok(path) => StoreValue::Reference(refs.reference(path)),
            Err(e) => {
                warn!(reference = %resource_id, error = %e, "Dropping unresolvable reference");
                return None;
            }
        },
        Value::Unset => return None,
    };
    Some(converted)
}

fn value_to_wire(value: &StoreValue) -> Value {
    match value {
        StoreValue::Null => Value::Null,
        StoreValue::Boolean(b) => Value::Boolean(*b),
        StoreValue::Bytes(bytes) => Value::Bytes(bytes.clone()),
        StoreValue::Double(d) => Value::Double(*d),
        StoreValue::Integer(i) => Value::Integer(*i),
        StoreValue::String(s) => Value::String(s.clone()),
        StoreValue::Timestamp(ts) => Value::Timestamp(*ts),
        StoreValue::GeoPoint(geo) => Value::GeoPoint(*geo),
        StoreValue::Array(values) => Value::Array(values.iter().map(value_to_wire).collect()),
        StoreValue::Map(record) => Value::Map(to_wire(record)),
        StoreValue::Reference(handle) => Value::Reference(handle.resource_id().to_string()),
    }
}
