//! Change-feed notification builders.
//!
//! Documents are named `<PREFIX>/regions/<region>/documents/<path>`, the way
//! each region's change feed reports them.

use region_sync::document::{ChangeEvent, Document, Timestamp, Value};
use region_sync::provenance::{DELETE_MARKER_FIELD, SOURCE_REGION_FIELD, TIMESTAMP_FIELD};

pub const PREFIX: &str = "projects/test";

/// Resource id of `path` in `region`.
pub fn resource_id(region: &str, path: &str) -> String {
    format!("{}/regions/{}/documents/{}", PREFIX, region, path)
}

/// A user-written document (no provenance fields).
pub fn user_doc(region: &str, path: &str, fields: &[(&str, Value)], update_secs: i64) -> Document {
    let mut doc = Document::new(resource_id(region, path))
        .with_update_time(Timestamp::new(update_secs, 0));
    for (name, value) in fields {
        doc = doc.with_field(*name, value.clone());
    }
    doc
}

/// A document written by replication from `source`.
pub fn replicated_doc(region: &str, path: &str, source: &str, stamp_secs: i64) -> Document {
    Document::new(resource_id(region, path))
        .with_field(TIMESTAMP_FIELD, Value::Timestamp(Timestamp::new(stamp_secs, 0)))
        .with_field(SOURCE_REGION_FIELD, Value::String(source.to_string()))
        .with_update_time(Timestamp::new(stamp_secs, 0))
}

/// `doc` with the soft-delete flag set.
pub fn delete_marked(doc: Document) -> Document {
    doc.with_field(DELETE_MARKER_FIELD, Value::Boolean(true))
}

pub fn insert(after: Document) -> Vec<u8> {
    ChangeEvent::Insert { after }.to_notification()
}

pub fn update(before: Document, after: Document) -> Vec<u8> {
    ChangeEvent::Update { before, after }.to_notification()
}

pub fn delete(before: Document) -> Vec<u8> {
    ChangeEvent::Delete { before }.to_notification()
}
