// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Reserved provenance fields.
//!
//! Documents touched by replication carry bookkeeping fields next to the
//! user's data. They exist only to break replication loops and to order
//! concurrent writes; nothing else should read or write them.

use crate::document::{Document, Timestamp, Value};

/// Store-assigned modification time of the replicated write.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Region that produced the replicated write.
pub const SOURCE_REGION_FIELD: &str = "source-region";

/// Set on a document that was soft-deleted by replication and awaits the
/// local hard delete.
pub const DELETE_MARKER_FIELD: &str = "delete-marker";

/// Provenance as read from a document snapshot.
#[derive(Debug, Clone, Copy)]
pub struct Provenance<'a> {
    pub doc: &'a Document,
}

impl<'a> Provenance<'a> {
    pub fn of(doc: &'a Document) -> Self {
        Self { doc }
    }

    /// The raw `timestamp` field, whatever its type.
    pub fn timestamp(&self) -> Option<&'a Value> {
        self.doc.field(TIMESTAMP_FIELD)
    }

    /// The raw `source-region` field, whatever its type.
    pub fn source_region(&self) -> Option<&'a Value> {
        self.doc.field(SOURCE_REGION_FIELD)
    }

    /// Both `source-region` and `timestamp` are present.
    pub fn is_replicated(&self) -> bool {
        self.timestamp().is_some() && self.source_region().is_some()
    }

    /// `source-region` is a string equal to `region`.
    pub fn is_from(&self, region: &str) -> bool {
        self.source_region().and_then(Value::as_str) == Some(region)
    }

    /// `delete-marker` is present and `true`.
    pub fn is_delete_marked(&self) -> bool {
        self.doc
            .field(DELETE_MARKER_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The `timestamp` field when it is typed as a timestamp.
    pub fn typed_timestamp(&self) -> Option<Timestamp> {
        self.timestamp().and_then(Value::as_timestamp)
    }
}
