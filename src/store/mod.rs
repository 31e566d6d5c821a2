// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Document store capability traits.
//!
//! The replication core never talks to a concrete database. It needs a narrow
//! set of capabilities, injected at construction:
//!
//! 1. Build a store-local handle for a document path ([`ReferenceFactory`])
//! 2. Read a record (`get`)
//! 3. Write a record only if a predicate over the current record holds,
//!    atomically (`conditional_write`, `conditional_flag_update`)
//! 4. Hard-delete (`delete`) and read the store clock (`now`)
//! 5. Release resources on shutdown (`close`, a no-op by default)
//!
//! Two backends ship with the crate: [`memory::InMemoryStore`] and
//! [`sqlite::SqliteStore`].
//!
//! # Example
//!
//! ```rust,no_run
//! use region_sync::store::{
//!     BoxFuture, DocumentHandle, DocumentStore, ReferenceFactory, StoreRecord, WriteCondition,
//! };
//! use region_sync::document::Timestamp;
//!
//! struct MyStore;
//!
//! impl ReferenceFactory for MyStore {
//!     fn reference(&self, path: &str) -> DocumentHandle {
//!         DocumentHandle::new(path, format!("proj/regions/us/documents/{}", path))
//!     }
//! }
//!
//! impl DocumentStore for MyStore {
//!     fn get(&self, _path: &str) -> BoxFuture<'_, Option<StoreRecord>> {
//!         Box::pin(async { Ok(None) })
//!     }
//!
//!     fn conditional_write(
//!         &self,
//!         _path: &str,
//!         _record: StoreRecord,
//!         _condition: WriteCondition,
//!     ) -> BoxFuture<'_, bool> {
//!         Box::pin(async { Ok(true) })
//!     }
//!
//!     fn conditional_flag_update(
//!         &self,
//!         _path: &str,
//!         _fields: StoreRecord,
//!         _condition: WriteCondition,
//!     ) -> BoxFuture<'_, bool> {
//!         Box::pin(async { Ok(false) })
//!     }
//!
//!     fn delete(&self, _path: &str) -> BoxFuture<'_, bool> {
//!         Box::pin(async { Ok(true) })
//!     }
//!
//!     fn now(&self) -> Timestamp {
//!         Timestamp::now()
//!     }
//! }
//! ```

pub mod memory;
pub mod sqlite;

use crate::document::{GeoPoint, Timestamp};
use crate::provenance::TIMESTAMP_FIELD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (keeps the trait object-safe).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Simplified error for store operations.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// A store-local reference to a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentHandle {
    path: String,
    resource_id: String,
}

impl DocumentHandle {
    pub fn new(path: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resource_id: resource_id.into(),
        }
    }

    /// Document path relative to the database root.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Fully-qualified resource id in the store's own region.
    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

/// A field value in the store's native representation.
///
/// Mirrors [`crate::document::Value`] except that references are resolved
/// handles and there is no "unset" state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreValue {
    Null,
    Boolean(bool),
    Bytes(Vec<u8>),
    Double(f64),
    Integer(i64),
    String(String),
    Timestamp(Timestamp),
    GeoPoint(GeoPoint),
    Array(Vec<StoreValue>),
    Map(StoreRecord),
    Reference(DocumentHandle),
}

/// A document body as the store keeps it.
pub type StoreRecord = BTreeMap<String, StoreValue>;

/// The `timestamp` provenance field of a stored record, if typed as a timestamp.
pub fn record_timestamp(record: &StoreRecord) -> Option<Timestamp> {
    match record.get(TIMESTAMP_FIELD) {
        Some(StoreValue::Timestamp(ts)) => Some(*ts),
        _ => None,
    }
}

/// Predicate over the existing record, evaluated by the store inside the
/// same transaction as the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// Always write.
    Always,
    /// Write if the record is absent, has no `timestamp`, or its `timestamp`
    /// is strictly older than the given one.
    OlderThan(Timestamp),
    /// Write only if the record exists.
    Exists,
}

impl WriteCondition {
    /// Evaluate against the record currently stored (if any).
    pub fn holds(&self, existing: Option<&StoreRecord>) -> bool {
        match self {
            WriteCondition::Always => true,
            WriteCondition::Exists => existing.is_some(),
            WriteCondition::OlderThan(incoming) => match existing {
                None => true,
                Some(record) => match record_timestamp(record) {
                    None => true,
                    Some(current) => current < *incoming,
                },
            },
        }
    }
}

/// Builds store-local document handles for reference fields.
pub trait ReferenceFactory {
    fn reference(&self, path: &str) -> DocumentHandle;
}

/// What the replication core needs from a document store.
///
/// Conditional operations must evaluate the [`WriteCondition`] and perform
/// the write atomically with respect to other writers of the same path.
pub trait DocumentStore: ReferenceFactory + Send + Sync + 'static {
    /// Read the record at `path`.
    fn get(&self, path: &str) -> BoxFuture<'_, Option<StoreRecord>>;

    /// Replace the record at `path` with `record` if `condition` holds.
    ///
    /// Returns `true` if the write happened.
    fn conditional_write(
        &self,
        path: &str,
        record: StoreRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, bool>;

    /// Merge `fields` into the record at `path` if `condition` holds.
    ///
    /// Returns `true` if the update happened. Never creates a record.
    fn conditional_flag_update(
        &self,
        path: &str,
        fields: StoreRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, bool>;

    /// Hard-delete the record at `path`. Returns `true` if it existed.
    fn delete(&self, path: &str) -> BoxFuture<'_, bool>;

    /// The store's current time.
    fn now(&self) -> Timestamp;

    /// Release the store's resources. Called once by service shutdown.
    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
