// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process document store.
//!
//! Backs tests and single-process deployments. With
//! [`InMemoryStore::with_change_log`], every successful mutation is also
//! recorded as a [`ChangeEvent`], so a test can feed a region's own writes
//! back into its publish path the way a real change feed would. The log is
//! unbounded until drained, so it is off by default.

use super::{
    BoxFuture, DocumentHandle, DocumentStore, ReferenceFactory, StoreRecord, WriteCondition,
};
use crate::codec::to_wire;
use crate::document::{ChangeEvent, Document, Timestamp};
use crate::resource::{database_root, document_resource_id};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredDocument {
    record: StoreRecord,
    create_time: Timestamp,
    update_time: Timestamp,
}

/// Document store kept in a `HashMap` behind a tokio `RwLock`.
#[derive(Clone)]
pub struct InMemoryStore {
    root: String,
    documents: Arc<RwLock<HashMap<String, StoredDocument>>>,
    changes: Option<Arc<Mutex<Vec<ChangeEvent>>>>,
    clock: Arc<Mutex<Option<Timestamp>>>,
}

impl InMemoryStore {
    /// Create an empty store for `region` under `resource_prefix`.
    pub fn new(resource_prefix: &str, region: &str) -> Self {
        Self {
            root: database_root(resource_prefix, region),
            documents: Arc::new(RwLock::new(HashMap::new())),
            changes: None,
            clock: Arc::new(Mutex::new(None)),
        }
    }

    /// Record every mutation for [`drain_changes`](Self::drain_changes).
    ///
    /// Call before cloning; clones share the log.
    pub fn with_change_log(mut self) -> Self {
        self.changes = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    /// Pin the store clock. `now()` returns this value until changed.
    pub fn with_clock(self, now: Timestamp) -> Self {
        self.set_clock(now);
        self
    }

    pub fn set_clock(&self, now: Timestamp) {
        if let Ok(mut clock) = self.clock.lock() {
            *clock = Some(now);
        }
    }

    /// Database root, e.g. `proj/x/regions/us`.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Seed a record without going through a write condition.
    ///
    /// Recorded as a change like any other write.
    pub async fn put(&self, path: &str, record: StoreRecord) {
        let now = self.now();
        let mut documents = self.documents.write().await;
        let before = documents.get(path).cloned();
        let stored = StoredDocument {
            record,
            create_time: before.as_ref().map(|d| d.create_time).unwrap_or(now),
            update_time: now,
        };
        documents.insert(path.to_string(), stored.clone());
        self.record_change(path, before, Some(stored));
    }

    /// Number of stored documents.
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }

    /// Take every change recorded since the last call, oldest first.
    ///
    /// Always empty unless the store was built [`with_change_log`](Self::with_change_log).
    pub async fn drain_changes(&self) -> Vec<ChangeEvent> {
        match &self.changes {
            Some(changes) => changes
                .lock()
                .map(|mut log| std::mem::take(&mut *log))
                .unwrap_or_default(),
            None => Vec::new(),
        }
    }

    fn snapshot(&self, path: &str, stored: &StoredDocument) -> Document {
        Document {
            name: document_resource_id(&self.root, path),
            fields: to_wire(&stored.record),
            create_time: Some(stored.create_time),
            update_time: Some(stored.update_time),
        }
    }

    /// Must be called while the documents lock is held, so the log order
    /// matches the write order.
    fn record_change(
        &self,
        path: &str,
        before: Option<StoredDocument>,
        after: Option<StoredDocument>,
    ) {
        let Some(changes) = &self.changes else {
            return;
        };
        let before = before.map(|d| self.snapshot(path, &d));
        let after = after.map(|d| self.snapshot(path, &d));
        let event = match (before, after) {
            (None, Some(after)) => ChangeEvent::Insert { after },
            (Some(before), Some(after)) => ChangeEvent::Update { before, after },
            (Some(before), None) => ChangeEvent::Delete { before },
            (None, None) => return,
        };
        if let Ok(mut log) = changes.lock() {
            log.push(event);
        }
    }
}

impl ReferenceFactory for InMemoryStore {
    fn reference(&self, path: &str) -> DocumentHandle {
        DocumentHandle::new(path, document_resource_id(&self.root, path))
    }
}

impl DocumentStore for InMemoryStore {
    fn get(&self, path: &str) -> BoxFuture<'_, Option<StoreRecord>> {
        let path = path.to_string();
        Box::pin(async move {
            Ok(self
                .documents
                .read()
                .await
                .get(&path)
                .map(|d| d.record.clone()))
        })
    }

    fn conditional_write(
        &self,
        path: &str,
        record: StoreRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            let now = self.now();
            let mut documents = self.documents.write().await;
            let before = documents.get(&path).cloned();
            if !condition.holds(before.as_ref().map(|d| &d.record)) {
                return Ok(false);
            }

            let stored = StoredDocument {
                record,
                create_time: before.as_ref().map(|d| d.create_time).unwrap_or(now),
                update_time: now,
            };
            documents.insert(path.clone(), stored.clone());
            self.record_change(&path, before, Some(stored));
            Ok(true)
        })
    }

    fn conditional_flag_update(
        &self,
        path: &str,
        fields: StoreRecord,
        condition: WriteCondition,
    ) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            let now = self.now();
            let mut documents = self.documents.write().await;
            let Some(current) = documents.get_mut(&path) else {
                return Ok(false);
            };
            if !condition.holds(Some(&current.record)) {
                return Ok(false);
            }

            let before = current.clone();
            current.record.extend(fields);
            current.update_time = now;
            let after = current.clone();
            self.record_change(&path, Some(before), Some(after));
            Ok(true)
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            let mut documents = self.documents.write().await;
            let removed = documents.remove(&path);
            let existed = removed.is_some();
            self.record_change(&path, removed, None);
            Ok(existed)
        })
    }

    fn now(&self) -> Timestamp {
        self.clock
            .lock()
            .ok()
            .and_then(|clock| *clock)
            .unwrap_or_else(Timestamp::now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChangeKind;
    use crate::provenance::{DELETE_MARKER_FIELD, TIMESTAMP_FIELD};
    use crate::store::StoreValue;

    fn store() -> InMemoryStore {
        InMemoryStore::new("proj/x", "us").with_clock(Timestamp::new(100, 0))
    }

    fn record(total: i64) -> StoreRecord {
        let mut record = StoreRecord::new();
        record.insert("total".to_string(), StoreValue::Integer(total));
        record
    }

    fn stamped(total: i64, seconds: i64) -> StoreRecord {
        let mut record = record(total);
        record.insert(
            TIMESTAMP_FIELD.to_string(),
            StoreValue::Timestamp(Timestamp::new(seconds, 0)),
        );
        record
    }

    #[tokio::test]
    async fn test_write_and_get() {
        let store = store();
        assert!(store.get("orders/1").await.unwrap().is_none());

        let written = store
            .conditional_write("orders/1", record(5), WriteCondition::Always)
            .await
            .unwrap();
        assert!(written);
        assert_eq!(store.get("orders/1").await.unwrap(), Some(record(5)));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_older_than_rejects_newer_existing() {
        let store = store();
        store.put("orders/1", stamped(1, 10)).await;

        let written = store
            .conditional_write(
                "orders/1",
                stamped(2, 9),
                WriteCondition::OlderThan(Timestamp::new(9, 0)),
            )
            .await
            .unwrap();
        assert!(!written);
        assert_eq!(store.get("orders/1").await.unwrap(), Some(stamped(1, 10)));

        let written = store
            .conditional_write(
                "orders/1",
                stamped(3, 11),
                WriteCondition::OlderThan(Timestamp::new(11, 0)),
            )
            .await
            .unwrap();
        assert!(written);
    }

    #[tokio::test]
    async fn test_flag_update_merges_and_never_creates() {
        let store = store();
        let mut flags = StoreRecord::new();
        flags.insert(DELETE_MARKER_FIELD.to_string(), StoreValue::Boolean(true));

        let updated = store
            .conditional_flag_update("orders/1", flags.clone(), WriteCondition::Exists)
            .await
            .unwrap();
        assert!(!updated);
        assert!(store.is_empty().await);

        store.put("orders/1", record(5)).await;
        let updated = store
            .conditional_flag_update("orders/1", flags, WriteCondition::Exists)
            .await
            .unwrap();
        assert!(updated);

        let stored = store.get("orders/1").await.unwrap().unwrap();
        assert_eq!(stored.get("total"), Some(&StoreValue::Integer(5)));
        assert_eq!(stored.get(DELETE_MARKER_FIELD), Some(&StoreValue::Boolean(true)));
    }

    #[tokio::test]
    async fn test_delete_reports_existence() {
        let store = store();
        assert!(!store.delete("orders/1").await.unwrap());
        store.put("orders/1", record(1)).await;
        assert!(store.delete("orders/1").await.unwrap());
        assert!(store.get("orders/1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_changes_mirror_mutations() {
        let store = store().with_change_log();
        store.put("orders/1", record(1)).await;
        store
            .conditional_write("orders/1", record(2), WriteCondition::Always)
            .await
            .unwrap();
        store.delete("orders/1").await.unwrap();
        store.delete("orders/1").await.unwrap();

        let kinds: Vec<ChangeKind> = store
            .drain_changes()
            .await
            .iter()
            .map(ChangeEvent::kind)
            .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        );
        assert!(store.drain_changes().await.is_empty());
    }

    #[tokio::test]
    async fn test_change_snapshot_carries_resource_id_and_times() {
        let store = store().with_change_log();
        store.put("orders/1", record(1)).await;
        store.set_clock(Timestamp::new(200, 0));
        store.put("orders/1", record(2)).await;

        let changes = store.drain_changes().await;
        let after = changes[1].after().unwrap();
        assert_eq!(after.name, "proj/x/regions/us/documents/orders/1");
        assert_eq!(after.create_time, Some(Timestamp::new(100, 0)));
        assert_eq!(after.update_time, Some(Timestamp::new(200, 0)));
    }

    #[tokio::test]
    async fn test_changes_not_retained_by_default() {
        let store = store();
        for total in 0..100 {
            store
                .conditional_write("orders/1", record(total), WriteCondition::Always)
                .await
                .unwrap();
        }
        assert_eq!(store.len().await, 1);
        assert!(store.drain_changes().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writes_converge_on_newest() {
        let store = store().with_change_log();
        let handles: Vec<_> = (1..=64)
            .map(|seconds| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .conditional_write(
                            "orders/1",
                            stamped(seconds, seconds),
                            WriteCondition::OlderThan(Timestamp::new(seconds, 0)),
                        )
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.get("orders/1").await.unwrap(), Some(stamped(64, 64)));

        // The log replays in write order: every recorded write is newer than the last.
        let totals: Vec<i64> = store
            .drain_changes()
            .await
            .iter()
            .filter_map(|event| match event.after()?.fields.get("total") {
                Some(crate::document::Value::Integer(total)) => Some(*total),
                _ => None,
            })
            .collect();
        assert_eq!(totals.last(), Some(&64));
        assert!(totals.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_pinned_clock() {
        let store = store();
        assert_eq!(store.now(), Timestamp::new(100, 0));
        store.set_clock(Timestamp::new(101, 5));
        assert_eq!(store.now(), Timestamp::new(101, 5));
    }

    #[test]
    fn test_reference_uses_local_region() {
        let store = InMemoryStore::new("proj/x", "eu");
        let handle = store.reference("customers/9");
        assert_eq!(handle.resource_id(), "proj/x/regions/eu/documents/customers/9");
    }
}
