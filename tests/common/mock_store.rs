//! Failure-injecting wrappers around the in-memory backends.
//!
//! `FlakyStore` fails the next N store operations with a retryable error,
//! then delegates to an [`InMemoryStore`]. `FlakyBus` does the same for
//! publishes. Both count calls for assertions.

use region_sync::bus::memory::InMemoryBus;
use region_sync::bus::{BusEnvelope, BusFuture, BusMessage, MessageBus, MessageSource};
use region_sync::document::Timestamp;
use region_sync::error::ReplicationError;
use region_sync::store::memory::InMemoryStore;
use region_sync::store::{
    BoxFuture, DocumentHandle, DocumentStore, ReferenceFactory, StoreError, StoreRecord,
    WriteCondition,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Store that fails a configurable number of operations before recovering.
pub struct FlakyStore {
    inner: InMemoryStore,
    /// Operations left to fail
    failures_left: AtomicUsize,
    /// Total operations attempted
    calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` operations.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    fn check(&self, operation: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            Err(StoreError(format!("{}: injected failure", operation)))
        } else {
            Ok(())
        }
    }
}

impl ReferenceFactory for FlakyStore {
    fn reference(&self, path: &str) -> DocumentHandle {
        self.inner.reference(path)
    }
}

impl DocumentStore for FlakyStore {
    fn get(&self, path: &str) -> BoxFuture<'_, Option<StoreRecord>> {
        let path = path.to_string();
        Box::pin(async move {
            self.check("get")?;
            self.inner.get(&path).await
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
            self.check("conditional_write")?;
            self.inner.conditional_write(&path, record, condition).await
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
            self.check("conditional_flag_update")?;
            self.inner.conditional_flag_update(&path, fields, condition).await
        })
    }

    fn delete(&self, path: &str) -> BoxFuture<'_, bool> {
        let path = path.to_string();
        Box::pin(async move {
            self.check("delete")?;
            self.inner.delete(&path).await
        })
    }

    fn now(&self) -> Timestamp {
        self.inner.now()
    }
}

/// Bus whose publishes fail until told otherwise. Reads always succeed.
pub struct FlakyBus {
    inner: InMemoryBus,
    failures_left: AtomicUsize,
    publishes: AtomicUsize,
}

impl FlakyBus {
    pub fn new(inner: InMemoryBus) -> Self {
        Self {
            inner,
            failures_left: AtomicUsize::new(0),
            publishes: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` publishes.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn publishes(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &InMemoryBus {
        &self.inner
    }
}

impl MessageBus for FlakyBus {
    fn publish(&self, message: BusMessage) -> BusFuture<'_, String> {
        Box::pin(async move {
            self.publishes.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(ReplicationError::bus_msg("publish", "injected failure"));
            }
            self.inner.publish(message).await
        })
    }
}

impl MessageSource for FlakyBus {
    fn next_batch(&self, cursor: &str) -> BusFuture<'_, Vec<BusEnvelope>> {
        self.inner.next_batch(cursor)
    }
}

/// Share one bus between regions.
pub fn shared_bus(bus: &InMemoryBus) -> Arc<InMemoryBus> {
    Arc::new(bus.clone())
}
