// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process bus: an append-only log with blocking reads.
//!
//! A single log is totally ordered, which is stronger than the per-key FIFO
//! the replication protocol needs. Ids are "1", "2", ... and the cursor of a
//! reader is the id of the last message it consumed ("0" for none).

use super::{BusEnvelope, BusFuture, BusMessage, MessageBus, MessageSource};
use crate::error::ReplicationError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Notify, RwLock};
use tracing::trace;

const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);
const DEFAULT_BATCH_SIZE: usize = 100;

/// Shared in-memory bus. Clones publish to and read from the same log.
#[derive(Clone)]
pub struct InMemoryBus {
    log: Arc<RwLock<Vec<BusEnvelope>>>,
    notify: Arc<Notify>,
    poll_timeout: Duration,
    batch_size: usize,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(Vec::new())),
            notify: Arc::new(Notify::new()),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// How long `next_batch` waits for new messages before returning empty.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Every message published so far, oldest first.
    pub async fn published(&self) -> Vec<BusEnvelope> {
        self.log.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.log.read().await.is_empty()
    }
}

impl MessageBus for InMemoryBus {
    fn publish(&self, message: BusMessage) -> BusFuture<'_, String> {
        Box::pin(async move {
            let id = {
                let mut log = self.log.write().await;
                let id = (log.len() + 1).to_string();
                log.push(BusEnvelope::from_message(id.clone(), message));
                id
            };
            self.notify.notify_waiters();
            Ok(id)
        })
    }
}

impl MessageSource for InMemoryBus {
    fn next_batch(&self, cursor: &str) -> BusFuture<'_, Vec<BusEnvelope>> {
        let cursor = cursor.to_string();
        Box::pin(async move {
            let after: usize = cursor.parse().map_err(|_| {
                ReplicationError::MalformedInput(format!("invalid bus cursor: {}", cursor))
            })?;
            let deadline = Instant::now() + self.poll_timeout;

            loop {
                // Registered before the check so a publish in between is not missed.
                let notified = self.notify.notified();
                {
                    let log = self.log.read().await;
                    if log.len() > after {
                        let batch: Vec<BusEnvelope> = log[after..]
                            .iter()
                            .take(self.batch_size)
                            .cloned()
                            .collect();
                        trace!(cursor = %cursor, count = batch.len(), "Read bus messages");
                        return Ok(batch);
                    }
                }

                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero()
                    || tokio::time::timeout(remaining, notified).await.is_err()
                {
                    return Ok(Vec::new());
                }
            }
        })
    }
}
