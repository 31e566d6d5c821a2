// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Publish path: local change feed → bus.
//!
//! ```text
//! notification bytes
//!   │ decode               ─ malformed ──► Dropped
//!   │ region + path        ─ not matched ► Dropped
//!   │ [multi] after has delete-marker ───► hard delete locally, LocalHardDelete
//!   │ should_replicate     ─ false ──────► Suppressed
//!   ▼
//! BusMessage { ordering_key: path, region: local, payload: bytes } ─► Published
//! ```
//!
//! The payload is the notification exactly as received, so the applying
//! region sees the same snapshots and update times this region saw.

use crate::bus::{BusMessage, MessageBus};
use crate::config::ReplicationMode;
use crate::decision::should_replicate;
use crate::document::ChangeEvent;
use crate::error::{ReplicationError, Result};
use crate::provenance::Provenance;
use crate::resource::ResourceName;
use crate::store::DocumentStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// What the publish path did with one local change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Forwarded to the bus.
    Published { message_id: String },
    /// Produced by replication itself; not forwarded.
    Suppressed,
    /// A soft-delete marker arrived; the document was removed locally.
    LocalHardDelete,
    /// Malformed input; logged and discarded.
    Dropped,
}

impl PublishOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Published { .. } => "published",
            PublishOutcome::Suppressed => "suppressed",
            PublishOutcome::LocalHardDelete => "local_hard_delete",
            PublishOutcome::Dropped => "dropped",
        }
    }
}

/// Forwards local changes to the bus.
pub struct ChangePublisher<S: DocumentStore, B: MessageBus> {
    local_region: String,
    mode: ReplicationMode,
    store: Arc<S>,
    bus: Arc<B>,
}

impl<S: DocumentStore, B: MessageBus> ChangePublisher<S, B> {
    /// Built by [`crate::ReplicationService`], which validates the region.
    pub(crate) fn new(
        local_region: impl Into<String>,
        mode: ReplicationMode,
        store: Arc<S>,
        bus: Arc<B>,
    ) -> Self {
        Self {
            local_region: local_region.into(),
            mode,
            store,
            bus,
        }
    }

    /// Handle one raw change-feed notification.
    pub async fn publish(&self, notification: &[u8]) -> Result<PublishOutcome> {
        if !self.mode.is_configured() {
            return Err(ReplicationError::Misconfigured(
                "publish invoked with replication mode NONE".to_string(),
            ));
        }
        if self.local_region.is_empty() {
            return Err(ReplicationError::Misconfigured(
                "publish invoked without a local region".to_string(),
            ));
        }

        let start = Instant::now();
        let result = self.publish_inner(notification).await;
        match &result {
            Ok(outcome) => crate::metrics::record_publish(outcome.as_str(), start.elapsed()),
            Err(e) => crate::metrics::record_error("publish", error_type(e)),
        }
        result
    }

    async fn publish_inner(&self, notification: &[u8]) -> Result<PublishOutcome> {
        let event = match ChangeEvent::from_notification(notification) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable local change");
                crate::metrics::record_dropped("publish", "undecodable");
                return Ok(PublishOutcome::Dropped);
            }
        };

        let name = match ResourceName::parse(event.resource_id()) {
            Ok(name) => name,
            Err(e) => {
                warn!(resource = %event.resource_id(), error = %e, "Dropping local change with malformed resource id");
                crate::metrics::record_dropped("publish", "not_matched");
                return Ok(PublishOutcome::Dropped);
            }
        };
        let path = name.path;

        if self.mode == ReplicationMode::MultiRegionPrimary {
            if let Some(after) = event.after() {
                if Provenance::of(after).is_delete_marked() {
                    return self.hard_delete(path).await;
                }
            }
        }

        let replicate = should_replicate(&event, &self.local_region, self.mode);
        crate::metrics::record_decision(event.kind().as_str(), replicate);
        if !replicate {
            debug!(path = %path, kind = %event.kind(), region = %name.region, "Change produced by replication, not forwarding");
            return Ok(PublishOutcome::Suppressed);
        }

        let message = BusMessage::new(path, self.local_region.as_str(), notification.to_vec());
        let message_id = self.bus.publish(message).await.map_err(|e| {
            error!(path = %path, error = %e, "Failed to publish change");
            e
        })?;

        debug!(path = %path, kind = %event.kind(), message_id = %message_id, "Published change");
        Ok(PublishOutcome::Published { message_id })
    }

    async fn hard_delete(&self, path: &str) -> Result<PublishOutcome> {
        let start = Instant::now();
        let result = self.store.delete(path).await;
        crate::metrics::record_store_operation("delete", result.is_ok(), start.elapsed());

        match result {
            Ok(existed) => {
                info!(path = %path, existed, "Completed replicated delete");
                Ok(PublishOutcome::LocalHardDelete)
            }
            Err(e) => {
                error!(path = %path, error = %e, "Failed to complete replicated delete");
                Err(ReplicationError::store("delete", e.0))
            }
        }
    }
}

pub(crate) fn error_type(e: &ReplicationError) -> &'static str {
    match e {
        ReplicationError::StoreUnavailable { .. } | ReplicationError::Sqlite(_) => "store_unavailable",
        ReplicationError::BusUnavailable { .. } => "bus_unavailable",
        ReplicationError::Misconfigured(_) => "misconfigured",
        e if e.is_malformed() => "malformed_input",
        _ => "internal",
    }
}
