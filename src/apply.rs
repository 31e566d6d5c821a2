// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict-resolution apply engine.
//!
//! Applies a change published by another region to the local store with
//! last-writer-wins semantics:
//!
//! ```text
//! remote == local ─────────────────────────────► Echo (no-op)
//! path not extractable ────────────────────────► Dropped (logged)
//! Insert/Update ─► to_store(after)
//!                  [multi] + timestamp = after.updateTime
//!                          + source-region = remote
//!                  [multi]  conditional write: absent | no timestamp | older
//!                  [single] unconditional write
//!                  ─► Written | Superseded
//! Delete [multi] ─► flag update if exists:
//!                   delete-marker = true, source-region = remote,
//!                   timestamp = store.now()
//!                   ─► DeleteFlagged | AlreadyAbsent
//! Delete [single] ► hard delete ─► HardDeleted | AlreadyAbsent
//! ```
//!
//! Because older writes are always rejected inside the store's own
//! transaction, applying the same change twice, or two changes out of order,
//! converges on the newest record.
//!
//! # Known limitation
//!
//! The change feed's delete notification has no deletion instant, so the
//! soft-delete marker is stamped with the store's clock at apply time. A
//! delete applied late can therefore win against a write that happened
//! after the delete in the originating region.

use crate::codec::to_store;
use crate::config::ReplicationMode;
use crate::document::{ChangeEvent, Document, Timestamp};
use crate::error::{ReplicationError, Result};
use crate::provenance::{DELETE_MARKER_FIELD, SOURCE_REGION_FIELD, TIMESTAMP_FIELD};
use crate::resource::extract_path;
use crate::store::{DocumentStore, StoreError, StoreRecord, StoreValue, WriteCondition};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What applying one remote change did to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApplyOutcome {
    /// The change came from this region; nothing done.
    Echo,
    /// The record was written.
    Written,
    /// The local record is as new or newer; nothing written.
    Superseded,
    /// The local record was soft-deleted.
    DeleteFlagged,
    /// Delete for a record that does not exist locally.
    AlreadyAbsent,
    /// The local record was removed.
    HardDeleted,
    /// Malformed input; logged and discarded.
    Dropped,
}

impl ApplyOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApplyOutcome::Echo => "echo",
            ApplyOutcome::Written => "written",
            ApplyOutcome::Superseded => "superseded",
            ApplyOutcome::DeleteFlagged => "delete_flagged",
            ApplyOutcome::AlreadyAbsent => "already_absent",
            ApplyOutcome::HardDeleted => "hard_deleted",
            ApplyOutcome::Dropped => "dropped",
        }
    }

    /// Whether the local store changed.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ApplyOutcome::Written | ApplyOutcome::DeleteFlagged | ApplyOutcome::HardDeleted
        )
    }
}

/// Apply a change published by `remote_region` to the local store.
///
/// Malformed input yields `Ok(ApplyOutcome::Dropped)`. Store failures abort
/// the attempt with [`ReplicationError::StoreUnavailable`] so the caller can
/// retry the whole message.
pub async fn apply<S: DocumentStore + ?Sized>(
    event: &ChangeEvent,
    remote_region: &str,
    local_region: &str,
    mode: ReplicationMode,
    store: &S,
) -> Result<ApplyOutcome> {
    if !mode.is_configured() {
        return Err(ReplicationError::Misconfigured(
            "apply invoked with replication mode NONE".to_string(),
        ));
    }

    if remote_region == local_region {
        debug!(region = %remote_region, resource = %event.resource_id(), "Ignoring same-region echo");
        return Ok(ApplyOutcome::Echo);
    }

    let path = match extract_path(event.resource_id()) {
        Ok(path) => path,
        Err(e) => {
            warn!(resource = %event.resource_id(), error = %e, "Dropping remote change with malformed resource id");
            crate::metrics::record_dropped("apply", "not_matched");
            return Ok(ApplyOutcome::Dropped);
        }
    };

    match event {
        ChangeEvent::Insert { after } | ChangeEvent::Update { after, .. } => {
            apply_write(path, after, remote_region, mode, store).await
        }
        ChangeEvent::Delete { .. } => apply_delete(path, remote_region, mode, store).await,
    }
}

async fn apply_write<S: DocumentStore + ?Sized>(
    path: &str,
    after: &Document,
    remote_region: &str,
    mode: ReplicationMode,
    store: &S,
) -> Result<ApplyOutcome> {
    let mut record = to_store(&after.fields, store);

    let condition = if mode == ReplicationMode::MultiRegionPrimary {
        let Some(update_time) = after.update_time else {
            warn!(path = %path, "Dropping remote write without updateTime");
            crate::metrics::record_dropped("apply", "missing_update_time");
            return Ok(ApplyOutcome::Dropped);
        };
        stamp(&mut record, remote_region, update_time);
        WriteCondition::OlderThan(update_time)
    } else {
        // Nothing is stamped in single-region mode, so a `timestamp` field
        // here is user data. Per-path bus order decides.
        WriteCondition::Always
    };

    let written = timed("conditional_write", store.conditional_write(path, record, condition)).await?;
    if written {
        info!(path = %path, source_region = %remote_region, "Applied remote write");
        Ok(ApplyOutcome::Written)
    } else {
        debug!(path = %path, source_region = %remote_region, "Remote write superseded by newer local record");
        Ok(ApplyOutcome::Superseded)
    }
}

async fn apply_delete<S: DocumentStore + ?Sized>(
    path: &str,
    remote_region: &str,
    mode: ReplicationMode,
    store: &S,
) -> Result<ApplyOutcome> {
    if mode == ReplicationMode::MultiRegionPrimary {
        let mut flags = StoreRecord::new();
        flags.insert(DELETE_MARKER_FIELD.to_string(), StoreValue::Boolean(true));
        stamp(&mut flags, remote_region, store.now());

        let flagged = timed(
            "conditional_flag_update",
            store.conditional_flag_update(path, flags, WriteCondition::Exists),
        )
        .await?;

        if flagged {
            info!(path = %path, source_region = %remote_region, "Flagged document for deletion");
            Ok(ApplyOutcome::DeleteFlagged)
        } else {
            debug!(path = %path, "Remote delete for absent document");
            Ok(ApplyOutcome::AlreadyAbsent)
        }
    } else {
        let existed = timed("delete", store.delete(path)).await?;
        if existed {
            info!(path = %path, source_region = %remote_region, "Deleted document");
            Ok(ApplyOutcome::HardDeleted)
        } else {
            debug!(path = %path, "Remote delete for absent document");
            Ok(ApplyOutcome::AlreadyAbsent)
        }
    }
}

fn stamp(record: &mut StoreRecord, source_region: &str, timestamp: Timestamp) {
    record.insert(TIMESTAMP_FIELD.to_string(), StoreValue::Timestamp(timestamp));
    record.insert(
        SOURCE_REGION_FIELD.to_string(),
        StoreValue::String(source_region.to_string()),
    );
}

/// Await a store call, recording its latency and mapping the error.
async fn timed<T>(
    operation: &'static str,
    call: impl std::future::Future<Output = std::result::Result<T, StoreError>>,
) -> Result<T> {
    let start = Instant::now();
    let result = call.await;
    crate::metrics::record_store_operation(operation, result.is_ok(), start.elapsed());
    result.map_err(|e| ReplicationError::store(operation, e.0))
}
