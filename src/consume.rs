// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Apply path: bus message → local store.
//!
//! Decodes the envelope (the `region` attribute is mandatory, the payload is
//! a change-feed notification) and hands the change to [`apply`].

use crate::apply::{apply, ApplyOutcome};
use crate::bus::BusEnvelope;
use crate::config::ReplicationMode;
use crate::document::ChangeEvent;
use crate::error::{ReplicationError, Result};
use crate::publish::error_type;
use crate::store::DocumentStore;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, warn};

/// Applies bus messages from other regions to the local store.
pub struct ChangeConsumer<S: DocumentStore> {
    local_region: String,
    mode: ReplicationMode,
    store: Arc<S>,
}

impl<S: DocumentStore> ChangeConsumer<S> {
    /// Built by [`crate::ReplicationService`], which validates the region.
    pub(crate) fn new(local_region: impl Into<String>, mode: ReplicationMode, store: Arc<S>) -> Self {
        Self {
            local_region: local_region.into(),
            mode,
            store,
        }
    }

    /// Handle one bus message.
    pub async fn consume(&self, envelope: &BusEnvelope) -> Result<ApplyOutcome> {
        if !self.mode.is_configured() {
            return Err(ReplicationError::Misconfigured(
                "apply invoked with replication mode NONE".to_string(),
            ));
        }
        if self.local_region.is_empty() {
            return Err(ReplicationError::Misconfigured(
                "apply invoked without a local region".to_string(),
            ));
        }

        let start = Instant::now();
        let remote_region = match envelope.region() {
            Ok(region) => region,
            Err(e) => {
                warn!(message_id = %envelope.id, error = %e, "Dropping bus message");
                crate::metrics::record_dropped("apply", "missing_region");
                crate::metrics::record_apply("", ApplyOutcome::Dropped.as_str(), start.elapsed());
                return Ok(ApplyOutcome::Dropped);
            }
        };

        let result = match ChangeEvent::from_notification(&envelope.payload) {
            Ok(event) => {
                apply(&event, remote_region, &self.local_region, self.mode, self.store.as_ref())
                    .await
            }
            Err(e) => {
                warn!(message_id = %envelope.id, remote_region = %remote_region, error = %e, "Dropping undecodable bus message");
                crate::metrics::record_dropped("apply", "undecodable");
                Ok(ApplyOutcome::Dropped)
            }
        };

        match &result {
            Ok(outcome) => {
                crate::metrics::record_apply(remote_region, outcome.as_str(), start.elapsed())
            }
            Err(e) => {
                error!(message_id = %envelope.id, remote_region = %remote_region, error = %e, "Failed to apply remote change");
                crate::metrics::record_error("apply", error_type(e));
            }
        }
        result
    }
}
