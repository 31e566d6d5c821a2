// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication decision engine.
//!
//! Decides, for a change observed on the local change feed, whether it has to
//! be forwarded to the other regions. The apply engine writes provenance
//! fields into every document it replicates, and this module reads them back
//! to tell user writes apart from replication's own writes.
//!
//! # Multi-Region Decision Table
//!
//! ```text
//! op      condition                                              replicate
//! ──────  ─────────────────────────────────────────────────────  ─────────
//! Insert  after has no source-region or no timestamp             yes
//! Insert  after has both                                         source-region == local
//! Update  after has no source-region or no timestamp             yes
//! Update  after has both, before has no timestamp                no
//! Update  after has both, before has timestamp                   after.ts == before.ts
//! Delete  before.delete-marker == true                           no
//! Delete  otherwise                                              yes
//! ```
//!
//! An Update whose timestamp did not move was made by a user on a document
//! that happens to carry provenance; a moved timestamp means the apply
//! engine produced the write.

use crate::config::ReplicationMode;
use crate::document::{ChangeEvent, Document};
use crate::provenance::Provenance;

/// Decide whether a local change must be published to the bus.
///
/// Pure and total. With [`ReplicationMode::None`] nothing is replicated; the
/// entry points refuse to run in that mode before reaching this function.
pub fn should_replicate(event: &ChangeEvent, local_region: &str, mode: ReplicationMode) -> bool {
    match mode {
        ReplicationMode::None => false,
        ReplicationMode::SingleRegionPrimary => true,
        ReplicationMode::MultiRegionPrimary => match event {
            ChangeEvent::Insert { after } => insert_replicates(after, local_region),
            ChangeEvent::Update { before, after } => update_replicates(before, after),
            ChangeEvent::Delete { before } => !Provenance::of(before).is_delete_marked(),
        },
    }
}

fn insert_replicates(after: &Document, local_region: &str) -> bool {
    let provenance = Provenance::of(after);
    if !provenance.is_replicated() {
        return true;
    }
    provenance.is_from(local_region)
}

fn update_replicates(before: &Document, after: &Document) -> bool {
    let after = Provenance::of(after);
    if !after.is_replicated() {
        return true;
    }

    let before = Provenance::of(before);
    match (before.timestamp(), after.timestamp()) {
        (None, _) => false,
        (Some(before_ts), Some(after_ts)) => before_ts == after_ts,
        (Some(_), None) => true,
    }
}
