// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resource identifier codec.
//!
//! Every document is addressed by a fully-qualified resource id:
//!
//! ```text
//! <prefix>/regions/<region>/documents/<path>
//!  proj/x  /regions/ us     /documents/ orders/42
//! ```
//!
//! The region segment is what differs between replicas of the same document;
//! the path is what the ordering key and the store key are built from.
//!
//! All functions here are pure and borrow from their input.

use crate::error::{ReplicationError, Result};
use std::fmt;

const REGIONS_MARKER: &str = "regions/";
const DOCUMENTS_MARKER: &str = "/documents/";

/// A resource id split into its three parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceName<'a> {
    /// Everything before `/regions/` (may be empty).
    pub prefix: &'a str,
    /// The single path segment after `regions/`.
    pub region: &'a str,
    /// Everything after `/documents/`.
    pub path: &'a str,
}

impl<'a> ResourceName<'a> {
    /// Parse a resource id.
    ///
    /// The first `regions/` marker whose following segment is directly
    /// followed by `/documents/` wins, so a prefix may itself contain the word
    /// `regions` as long as the shape resolves unambiguously.
    pub fn parse(resource_id: &'a str) -> Result<Self> {
        for (idx, _) in resource_id.match_indices(REGIONS_MARKER) {
            let (prefix, after_marker) = if idx == 0 {
                ("", &resource_id[REGIONS_MARKER.len()..])
            } else if resource_id.as_bytes()[idx - 1] == b'/' {
                (&resource_id[..idx - 1], &resource_id[idx + REGIONS_MARKER.len()..])
            } else {
                continue;
            };

            let Some(slash) = after_marker.find('/') else {
                continue;
            };
            let region = &after_marker[..slash];
            let Some(path) = after_marker[slash..].strip_prefix(DOCUMENTS_MARKER) else {
                continue;
            };

            if region.is_empty() || path.is_empty() {
                continue;
            }

            return Ok(Self { prefix, region, path });
        }

        Err(ReplicationError::NotMatched {
            resource_id: resource_id.to_string(),
        })
    }
}

impl fmt::Display for ResourceName<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "regions/{}/documents/{}", self.region, self.path)
        } else {
            write!(
                f,
                "{}/regions/{}/documents/{}",
                self.prefix, self.region, self.path
            )
        }
    }
}

/// Extract the document path from a resource id.
pub fn extract_path(resource_id: &str) -> Result<&str> {
    ResourceName::parse(resource_id).map(|name| name.path)
}

/// Extract the region segment from a resource id.
pub fn extract_region(resource_id: &str) -> Result<&str> {
    ResourceName::parse(resource_id).map(|name| name.region)
}

/// Rewrite the region segment of a resource id.
///
/// Returns the input unchanged when it does not have the expected shape.
pub fn replace_region(resource_id: &str, new_region: &str) -> String {
    match ResourceName::parse(resource_id) {
        Ok(name) => ResourceName {
            region: new_region,
            ..name
        }
        .to_string(),
        Err(_) => resource_id.to_string(),
    }
}

/// The resource id root of a regional database: `<prefix>/regions/<region>`.
pub fn database_root(prefix: &str, region: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        format!("regions/{}", region)
    } else {
        format!("{}/regions/{}", prefix, region)
    }
}

/// Build the resource id of `path` under a database root.
pub fn document_resource_id(database_root: &str, path: &str) -> String {
    format!("{}/documents/{}", database_root, path)
}
