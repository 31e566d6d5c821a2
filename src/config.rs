//! Configuration for region replication.
//!
//! Configuration is plain data handed to [`ReplicationService::new()`](crate::ReplicationService::new)
//! (or directly to the publish/apply paths). It can be constructed
//! programmatically, deserialized from YAML/JSON, or read from the
//! environment with [`ReplicationConfig::from_env()`].
//!
//! # Quick Start
//!
//! ```rust
//! use region_sync::config::{ReplicationConfig, ReplicationMode};
//!
//! let config = ReplicationConfig {
//!     local_region: "us".into(),
//!     mode: ReplicationMode::MultiRegionPrimary,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── local_region: String         # This region's id
//! ├── mode: ReplicationMode        # NONE | SINGLE_REGION_PRIMARY | MULTI_REGION_PRIMARY
//! ├── bus: BusConfig               # Redis stream used as the ordered bus
//! └── store: StoreConfig           # SQLite document store
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! local_region: "us"
//! mode: MULTI_REGION_PRIMARY
//!
//! bus:
//!   redis_url: "redis://bus:6379"
//!   stream_key: "region-sync:changes"
//!   block_timeout: "5s"
//!
//! store:
//!   sqlite_path: "/var/lib/app/documents.db"
//!   resource_prefix: "projects/acme"
//! ```
//!
//! # Environment Variables
//!
//! | Variable | Field |
//! |----------|-------|
//! | `REPLICATION_MODE` | `mode` (unknown values fall back to `NONE`) |
//! | `REGION` (or legacy `DATABASE`) | `local_region` |
//! | `BUS_URL` | `bus.redis_url` |
//! | `TOPIC` | `bus.stream_key` |
//! | `STORE_PATH` | `store.sqlite_path` |
//! | `RESOURCE_PREFIX` | `store.resource_prefix` |

use crate::error::{ReplicationError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// ReplicationMode
// ═══════════════════════════════════════════════════════════════════════════════

/// How many regions accept direct writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicationMode {
    /// Not configured. The service refuses to process events.
    #[default]
    None,

    /// Exactly one region accepts writes; the others are read replicas.
    SingleRegionPrimary,

    /// Every region accepts writes. Provenance fields are mandatory.
    MultiRegionPrimary,
}

impl ReplicationMode {
    /// Parse a mode, mapping missing or unknown values to [`ReplicationMode::None`].
    pub fn parse_fallback_to_none(value: Option<&str>) -> Self {
        value
            .and_then(|v| v.parse().ok())
            .unwrap_or(ReplicationMode::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationMode::None => "NONE",
            ReplicationMode::SingleRegionPrimary => "SINGLE_REGION_PRIMARY",
            ReplicationMode::MultiRegionPrimary => "MULTI_REGION_PRIMARY",
        }
    }

    pub fn is_configured(&self) -> bool {
        !matches!(self, ReplicationMode::None)
    }
}

impl FromStr for ReplicationMode {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "NONE" => Ok(ReplicationMode::None),
            "SINGLE_REGION_PRIMARY" => Ok(ReplicationMode::SingleRegionPrimary),
            "MULTI_REGION_PRIMARY" => Ok(ReplicationMode::MultiRegionPrimary),
            other => Err(ReplicationError::Misconfigured(format!(
                "unknown replication mode: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// The region this process runs in.
    /// Compared against the `region` attribute of bus messages to drop echoes.
    #[serde(default)]
    pub local_region: String,

    /// Replication mode. `NONE` means "not configured".
    #[serde(default)]
    pub mode: ReplicationMode,

    /// Message bus settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// Document store settings.
    #[serde(default)]
    pub store: StoreConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            local_region: String::new(),
            mode: ReplicationMode::None,
            bus: BusConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal valid config for testing.
    pub fn for_testing(local_region: &str, mode: ReplicationMode) -> Self {
        Self {
            local_region: local_region.to_string(),
            mode,
            bus: BusConfig::default(),
            store: StoreConfig::in_memory(),
        }
    }

    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            local_region: lookup("REGION")
                .or_else(|| lookup("DATABASE"))
                .unwrap_or_default(),
            mode: ReplicationMode::parse_fallback_to_none(lookup("REPLICATION_MODE").as_deref()),
            ..Default::default()
        };

        if let Some(url) = lookup("BUS_URL") {
            config.bus.redis_url = url;
        }
        if let Some(topic) = lookup("TOPIC") {
            config.bus.stream_key = topic;
        }
        if let Some(path) = lookup("STORE_PATH") {
            config.store.sqlite_path = path;
        }
        if let Some(prefix) = lookup("RESOURCE_PREFIX") {
            config.store.resource_prefix = prefix;
        }

        config
    }

    /// Check that the service can operate with this configuration.
    pub fn validate(&self) -> Result<()> {
        if !self.mode.is_configured() {
            return Err(ReplicationError::Misconfigured(
                "replication mode is NONE".to_string(),
            ));
        }
        if self.local_region.trim().is_empty() {
            return Err(ReplicationError::Misconfigured(
                "local region is not set".to_string(),
            ));
        }
        if self.local_region.contains('/') {
            return Err(ReplicationError::Misconfigured(format!(
                "local region must be a single path segment: {}",
                self.local_region
            )));
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BusConfig: Redis stream used as the ordered message bus
// ═══════════════════════════════════════════════════════════════════════════════

/// Message bus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Redis URL hosting the change stream.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Stream key all regions publish to and tail.
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    /// XREAD block timeout as a duration string (e.g., "5s").
    #[serde(default = "default_block_timeout")]
    pub block_timeout: String,

    /// Maximum entries per XREAD call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Payloads at or above this size are zstd-compressed. `None` disables compression.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: Option<usize>,

    /// Approximate MAXLEN applied on XADD. `None` keeps the stream untrimmed.
    #[serde(default)]
    pub max_len: Option<usize>,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_stream_key() -> String {
    "region-sync:changes".to_string()
}

fn default_block_timeout() -> String {
    "5s".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_compression_threshold() -> Option<usize> {
    Some(4096)
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            stream_key: default_stream_key(),
            block_timeout: default_block_timeout(),
            batch_size: default_batch_size(),
            compression_threshold: default_compression_threshold(),
            max_len: None,
        }
    }
}

impl BusConfig {
    /// Parse block_timeout string to Duration (falls back to 5s).
    pub fn block_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.block_timeout).unwrap_or(Duration::from_secs(5))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Document store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,

    /// Part of every local resource id before `/regions/<region>`.
    #[serde(default = "default_resource_prefix")]
    pub resource_prefix: String,
}

fn default_sqlite_path() -> String {
    "region_sync.db".to_string()
}

fn default_resource_prefix() -> String {
    "projects/default".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            resource_prefix: default_resource_prefix(),
        }
    }
}

impl StoreConfig {
    /// In-memory SQLite (for testing).
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            resource_prefix: default_resource_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_mode_parse_strict() {
        assert_eq!(
            "MULTI_REGION_PRIMARY".parse::<ReplicationMode>().unwrap(),
            ReplicationMode::MultiRegionPrimary
        );
        assert_eq!(
            "SINGLE_REGION_PRIMARY".parse::<ReplicationMode>().unwrap(),
            ReplicationMode::SingleRegionPrimary
        );
        assert_eq!("NONE".parse::<ReplicationMode>().unwrap(), ReplicationMode::None);
        assert!("multi".parse::<ReplicationMode>().is_err());
    }

    #[test]
    fn test_mode_parse_fallback_to_none() {
        assert_eq!(ReplicationMode::parse_fallback_to_none(None), ReplicationMode::None);
        assert_eq!(
            ReplicationMode::parse_fallback_to_none(Some("SINGLE_REGION_MASTER")),
            ReplicationMode::None
        );
        assert_eq!(
            ReplicationMode::parse_fallback_to_none(Some("MULTI_REGION_PRIMARY")),
            ReplicationMode::MultiRegionPrimary
        );
    }

    #[test]
    fn test_mode_display_matches_serde() {
        for mode in [
            ReplicationMode::None,
            ReplicationMode::SingleRegionPrimary,
            ReplicationMode::MultiRegionPrimary,
        ] {
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode));
        }
    }

    #[test]
    fn test_default_config_is_misconfigured() {
        let err = ReplicationConfig::default().validate().unwrap_err();
        assert!(matches!(err, ReplicationError::Misconfigured(_)));
    }

    #[test]
    fn test_missing_region_is_misconfigured() {
        let config = ReplicationConfig::for_testing("", ReplicationMode::SingleRegionPrimary);
        assert!(matches!(
            config.validate(),
            Err(ReplicationError::Misconfigured(_))
        ));

        let config = ReplicationConfig::for_testing("us/east", ReplicationMode::SingleRegionPrimary);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_for_testing_is_valid() {
        let config = ReplicationConfig::for_testing("us", ReplicationMode::MultiRegionPrimary);
        assert!(config.validate().is_ok());
        assert_eq!(config.store.sqlite_path, ":memory:");
    }

    #[test]
    fn test_from_lookup() {
        let env: HashMap<&str, &str> = [
            ("REPLICATION_MODE", "MULTI_REGION_PRIMARY"),
            ("DATABASE", "eu"),
            ("TOPIC", "orders-changes"),
            ("BUS_URL", "redis://bus:6379"),
            ("RESOURCE_PREFIX", "projects/acme"),
        ]
        .into_iter()
        .collect();

        let config = ReplicationConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.mode, ReplicationMode::MultiRegionPrimary);
        assert_eq!(config.local_region, "eu");
        assert_eq!(config.bus.stream_key, "orders-changes");
        assert_eq!(config.bus.redis_url, "redis://bus:6379");
        assert_eq!(config.store.resource_prefix, "projects/acme");
        assert_eq!(config.store.sqlite_path, "region_sync.db");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_region_preferred_over_database() {
        let config = ReplicationConfig::from_lookup(|k| match k {
            "REGION" => Some("ap".to_string()),
            "DATABASE" => Some("legacy".to_string()),
            _ => None,
        });
        assert_eq!(config.local_region, "ap");
        assert_eq!(config.mode, ReplicationMode::None);
    }

    #[test]
    fn test_block_timeout_parsing() {
        let mut bus = BusConfig::default();
        assert_eq!(bus.block_timeout_duration(), Duration::from_secs(5));

        bus.block_timeout = "250ms".to_string();
        assert_eq!(bus.block_timeout_duration(), Duration::from_millis(250));

        bus.block_timeout = "invalid".to_string();
        assert_eq!(bus.block_timeout_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_config_json_roundtrip() {
        let config = ReplicationConfig::for_testing("us", ReplicationMode::SingleRegionPrimary);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ReplicationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.local_region, "us");
        assert_eq!(parsed.mode, ReplicationMode::SingleRegionPrimary);
        assert_eq!(parsed.bus.stream_key, config.bus.stream_key);
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let parsed: ReplicationConfig =
            serde_json::from_str(r#"{ "local_region": "eu", "mode": "MULTI_REGION_PRIMARY" }"#)
                .unwrap();
        assert_eq!(parsed.bus.batch_size, 100);
        assert_eq!(parsed.bus.compression_threshold, Some(4096));
        assert_eq!(parsed.store.resource_prefix, "projects/default");
    }
}
