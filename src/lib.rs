//! # Region Sync
//!
//! Multi-region document replication for a document database where each
//! region keeps its own copy of every document.
//!
//! ## Architecture
//!
//! Every region runs one [`ReplicationService`]. Local changes leave through
//! the publish path; changes from other regions arrive through the apply path:
//!
//! ```text
//! ┌───────────────────────────── region "us" ─────────────────────────────┐
//! │                                                                       │
//! │  change feed ──► on_local_change ──► should_replicate ──► MessageBus ─┼──┐
//! │                   (publish path)      (echo filter)                   │  │
//! │                                                                       │  │
//! │  DocumentStore ◄── LWW apply ◄── on_remote_message ◄── subscriber ◄───┼──┤
//! │                  (conditional)    (apply path)          (XREAD)       │  │
//! └───────────────────────────────────────────────────────────────────────┘  │
//!                                                                            │
//!                         ordered bus (Redis Stream), keyed by path ◄────────┘
//! ```
//!
//! ## Provenance
//!
//! Writes made by replication carry `timestamp` and `source-region` fields.
//! The publish path uses them to stop echoes; the apply path uses
//! `timestamp` for last-writer-wins. In multi-region mode, deletes travel as
//! a `delete-marker` flag that each region turns into a local hard delete.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use region_sync::bus::memory::InMemoryBus;
//! use region_sync::store::memory::InMemoryStore;
//! use region_sync::{ReplicationConfig, ReplicationMode, ReplicationService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ReplicationConfig::for_testing("us", ReplicationMode::MultiRegionPrimary);
//!     let store = Arc::new(InMemoryStore::new("projects/demo", "us"));
//!     let bus = Arc::new(InMemoryBus::new());
//!
//!     let service = ReplicationService::new(config, store, bus.clone());
//!     service.spawn_subscriber(bus, "0").await.expect("Failed to subscribe");
//!
//!     // Feed change-feed notifications to service.on_local_change(..)
//!     service.shutdown().await;
//! }
//! ```

pub mod apply;
pub mod bus;
pub mod codec;
pub mod config;
pub mod consume;
pub mod coordinator;
pub mod decision;
pub mod document;
pub mod error;
pub mod metrics;
pub mod payload;
pub mod provenance;
pub mod publish;
pub mod resource;
pub mod store;

// Re-exports for convenience
pub use apply::ApplyOutcome;
pub use bus::{BusEnvelope, BusMessage, MessageBus, MessageSource};
pub use config::{BusConfig, ReplicationConfig, ReplicationMode, StoreConfig};
pub use coordinator::{HealthCheck, ReplicationService, ServiceState};
pub use decision::should_replicate;
pub use document::{ChangeEvent, ChangeKind, Document, Timestamp, Value};
pub use error::{ReplicationError, Result};
pub use provenance::Provenance;
pub use publish::PublishOutcome;
pub use store::{DocumentStore, WriteCondition};
