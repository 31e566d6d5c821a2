//! Service state types.
//!
//! Defines the lifecycle of the replication service.
//!
//! # State Transitions
//!
//! ```text
//!   new(valid config)          new(invalid config)
//!          │                           │
//!          ↓                           ↓
//!       Running                  Misconfigured
//!          │                           │
//!          │ shutdown()                │ shutdown()
//!          ↓                           │
//!     ShuttingDown                     │
//!          │                           │
//!          ↓                           │
//!       Stopped ←──────────────────────┘
//! ```
//!
//! # State Descriptions
//!
//! - **Running**: Entry points accept notifications; subscribers may be spawned.
//! - **Misconfigured**: Mode is `NONE` or the local region is missing. Every
//!   notification is refused with an error log; nothing is processed.
//! - **ShuttingDown**: `shutdown()` called. Subscribers are draining.
//! - **Stopped**: Subscribers joined and the bus flushed. Safe to drop.

use crate::config::ReplicationMode;

/// State of the replication service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Accepting notifications.
    Running,

    /// Refusing every notification until reconfigured.
    ///
    /// The reason is available from
    /// [`misconfiguration()`](super::ReplicationService::misconfiguration).
    Misconfigured,

    /// Shutting down gracefully.
    ShuttingDown,

    /// Stopped.
    Stopped,
}

impl ServiceState {
    /// Whether entry points will process notifications.
    pub fn accepts_work(&self) -> bool {
        matches!(self, ServiceState::Running)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Running => write!(f, "Running"),
            ServiceState::Misconfigured => write!(f, "Misconfigured"),
            ServiceState::ShuttingDown => write!(f, "ShuttingDown"),
            ServiceState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Health snapshot for readiness/liveness endpoints.
///
/// Built from cached state only; no store or bus I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    pub state: ServiceState,
    pub mode: ReplicationMode,
    pub local_region: String,
    /// Bus subscribers still running.
    pub active_subscribers: usize,
    /// Why the service refuses work, when misconfigured.
    pub misconfiguration: Option<String>,
    /// Entry points accept notifications.
    pub ready: bool,
    /// Ready, and every spawned subscriber is alive.
    pub healthy: bool,
}
