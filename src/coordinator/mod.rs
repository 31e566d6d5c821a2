// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication service coordinator.
//!
//! The orchestrator that ties together:
//! - The publish path via [`crate::publish::ChangePublisher`]
//! - The apply path via [`crate::consume::ChangeConsumer`]
//! - Bus subscribers that feed the apply path
//!
//! # Architecture
//!
//! The host wires two triggers to the service:
//! 1. Local change-feed notifications → [`ReplicationService::on_local_change`]
//! 2. Bus messages → [`ReplicationService::on_remote_message`], either pushed
//!    by the host or pulled by a subscriber started with
//!    [`ReplicationService::spawn_subscriber`]
//!
//! Configuration is checked once, at construction. A service built from an
//! unusable configuration stays alive in the `Misconfigured` state and
//! refuses every notification with an error log.

mod subscriber;
mod types;

pub use types::{HealthCheck, ServiceState};

use crate::apply::ApplyOutcome;
use crate::bus::{BusEnvelope, MessageBus, MessageSource};
use crate::config::{ReplicationConfig, ReplicationMode};
use crate::consume::ChangeConsumer;
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::publish::{ChangePublisher, PublishOutcome};
use crate::store::DocumentStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How long shutdown waits for each subscriber to finish its current message.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The replication service for one region.
///
/// Cheap to share behind an `Arc`; every entry point takes `&self`.
pub struct ReplicationService<S: DocumentStore, B: MessageBus> {
    config: ReplicationConfig,

    /// Why the configuration was rejected, if it was.
    misconfiguration: Option<String>,

    /// Service state (broadcast to watchers)
    state_tx: watch::Sender<ServiceState>,

    /// Service state receiver (for internal use)
    state_rx: watch::Receiver<ServiceState>,

    store: Arc<S>,
    bus: Arc<B>,

    publisher: ChangePublisher<S, B>,
    consumer: Arc<ChangeConsumer<S>>,

    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,

    /// Subscribers currently inside their read loop.
    active_subscribers: Arc<AtomicUsize>,

    /// Subscriber task handles; each resolves to its final cursor.
    subscriber_handles: RwLock<Vec<JoinHandle<String>>>,
}

impl<S: DocumentStore, B: MessageBus> ReplicationService<S, B> {
    /// Create the service.
    ///
    /// Never fails: an invalid configuration puts the service in the
    /// `Misconfigured` state instead. Use [`try_new`](Self::try_new) to
    /// surface the error at startup.
    pub fn new(config: ReplicationConfig, store: Arc<S>, bus: Arc<B>) -> Self {
        let misconfiguration = match config.validate() {
            Ok(()) => None,
            Err(e) => {
                error!(
                    region = %config.local_region,
                    mode = %config.mode,
                    error = %e,
                    "Replication misconfigured, every notification will be refused"
                );
                Some(e.to_string())
            }
        };

        let initial = if misconfiguration.is_some() {
            ServiceState::Misconfigured
        } else {
            ServiceState::Running
        };
        metrics::set_service_state(&initial.to_string());

        let (state_tx, state_rx) = watch::channel(initial);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let publisher = ChangePublisher::new(
            config.local_region.clone(),
            config.mode,
            Arc::clone(&store),
            Arc::clone(&bus),
        );
        let consumer = Arc::new(ChangeConsumer::new(
            config.local_region.clone(),
            config.mode,
            Arc::clone(&store),
        ));

        if initial == ServiceState::Running {
            info!(region = %config.local_region, mode = %config.mode, "Replication service ready");
        }

        Self {
            config,
            misconfiguration,
            state_tx,
            state_rx,
            store,
            bus,
            publisher,
            consumer,
            shutdown_tx,
            shutdown_rx,
            active_subscribers: Arc::new(AtomicUsize::new(0)),
            subscriber_handles: RwLock::new(Vec::new()),
        }
    }

    /// Create the service, rejecting an invalid configuration.
    pub fn try_new(config: ReplicationConfig, store: Arc<S>, bus: Arc<B>) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(config, store, bus))
    }

    /// Get current service state.
    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    /// Check if the service accepts notifications.
    pub fn is_running(&self) -> bool {
        self.state().accepts_work()
    }

    /// Why the configuration was rejected, if it was.
    pub fn misconfiguration(&self) -> Option<&str> {
        self.misconfiguration.as_deref()
    }

    pub fn local_region(&self) -> &str {
        &self.config.local_region
    }

    pub fn mode(&self) -> ReplicationMode {
        self.config.mode
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<B> {
        &self.bus
    }

    /// Get health status for monitoring endpoints.
    ///
    /// Performs no store or bus I/O.
    pub fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let active_subscribers = self.active_subscribers.load(Ordering::SeqCst);
        let spawned = self
            .subscriber_handles
            .try_read()
            .map(|handles| handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(active_subscribers);

        let ready = state.accepts_work();
        HealthCheck {
            state,
            mode: self.config.mode,
            local_region: self.config.local_region.clone(),
            active_subscribers,
            misconfiguration: self.misconfiguration.clone(),
            ready,
            healthy: ready && spawned == active_subscribers,
        }
    }

    /// Handle one local change-feed notification (publish path).
    pub async fn on_local_change(&self, notification: &[u8]) -> Result<PublishOutcome> {
        self.admit("publish")?;
        metrics::record_notification("local");

        let span = info_span!("publish", region = %self.config.local_region);
        self.publisher.publish(notification).instrument(span).await
    }

    /// Handle one bus message (apply path).
    pub async fn on_remote_message(&self, envelope: &BusEnvelope) -> Result<ApplyOutcome> {
        self.admit("apply")?;
        metrics::record_notification("bus");

        let span = info_span!(
            "apply",
            region = %self.config.local_region,
            message_id = %envelope.id
        );
        self.consumer.consume(envelope).instrument(span).await
    }

    /// Start a task that tails `source` from `start_cursor` and applies every
    /// message. Runs until [`shutdown`](Self::shutdown).
    pub async fn spawn_subscriber<M: MessageSource>(
        &self,
        source: Arc<M>,
        start_cursor: impl Into<String>,
    ) -> Result<()> {
        let state = self.state();
        if state != ServiceState::Running {
            return Err(ReplicationError::InvalidState {
                expected: ServiceState::Running.to_string(),
                actual: state.to_string(),
            });
        }

        let handle = tokio::spawn(subscriber::run_subscriber(
            Arc::clone(&self.consumer),
            source,
            start_cursor.into(),
            self.shutdown_rx.clone(),
            Arc::clone(&self.active_subscribers),
        ));
        let mut handles = self.subscriber_handles.write().await;
        handles.push(handle);
        debug!(subscribers = handles.len(), "Spawned bus subscriber");
        Ok(())
    }

    /// Shutdown the service gracefully.
    ///
    /// Stops subscribers (each finishes the message it is applying), flushes
    /// the bus, closes the store, and moves to `Stopped`. Subscribers still
    /// running after the drain timeout are aborted. Safe to call more than once.
    pub async fn shutdown(&self) {
        if self.state() == ServiceState::Stopped {
            return;
        }

        info!("Shutting down replication service");
        let _ = self.state_tx.send(ServiceState::ShuttingDown);
        metrics::set_service_state("ShuttingDown");

        // Signal shutdown to all tasks
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.subscriber_handles.write().await;
            std::mem::take(&mut *guard)
        };

        let task_count = handles.len();
        if task_count > 0 {
            info!(task_count, "Waiting for subscribers to finish");
        }

        let results = futures::future::join_all(handles.into_iter().map(|mut handle| async move {
            let result = tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await;
            if result.is_err() {
                handle.abort();
            }
            result
        }))
        .await;

        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(Ok(cursor)) => {
                    debug!(task = i + 1, cursor = %cursor, "Subscriber completed gracefully");
                }
                Ok(Err(e)) => {
                    warn!(task = i + 1, error = %e, "Subscriber panicked during shutdown");
                }
                Err(_) => {
                    warn!(task = i + 1, "Subscriber timed out during shutdown, aborted (message will be redelivered)");
                }
            }
        }

        if let Err(e) = self.bus.flush().await {
            warn!(error = %e, "Failed to flush bus during shutdown");
        }

        if let Err(e) = self.store.close().await {
            warn!(error = %e, "Failed to close store during shutdown");
        }

        let _ = self.state_tx.send(ServiceState::Stopped);
        metrics::set_service_state("Stopped");
        info!("Replication service stopped");
    }

    /// Gate every entry point on the service state.
    fn admit(&self, path: &'static str) -> Result<()> {
        match self.state() {
            ServiceState::Running => Ok(()),
            ServiceState::Misconfigured => {
                let reason = self
                    .misconfiguration
                    .clone()
                    .unwrap_or_else(|| "replication is not configured".to_string());
                error!(path, reason = %reason, "Refusing notification, replication misconfigured");
                metrics::record_error(path, "misconfigured");
                Err(ReplicationError::Misconfigured(reason))
            }
            ServiceState::ShuttingDown | ServiceState::Stopped => Err(ReplicationError::Shutdown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::InMemoryBus;
    use crate::bus::{BusMessage, START_CURSOR};
    use crate::document::{ChangeEvent, Document, Timestamp, Value};
    use crate::store::memory::InMemoryStore;
    use crate::store::ReferenceFactory;

    type Service = ReplicationService<InMemoryStore, InMemoryBus>;

    fn service(region: &str, mode: ReplicationMode) -> (Service, InMemoryStore, InMemoryBus) {
        let store = InMemoryStore::new("proj/x", region);
        let bus = InMemoryBus::new().with_poll_timeout(Duration::from_millis(10));
        let service = ReplicationService::new(
            ReplicationConfig::for_testing(region, mode),
            Arc::new(store.clone()),
            Arc::new(bus.clone()),
        );
        (service, store, bus)
    }

    fn insert(region: &str, path: &str) -> Vec<u8> {
        ChangeEvent::Insert {
            after: Document::new(format!("proj/x/regions/{}/documents/{}", region, path))
                .with_field("total", Value::Integer(1))
                .with_update_time(Timestamp::new(100, 0)),
        }
        .to_notification()
    }

    #[test]
    fn test_valid_config_starts_running() {
        let (service, _, _) = service("us", ReplicationMode::MultiRegionPrimary);
        assert_eq!(service.state(), ServiceState::Running);
        assert!(service.is_running());
        assert!(service.misconfiguration().is_none());
        assert_eq!(service.local_region(), "us");
        assert_eq!(service.mode(), ReplicationMode::MultiRegionPrimary);
    }

    #[test]
    fn test_none_mode_is_misconfigured() {
        let (service, _, _) = service("us", ReplicationMode::None);
        assert_eq!(service.state(), ServiceState::Misconfigured);
        assert!(!service.is_running());
        assert!(service.misconfiguration().is_some());
    }

    #[test]
    fn test_missing_region_is_misconfigured() {
        let (service, _, _) = service("", ReplicationMode::SingleRegionPrimary);
        assert_eq!(service.state(), ServiceState::Misconfigured);
    }

    #[test]
    fn test_try_new_rejects_invalid_config() {
        let result = ReplicationService::try_new(
            ReplicationConfig::for_testing("us", ReplicationMode::None),
            Arc::new(InMemoryStore::new("proj/x", "us")),
            Arc::new(InMemoryBus::new()),
        );
        assert!(matches!(result, Err(ReplicationError::Misconfigured(_))));
    }

    #[test]
    fn test_state_receiver() {
        let (service, _, _) = service("us", ReplicationMode::MultiRegionPrimary);
        let state_rx = service.state_receiver();
        assert_eq!(*state_rx.borrow(), ServiceState::Running);
    }

    #[tokio::test]
    async fn test_misconfigured_refuses_both_paths() {
        let (service, store, bus) = service("us", ReplicationMode::None);

        let err = service.on_local_change(&insert("us", "a")).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Misconfigured(_)));

        let envelope = BusEnvelope::from_message("1", BusMessage::new("a", "eu", insert("eu", "a")));
        let err = service.on_remote_message(&envelope).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Misconfigured(_)));

        assert!(store.is_empty().await);
        assert!(bus.is_empty().await);
    }

    #[tokio::test]
    async fn test_local_change_published() {
        let (service, _, bus) = service("us", ReplicationMode::MultiRegionPrimary);
        let outcome = service.on_local_change(&insert("us", "orders/1")).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Published { .. }));
        assert_eq!(bus.len().await, 1);
    }

    #[tokio::test]
    async fn test_remote_message_applied() {
        let (service, store, _) = service("us", ReplicationMode::MultiRegionPrimary);
        let envelope = BusEnvelope::from_message(
            "1",
            BusMessage::new("orders/1", "eu", insert("eu", "orders/1")),
        );
        let outcome = service.on_remote_message(&envelope).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Written);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_subscribers() {
        let (service, _, bus) = service("us", ReplicationMode::MultiRegionPrimary);
        service
            .spawn_subscriber(Arc::new(bus.clone()), START_CURSOR)
            .await
            .unwrap();

        service.shutdown().await;
        assert_eq!(service.state(), ServiceState::Stopped);
        assert_eq!(service.health_check().active_subscribers, 0);

        let err = service.on_local_change(&insert("us", "a")).await.unwrap_err();
        assert!(matches!(err, ReplicationError::Shutdown));
    }

    /// Store whose writes never complete. Flags `released` when a stalled
    /// write is dropped.
    struct StallingStore {
        inner: InMemoryStore,
        stalled: Arc<std::sync::atomic::AtomicBool>,
        released: Arc<std::sync::atomic::AtomicBool>,
    }

    struct ReleaseOnDrop(Arc<std::sync::atomic::AtomicBool>);

    impl Drop for ReleaseOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    impl ReferenceFactory for StallingStore {
        fn reference(&self, path: &str) -> crate::store::DocumentHandle {
            self.inner.reference(path)
        }
    }

    impl DocumentStore for StallingStore {
        fn get(&self, path: &str) -> crate::store::BoxFuture<'_, Option<crate::store::StoreRecord>> {
            self.inner.get(path)
        }

        fn conditional_write(
            &self,
            _path: &str,
            _record: crate::store::StoreRecord,
            _condition: crate::store::WriteCondition,
        ) -> crate::store::BoxFuture<'_, bool> {
            let guard = ReleaseOnDrop(Arc::clone(&self.released));
            self.stalled.store(true, Ordering::SeqCst);
            Box::pin(async move {
                let _guard = guard;
                std::future::pending::<()>().await;
                Ok(true)
            })
        }

        fn conditional_flag_update(
            &self,
            path: &str,
            fields: crate::store::StoreRecord,
            condition: crate::store::WriteCondition,
        ) -> crate::store::BoxFuture<'_, bool> {
            self.inner.conditional_flag_update(path, fields, condition)
        }

        fn delete(&self, path: &str) -> crate::store::BoxFuture<'_, bool> {
            self.inner.delete(path)
        }

        fn now(&self) -> Timestamp {
            self.inner.now()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_subscriber_past_drain_timeout() {
        let stalled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let released = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let store = StallingStore {
            inner: InMemoryStore::new("proj/x", "us"),
            stalled: Arc::clone(&stalled),
            released: Arc::clone(&released),
        };
        let bus = InMemoryBus::new().with_poll_timeout(Duration::from_millis(10));
        let service = ReplicationService::new(
            ReplicationConfig::for_testing("us", ReplicationMode::MultiRegionPrimary),
            Arc::new(store),
            Arc::new(bus.clone()),
        );
        bus.publish(BusMessage::new("orders/1", "eu", insert("eu", "orders/1")))
            .await
            .unwrap();
        service
            .spawn_subscriber(Arc::new(bus.clone()), START_CURSOR)
            .await
            .unwrap();

        for _ in 0..100 {
            if stalled.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stalled.load(Ordering::SeqCst));

        service.shutdown().await;
        assert_eq!(service.state(), ServiceState::Stopped);

        for _ in 0..100 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawn_subscriber_requires_running() {
        let (service, _, bus) = service("us", ReplicationMode::None);
        let err = service
            .spawn_subscriber(Arc::new(bus), START_CURSOR)
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_from_misconfigured() {
        let (service, _, _) = service("us", ReplicationMode::None);
        service.shutdown().await;
        assert_eq!(service.state(), ServiceState::Stopped);

        // Idempotent
        service.shutdown().await;
        assert_eq!(service.state(), ServiceState::Stopped);
    }

    #[test]
    fn test_health_check() {
        let (running, _, _) = service("us", ReplicationMode::SingleRegionPrimary);
        let health = running.health_check();
        assert_eq!(health.state, ServiceState::Running);
        assert!(health.ready);
        assert!(health.healthy);
        assert_eq!(health.local_region, "us");
        assert_eq!(health.active_subscribers, 0);

        let (refusing, _, _) = service("us", ReplicationMode::None);
        let health = refusing.health_check();
        assert!(!health.ready);
        assert!(!health.healthy);
        assert!(health.misconfiguration.is_some());
    }
}
