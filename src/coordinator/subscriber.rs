//! Bus subscriber: tails the bus and applies every message locally.
//!
//! One task per [`MessageSource`]. Each iteration:
//! 1. Reads the next batch after the cursor (blocking read with timeout)
//! 2. Applies messages one at a time, in bus order
//! 3. Advances the cursor past each message once it is handled
//!
//! A retryable failure (store or bus unavailable) re-applies the *same*
//! message after a backoff, so a message is never skipped because the store
//! was briefly down. Malformed messages are dropped by the consumer and
//! never reach this loop as errors.
//!
//! # Graceful Shutdown
//!
//! `tokio::select!` races every read and every backoff sleep against the
//! shutdown signal. A message being applied when shutdown arrives finishes
//! first; a message still waiting for retry is left unacknowledged.

use crate::bus::{BusEnvelope, MessageSource};
use crate::consume::ChangeConsumer;
use crate::store::DocumentStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Run a subscriber until shutdown is signaled.
///
/// Returns the cursor of the last handled message.
pub(super) async fn run_subscriber<S, M>(
    consumer: Arc<ChangeConsumer<S>>,
    source: Arc<M>,
    start_cursor: String,
    mut shutdown_rx: watch::Receiver<bool>,
    active: Arc<AtomicUsize>,
) -> String
where
    S: DocumentStore,
    M: MessageSource,
{
    let span = info_span!("subscriber", start_cursor = %start_cursor);

    async move {
        let count = active.fetch_add(1, Ordering::SeqCst) + 1;
        crate::metrics::set_active_subscribers(count);
        info!("Subscriber started");

        let mut cursor = start_cursor;
        let mut backoff = INITIAL_BACKOFF;

        'outer: loop {
            if *shutdown_rx.borrow() {
                break;
            }

            let read = tokio::select! {
                biased;

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!(cursor = %cursor, "Subscriber received shutdown signal");
                        break;
                    }
                    continue;
                }

                result = source.next_batch(&cursor) => result,
            };

            let batch = match read {
                Ok(batch) => {
                    backoff = INITIAL_BACKOFF;
                    batch
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "Bus read failed, backing off");
                    crate::metrics::record_error("subscribe", crate::publish::error_type(&e));
                    if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                        break;
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            for envelope in batch {
                if !apply_with_retry(&consumer, &envelope, &mut shutdown_rx).await {
                    info!(cursor = %cursor, pending = %envelope.id, "Subscriber stopping with message unacknowledged");
                    break 'outer;
                }
                cursor = envelope.id;
            }
        }

        let count = active.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        crate::metrics::set_active_subscribers(count);
        info!(cursor = %cursor, "Subscriber stopped");
        cursor
    }
    .instrument(span)
    .await
}

/// Apply one message, retrying retryable failures until it is handled.
///
/// Returns `false` if shutdown interrupted the retries.
async fn apply_with_retry<S: DocumentStore>(
    consumer: &ChangeConsumer<S>,
    envelope: &BusEnvelope,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> bool {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        match consumer.consume(envelope).await {
            Ok(outcome) => {
                debug!(message_id = %envelope.id, outcome = outcome.as_str(), "Handled bus message");
                return true;
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    message_id = %envelope.id,
                    error = %e,
                    backoff_ms = backoff.as_millis() as u64,
                    "Apply failed, retrying"
                );
                if !sleep_or_shutdown(backoff, shutdown_rx).await {
                    return false;
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
            Err(e) => {
                error!(message_id = %envelope.id, error = %e, "Apply failed permanently, skipping message");
                return true;
            }
        }
    }
}

/// Sleep for `duration` unless shutdown arrives first.
///
/// Returns `false` on shutdown.
async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    if *shutdown_rx.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::InMemoryBus;
    use crate::bus::{BusMessage, MessageBus, START_CURSOR};
    use crate::config::ReplicationMode;
    use crate::document::{ChangeEvent, Document, Timestamp, Value};
    use crate::store::memory::InMemoryStore;

    fn notification(path: &str, total: i64) -> Vec<u8> {
        ChangeEvent::Insert {
            after: Document::new(format!("proj/x/regions/eu/documents/{}", path))
                .with_field("total", Value::Integer(total))
                .with_update_time(Timestamp::new(10, 0)),
        }
        .to_notification()
    }

    #[tokio::test]
    async fn test_subscriber_applies_and_stops() {
        let store = InMemoryStore::new("proj/x", "us");
        let consumer = Arc::new(ChangeConsumer::new(
            "us",
            ReplicationMode::MultiRegionPrimary,
            Arc::new(store.clone()),
        ));
        let bus = InMemoryBus::new().with_poll_timeout(Duration::from_millis(10));
        bus.publish(BusMessage::new("orders/1", "eu", notification("orders/1", 1)))
            .await
            .unwrap();
        bus.publish(BusMessage::new("orders/2", "eu", notification("orders/2", 2)))
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let active = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run_subscriber(
            consumer,
            Arc::new(bus),
            START_CURSOR.to_string(),
            shutdown_rx,
            active.clone(),
        ));

        for _ in 0..100 {
            if store.len().await == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.len().await, 2);
        assert_eq!(active.load(Ordering::SeqCst), 1);

        shutdown_tx.send(true).unwrap();
        let cursor = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cursor, "2");
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sleep_or_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        assert!(sleep_or_shutdown(Duration::from_millis(1), &mut rx).await);

        tx.send(true).unwrap();
        assert!(!sleep_or_shutdown(Duration::from_secs(60), &mut rx).await);
    }
}
