//! Worker loop: drains one key's queue, one item at a time.
//!
//! A worker exists only while its key's lock is held. Each pass pops the
//! head item under the table mutex; when the queue is empty the same
//! critical section removes the queue and releases the lock, so a submit
//! racing the teardown either lands before it (and is popped) or after it
//! (and starts a fresh worker).
//!
//! Each attempt runs on its own task so a panicking or hung processor costs
//! one attempt, not the key.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::task::JoinError;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::ProcessError;
use crate::event::EventKind;
use crate::model::{Key, WorkItem};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_item_span};

use super::dispatch::Shared;
use super::processor::{Failure, TaskProcessor};
use super::table::Next;

/// What became of one popped item.
enum Handled<T> {
    Completed,
    Retry(WorkItem<T>),
    Dropped,
}

/// Drain `key` until its queue is empty, then tear down.
///
/// The caller must hold the key's lock; it is released here.
pub(crate) async fn drain<P: TaskProcessor>(shared: Arc<Shared<P>>, key: Key) {
    info!(key = %key, "worker started");
    metrics::active_workers().add(1, &[]);
    let mut processed: u64 = 0;

    loop {
        let next = {
            let mut table = shared.table();
            let next = table.pop_or_release(&key);
            if matches!(next, Next::Drained) {
                shared.emit(EventKind::KeyDrained {
                    key: key.clone(),
                    processed,
                });
            }
            next
        };

        let item = match next {
            Next::Item(item) => item,
            Next::Drained => break,
        };

        match handle(&shared, item).await {
            Handled::Completed | Handled::Dropped => processed += 1,
            Handled::Retry(item) => {
                let backoff = shared.config.backoff_for(item.attempts);
                debug!(key = %key, backoff_ms = metrics::millis(backoff), "waiting before retry");
                tokio::time::sleep(backoff).await;
                shared.table().requeue_front(item);
            }
        }
    }

    shared.idle.notify_waiters();
    metrics::active_workers().add(-1, &[]);
    metrics::keys_drained().add(1, &[]);
    info!(key = %key, processed, "queue drained, worker exiting");
}

async fn handle<P: TaskProcessor>(
    shared: &Arc<Shared<P>>,
    mut item: WorkItem<P::Payload>,
) -> Handled<P::Payload> {
    // The semaphore is never closed, so a failed acquire cannot happen.
    let _permit = match shared.permits.as_ref() {
        Some(permits) => permits.acquire().await.ok(),
        None => None,
    };

    let attempt = item.attempts + 1;
    let span = start_item_span(&item.key, &item.fingerprint, attempt);
    record_state_transition(&span, "queued", "processing");

    let started = Instant::now();
    let result = attempt_once(shared, &item).instrument(span.clone()).await;
    let duration_ms = metrics::millis(started.elapsed());
    item.attempts = attempt;

    metrics::item_duration_ms().record(duration_ms as f64, &[]);

    let error = match result {
        Ok(()) => {
            record_state_transition(&span, "processing", "completed");
            info!(key = %item.key, fingerprint = %item.fingerprint, attempt, duration_ms, "item processed");
            metrics::items_processed().add(1, &[KeyValue::new("outcome", "completed")]);
            shared.emit(EventKind::Completed {
                key: item.key.clone(),
                fingerprint: item.fingerprint.clone(),
                attempt,
                duration_ms,
            });
            return Handled::Completed;
        }
        Err(error) => error,
    };

    let will_retry = error.is_retryable() && attempt < shared.config.max_attempts;
    warn!(
        item = %item.summary(),
        error = %error,
        will_retry,
        duration_ms,
        "item failed"
    );
    shared.emit(EventKind::Failed {
        key: item.key.clone(),
        fingerprint: item.fingerprint.clone(),
        attempt,
        error: error.to_string(),
        will_retry,
    });

    let failure = Failure {
        error,
        attempt,
        will_retry,
    };
    report_failure(shared, &item, &failure).await;

    if will_retry {
        record_state_transition(&span, "processing", "retrying");
        metrics::items_retried().add(1, &[]);
        return Handled::Retry(item);
    }

    record_state_transition(&span, "processing", "dropped");
    error!(item = %item.summary(), error = %failure.error, "dropping item");
    metrics::items_processed().add(1, &[KeyValue::new("outcome", "dropped")]);
    shared.emit(EventKind::Dropped {
        key: item.key.clone(),
        fingerprint: item.fingerprint.clone(),
        attempts: attempt,
        reason: failure.error.to_string(),
    });
    Handled::Dropped
}

/// Run one attempt on its own task, bounded by the item timeout.
async fn attempt_once<P: TaskProcessor>(
    shared: &Arc<Shared<P>>,
    item: &WorkItem<P::Payload>,
) -> Result<(), ProcessError> {
    let job = item.clone();
    let worker = Arc::clone(shared);
    let mut task = tokio::spawn(
        async move { worker.processor.process(&job).await }.in_current_span(),
    );

    let joined = match shared.config.item_timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                // The attempt may still be running on another thread; the
                // key stays owned until it has actually stopped.
                task.abort();
                let _ = task.await;
                return Err(ProcessError::TimedOut(limit));
            }
        },
        None => task.await,
    };

    joined.unwrap_or_else(|e| Err(join_failure(e)))
}

/// Invoke the processor's failure hook, isolated the same way as attempts.
async fn report_failure<P: TaskProcessor>(
    shared: &Arc<Shared<P>>,
    item: &WorkItem<P::Payload>,
    failure: &Failure,
) {
    let job = item.clone();
    let failure = failure.clone();
    let worker = Arc::clone(shared);
    let hook = tokio::spawn(
        async move { worker.processor.on_failure(&job, &failure).await }.in_current_span(),
    );
    if let Err(e) = hook.await {
        error!(item = %item.summary(), error = %join_failure(e), "failure hook did not finish");
    }
}

fn join_failure(e: JoinError) -> ProcessError {
    if e.is_panic() {
        ProcessError::Panicked(panic_message(e.into_panic()))
    } else {
        ProcessError::Panicked("processing task was cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
