//! Dispatcher: the entry point for inbound events.
//!
//! `submit` runs the dedup check, appends the item to its key's queue and,
//! if no worker owns that key, takes the key's lock and spawns one. It never
//! waits for processing. Keys are independent of each other; items of one
//! key are handled strictly in submission order by a single worker.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use tokio::sync::{Notify, Semaphore, broadcast};
use tracing::{debug, info};

use crate::event::{Event, EventKind};
use crate::model::{Key, NewWorkItem};
use crate::telemetry::metrics;

use super::dedup::DedupWindow;
use super::processor::TaskProcessor;
use super::table::KeyTable;
use super::worker;

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Attempts per item, the first one included. 1 means fail-fast.
    pub max_attempts: u32,
    /// Wait before the first retry; doubled for each further retry.
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
    /// Per-attempt limit. A hung attempt is aborted and counts as a
    /// retryable failure.
    pub item_timeout: Option<Duration>,
    pub dedup_retention: Duration,
    /// Cap on items processing at once across all keys.
    pub max_concurrent: Option<usize>,
    /// Buffered events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            item_timeout: Some(Duration::from_secs(120)),
            dedup_retention: Duration::from_secs(60 * 60),
            max_concurrent: None,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Backoff before retrying after failed attempt number `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// What happened when an item was submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitResult {
    /// Appended to its key's queue.
    Queued {
        /// Queue depth after the append, in-flight item excluded.
        depth: usize,
        /// Whether this submission started the key's worker.
        started_worker: bool,
    },
    /// Fingerprint already seen within the dedup window. Dropped.
    Duplicate,
    /// The dispatcher is closed to new work.
    Closed,
}

/// State shared by the dispatcher and every worker it spawns.
pub(crate) struct Shared<P: TaskProcessor> {
    table: Mutex<KeyTable<P::Payload>>,
    pub(crate) dedup: DedupWindow,
    pub(crate) processor: P,
    pub(crate) config: EngineConfig,
    pub(crate) permits: Option<Semaphore>,
    pub(crate) idle: Notify,
    events: broadcast::Sender<Event>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl<P: TaskProcessor> Shared<P> {
    pub(crate) fn table(&self) -> MutexGuard<'_, KeyTable<P::Payload>> {
        // Only an invariant assertion can panic under this lock, and that
        // takes down the offending worker alone.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        let event = Event {
            seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            kind,
        };
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Routes inbound items to per-key workers. Cheap to clone; clones share
/// the same queues.
pub struct Dispatcher<P: TaskProcessor> {
    shared: Arc<Shared<P>>,
}

impl<P: TaskProcessor> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P: TaskProcessor> Dispatcher<P> {
    pub fn new(processor: P, config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        info!(
            max_attempts = config.max_attempts,
            dedup_retention_secs = config.dedup_retention.as_secs(),
            max_concurrent = ?config.max_concurrent,
            "creating dispatcher"
        );

        Self {
            shared: Arc::new(Shared {
                table: Mutex::new(KeyTable::default()),
                dedup: DedupWindow::new(config.dedup_retention),
                processor,
                permits: config.max_concurrent.map(|n| Semaphore::new(n.max(1))),
                config,
                idle: Notify::new(),
                events,
                seq: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Submit an item for `key`.
    ///
    /// Must be called from within a tokio runtime: the key's worker is
    /// spawned onto it. Safe to call concurrently for any keys.
    pub fn submit(&self, key: impl Into<Key>, new: NewWorkItem<P::Payload>) -> SubmitResult {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            debug!("dispatcher closed, refusing item");
            record_submitted("closed");
            return SubmitResult::Closed;
        }

        let item = new.into_item(key.into());
        let key = item.key.clone();

        if !shared.dedup.should_process(&item.fingerprint) {
            debug!(key = %key, fingerprint = %item.fingerprint, "duplicate item dropped");
            record_submitted("duplicate");
            shared.emit(EventKind::Duplicate {
                key,
                fingerprint: item.fingerprint,
            });
            return SubmitResult::Duplicate;
        }

        let fingerprint = item.fingerprint.clone();
        let (depth, started_worker) = {
            let mut table = shared.table();
            let depth = table.push_back(item);
            let started = table.try_acquire(&key);
            shared.emit(EventKind::Accepted {
                key: key.clone(),
                fingerprint: fingerprint.clone(),
                depth,
            });
            if started {
                shared.emit(EventKind::WorkerStarted { key: key.clone() });
            }
            (depth, started)
        };

        record_submitted("accepted");
        debug!(key = %key, fingerprint = %fingerprint, depth, started_worker, "item queued");

        if started_worker {
            tokio::spawn(worker::drain(Arc::clone(shared), key));
        }

        SubmitResult::Queued {
            depth,
            started_worker,
        }
    }

    /// Subscribe to engine events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.shared.events.subscribe()
    }

    /// Refuse new submissions. Queued and in-flight items still complete.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            info!("dispatcher closed to new work");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Wait until every key has drained and every worker has exited.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.shared.table().is_empty() {
                return;
            }
            notified.await;
        }
    }

    /// Drop all pending items. In-flight items finish; their workers then
    /// find their queues empty and exit.
    pub fn discard_pending(&self) -> usize {
        let discarded = self.shared.table().discard_pending();
        if discarded > 0 {
            info!(discarded, "discarded pending items");
        }
        self.shared.idle.notify_waiters();
        discarded
    }

    /// Keys with a queue, i.e. pending work or a worker mid-drain.
    pub fn active_keys(&self) -> usize {
        self.shared.table().active_keys()
    }

    /// Items waiting for `key`, the in-flight one excluded.
    pub fn pending(&self, key: &Key) -> usize {
        self.shared.table().pending(key)
    }

    /// Whether a worker currently owns `key`.
    pub fn is_draining(&self, key: &Key) -> bool {
        self.shared.table().is_locked(key)
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.shared.dedup
    }

    pub fn processor(&self) -> &P {
        &self.shared.processor
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}

fn record_submitted(result: &'static str) {
    metrics::items_submitted().add(1, &[KeyValue::new("result", result)]);
}
