//! Chat relay: the task processor that answers inbound chat messages.
//!
//! For each message it shows a typing indicator, asks the assistant for a
//! reply, and delivers the reply paragraph by paragraph, in order, before
//! reporting success. The completion service and the outbound channel are
//! traits so the engine can be driven by anything from a real assistant to
//! a test stub.

pub mod chunk;
pub mod console;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::{Failure, TaskProcessor};
use crate::error::ProcessError;
use crate::model::{Fingerprint, Key, WorkItem};
use crate::telemetry::metrics;

pub use console::{ConsoleSink, EchoCompletion};

/// An inbound chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    pub body: String,
}

/// Produces the assistant's reply to one message of a conversation.
pub trait Completion: Send + Sync + 'static {
    fn complete(
        &self,
        conversation: &Key,
        prompt: &str,
    ) -> impl Future<Output = Result<String, ProcessError>> + Send;
}

/// Outbound channel to the user behind a key.
pub trait DeliverySink: Send + Sync + 'static {
    fn deliver(
        &self,
        recipient: &Key,
        text: &str,
    ) -> impl Future<Output = Result<(), ProcessError>> + Send;

    /// Best-effort "typing..." indicator. The default does nothing.
    fn typing(&self, recipient: &Key) -> impl Future<Output = Result<(), ProcessError>> + Send {
        let _ = recipient;
        async { Ok(()) }
    }
}

/// Answers each inbound message with a completion, delivered in chunks.
///
/// A reply that was cut short by a retryable failure is remembered by
/// fingerprint; the retry resumes at the first undelivered chunk instead of
/// asking the assistant again, so no chunk reaches the user twice.
pub struct ReplyProcessor<C, S> {
    completion: C,
    sink: S,
    failure_notice: Option<String>,
    unfinished: Mutex<HashMap<Fingerprint, Unfinished>>,
}

/// A reply whose delivery has not finished yet.
#[derive(Debug, Clone)]
struct Unfinished {
    chunks: Vec<String>,
    delivered: usize,
}

impl<C: Completion, S: DeliverySink> ReplyProcessor<C, S> {
    pub fn new(completion: C, sink: S) -> Self {
        Self {
            completion,
            sink,
            failure_notice: None,
            unfinished: Mutex::default(),
        }
    }

    /// Message sent to the user when their item is dropped.
    pub fn with_failure_notice(mut self, notice: impl Into<String>) -> Self {
        self.failure_notice = Some(notice.into());
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn completion(&self) -> &C {
        &self.completion
    }

    /// Replies waiting for a retry to finish their delivery.
    pub fn unfinished(&self) -> usize {
        self.replies().len()
    }

    fn replies(&self) -> MutexGuard<'_, HashMap<Fingerprint, Unfinished>> {
        self.unfinished.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask the assistant and split its answer into deliverable chunks.
    async fn fresh_reply(&self, key: &Key, body: &str) -> Result<Vec<String>, ProcessError> {
        if let Err(e) = self.sink.typing(key).await {
            warn!(key = %key, error = %e, "typing indicator failed");
        }

        let started = Instant::now();
        let reply = self.completion.complete(key, body).await?;
        let completion_ms = metrics::millis(started.elapsed());
        metrics::call_duration_ms().record(
            completion_ms as f64,
            &[KeyValue::new("operation", "completion")],
        );
        info!(key = %key, completion_ms, "completion received");

        let chunks = chunk::split_reply(&reply);
        if chunks.is_empty() {
            return Err(ProcessError::Completion("empty reply".to_string()));
        }
        Ok(chunks)
    }
}

impl<C: Completion, S: DeliverySink> TaskProcessor for ReplyProcessor<C, S> {
    type Payload = Inbound;

    async fn process(&self, item: &WorkItem<Inbound>) -> Result<(), ProcessError> {
        let key = &item.key;
        let body = item.payload.body.trim();
        if body.is_empty() {
            return Err(ProcessError::InvalidPayload("empty message body".to_string()));
        }

        let resumed = self.replies().get(&item.fingerprint).cloned();
        let Unfinished { chunks, delivered } = match resumed {
            Some(unfinished) => {
                info!(
                    key = %key,
                    delivered = unfinished.delivered,
                    total = unfinished.chunks.len(),
                    "resuming reply delivery"
                );
                unfinished
            }
            None => {
                let chunks = self.fresh_reply(key, body).await?;
                let unfinished = Unfinished {
                    chunks,
                    delivered: 0,
                };
                self.replies()
                    .insert(item.fingerprint.clone(), unfinished.clone());
                unfinished
            }
        };

        let total = chunks.len();
        for (index, chunk) in chunks.iter().enumerate().skip(delivered) {
            let started = Instant::now();
            if let Err(e) = self.sink.deliver(key, chunk).await {
                return Err(match index {
                    0 => e,
                    _ => ProcessError::PartialDelivery {
                        delivered: index,
                        total,
                        reason: e.to_string(),
                    },
                });
            }
            if let Some(unfinished) = self.replies().get_mut(&item.fingerprint) {
                unfinished.delivered = index + 1;
            }
            let delivery_ms = metrics::millis(started.elapsed());
            metrics::call_duration_ms().record(
                delivery_ms as f64,
                &[KeyValue::new("operation", "delivery")],
            );
            debug!(key = %key, chunk = index + 1, total, delivery_ms, "chunk delivered");
        }

        self.replies().remove(&item.fingerprint);
        Ok(())
    }

    async fn on_failure(&self, item: &WorkItem<Inbound>, failure: &Failure) {
        if failure.will_retry {
            return;
        }
        self.replies().remove(&item.fingerprint);
        let Some(ref notice) = self.failure_notice else {
            return;
        };
        if let Err(e) = self.sink.deliver(&item.key, notice).await {
            warn!(key = %item.key, error = %e, "failure notice not delivered");
        }
    }
}
