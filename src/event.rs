//! Structured events emitted by the dispatcher and its workers.
//!
//! Subscribers get every submission outcome and every item transition, in
//! the order each key produced them. Events are the engine's voice; the
//! tracing output is for operators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Fingerprint, Key};

/// A structured event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number. Consumers can detect gaps.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Accepted {
        key: Key,
        fingerprint: Fingerprint,
        depth: usize,
    },
    Duplicate {
        key: Key,
        fingerprint: Fingerprint,
    },
    WorkerStarted {
        key: Key,
    },
    Completed {
        key: Key,
        fingerprint: Fingerprint,
        attempt: u32,
        duration_ms: u64,
    },
    Failed {
        key: Key,
        fingerprint: Fingerprint,
        attempt: u32,
        error: String,
        will_retry: bool,
    },
    Dropped {
        key: Key,
        fingerprint: Fingerprint,
        attempts: u32,
        reason: String,
    },
    KeyDrained {
        key: Key,
        processed: u64,
    },
}

impl EventKind {
    pub fn key(&self) -> &Key {
        match self {
            EventKind::Accepted { key, .. }
            | EventKind::Duplicate { key, .. }
            | EventKind::WorkerStarted { key }
            | EventKind::Completed { key, .. }
            | EventKind::Failed { key, .. }
            | EventKind::Dropped { key, .. }
            | EventKind::KeyDrained { key, .. } => key,
        }
    }
}
