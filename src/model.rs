//! Core data model.
//!
//! A work item is one inbound event for one identity. Its key decides which
//! queue it lands in, its fingerprint decides whether it is a redelivery.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Identity that defines a serialization boundary (a user or session id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Fingerprint
// ---------------------------------------------------------------------------

/// Dedup identity of an item, usually the upstream message id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(fp: impl Into<String>) -> Self {
        Self(fp.into())
    }

    /// A fingerprint for an item with no natural id. Never collides, so such
    /// items are never mistaken for redeliveries.
    pub fn synthetic() -> Self {
        Self(format!(
            "synthetic:{}:{}",
            Utc::now().timestamp_micros(),
            Uuid::new_v4()
        ))
    }

    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with("synthetic:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One unit of enqueued work for a key.
///
/// The payload is shared so a worker can hand the item to a processing task
/// and still hold it for a retry.
#[derive(Debug)]
pub struct WorkItem<T> {
    pub key: Key,
    pub fingerprint: Fingerprint,
    pub payload: Arc<T>,
    /// Diagnostics only.
    pub enqueued_at: DateTime<Utc>,
    /// Processing attempts already made.
    pub attempts: u32,
}

impl<T> Clone for WorkItem<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            fingerprint: self.fingerprint.clone(),
            payload: Arc::clone(&self.payload),
            enqueued_at: self.enqueued_at,
            attempts: self.attempts,
        }
    }
}

impl<T> WorkItem<T> {
    /// Redacted one-line description for logs. Never includes the payload.
    pub fn summary(&self) -> String {
        format!(
            "key={} fingerprint={} attempts={} enqueued_at={}",
            self.key,
            self.fingerprint,
            self.attempts,
            self.enqueued_at.format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for an item about to be submitted.
pub struct NewWorkItem<T> {
    pub(crate) payload: T,
    pub(crate) fingerprint: Option<Fingerprint>,
}

impl<T> NewWorkItem<T> {
    pub fn new(payload: T) -> Self {
        Self {
            payload,
            fingerprint: None,
        }
    }

    pub fn fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.fingerprint = Some(Fingerprint::new(fp));
        self
    }

    /// Set the fingerprint if the upstream event carried an id.
    pub fn maybe_fingerprint(mut self, fp: Option<String>) -> Self {
        self.fingerprint = fp.filter(|s| !s.is_empty()).map(Fingerprint::new);
        self
    }

    pub(crate) fn into_item(self, key: Key) -> WorkItem<T> {
        WorkItem {
            key,
            fingerprint: self.fingerprint.unwrap_or_else(Fingerprint::synthetic),
            payload: Arc::new(self.payload),
            enqueued_at: Utc::now(),
            attempts: 0,
        }
    }
}
