//! Dedup window: recently seen fingerprints with a fixed retention.
//!
//! Upstream delivery is at-least-once, so the same message can arrive more
//! than once. A fingerprint seen within the retention interval is rejected.
//! Expiry is checked lazily on lookup; expired entries are also swept out
//! whenever the window has grown past its sweep threshold.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use crate::model::Fingerprint;

/// Entries beyond which an insert triggers a sweep of expired fingerprints.
const SWEEP_THRESHOLD: usize = 1024;

pub struct DedupWindow {
    retention: Duration,
    seen: Mutex<Seen>,
}

struct Seen {
    expiries: HashMap<Fingerprint, Instant>,
    next_sweep_at: usize,
}

impl DedupWindow {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            seen: Mutex::new(Seen {
                expiries: HashMap::new(),
                next_sweep_at: SWEEP_THRESHOLD,
            }),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Returns `false` if `fingerprint` was seen and has not expired.
    /// Otherwise records it with a fresh expiry and returns `true`.
    pub fn should_process(&self, fingerprint: &Fingerprint) -> bool {
        let now = Instant::now();
        let mut seen = self.lock();

        if let Some(expiry) = seen.expiries.get(fingerprint)
            && *expiry > now
        {
            return false;
        }

        seen.expiries.insert(fingerprint.clone(), now + self.retention);

        if seen.expiries.len() >= seen.next_sweep_at {
            seen.expiries.retain(|_, expiry| *expiry > now);
            seen.next_sweep_at = (seen.expiries.len() * 2).max(SWEEP_THRESHOLD);
        }

        true
    }

    /// Drop every expired entry now.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut seen = self.lock();
        let before = seen.expiries.len();
        seen.expiries.retain(|_, expiry| *expiry > now);
        before - seen.expiries.len()
    }

    /// Number of tracked fingerprints, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.lock().expiries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Seen> {
        // The map is valid after any panic mid-insert; keep going.
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
