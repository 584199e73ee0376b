//! Item processing span helpers.
//!
//! One span per processing attempt, with state transitions recorded as
//! events inside it.

use tracing::Span;

use crate::model::{Fingerprint, Key};

/// Start a span for one attempt at processing an item.
pub fn start_item_span(key: &Key, fingerprint: &Fingerprint, attempt: u32) -> Span {
    tracing::info_span!(
        "item.process",
        "item.key" = %key,
        "item.fingerprint" = %fingerprint,
        "item.attempt" = attempt,
    )
}

/// Record a state transition event on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
