//! Integration tests for telemetry initialization and span helpers.

use keyq::model::{Fingerprint, Key};

#[test]
fn telemetry_initializes_without_endpoint() {
    // A global subscriber can only be set once per process; another test
    // may already have set one, which is acceptable.
    let config = keyq::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "keyq-test".to_string(),
        log_level: "debug".to_string(),
    };
    if let Ok(guard) = keyq::telemetry::init_telemetry(config) {
        assert!(!guard.is_exporting());
        guard.force_flush();
    }
}

#[test]
fn chat_span_creates() {
    let span = keyq::telemetry::genai::start_chat_span(
        "claude-sonnet-4-20250514",
        "anthropic",
        "whatsapp:+100",
    );
    let _enter = span.enter();
}

#[test]
fn item_span_creates_and_records_transition() {
    let span = keyq::telemetry::work::start_item_span(
        &Key::from("u1"),
        &Fingerprint::new("m1"),
        1,
    );
    keyq::telemetry::work::record_state_transition(&span, "queued", "processing");
}

#[test]
fn metric_instruments_build_without_a_provider() {
    keyq::telemetry::metrics::items_submitted().add(1, &[]);
    keyq::telemetry::metrics::active_workers().add(1, &[]);
    keyq::telemetry::metrics::active_workers().add(-1, &[]);
    keyq::telemetry::metrics::item_duration_ms().record(1.0, &[]);
}

#[test]
fn millis_saturates_instead_of_truncating() {
    use keyq::telemetry::metrics::millis;
    use std::time::Duration;

    assert_eq!(millis(Duration::from_micros(2_500)), 2);
    assert_eq!(millis(Duration::MAX), u64::MAX);
}
