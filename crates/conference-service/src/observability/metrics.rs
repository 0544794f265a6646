//! Metrics definitions for the conference service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `conf_` prefix for the conference service
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `operation`: bounded by code (repository method names)
//! - `status`: 2 values (success, error)
//! - `event`: bounded by the switch/domain event vocabularies
//! - `reason`: 4 values (command, empty_db, empty_switch, stale)

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder with a standalone HTTP exporter.
///
/// Must be called once, before any metrics are recorded, from within a
/// tokio runtime (the exporter listener runs on it).
///
/// # Errors
///
/// Returns an error if the bind address is invalid or a recorder is
/// already installed.
pub fn init_metrics_recorder(bind_address: &str) -> Result<(), String> {
    let addr: SocketAddr = bind_address
        .parse()
        .map_err(|e| format!("Invalid metrics bind address '{bind_address}': {e}"))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        // DB query buckets: single-row guarded updates, sub-100ms expected
        .set_buckets_for_metric(
            Matcher::Prefix("conf_db_query".to_string()),
            &[
                0.001, 0.002, 0.005, 0.010, 0.020, 0.050, 0.100, 0.250, 0.500, 1.000,
            ],
        )
        .map_err(|e| format!("Failed to set DB query buckets: {e}"))?
        // Switch query buckets: network round trip bounded by the query timeout
        .set_buckets_for_metric(
            Matcher::Prefix("conf_switch_query".to_string()),
            &[0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000],
        )
        .map_err(|e| format!("Failed to set switch query buckets: {e}"))?
        .install()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record a database query completion.
///
/// Metric: `conf_db_queries_total`, `conf_db_query_duration_seconds`
/// Labels: `operation`, `status`
pub fn record_db_query(operation: &'static str, status: &'static str, duration: Duration) {
    histogram!("conf_db_query_duration_seconds",
        "operation" => operation,
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("conf_db_queries_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record receipt of a switch event.
///
/// Metric: `conf_switch_events_total`
/// Labels: `event`
pub fn record_switch_event(event: &'static str) {
    counter!("conf_switch_events_total", "event" => event).increment(1);
}

/// Record a live switch membership query.
///
/// Metric: `conf_switch_queries_total`, `conf_switch_query_duration_seconds`
/// Labels: `status` (success, error)
pub fn record_switch_query(status: &'static str, duration: Duration) {
    histogram!("conf_switch_query_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
    counter!("conf_switch_queries_total", "status" => status).increment(1);
}

/// Record a conference reaching its terminal state.
///
/// Metric: `conf_conferences_ended_total`
/// Labels: `reason` (command, empty_db, empty_switch, stale)
pub fn record_conference_ended(reason: &'static str) {
    counter!("conf_conferences_ended_total", "reason" => reason).increment(1);
}

/// Record a reminder successfully dispatched.
///
/// Metric: `conf_reminders_sent_total`
pub fn record_reminder_sent() {
    counter!("conf_reminders_sent_total").increment(1);
}

/// Record a failed domain-event publish.
///
/// Metric: `conf_event_publish_failures_total`
/// Labels: `event`
pub fn record_publish_failure(event: &'static str) {
    counter!("conf_event_publish_failures_total", "event" => event).increment(1);
}

/// Record participants force-disconnected by the stale-connecting sweep.
///
/// Metric: `conf_stale_connecting_cleaned_total`
pub fn record_stale_connecting_cleaned(count: u64) {
    counter!("conf_stale_connecting_cleaned_total").increment(count);
}
