// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Emits through the [`metrics`](https://docs.rs/metrics) facade; install any
//! recorder (Prometheus exporter, etc.) in the host application to collect
//! them. Without a recorder every call is a no-op.
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `store_replication_` and follow Prometheus
//! conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)

use crate::task::TaskState;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a round being started (scheduled or on demand).
pub fn record_round_started() {
    counter!("store_replication_rounds_started_total").increment(1);
}

/// Record a settled round and how long it took.
pub fn record_round_outcome(outcome: &str, duration: Duration) {
    counter!("store_replication_rounds_total", "outcome" => outcome.to_string()).increment(1);
    histogram!("store_replication_round_duration_seconds", "outcome" => outcome.to_string())
        .record(duration.as_secs_f64());
}

/// Record a task's terminal state.
pub fn record_task_outcome(doctype: &str, state: TaskState) {
    counter!(
        "store_replication_tasks_total",
        "doctype" => doctype.to_string(),
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record documents collected by a completed task.
pub fn record_task_docs(doctype: &str, changed: usize, filtered: usize) {
    counter!("store_replication_docs_changed_total", "doctype" => doctype.to_string())
        .increment(changed as u64);
    if filtered > 0 {
        counter!("store_replication_docs_filtered_total", "doctype" => doctype.to_string())
            .increment(filtered as u64);
    }
}

/// Record a scheduled tick that did not start a round.
pub fn record_tick_skipped(reason: &str) {
    counter!("store_replication_ticks_skipped_total", "reason" => reason.to_string()).increment(1);
}

/// Record scheduler running state (1 = running, 0 = stopped).
pub fn set_scheduler_running(running: bool) {
    gauge!("store_replication_scheduler_running").set(if running { 1.0 } else { 0.0 });
}

/// Record a device lifecycle signal handled by the bridge.
pub fn record_lifecycle_event(event: &str) {
    counter!("store_replication_lifecycle_events_total", "event" => event.to_string()).increment(1);
}

/// Record a store destroy.
pub fn record_store_destroy(doctype: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("store_replication_store_destroys_total", "doctype" => doctype.to_string(), "status" => status)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without a recorder installed these are no-ops; make sure none panic.
    #[test]
    fn test_metrics_without_recorder() {
        record_round_started();
        record_round_outcome("synced", Duration::from_millis(12));
        record_task_outcome("todos", TaskState::Completed);
        record_task_docs("todos", 3, 1);
        record_task_docs("todos", 0, 0);
        record_tick_skipped("offline");
        set_scheduler_running(true);
        set_scheduler_running(false);
        record_lifecycle_event("pause");
        record_store_destroy("todos", true);
    }
}
