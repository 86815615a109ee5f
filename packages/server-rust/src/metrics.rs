//! Metrics instrumentation.
//!
//! Uses the `metrics` facade; nothing is recorded unless the host process
//! installs a recorder.
//!
//! # Metric Naming Convention
//! - `datacache_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms

use std::time::Duration;

use datacache_core::DataMethod;
use metrics::{counter, histogram};

/// Record one backing store call and whether it succeeded.
pub fn record_store_call(method: DataMethod, ok: bool) {
    counter!(
        "datacache_store_calls_total",
        "method" => method.as_str(),
        "outcome" => if ok { "ok" } else { "error" }
    )
    .increment(1);
}

/// Record a save suppressed by the development-environment setting.
pub fn record_suppressed_save() {
    counter!("datacache_suppressed_saves_total").increment(1);
}

/// Record one completed auto-save sweep.
pub fn record_sweep(instances: usize, failed_keys: usize, elapsed: Duration) {
    counter!("datacache_autosave_sweeps_total").increment(1);
    counter!("datacache_autosave_failed_keys_total").increment(failed_keys as u64);
    histogram!("datacache_autosave_sweep_instances").record(instances as f64);
    histogram!("datacache_autosave_sweep_seconds").record(elapsed.as_secs_f64());
}
