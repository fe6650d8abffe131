#![forbid(unsafe_code)]

use pr_core::StatSink;

/// Reports stats as `tracing` events under the `pr_worker::stat` target.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingStat;

impl StatSink for TracingStat {
    fn increment(&self, operation: &str) {
        tracing::info!(target: "pr_worker::stat", operation, "increment");
    }

    fn timer(&self, operation: &str, duration_ms: u64) {
        tracing::info!(target: "pr_worker::stat", operation, duration_ms, "timer");
    }
}
