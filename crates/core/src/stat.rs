#![forbid(unsafe_code)]

pub const QUEUE_SUCCESS: &str = "queue.success";
pub const QUEUE_FAIL: &str = "queue.fail";
pub const JOB_DISCOVER: &str = "job.discover";
pub const JOB_APPLY: &str = "job.apply";
pub const JOB_FAIL: &str = "job.fail";
pub const SUBMIT_RETRY: &str = "job.submit.retry";

/// Narrow metrics sink. Implementations must be cheap and must not fail.
pub trait StatSink: Send + Sync {
    fn increment(&self, operation: &str);
    fn timer(&self, operation: &str, duration_ms: u64);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStat;

impl StatSink for NoopStat {
    fn increment(&self, _operation: &str) {}

    fn timer(&self, _operation: &str, _duration_ms: u64) {}
}
