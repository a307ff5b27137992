//! Reconciliation metrics.
//!
//! Counters and a run histogram recorded through the `metrics` facade.
//! Recording is a no-op until the host installs a recorder.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// ============================================================================
// Metric Names
// ============================================================================

/// Bucket notification writes, labelled by `outcome`.
pub const BUCKET_WRITES: &str = "hookwire_bucket_writes_total";

/// Permission operations, labelled by `op` (`read`, `grant`, `revoke`).
pub const PERMISSION_OPS: &str = "hookwire_permission_ops_total";

/// Units skipped, labelled by `reason`.
pub const UNITS_SKIPPED: &str = "hookwire_units_skipped_total";

/// Duration of a full convergence or teardown run.
pub const CONVERGE_DURATION: &str = "hookwire_converge_duration_seconds";

// ============================================================================
// Metric Registration
// ============================================================================

/// Registers all reconciliation metric descriptions.
///
/// Call this once at application startup after initializing the metrics recorder.
pub fn register_metrics() {
    describe_counter!(BUCKET_WRITES, "Total bucket notification writes by outcome");
    describe_counter!(PERMISSION_OPS, "Total permission control-plane operations");
    describe_counter!(UNITS_SKIPPED, "Total buckets or targets skipped by reason");
    describe_histogram!(CONVERGE_DURATION, "Duration of reconciliation runs in seconds");
}

// ============================================================================
// Metric Recording
// ============================================================================

/// Records a bucket write attempt.
pub fn record_bucket_write(outcome: &'static str) {
    counter!(BUCKET_WRITES, "outcome" => outcome).increment(1);
}

/// Records a permission control-plane call.
pub fn record_permission_op(op: &'static str) {
    counter!(PERMISSION_OPS, "op" => op).increment(1);
}

/// Records a skipped unit of work.
pub fn record_skip(reason: &'static str) {
    counter!(UNITS_SKIPPED, "reason" => reason).increment(1);
}

/// Records the duration of a run.
pub fn record_run_duration(operation: &'static str, duration_secs: f64) {
    histogram!(CONVERGE_DURATION, "operation" => operation).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        register_metrics();
        record_bucket_write("succeeded");
        record_permission_op("grant");
        record_skip("not_deployed");
        record_run_duration("converge", 0.25);
    }
}
