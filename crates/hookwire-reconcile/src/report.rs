//! Run report.
//!
//! Every unit of work (bucket write, target permission sync) gets its own
//! outcome. Failures are collected here instead of being folded into one
//! opaque error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::permissions::PermissionPhase;

// ============================================================================
// Unit Outcomes
// ============================================================================

/// Outcome of one unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitStatus {
    /// The unit converged.
    Succeeded,
    /// The unit was not attempted.
    Skipped {
        /// Why it was skipped.
        reason: String,
    },
    /// The unit was attempted and failed.
    Failed {
        /// Rendered error.
        error: String,
    },
}

impl UnitStatus {
    /// Creates a skipped status.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    /// Creates a failed status from any error.
    #[must_use]
    pub fn failed(error: &impl std::fmt::Display) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    /// Returns true for `Succeeded`.
    #[must_use]
    pub fn is_succeeded(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true for `Failed`.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Outcome of one bucket's notification write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketOutcome {
    /// Bucket name.
    pub bucket: String,
    /// Unit status.
    #[serde(flatten)]
    pub status: UnitStatus,
    /// Entries added (including in-place replacements).
    pub added: usize,
    /// Entries removed.
    pub removed: usize,
    /// Entries left untouched, foreign ones included.
    pub kept: usize,
    /// Owned entries kept because removal was withheld.
    #[serde(default)]
    pub withheld: usize,
    /// Whether a configuration was written.
    #[serde(default)]
    pub written: bool,
}

impl BucketOutcome {
    /// Creates an outcome with zero counts.
    #[must_use]
    pub fn new(bucket: impl Into<String>, status: UnitStatus) -> Self {
        Self {
            bucket: bucket.into(),
            status,
            added: 0,
            removed: 0,
            kept: 0,
            withheld: 0,
            written: false,
        }
    }
}

/// Permission phases visited for one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementTrace {
    /// Statement id.
    pub statement_id: String,
    /// Bucket the statement grants access from.
    pub bucket: String,
    /// Phases in the order they were entered.
    pub phases: Vec<PermissionPhase>,
}

/// Outcome of permission work on one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutcome {
    /// Logical target name.
    pub target: String,
    /// Unit status.
    #[serde(flatten)]
    pub status: UnitStatus,
    /// One trace per statement synchronized.
    #[serde(default)]
    pub statements: Vec<StatementTrace>,
    /// Statement ids added.
    #[serde(default)]
    pub granted: Vec<String>,
    /// Statement ids removed.
    #[serde(default)]
    pub revoked: Vec<String>,
}

impl TargetOutcome {
    /// Creates an outcome with no recorded work.
    #[must_use]
    pub fn new(target: impl Into<String>, status: UnitStatus) -> Self {
        Self {
            target: target.into(),
            status,
            statements: Vec::new(),
            granted: Vec::new(),
            revoked: Vec::new(),
        }
    }
}

// ============================================================================
// Run Report
// ============================================================================

/// Overall status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// No unit failed.
    Success,
    /// Some units failed, all under `continue_on_error`.
    PartialFailure,
    /// A unit failed without `continue_on_error`.
    Failure,
    /// The run was cancelled before every unit was attempted.
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::PartialFailure => "partial_failure",
            Self::Failure => "failure",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Report of one convergence or teardown run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    /// `converge` or `teardown`.
    pub operation: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Overall status.
    pub status: RunStatus,
    /// Per-bucket outcomes, in bucket-name order.
    pub buckets: Vec<BucketOutcome>,
    /// Per-target outcomes, in target-name order.
    pub targets: Vec<TargetOutcome>,
    /// Non-fatal conditions worth a human look.
    pub warnings: Vec<String>,
}

impl ApplyReport {
    /// Starts an empty report.
    #[must_use]
    pub fn begin(operation: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            operation: operation.into(),
            started_at: now,
            finished_at: now,
            status: RunStatus::Success,
            buckets: Vec::new(),
            targets: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Records a warning and logs it.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(operation = %self.operation, "{message}");
        self.warnings.push(message);
    }

    /// Returns the outcome for `bucket`.
    #[must_use]
    pub fn bucket(&self, bucket: &str) -> Option<&BucketOutcome> {
        self.buckets.iter().find(|b| b.bucket == bucket)
    }

    /// Returns the outcome for `target`.
    #[must_use]
    pub fn target(&self, target: &str) -> Option<&TargetOutcome> {
        self.targets.iter().find(|t| t.target == target)
    }

    /// Returns the outcome for `target`, creating a succeeded one if absent.
    pub fn target_mut(&mut self, target: &str) -> &mut TargetOutcome {
        let index = match self.targets.iter().position(|t| t.target == target) {
            Some(index) => index,
            None => {
                self.targets
                    .push(TargetOutcome::new(target, UnitStatus::Succeeded));
                self.targets.len() - 1
            }
        };
        &mut self.targets[index]
    }

    /// Number of failed units.
    #[must_use]
    pub fn failed_units(&self) -> usize {
        self.buckets.iter().filter(|b| b.status.is_failed()).count()
            + self.targets.iter().filter(|t| t.status.is_failed()).count()
    }

    /// Number of skipped units.
    #[must_use]
    pub fn skipped_units(&self) -> usize {
        self.buckets
            .iter()
            .filter(|b| matches!(b.status, UnitStatus::Skipped { .. }))
            .count()
            + self
                .targets
                .iter()
                .filter(|t| matches!(t.status, UnitStatus::Skipped { .. }))
                .count()
    }

    /// Sorts outcomes, stamps the finish time and derives the run status.
    pub fn finish(&mut self, continue_on_error: bool, cancelled: bool) {
        self.buckets.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        self.targets.sort_by(|a, b| a.target.cmp(&b.target));
        self.finished_at = Utc::now();
        self.status = if self.failed_units() > 0 {
            if continue_on_error {
                RunStatus::PartialFailure
            } else {
                RunStatus::Failure
            }
        } else if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Success
        };
    }

    /// Returns false for `Failure` and `Cancelled`.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.status, RunStatus::Success | RunStatus::PartialFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_reflects_failures_and_policy() {
        let mut report = ApplyReport::begin("converge");
        report.buckets.push(BucketOutcome::new("b", UnitStatus::Succeeded));
        report.finish(false, false);
        assert_eq!(report.status, RunStatus::Success);
        assert!(report.is_success());

        report
            .buckets
            .push(BucketOutcome::new("a", UnitStatus::failed(&"boom")));
        report.finish(true, false);
        assert_eq!(report.status, RunStatus::PartialFailure);
        assert!(report.is_success());
        assert_eq!(report.buckets[0].bucket, "a");

        report.finish(false, false);
        assert_eq!(report.status, RunStatus::Failure);
        assert!(!report.is_success());
    }

    #[test]
    fn cancelled_run_is_not_success() {
        let mut report = ApplyReport::begin("converge");
        report
            .buckets
            .push(BucketOutcome::new("a", UnitStatus::skipped("cancelled")));
        report.finish(true, true);
        assert_eq!(report.status, RunStatus::Cancelled);
        assert!(!report.is_success());
        assert_eq!(report.skipped_units(), 1);
    }

    #[test]
    fn target_mut_creates_once() {
        let mut report = ApplyReport::begin("teardown");
        report.target_mut("resize").revoked.push("sid".into());
        report.target_mut("resize").revoked.push("sid2".into());
        assert_eq!(report.targets.len(), 1);
        assert_eq!(report.target("resize").unwrap().revoked.len(), 2);
    }

    #[test]
    fn outcomes_serialize_with_flat_status() {
        let outcome = BucketOutcome::new("photos", UnitStatus::skipped("cancelled"));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "skipped");
        assert_eq!(value["reason"], "cancelled");
        let back: BucketOutcome = serde_json::from_value(value).unwrap();
        assert_eq!(back, outcome);
    }
}
