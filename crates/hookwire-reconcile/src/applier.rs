//! Convergent applier.
//!
//! A convergence pass runs in three phases:
//!
//! 1. **Plan**: build the desired state, resolve every target, read every
//!    declared bucket and diff. An unresolved target aborts here, before any
//!    mutation, unless `continue_on_error` is set.
//! 2. **Permissions**: ensure the statement of every resolved wiring. One
//!    task per target (sequential within it), targets run concurrently.
//! 3. **Notifications**: one read-modify-write per bucket, buckets run
//!    concurrently. Without `continue_on_error`, any permission failure skips
//!    this phase entirely.
//!
//! Afterwards, superseded owned statements are pruned for buckets that
//! converged. Cancellation is checked before each bucket and target.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use futures::stream::{self, StreamExt};
use hookwire_core::observability::reconcile_span;
use hookwire_core::{ControlPlanes, ReconcileConfig, ResolvedSubscription};
use serde::Serialize;
use tracing::Instrument;

use crate::cancel::CancellationFlag;
use crate::desired::{self, DeclaredConfig};
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::permissions::PermissionSynchronizer;
use crate::reconciler::{BucketPlan, diff};
use crate::remote::RemoteStateReader;
use crate::report::{ApplyReport, BucketOutcome, StatementTrace, TargetOutcome, UnitStatus};

/// Output of the planning phase.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergencePlan {
    /// One plan per readable declared bucket, in bucket-name order.
    pub buckets: Vec<BucketPlan>,
    /// Every resolved desired wiring on a readable bucket.
    #[serde(skip)]
    pub wirings: Vec<ResolvedSubscription>,
    /// Buckets whose configuration could not be read, with the error.
    pub failed_reads: Vec<(String, String)>,
    /// Targets skipped because they could not be resolved.
    pub unresolved_targets: Vec<String>,
    /// Warnings raised while planning.
    pub warnings: Vec<String>,
}

impl ConvergencePlan {
    /// Returns true if no bucket would change.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.buckets.iter().all(BucketPlan::is_noop)
    }

    /// Total additions across buckets.
    #[must_use]
    pub fn additions(&self) -> usize {
        self.buckets.iter().map(|b| b.additions.len()).sum()
    }

    /// Total removals across buckets.
    #[must_use]
    pub fn removals(&self) -> usize {
        self.buckets.iter().map(|b| b.removals.len()).sum()
    }
}

/// Per-run collaborators. The policy memo lives exactly as long as this.
pub(crate) struct Run {
    pub(crate) reader: Arc<RemoteStateReader>,
    pub(crate) sync: PermissionSynchronizer,
}

/// Orchestrates convergence and teardown runs.
#[derive(Clone)]
pub struct ConvergentApplier {
    pub(crate) planes: ControlPlanes,
    pub(crate) config: ReconcileConfig,
    pub(crate) cancel: CancellationFlag,
}

impl std::fmt::Debug for ConvergentApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvergentApplier")
            .field("planes", &self.planes)
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl ConvergentApplier {
    /// Creates an applier.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(planes: ControlPlanes, config: ReconcileConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            planes,
            config,
            cancel: CancellationFlag::new(),
        })
    }

    /// Uses `flag` for whole-run cancellation.
    #[must_use]
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = flag;
        self
    }

    /// The flag that cancels runs of this applier.
    #[must_use]
    pub fn cancellation(&self) -> CancellationFlag {
        self.cancel.clone()
    }

    /// The run configuration.
    #[must_use]
    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub(crate) fn start_run(&self) -> Run {
        self.start_run_with(&self.config)
    }

    pub(crate) fn start_run_with(&self, config: &ReconcileConfig) -> Run {
        let reader = Arc::new(RemoteStateReader::new(self.planes.clone(), config.clone()));
        let sync = PermissionSynchronizer::new(
            Arc::clone(&self.planes.permissions),
            Arc::clone(&reader),
            config,
        );
        Run { reader, sync }
    }

    /// Computes per-bucket plans without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDeclaration` for malformed declarations. Without
    /// `continue_on_error`, returns `NotDeployed` (or the resolver's error)
    /// for the first target that cannot be resolved.
    pub async fn plan(&self, declared: &DeclaredConfig) -> Result<ConvergencePlan> {
        self.plan_with(&self.start_run(), declared).await
    }

    /// Applies a plan and reports per-unit outcomes.
    pub async fn apply(&self, plan: ConvergencePlan) -> ApplyReport {
        self.apply_with(&self.start_run(), plan).await
    }

    /// Plans and applies in one run.
    ///
    /// # Errors
    ///
    /// Fails only where [`Self::plan`] fails; everything after planning is
    /// reported per unit.
    #[tracing::instrument(skip_all, fields(functions = declared.functions.len()))]
    pub async fn converge(&self, declared: &DeclaredConfig) -> Result<ApplyReport> {
        let run = self.start_run();
        let plan = self.plan_with(&run, declared).await?;
        Ok(self.apply_with(&run, plan).await)
    }

    async fn plan_with(&self, run: &Run, declared: &DeclaredConfig) -> Result<ConvergencePlan> {
        let namespace = &self.config.namespace;
        let groups = desired::build(declared)?;
        let mut plan = ConvergencePlan::default();

        let targets: BTreeSet<String> = groups
            .iter()
            .flat_map(|g| g.descriptors.iter().map(|d| d.target_id.clone()))
            .collect();
        let mut resolutions: Vec<(String, Result<Option<String>>)> = stream::iter(targets)
            .map(|target| async move {
                let resolved = run.reader.resolve(&target).await;
                (target, resolved)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        resolutions.sort_by(|a, b| a.0.cmp(&b.0));

        let mut addresses: HashMap<String, String> = HashMap::new();
        for (target, resolved) in resolutions {
            let problem = match resolved {
                Ok(Some(address)) => {
                    addresses.insert(target, address);
                    continue;
                }
                Ok(None) => ReconcileError::NotDeployed {
                    target: target.clone(),
                },
                Err(e) => e,
            };
            if !self.config.continue_on_error {
                return Err(problem);
            }
            metrics::record_skip("not_deployed");
            tracing::warn!(target = %target, error = %problem, "skipping unresolved target");
            plan.warnings
                .push(format!("target '{target}' skipped: {problem}"));
            plan.unresolved_targets.push(target);
        }

        let pending: Vec<(String, Vec<ResolvedSubscription>, usize)> = groups
            .into_iter()
            .map(|group| {
                let mut resolved = Vec::new();
                let mut skipped = 0;
                for descriptor in group.descriptors {
                    match addresses.get(&descriptor.target_id) {
                        Some(address) => resolved.push(descriptor.resolve(address.clone(), namespace)),
                        None => skipped += 1,
                    }
                }
                (group.bucket, resolved, skipped)
            })
            .collect();

        let reads: Vec<_> = stream::iter(pending)
            .map(|(bucket, resolved, skipped)| async move {
                let observed = run.reader.fetch(&bucket).await;
                (bucket, resolved, skipped, observed)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;

        for (bucket, resolved, skipped, observed) in reads {
            let observed = match observed {
                Ok(observed) => observed,
                Err(e) => {
                    tracing::error!(bucket = %bucket, error = %e, "failed to read bucket");
                    plan.failed_reads.push((bucket, e.to_string()));
                    continue;
                }
            };

            let mut bucket_plan = diff(namespace, &bucket, &resolved, &observed);
            if skipped > 0 {
                let withheld = bucket_plan.withhold_removals();
                if withheld > 0 {
                    tracing::warn!(bucket = %bucket, withheld, skipped, "withholding removals");
                    plan.warnings.push(format!(
                        "bucket '{bucket}': kept {withheld} owned entries because {skipped} wiring(s) could not be resolved"
                    ));
                }
            }
            tracing::debug!(
                bucket = %bucket,
                additions = bucket_plan.additions.len(),
                removals = bucket_plan.removals.len(),
                unchanged = bucket_plan.unchanged.len(),
                "planned bucket"
            );
            plan.wirings.extend(resolved);
            plan.buckets.push(bucket_plan);
        }

        plan.buckets.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        plan.failed_reads.sort();
        Ok(plan)
    }

    async fn apply_with(&self, run: &Run, plan: ConvergencePlan) -> ApplyReport {
        let started = Instant::now();
        let mut report = ApplyReport::begin("converge");
        let ConvergencePlan {
            buckets,
            wirings,
            failed_reads,
            unresolved_targets,
            warnings,
        } = plan;

        report.warnings.extend(warnings);
        for (bucket, error) in failed_reads {
            report
                .buckets
                .push(BucketOutcome::new(bucket, UnitStatus::Failed { error }));
        }
        for target in unresolved_targets {
            report
                .targets
                .push(TargetOutcome::new(target, UnitStatus::skipped("not deployed")));
        }

        let mut by_target: BTreeMap<String, Vec<ResolvedSubscription>> = BTreeMap::new();
        // Fingerprints do not cover the bucket; one wiring on two buckets needs two grants.
        let mut seen = HashSet::new();
        for wiring in wirings {
            if seen.insert((wiring.bucket().to_string(), wiring.fingerprint.clone())) {
                by_target
                    .entry(wiring.target_id().to_string())
                    .or_default()
                    .push(wiring);
            }
        }

        // Phase 2: permissions.
        let target_outcomes: Vec<TargetOutcome> = stream::iter(&by_target)
            .map(|(target, wirings)| self.sync_target(run, target, wirings))
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        let failed_targets: HashSet<String> = target_outcomes
            .iter()
            .filter(|t| t.status.is_failed())
            .map(|t| t.target.clone())
            .collect();
        report.targets.extend(target_outcomes);

        // Phase 3: notifications.
        let mut to_write = Vec::with_capacity(buckets.len());
        if !failed_targets.is_empty() && !self.config.continue_on_error {
            report.warn(format!(
                "permission sync failed for {} target(s); notification writes skipped",
                failed_targets.len()
            ));
            for bucket_plan in buckets {
                metrics::record_skip("permission_failure");
                report.buckets.push(BucketOutcome::new(
                    bucket_plan.bucket,
                    UnitStatus::skipped("permission phase failed"),
                ));
            }
        } else {
            for mut bucket_plan in buckets {
                for dropped in bucket_plan.drop_additions_for(&failed_targets) {
                    report.warn(format!(
                        "bucket '{}': wiring for target '{}' not written because its permission failed",
                        bucket_plan.bucket,
                        dropped.target_id()
                    ));
                }
                to_write.push(bucket_plan);
            }
        }

        let written: Vec<(BucketPlan, BucketOutcome)> = stream::iter(to_write)
            .map(|bucket_plan| async move {
                let outcome = self.write_bucket(run, &bucket_plan).await;
                (bucket_plan, outcome)
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;

        // Prune statements only where the bucket now matches the desired state.
        let converged: Vec<String> = written
            .iter()
            .filter(|(plan, outcome)| outcome.status.is_succeeded() && plan.withheld.is_empty())
            .map(|(plan, _)| plan.bucket.clone())
            .collect();
        report
            .buckets
            .extend(written.into_iter().map(|(_, outcome)| outcome));

        if self.config.prune_permissions && !converged.is_empty() {
            let prunable: Vec<(&String, HashSet<String>)> = by_target
                .iter()
                .filter(|(target, _)| !failed_targets.contains(*target))
                .map(|(target, wirings)| {
                    let keep = wirings
                        .iter()
                        .map(|w| run.sync.desired_statement(w).statement_id)
                        .collect();
                    (target, keep)
                })
                .collect();
            let pruned: Vec<(String, Result<Vec<String>>)> = stream::iter(prunable)
                .map(|(target, keep)| {
                    let converged = &converged;
                    async move {
                        let result = self.revoke_in_buckets(run, target, converged, &keep).await;
                        (target.clone(), result)
                    }
                })
                .buffer_unordered(self.config.max_in_flight)
                .collect()
                .await;
            for (target, result) in pruned {
                record_revocations(&mut report, &target, result);
            }
        }

        report.finish(self.config.continue_on_error, self.cancel.is_cancelled());
        metrics::record_run_duration("converge", started.elapsed().as_secs_f64());
        tracing::info!(
            status = ?report.status,
            buckets = report.buckets.len(),
            targets = report.targets.len(),
            failed = report.failed_units(),
            "convergence finished"
        );
        report
    }

    async fn sync_target(
        &self,
        run: &Run,
        target: &str,
        wirings: &[ResolvedSubscription],
    ) -> TargetOutcome {
        if self.cancel.is_cancelled() {
            metrics::record_skip("cancelled");
            return TargetOutcome::new(target, UnitStatus::skipped("cancelled"));
        }

        let mut outcome = TargetOutcome::new(target, UnitStatus::Succeeded);
        for wiring in wirings {
            match run.sync.ensure_permission(wiring).await {
                Ok(sync) => {
                    let statement_id = sync.statement.statement_id;
                    if sync.granted {
                        outcome.granted.push(statement_id.clone());
                    }
                    outcome.revoked.extend(sync.revoked);
                    outcome.statements.push(StatementTrace {
                        statement_id,
                        bucket: wiring.bucket().to_string(),
                        phases: sync.trace,
                    });
                }
                Err(e) => {
                    tracing::error!(target = %target, bucket = %wiring.bucket(), error = %e, "permission sync failed");
                    outcome.status = UnitStatus::failed(&e);
                    break;
                }
            }
        }
        outcome
    }

    /// Revokes superseded statements of `target` in each bucket, sequentially.
    pub(crate) async fn revoke_in_buckets(
        &self,
        run: &Run,
        target: &str,
        buckets: &[String],
        keep: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let mut revoked = Vec::new();
        for bucket in buckets {
            if self.cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
            revoked.extend(run.sync.revoke_superseded(target, bucket, keep).await?);
        }
        Ok(revoked)
    }

    /// Writes one bucket plan: fresh read, merge, full put.
    pub(crate) async fn write_bucket(&self, run: &Run, plan: &BucketPlan) -> BucketOutcome {
        let span = reconcile_span("write_bucket", &plan.bucket);
        async {
            if self.cancel.is_cancelled() {
                metrics::record_skip("cancelled");
                return BucketOutcome::new(&plan.bucket, UnitStatus::skipped("cancelled"));
            }

            let mut outcome = BucketOutcome::new(&plan.bucket, UnitStatus::Succeeded);
            outcome.withheld = plan.withheld.len();
            if plan.is_noop() {
                metrics::record_bucket_write("noop");
                tracing::debug!("bucket already converged");
                outcome.kept = plan.unchanged.len() + plan.withheld.len();
                return outcome;
            }

            match self.merge_and_put(run, plan).await {
                Ok(()) => {
                    metrics::record_bucket_write("succeeded");
                    outcome.added = plan.additions.len();
                    outcome.removed = plan.removals.len();
                    outcome.kept = plan.unchanged.len() + plan.withheld.len();
                    outcome.written = true;
                    tracing::info!(
                        added = outcome.added,
                        removed = outcome.removed,
                        kept = outcome.kept,
                        "bucket converged"
                    );
                }
                Err(e) => {
                    metrics::record_bucket_write("failed");
                    tracing::error!(error = %e, "bucket write failed");
                    outcome.status = UnitStatus::failed(&e);
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn merge_and_put(&self, run: &Run, plan: &BucketPlan) -> Result<()> {
        let fresh = run.reader.fetch_config(&plan.bucket).await?;
        let merged = plan.merge_into(&self.config.namespace, fresh)?;
        self.planes
            .notifications
            .put_notification_config(&plan.bucket, merged)
            .await
            .map_err(|e| ReconcileError::remote(format!("bucket {}", plan.bucket), e))
    }
}

/// Folds a revocation result into the target's outcome.
pub(crate) fn record_revocations(
    report: &mut ApplyReport,
    target: &str,
    result: Result<Vec<String>>,
) {
    match result {
        Ok(revoked) => report.target_mut(target).revoked.extend(revoked),
        Err(ReconcileError::Cancelled) => {
            report.warn(format!("target '{target}': revocation cancelled"));
        }
        Err(e) => {
            tracing::error!(target = %target, error = %e, "revocation failed");
            report.target_mut(target).status = UnitStatus::failed(&e);
        }
    }
}
