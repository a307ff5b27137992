//! Teardown of decommissioned targets.
//!
//! Removes every owned notification entry pointing at a target in the buckets
//! the declared configuration associates with it, then revokes the target's
//! owned statements for those buckets. Entries are removed before their
//! permissions so no entry is ever left without a grant.
//!
//! With a qualifier configured, statements are revoked from both the
//! qualified and the unqualified policy. Policies of other qualifiers are
//! not visited.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Instant;

use futures::stream::{self, StreamExt};
use hookwire_core::ReconcileConfig;

use crate::applier::{ConvergentApplier, Run, record_revocations};
use crate::desired::{self, DeclaredConfig, buckets_for_target};
use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::reconciler::BucketPlan;
use crate::report::{ApplyReport, BucketOutcome, TargetOutcome, UnitStatus};

impl ConvergentApplier {
    /// Removes all owned wiring and statements of `targets`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidDeclaration` for malformed declarations. Without
    /// `continue_on_error`, an unresolvable target aborts the run before any
    /// mutation.
    #[tracing::instrument(skip_all, fields(targets = targets.len()))]
    pub async fn teardown(&self, declared: &DeclaredConfig, targets: &[String]) -> Result<ApplyReport> {
        let started = Instant::now();
        let run = self.start_run();
        let groups = desired::build(declared)?;
        let mut report = ApplyReport::begin("teardown");

        let mut addresses: BTreeMap<String, String> = BTreeMap::new();
        for target in targets.iter().collect::<BTreeSet<_>>() {
            let problem = match run.reader.resolve_base(target).await {
                Ok(Some(address)) => {
                    addresses.insert(target.clone(), address);
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
            report.warn(format!("target '{target}' skipped: {problem}"));
            report
                .targets
                .push(TargetOutcome::new(target.as_str(), UnitStatus::skipped("not deployed")));
        }

        let mut per_bucket: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut target_buckets: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (target, address) in &addresses {
            let buckets = buckets_for_target(&groups, target);
            if buckets.is_empty() {
                report.warn(format!("target '{target}' has no declared subscriptions"));
            }
            for bucket in &buckets {
                per_bucket
                    .entry(bucket.clone())
                    .or_default()
                    .push(address.clone());
            }
            report.target_mut(target);
            target_buckets.insert(target.clone(), buckets);
        }

        let outcomes: Vec<BucketOutcome> = stream::iter(per_bucket)
            .map(|(bucket, addresses)| {
                let run = &run;
                async move { self.teardown_bucket(run, &bucket, &addresses).await }
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        let cleared: HashSet<String> = outcomes
            .iter()
            .filter(|o| o.status.is_succeeded())
            .map(|o| o.bucket.clone())
            .collect();
        report.buckets.extend(outcomes);

        // Entries at the base address were removed too, so their unqualified grants go as well.
        let unqualified = self.config.qualifier.is_some().then(|| {
            self.start_run_with(&ReconcileConfig {
                qualifier: None,
                ..self.config.clone()
            })
        });
        let keep = HashSet::new();
        let revocations: Vec<(String, Result<Vec<String>>)> = stream::iter(&target_buckets)
            .map(|(target, buckets)| {
                let cleared_buckets: Vec<String> = buckets
                    .iter()
                    .filter(|b| cleared.contains(*b))
                    .cloned()
                    .collect();
                let (run, keep, unqualified) = (&run, &keep, unqualified.as_ref());
                async move {
                    let result = match (
                        self.revoke_in_buckets(run, target, &cleared_buckets, keep).await,
                        unqualified,
                    ) {
                        (Ok(mut revoked), Some(sweep)) => self
                            .revoke_in_buckets(sweep, target, &cleared_buckets, keep)
                            .await
                            .map(|more| {
                                revoked.extend(more);
                                revoked
                            }),
                        (result, _) => result,
                    };
                    (target.clone(), result)
                }
            })
            .buffer_unordered(self.config.max_in_flight)
            .collect()
            .await;
        for (target, result) in revocations {
            let pending = target_buckets
                .get(&target)
                .map_or(0, |b| b.iter().filter(|b| !cleared.contains(*b)).count());
            if pending > 0 {
                report.warn(format!(
                    "target '{target}': statements kept for {pending} bucket(s) whose entries could not be removed"
                ));
            }
            record_revocations(&mut report, &target, result);
        }

        report.finish(self.config.continue_on_error, self.cancel.is_cancelled());
        metrics::record_run_duration("teardown", started.elapsed().as_secs_f64());
        tracing::info!(status = ?report.status, failed = report.failed_units(), "teardown finished");
        Ok(report)
    }

    async fn teardown_bucket(&self, run: &Run, bucket: &str, addresses: &[String]) -> BucketOutcome {
        let observed = match run.reader.fetch(bucket).await {
            Ok(observed) => observed,
            Err(e) => {
                tracing::error!(bucket = %bucket, error = %e, "failed to read bucket");
                return BucketOutcome::new(bucket, UnitStatus::failed(&e));
            }
        };
        let plan = BucketPlan::removing(&self.config.namespace, bucket, &observed, |entry| {
            addresses
                .iter()
                .any(|address| points_at(&entry.target_address, address))
        });
        self.write_bucket(run, &plan).await
    }
}

/// True if `entry_address` is `address` or a qualified form of it.
fn points_at(entry_address: &str, address: &str) -> bool {
    entry_address
        .strip_prefix(address)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
}
