//! Permission synchronizer.
//!
//! Ensures the invoke-permission statement a wiring needs exists on its
//! target, as an explicit state machine:
//!
//! ```text
//! Unknown ─read─▶ PolicyRead ─┬─▶ NoStatement ───────────add─▶ Granted
//!                             ├─▶ StaleStatement ─remove─▶ Revoked ─add─▶ Granted
//!                             └─▶ CurrentStatement ─────────────▶ Granted
//! ```
//!
//! The remote API rejects duplicate statement ids, so a stale statement is
//! always revoked before the replacement is added. Calls for one target must
//! be issued sequentially; the applier runs one task per target.

use std::collections::HashSet;
use std::sync::Arc;

use hookwire_core::observability::permission_span;
use hookwire_core::{
    Namespace, PermissionControlPlane, PermissionStatement, ReconcileConfig, ResolvedSubscription,
    bucket_arn,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::{ReconcileError, Result};
use crate::metrics;
use crate::remote::RemoteStateReader;

/// State of one statement during synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionState {
    /// Nothing read yet.
    Unknown,
    /// Policy read; `existing` is the statement under the derived id, if any.
    PolicyRead {
        /// Statement found under the derived id.
        existing: Option<PermissionStatement>,
    },
    /// No statement under the derived id.
    NoStatement,
    /// A statement exists under the derived id but grants different access.
    StaleStatement {
        /// The outdated statement.
        existing: PermissionStatement,
    },
    /// The statement under the derived id is current.
    CurrentStatement,
    /// The stale statement was removed.
    Revoked,
    /// The desired statement is in place.
    Granted,
}

/// Phase label of a [`PermissionState`], recorded in run reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionPhase {
    /// See [`PermissionState::Unknown`].
    Unknown,
    /// See [`PermissionState::PolicyRead`].
    PolicyRead,
    /// See [`PermissionState::NoStatement`].
    NoStatement,
    /// See [`PermissionState::StaleStatement`].
    StaleStatement,
    /// See [`PermissionState::CurrentStatement`].
    CurrentStatement,
    /// See [`PermissionState::Revoked`].
    Revoked,
    /// See [`PermissionState::Granted`].
    Granted,
}

impl PermissionState {
    /// Phase label of this state.
    #[must_use]
    pub fn phase(&self) -> PermissionPhase {
        match self {
            Self::Unknown => PermissionPhase::Unknown,
            Self::PolicyRead { .. } => PermissionPhase::PolicyRead,
            Self::NoStatement => PermissionPhase::NoStatement,
            Self::StaleStatement { .. } => PermissionPhase::StaleStatement,
            Self::CurrentStatement => PermissionPhase::CurrentStatement,
            Self::Revoked => PermissionPhase::Revoked,
            Self::Granted => PermissionPhase::Granted,
        }
    }

    /// Classifies a policy lookup against the desired statement.
    #[must_use]
    pub fn classify(existing: Option<PermissionStatement>, desired: &PermissionStatement) -> Self {
        match existing {
            None => Self::NoStatement,
            Some(existing) if existing.grants_same_access(desired) => Self::CurrentStatement,
            Some(existing) => Self::StaleStatement { existing },
        }
    }
}

/// Result of [`PermissionSynchronizer::ensure_permission`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionSync {
    /// The statement now in place.
    pub statement: PermissionStatement,
    /// Phases entered, in order.
    pub trace: Vec<PermissionPhase>,
    /// Whether a statement was added.
    pub granted: bool,
    /// Id of a revoked stale statement.
    pub revoked: Option<String>,
}

/// Drives permission statements to their desired state.
#[derive(Clone)]
pub struct PermissionSynchronizer {
    permissions: Arc<dyn PermissionControlPlane>,
    reader: Arc<RemoteStateReader>,
    namespace: Namespace,
    qualifier: Option<String>,
}

impl std::fmt::Debug for PermissionSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionSynchronizer")
            .field("permissions", &"dyn PermissionControlPlane")
            .field("namespace", &self.namespace)
            .field("qualifier", &self.qualifier)
            .finish_non_exhaustive()
    }
}

impl PermissionSynchronizer {
    /// Creates a synchronizer sharing `reader`'s policy memo.
    #[must_use]
    pub fn new(
        permissions: Arc<dyn PermissionControlPlane>,
        reader: Arc<RemoteStateReader>,
        config: &ReconcileConfig,
    ) -> Self {
        Self {
            permissions,
            reader,
            namespace: config.namespace.clone(),
            qualifier: config.qualifier.clone(),
        }
    }

    /// The statement `wiring` requires.
    #[must_use]
    pub fn desired_statement(&self, wiring: &ResolvedSubscription) -> PermissionStatement {
        PermissionStatement::for_wiring(&self.namespace, wiring, self.qualifier.as_deref())
    }

    /// Ensures the statement for `wiring` exists and is current.
    pub async fn ensure_permission(&self, wiring: &ResolvedSubscription) -> Result<PermissionSync> {
        let desired = self.desired_statement(wiring);
        let target = wiring.target_id();
        let span = permission_span("ensure", target);

        async {
            let mut trace = Vec::new();
            let mut granted = false;
            let mut revoked = None;
            let mut state = PermissionState::Unknown;

            loop {
                trace.push(state.phase());
                state = match state {
                    PermissionState::Unknown => {
                        let statements = self.reader.fetch_policy(target).await?;
                        PermissionState::PolicyRead {
                            existing: statements
                                .iter()
                                .find(|s| s.statement_id == desired.statement_id)
                                .cloned(),
                        }
                    }
                    PermissionState::PolicyRead { existing } => {
                        PermissionState::classify(existing, &desired)
                    }
                    PermissionState::NoStatement | PermissionState::Revoked => {
                        self.grant(&desired).await?;
                        granted = true;
                        PermissionState::Granted
                    }
                    PermissionState::StaleStatement { existing } => {
                        tracing::info!(
                            statement_id = %existing.statement_id,
                            source_arn = %existing.source_arn,
                            "replacing stale statement"
                        );
                        self.revoke(target, &existing.statement_id).await?;
                        revoked = Some(existing.statement_id);
                        PermissionState::Revoked
                    }
                    PermissionState::CurrentStatement => PermissionState::Granted,
                    PermissionState::Granted => break,
                };
            }

            Ok::<_, ReconcileError>(PermissionSync {
                statement: desired.clone(),
                trace,
                granted,
                revoked,
            })
        }
        .instrument(span)
        .await
    }

    /// Revokes owned statements on `target_id` sourced from `bucket` whose
    /// ids are not in `keep`. Returns the revoked ids.
    pub async fn revoke_superseded(
        &self,
        target_id: &str,
        bucket: &str,
        keep: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let source_arn = bucket_arn(bucket);
        let statements = self.reader.fetch_policy(target_id).await?;
        let superseded: Vec<String> = statements
            .iter()
            .filter(|s| s.is_owned_by(&self.namespace))
            .filter(|s| s.source_arn == source_arn && !keep.contains(&s.statement_id))
            .map(|s| s.statement_id.clone())
            .collect();

        for statement_id in &superseded {
            tracing::info!(
                target = %target_id,
                bucket = %bucket,
                statement_id = %statement_id,
                "revoking superseded statement"
            );
            self.revoke(target_id, statement_id).await?;
        }
        Ok(superseded)
    }

    async fn grant(&self, statement: &PermissionStatement) -> Result<()> {
        metrics::record_permission_op("grant");
        let result = self.permissions.add_permission(statement).await;
        self.reader.invalidate_policy(&statement.target_id)?;
        result.map_err(|e| ReconcileError::remote(format!("target {}", statement.target_id), e))?;
        tracing::info!(statement_id = %statement.statement_id, source_arn = %statement.source_arn, "granted");
        Ok(())
    }

    async fn revoke(&self, target_id: &str, statement_id: &str) -> Result<()> {
        metrics::record_permission_op("revoke");
        let result = self
            .permissions
            .remove_permission(target_id, statement_id, self.qualifier.as_deref())
            .await;
        self.reader.invalidate_policy(target_id)?;
        match result {
            Ok(()) => Ok(()),
            // Already gone: the end state is the one we wanted.
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(ReconcileError::remote(format!("target {target_id}"), e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwire_core::{ControlPlanes, SubscriptionDescriptor};
    use hookwire_test_utils::{ControlPlaneOp, RecordingControlPlane, function_arn};

    fn setup(config: &ReconcileConfig) -> (Arc<RecordingControlPlane>, PermissionSynchronizer) {
        let plane = Arc::new(RecordingControlPlane::new());
        plane.inner().deploy_target("resize", function_arn("resize")).unwrap();
        let planes = ControlPlanes::from_backend(plane.clone());
        let reader = Arc::new(RemoteStateReader::new(planes.clone(), config.clone()));
        let sync = PermissionSynchronizer::new(planes.permissions, reader, config);
        (plane, sync)
    }

    fn wiring(bucket: &str) -> ResolvedSubscription {
        SubscriptionDescriptor::new("resize", bucket)
            .resolve(function_arn("resize"), &Namespace::default())
    }

    fn adds(plane: &RecordingControlPlane) -> usize {
        plane.count(|op| matches!(op, ControlPlaneOp::AddPermission { .. }))
    }

    fn removes(plane: &RecordingControlPlane) -> usize {
        plane.count(|op| matches!(op, ControlPlaneOp::RemovePermission { .. }))
    }

    #[test]
    fn classify_compares_access() {
        let config = ReconcileConfig::default();
        let desired = PermissionStatement::for_wiring(&config.namespace, &wiring("photos"), None);
        assert_eq!(PermissionState::classify(None, &desired), PermissionState::NoStatement);
        assert_eq!(
            PermissionState::classify(Some(desired.clone()), &desired),
            PermissionState::CurrentStatement
        );
        let mut other = desired.clone();
        other.source_arn = bucket_arn("elsewhere");
        assert!(matches!(
            PermissionState::classify(Some(other), &desired),
            PermissionState::StaleStatement { .. }
        ));
    }

    #[tokio::test]
    async fn missing_policy_grants_once() {
        let (plane, sync) = setup(&ReconcileConfig::default());
        let result = sync.ensure_permission(&wiring("photos")).await.unwrap();
        assert_eq!(
            result.trace,
            vec![
                PermissionPhase::Unknown,
                PermissionPhase::PolicyRead,
                PermissionPhase::NoStatement,
                PermissionPhase::Granted
            ]
        );
        assert!(result.granted);
        assert_eq!(adds(&plane), 1);
        assert_eq!(removes(&plane), 0);
    }

    #[tokio::test]
    async fn current_statement_is_left_alone() {
        let (plane, sync) = setup(&ReconcileConfig::default());
        sync.ensure_permission(&wiring("photos")).await.unwrap();
        plane.clear_operations();

        let result = sync.ensure_permission(&wiring("photos")).await.unwrap();
        assert_eq!(
            result.trace,
            vec![
                PermissionPhase::Unknown,
                PermissionPhase::PolicyRead,
                PermissionPhase::CurrentStatement,
                PermissionPhase::Granted
            ]
        );
        assert!(!result.granted);
        assert!(plane.mutations().is_empty());
    }

    #[tokio::test]
    async fn stale_statement_is_revoked_before_grant() {
        let (plane, sync) = setup(&ReconcileConfig::default());
        let w = wiring("photos");
        let mut stale = sync.desired_statement(&w);
        stale.source_arn = bucket_arn("old-bucket");
        let policy = hookwire_core::Policy {
            statements: vec![stale.clone()],
        };
        plane.inner().put_policy("resize", None, policy).unwrap();

        let result = sync.ensure_permission(&w).await.unwrap();
        assert_eq!(
            result.trace,
            vec![
                PermissionPhase::Unknown,
                PermissionPhase::PolicyRead,
                PermissionPhase::StaleStatement,
                PermissionPhase::Revoked,
                PermissionPhase::Granted
            ]
        );
        assert_eq!(result.revoked.as_deref(), Some(stale.statement_id.as_str()));
        let mutations = plane.mutations();
        assert!(matches!(mutations[0], ControlPlaneOp::RemovePermission { .. }));
        assert!(matches!(mutations[1], ControlPlaneOp::AddPermission { .. }));
    }

    #[tokio::test]
    async fn add_failure_surfaces_as_remote_error() {
        let (plane, sync) = setup(&ReconcileConfig::default());
        plane.fail_target("resize");
        let err = sync.ensure_permission(&wiring("photos")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Remote { .. }));
    }

    #[tokio::test]
    async fn revoke_superseded_keeps_current_and_other_buckets() {
        let (plane, sync) = setup(&ReconcileConfig::default());
        let current = wiring("photos");
        let old = SubscriptionDescriptor::new("resize", "photos")
            .with_filter_rule("prefix", "old/")
            .resolve(function_arn("resize"), &Namespace::default());
        sync.ensure_permission(&current).await.unwrap();
        sync.ensure_permission(&old).await.unwrap();
        sync.ensure_permission(&wiring("logs")).await.unwrap();

        let keep = HashSet::from([sync.desired_statement(&current).statement_id]);
        let revoked = sync.revoke_superseded("resize", "photos", &keep).await.unwrap();
        assert_eq!(revoked, vec![sync.desired_statement(&old).statement_id]);

        let policy = plane.inner().snapshot().unwrap().policies["resize"].clone();
        assert_eq!(policy.statements.len(), 2);
    }
}
