//! Remote-state reader.
//!
//! Thin shim over the control planes. Its own responsibilities:
//!
//! - normalize a missing policy to an empty statement set
//! - memoize policy reads and address resolutions for the duration of one run
//! - single-flight concurrent requests for the same target, so two tasks asking
//!   for one policy issue one read
//!
//! A reader lives for one run. Nothing is cached across runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use hookwire_core::{
    ControlPlanes, Error as CoreError, NotificationConfiguration, ObservedSubscription,
    PermissionStatement, ReconcileConfig,
};
use tokio::sync::OnceCell;

use crate::error::{ReconcileError, Result};
use crate::metrics;

type Memo<V> = Mutex<HashMap<String, Arc<OnceCell<V>>>>;

/// Per-run reader over the control planes.
pub struct RemoteStateReader {
    planes: ControlPlanes,
    config: ReconcileConfig,
    policies: Memo<Arc<Vec<PermissionStatement>>>,
    addresses: Memo<Option<String>>,
}

impl std::fmt::Debug for RemoteStateReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStateReader")
            .field("planes", &self.planes)
            .field("qualifier", &self.config.qualifier)
            .finish_non_exhaustive()
    }
}

impl RemoteStateReader {
    /// Creates a reader with empty memos.
    #[must_use]
    pub fn new(planes: ControlPlanes, config: ReconcileConfig) -> Self {
        Self {
            planes,
            config,
            policies: Mutex::new(HashMap::new()),
            addresses: Mutex::new(HashMap::new()),
        }
    }

    /// Reads the full notification configuration of `bucket`.
    pub async fn fetch_config(&self, bucket: &str) -> Result<NotificationConfiguration> {
        self.planes
            .notifications
            .get_notification_config(bucket)
            .await
            .map_err(|e| ReconcileError::remote(format!("bucket {bucket}"), e))
    }

    /// Reads the function entries currently on `bucket`.
    pub async fn fetch(&self, bucket: &str) -> Result<Vec<ObservedSubscription>> {
        Ok(self.fetch_config(bucket).await?.function_configurations)
    }

    /// Returns the statements on `target_id`'s policy, memoized per run.
    ///
    /// A missing policy is an empty statement set.
    pub async fn fetch_policy(&self, target_id: &str) -> Result<Arc<Vec<PermissionStatement>>> {
        let qualifier = self.config.qualifier.as_deref();
        memoized(&self.policies, target_id, || async move {
            metrics::record_permission_op("read");
            match self.planes.permissions.get_policy(target_id, qualifier).await {
                Ok(policy) => Ok(Arc::new(policy.statements)),
                Err(e) if e.is_not_found() => {
                    tracing::debug!(target = %target_id, "no policy, treating as empty");
                    Ok(Arc::new(Vec::new()))
                }
                Err(e) => Err(ReconcileError::remote(format!("target {target_id}"), e)),
            }
        })
        .await
    }

    /// Forgets the memoized policy of `target_id` after a mutation.
    pub fn invalidate_policy(&self, target_id: &str) -> Result<()> {
        lock(&self.policies)?.remove(target_id);
        Ok(())
    }

    /// Resolves `target_id` to its unqualified deployed address, memoized per run.
    pub async fn resolve_base(&self, target_id: &str) -> Result<Option<String>> {
        memoized(&self.addresses, target_id, || async move {
            self.planes
                .resolver
                .resolve_address(target_id)
                .await
                .map_err(|e| ReconcileError::remote(format!("target {target_id}"), e))
        })
        .await
    }

    /// Resolves `target_id` to the address notification entries point at.
    ///
    /// Carries the configured qualifier when one is set.
    pub async fn resolve(&self, target_id: &str) -> Result<Option<String>> {
        Ok(self
            .resolve_base(target_id)
            .await?
            .map(|address| self.config.qualify(&address)))
    }
}

async fn memoized<V, F, Fut>(memo: &Memo<V>, key: &str, init: F) -> Result<V>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V>>,
{
    let cell = lock(memo)?
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(OnceCell::new()))
        .clone();
    cell.get_or_try_init(init).await.cloned()
}

fn lock<V>(memo: &Memo<V>) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<OnceCell<V>>>>> {
    memo.lock().map_err(|_| {
        ReconcileError::Core(CoreError::Internal {
            message: "lock poisoned".into(),
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwire_core::{MemoryControlPlane, Policy};
    use hookwire_test_utils::{ControlPlaneOp, RecordingControlPlane};
    use std::time::Duration;

    const ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:resize";

    #[tokio::test]
    async fn missing_policy_reads_as_empty() {
        let plane = Arc::new(MemoryControlPlane::new());
        let reader = RemoteStateReader::new(ControlPlanes::from_backend(plane), ReconcileConfig::default());
        assert!(reader.fetch_policy("resize").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_policy_reads_are_single_flight() {
        let recording = Arc::new(RecordingControlPlane::new().with_latency(Duration::from_millis(20)));
        recording.inner().deploy_target("resize", ARN).unwrap();
        recording.inner().put_policy("resize", None, Policy::default()).unwrap();
        let reader = RemoteStateReader::new(
            ControlPlanes::from_backend(recording.clone()),
            ReconcileConfig::default(),
        );

        let (a, b, c) = tokio::join!(
            reader.fetch_policy("resize"),
            reader.fetch_policy("resize"),
            reader.fetch_policy("resize"),
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(
            recording.count(|op| matches!(op, ControlPlaneOp::GetPolicy { .. })),
            1
        );

        reader.invalidate_policy("resize").unwrap();
        reader.fetch_policy("resize").await.unwrap();
        assert_eq!(
            recording.count(|op| matches!(op, ControlPlaneOp::GetPolicy { .. })),
            2
        );
    }

    #[tokio::test]
    async fn failed_read_is_not_memoized() {
        let recording = Arc::new(RecordingControlPlane::new());
        recording.fail_target("resize");
        let reader = RemoteStateReader::new(
            ControlPlanes::from_backend(recording.clone()),
            ReconcileConfig::default(),
        );
        assert!(reader.fetch_policy("resize").await.is_err());
        recording.clear_failures();
        assert!(reader.fetch_policy("resize").await.is_ok());
    }

    #[tokio::test]
    async fn resolve_applies_qualifier() {
        let plane = Arc::new(MemoryControlPlane::new());
        plane.deploy_target("resize", ARN).unwrap();
        let config = ReconcileConfig {
            qualifier: Some("live".into()),
            ..ReconcileConfig::default()
        };
        let reader = RemoteStateReader::new(ControlPlanes::from_backend(plane), config);
        assert_eq!(reader.resolve("resize").await.unwrap(), Some(format!("{ARN}:live")));
        assert_eq!(reader.resolve_base("resize").await.unwrap().as_deref(), Some(ARN));
        assert_eq!(reader.resolve("ghost").await.unwrap(), None);
    }

    #[tokio::test]
    async fn unknown_bucket_is_a_remote_error() {
        let plane = Arc::new(MemoryControlPlane::new());
        let reader = RemoteStateReader::new(ControlPlanes::from_backend(plane), ReconcileConfig::default());
        let err = reader.fetch("missing").await.unwrap_err();
        let ReconcileError::Remote { unit, source } = err else {
            panic!("expected a remote error, got {err:?}");
        };
        assert_eq!(unit, "bucket missing");
        assert!(source.is_not_found());
    }
}
