//! Control plane with operation tracing.
//!
//! Wraps [`MemoryControlPlane`] and records every call for test assertions.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hookwire_core::error::{Error, Result};
use hookwire_core::{
    AddressResolver, MemoryControlPlane, NotificationConfiguration, NotificationControlPlane,
    PermissionControlPlane, PermissionStatement, Policy,
};

/// Record of a control-plane call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneOp {
    /// Bucket notification read.
    GetNotificationConfig {
        /// Bucket read.
        bucket: String,
    },
    /// Bucket notification write.
    PutNotificationConfig {
        /// Bucket written.
        bucket: String,
        /// Number of function entries written.
        entries: usize,
    },
    /// Policy read.
    GetPolicy {
        /// Target read.
        target: String,
    },
    /// Statement added.
    AddPermission {
        /// Target the statement was added to.
        target: String,
        /// Statement id.
        statement_id: String,
    },
    /// Statement removed.
    RemovePermission {
        /// Target the statement was removed from.
        target: String,
        /// Statement id.
        statement_id: String,
    },
    /// Address resolution.
    ResolveAddress {
        /// Target resolved.
        target: String,
    },
}

impl ControlPlaneOp {
    /// Returns true for calls that change remote state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::PutNotificationConfig { .. }
                | Self::AddPermission { .. }
                | Self::RemovePermission { .. }
        )
    }
}

/// In-memory control plane with operation tracing and failure injection.
///
/// Failed calls are recorded too, so tests can assert on what was attempted.
#[derive(Debug, Clone, Default)]
pub struct RecordingControlPlane {
    inner: MemoryControlPlane,
    operations: Arc<Mutex<Vec<ControlPlaneOp>>>,
    fail_buckets: Arc<Mutex<HashSet<String>>>,
    fail_bucket_writes: Arc<Mutex<HashSet<String>>>,
    fail_targets: Arc<Mutex<HashSet<String>>>,
    latency: Option<Duration>,
}

impl RecordingControlPlane {
    /// Creates an empty control plane.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing in-memory control plane.
    pub fn wrapping(inner: MemoryControlPlane) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    /// Adds simulated latency to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// The wrapped control plane, for seeding state without recording.
    pub fn inner(&self) -> &MemoryControlPlane {
        &self.inner
    }

    /// Returns all recorded operations.
    pub fn operations(&self) -> Vec<ControlPlaneOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Counts recorded operations matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&ControlPlaneOp) -> bool) -> usize {
        self.operations
            .lock()
            .expect("lock")
            .iter()
            .filter(|op| predicate(op))
            .count()
    }

    /// Returns recorded mutations only.
    pub fn mutations(&self) -> Vec<ControlPlaneOp> {
        self.operations()
            .into_iter()
            .filter(ControlPlaneOp::is_mutation)
            .collect()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Fails every read and write of `bucket`.
    pub fn fail_bucket(&self, bucket: impl Into<String>) {
        self.fail_buckets.lock().expect("lock").insert(bucket.into());
    }

    /// Fails writes of `bucket`; reads still succeed.
    pub fn fail_bucket_writes(&self, bucket: impl Into<String>) {
        self.fail_bucket_writes
            .lock()
            .expect("lock")
            .insert(bucket.into());
    }

    /// Fails every permission call on `target`.
    pub fn fail_target(&self, target: impl Into<String>) {
        self.fail_targets.lock().expect("lock").insert(target.into());
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        self.fail_buckets.lock().expect("lock").clear();
        self.fail_bucket_writes.lock().expect("lock").clear();
        self.fail_targets.lock().expect("lock").clear();
    }

    fn record(&self, op: ControlPlaneOp) {
        self.operations.lock().expect("lock").push(op);
    }

    fn check(&self, set: &Mutex<HashSet<String>>, key: &str) -> Result<()> {
        if set.lock().expect("lock").contains(key) {
            return Err(Error::control_plane(format!("injected failure for {key}")));
        }
        Ok(())
    }

    async fn maybe_delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl NotificationControlPlane for RecordingControlPlane {
    async fn get_notification_config(&self, bucket: &str) -> Result<NotificationConfiguration> {
        self.record(ControlPlaneOp::GetNotificationConfig {
            bucket: bucket.to_string(),
        });
        self.maybe_delay().await;
        self.check(&self.fail_buckets, bucket)?;
        self.inner.get_notification_config(bucket).await
    }

    async fn put_notification_config(
        &self,
        bucket: &str,
        config: NotificationConfiguration,
    ) -> Result<()> {
        self.record(ControlPlaneOp::PutNotificationConfig {
            bucket: bucket.to_string(),
            entries: config.function_configurations.len(),
        });
        self.maybe_delay().await;
        self.check(&self.fail_buckets, bucket)?;
        self.check(&self.fail_bucket_writes, bucket)?;
        self.inner.put_notification_config(bucket, config).await
    }
}

#[async_trait]
impl PermissionControlPlane for RecordingControlPlane {
    async fn get_policy(&self, target_id: &str, qualifier: Option<&str>) -> Result<Policy> {
        self.record(ControlPlaneOp::GetPolicy {
            target: target_id.to_string(),
        });
        self.maybe_delay().await;
        self.check(&self.fail_targets, target_id)?;
        self.inner.get_policy(target_id, qualifier).await
    }

    async fn add_permission(&self, statement: &PermissionStatement) -> Result<()> {
        self.record(ControlPlaneOp::AddPermission {
            target: statement.target_id.clone(),
            statement_id: statement.statement_id.clone(),
        });
        self.maybe_delay().await;
        self.check(&self.fail_targets, &statement.target_id)?;
        self.inner.add_permission(statement).await
    }

    async fn remove_permission(
        &self,
        target_id: &str,
        statement_id: &str,
        qualifier: Option<&str>,
    ) -> Result<()> {
        self.record(ControlPlaneOp::RemovePermission {
            target: target_id.to_string(),
            statement_id: statement_id.to_string(),
        });
        self.maybe_delay().await;
        self.check(&self.fail_targets, target_id)?;
        self.inner
            .remove_permission(target_id, statement_id, qualifier)
            .await
    }
}

#[async_trait]
impl AddressResolver for RecordingControlPlane {
    async fn resolve_address(&self, target_id: &str) -> Result<Option<String>> {
        self.record(ControlPlaneOp::ResolveAddress {
            target: target_id.to_string(),
        });
        self.maybe_delay().await;
        self.inner.resolve_address(target_id).await
    }
}
