//! Control-plane collaborator traits.
//!
//! The storage service and the compute service keep notification wiring and
//! permission policies independently. Each concern gets its own trait so a
//! component only receives the capability it needs.
//!
//! | Trait | Operations | Used by |
//! |-------|------------|---------|
//! | [`NotificationControlPlane`] | get/put bucket notification config | reader, applier |
//! | [`PermissionControlPlane`] | get policy, add/remove statement | reader, permission sync |
//! | [`AddressResolver`] | resolve a target's deployed address | planner, teardown |
//!
//! Handles are passed explicitly through [`ControlPlanes`]; nothing here is
//! a process-wide singleton.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::permission::{PermissionStatement, Policy};
use crate::subscription::NotificationConfiguration;

/// Bucket notification configuration access.
///
/// The storage control plane has no patch operation: writers read the full
/// configuration, modify it, and put it back.
#[async_trait]
pub trait NotificationControlPlane: Send + Sync + 'static {
    /// Reads the bucket's full notification configuration.
    ///
    /// Returns `Error::NotFound` if the bucket does not exist.
    async fn get_notification_config(&self, bucket: &str) -> Result<NotificationConfiguration>;

    /// Replaces the bucket's full notification configuration.
    async fn put_notification_config(
        &self,
        bucket: &str,
        config: NotificationConfiguration,
    ) -> Result<()>;
}

/// Target permission policy access.
#[async_trait]
pub trait PermissionControlPlane: Send + Sync + 'static {
    /// Reads the policy of `target_id` (under `qualifier` when set).
    ///
    /// Returns `Error::NotFound` if the target has no policy.
    async fn get_policy(&self, target_id: &str, qualifier: Option<&str>) -> Result<Policy>;

    /// Adds a statement.
    ///
    /// Fails if a statement with the same id already exists.
    async fn add_permission(&self, statement: &PermissionStatement) -> Result<()>;

    /// Removes a statement by id.
    ///
    /// Returns `Error::NotFound` if the statement does not exist.
    async fn remove_permission(
        &self,
        target_id: &str,
        statement_id: &str,
        qualifier: Option<&str>,
    ) -> Result<()>;
}

/// Resolution of logical target names to deployed addresses.
#[async_trait]
pub trait AddressResolver: Send + Sync + 'static {
    /// Returns the fully qualified address of `target_id`, or `None` if the
    /// target is not deployed.
    async fn resolve_address(&self, target_id: &str) -> Result<Option<String>>;
}

/// Bundle of control-plane handles for one run.
#[derive(Clone)]
pub struct ControlPlanes {
    /// Bucket notification access.
    pub notifications: Arc<dyn NotificationControlPlane>,
    /// Target permission access.
    pub permissions: Arc<dyn PermissionControlPlane>,
    /// Target address resolution.
    pub resolver: Arc<dyn AddressResolver>,
}

impl ControlPlanes {
    /// Creates a bundle from individual handles.
    #[must_use]
    pub fn new(
        notifications: Arc<dyn NotificationControlPlane>,
        permissions: Arc<dyn PermissionControlPlane>,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        Self {
            notifications,
            permissions,
            resolver,
        }
    }

    /// Uses one backend for every concern.
    #[must_use]
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: NotificationControlPlane + PermissionControlPlane + AddressResolver,
    {
        Self {
            notifications: backend.clone(),
            permissions: backend.clone(),
            resolver: backend,
        }
    }
}

impl std::fmt::Debug for ControlPlanes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlanes")
            .field("notifications", &"dyn NotificationControlPlane")
            .field("permissions", &"dyn PermissionControlPlane")
            .field("resolver", &"dyn AddressResolver")
            .finish()
    }
}
