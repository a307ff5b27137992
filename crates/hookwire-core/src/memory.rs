//! In-memory control plane.
//!
//! Implements every control-plane trait over a single [`WorldSnapshot`]:
//! bucket notification configurations, target policies and deployed target
//! addresses. Used by tests and by the CLI, which loads a snapshot from disk,
//! runs against it and writes the mutated snapshot back.
//!
//! Semantics follow the remote services where it matters to reconciliation:
//! - unknown buckets and missing policies are `Error::NotFound`
//! - adding a statement whose id already exists is rejected
//! - removing a missing statement is `Error::NotFound`
//! - permissions can only be attached to deployed targets

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::control_plane::{AddressResolver, NotificationControlPlane, PermissionControlPlane};
use crate::error::{Error, Result};
use crate::permission::{PermissionStatement, Policy};
use crate::subscription::NotificationConfiguration;

/// Serializable state of every remote resource the engine touches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorldSnapshot {
    /// Notification configuration per bucket.
    #[serde(default)]
    pub buckets: BTreeMap<String, NotificationConfiguration>,
    /// Policy per target, keyed by `target` or `target:qualifier`.
    #[serde(default)]
    pub policies: BTreeMap<String, Policy>,
    /// Unqualified deployed address per target.
    #[serde(default)]
    pub targets: BTreeMap<String, String>,
}

impl WorldSnapshot {
    /// Key under which a (possibly qualified) policy is stored.
    #[must_use]
    pub fn policy_key(target_id: &str, qualifier: Option<&str>) -> String {
        match qualifier {
            Some(q) => format!("{target_id}:{q}"),
            None => target_id.to_string(),
        }
    }
}

/// Thread-safe in-memory control plane.
#[derive(Debug, Default, Clone)]
pub struct MemoryControlPlane {
    world: Arc<RwLock<WorldSnapshot>>,
}

impl MemoryControlPlane {
    /// Creates an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a control plane seeded with `snapshot`.
    #[must_use]
    pub fn from_snapshot(snapshot: WorldSnapshot) -> Self {
        Self {
            world: Arc::new(RwLock::new(snapshot)),
        }
    }

    /// Returns a copy of the current state.
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` if the state lock is poisoned.
    pub fn snapshot(&self) -> Result<WorldSnapshot> {
        Ok(self.read()?.clone())
    }

    /// Registers a deployed target.
    pub fn deploy_target(&self, target_id: impl Into<String>, address: impl Into<String>) -> Result<()> {
        self.write()?.targets.insert(target_id.into(), address.into());
        Ok(())
    }

    /// Creates a bucket with the given configuration.
    pub fn put_bucket(&self, bucket: impl Into<String>, config: NotificationConfiguration) -> Result<()> {
        self.write()?.buckets.insert(bucket.into(), config);
        Ok(())
    }

    /// Replaces a target's policy.
    pub fn put_policy(&self, target_id: &str, qualifier: Option<&str>, policy: Policy) -> Result<()> {
        self.write()?
            .policies
            .insert(WorldSnapshot::policy_key(target_id, qualifier), policy);
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, WorldSnapshot>> {
        self.world.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, WorldSnapshot>> {
        self.world.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })
    }
}

#[async_trait]
impl NotificationControlPlane for MemoryControlPlane {
    async fn get_notification_config(&self, bucket: &str) -> Result<NotificationConfiguration> {
        self.read()?
            .buckets
            .get(bucket)
            .cloned()
            .ok_or_else(|| Error::not_found("bucket", bucket))
    }

    async fn put_notification_config(
        &self,
        bucket: &str,
        config: NotificationConfiguration,
    ) -> Result<()> {
        let mut world = self.write()?;
        let slot = world
            .buckets
            .get_mut(bucket)
            .ok_or_else(|| Error::not_found("bucket", bucket))?;
        *slot = config;
        Ok(())
    }
}

#[async_trait]
impl PermissionControlPlane for MemoryControlPlane {
    async fn get_policy(&self, target_id: &str, qualifier: Option<&str>) -> Result<Policy> {
        let key = WorldSnapshot::policy_key(target_id, qualifier);
        self.read()?
            .policies
            .get(&key)
            .filter(|p| !p.statements.is_empty())
            .cloned()
            .ok_or_else(|| Error::not_found("policy", key))
    }

    async fn add_permission(&self, statement: &PermissionStatement) -> Result<()> {
        let mut world = self.write()?;
        if !world.targets.contains_key(&statement.target_id) {
            return Err(Error::not_found("function", &statement.target_id));
        }
        let key = WorldSnapshot::policy_key(&statement.target_id, statement.qualifier.as_deref());
        let policy = world.policies.entry(key).or_default();
        if policy.find(&statement.statement_id).is_some() {
            return Err(Error::control_plane(format!(
                "statement id '{}' already exists on {}",
                statement.statement_id, statement.target_id
            )));
        }
        policy.statements.push(statement.clone());
        Ok(())
    }

    async fn remove_permission(
        &self,
        target_id: &str,
        statement_id: &str,
        qualifier: Option<&str>,
    ) -> Result<()> {
        let key = WorldSnapshot::policy_key(target_id, qualifier);
        let mut world = self.write()?;
        let policy = world
            .policies
            .get_mut(&key)
            .ok_or_else(|| Error::not_found("policy", &key))?;
        let before = policy.statements.len();
        policy.statements.retain(|s| s.statement_id != statement_id);
        if policy.statements.len() == before {
            return Err(Error::not_found("statement", statement_id));
        }
        Ok(())
    }
}

#[async_trait]
impl AddressResolver for MemoryControlPlane {
    async fn resolve_address(&self, target_id: &str) -> Result<Option<String>> {
        Ok(self.read()?.targets.get(target_id).cloned())
    }
}
