//! Desired-state builder.
//!
//! Turns the declared function definitions into normalized
//! [`SubscriptionDescriptor`]s grouped by bucket. This is the only component
//! that reads declared configuration; everything downstream works on
//! descriptors.
//!
//! ```json
//! {
//!   "functions": {
//!     "resize": {
//!       "name": "media-resize",
//!       "events": [
//!         { "kind": "existingS3", "bucket": "photos",
//!           "eventTypes": ["s3:ObjectCreated:*"],
//!           "filterRules": [{ "prefix": "images/" }, { "suffix": ".jpg" }] },
//!         { "kind": "http", "path": "/resize" }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Only `existingS3` events are subscriptions. Other kinds are dropped
//! without being parsed, so their shape is never validated here.

use std::collections::BTreeMap;

use hookwire_core::{FilterRule, SubscriptionDescriptor};
use serde::{Deserialize, Serialize};

use crate::error::{ReconcileError, Result};

/// Event kind marking an external bucket subscription.
pub const SUBSCRIPTION_EVENT_KIND: &str = "existingS3";

/// Declared configuration: function key to definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredConfig {
    /// Declared functions keyed by logical name.
    #[serde(default)]
    pub functions: BTreeMap<String, DeclaredFunction>,
}

/// One declared compute function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredFunction {
    /// Deployed function name. Falls back to the map key.
    #[serde(default)]
    pub name: Option<String>,
    /// Raw event definitions of every kind.
    #[serde(default)]
    pub events: Vec<serde_json::Value>,
}

/// A declared `existingS3` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionEvent {
    /// Bucket to subscribe to.
    #[serde(default)]
    pub bucket: Option<String>,
    /// Event types. Empty means the default event type.
    #[serde(default, alias = "bucketEvents")]
    pub event_types: Vec<String>,
    /// Filter rules; each map contributes one rule per key.
    #[serde(default, alias = "rules", alias = "eventRules")]
    pub filter_rules: Vec<BTreeMap<String, String>>,
}

/// Descriptors sharing one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketGroup {
    /// Bucket name.
    pub bucket: String,
    /// Declared wirings on this bucket.
    pub descriptors: Vec<SubscriptionDescriptor>,
}

impl DeclaredConfig {
    /// Parses a declared configuration from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| ReconcileError::InvalidDeclaration {
            message: e.to_string(),
        })
    }
}

impl DeclaredFunction {
    /// Target id used for address resolution and permissions.
    #[must_use]
    pub fn target_id<'a>(&'a self, key: &'a str) -> &'a str {
        self.name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(key)
    }
}

/// Builds the desired state, grouped by bucket.
///
/// Groups are returned in bucket-name order; the order carries no meaning.
pub fn build(declared: &DeclaredConfig) -> Result<Vec<BucketGroup>> {
    let mut groups: BTreeMap<String, Vec<SubscriptionDescriptor>> = BTreeMap::new();

    for (key, function) in &declared.functions {
        let target_id = function.target_id(key);
        for (index, raw) in function.events.iter().enumerate() {
            if raw.get("kind").and_then(serde_json::Value::as_str) != Some(SUBSCRIPTION_EVENT_KIND) {
                continue;
            }
            let event: SubscriptionEvent = serde_json::from_value(raw.clone()).map_err(|e| {
                ReconcileError::InvalidDeclaration {
                    message: format!("function '{key}' event {index}: {e}"),
                }
            })?;
            let descriptor = descriptor_for(target_id, key, index, event)?;
            groups
                .entry(descriptor.bucket.clone())
                .or_default()
                .push(descriptor);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(bucket, descriptors)| BucketGroup {
            bucket,
            descriptors,
        })
        .collect())
}

fn descriptor_for(
    target_id: &str,
    key: &str,
    index: usize,
    event: SubscriptionEvent,
) -> Result<SubscriptionDescriptor> {
    let bucket = event
        .bucket
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ReconcileError::InvalidDeclaration {
            message: format!("function '{key}' event {index}: missing bucket"),
        })?;

    let filter_rules = event
        .filter_rules
        .into_iter()
        .flat_map(|rule| rule.into_iter().map(|(kind, pattern)| FilterRule::new(kind, pattern)))
        .collect();

    Ok(SubscriptionDescriptor {
        target_id: target_id.to_string(),
        bucket: bucket.to_string(),
        event_types: event.event_types,
        filter_rules,
    }
    .normalized())
}

/// Buckets the declared configuration associates with `target_id`.
#[must_use]
pub fn buckets_for_target(groups: &[BucketGroup], target_id: &str) -> Vec<String> {
    groups
        .iter()
        .filter(|g| g.descriptors.iter().any(|d| d.target_id == target_id))
        .map(|g| g.bucket.clone())
        .collect()
}
