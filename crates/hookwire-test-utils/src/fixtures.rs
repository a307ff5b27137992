//! Pre-built test fixtures for common reconciliation scenarios.
//!
//! Provides factory functions to create test data with sensible defaults.

use hookwire_core::{
    DEFAULT_EVENT_TYPE, MemoryControlPlane, NotificationConfiguration, ObservedSubscription,
};
use serde_json::{Map, Value, json};

/// Account used by every fixture address.
pub const TEST_ACCOUNT: &str = "123456789012";

/// Deployed address of a test function.
pub fn function_arn(name: &str) -> String {
    format!("arn:aws:lambda:us-east-1:{TEST_ACCOUNT}:function:{name}")
}

/// A notification entry written by other tooling.
pub fn foreign_entry(id: &str, target: &str) -> ObservedSubscription {
    ObservedSubscription {
        id: Some(id.to_string()),
        target_address: function_arn(target),
        event_types: vec![DEFAULT_EVENT_TYPE.to_string()],
        filter_rules: Vec::new(),
    }
}

/// Creates a control plane with empty buckets and deployed targets.
pub fn seeded_plane(buckets: &[&str], targets: &[&str]) -> MemoryControlPlane {
    let plane = MemoryControlPlane::new();
    for bucket in buckets {
        plane
            .put_bucket(*bucket, NotificationConfiguration::default())
            .expect("seed bucket");
    }
    for target in targets {
        plane
            .deploy_target(*target, function_arn(target))
            .expect("seed target");
    }
    plane
}

/// Builder for declared configurations in their JSON form.
#[derive(Debug, Clone, Default)]
pub struct DeclaredFixture {
    functions: Map<String, Value>,
}

impl DeclaredFixture {
    /// Creates an empty declaration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `function` subscribed to `bucket`.
    ///
    /// Each `(kind, pattern)` pair becomes a single-key rule map.
    #[must_use]
    pub fn subscribe(
        self,
        function: &str,
        bucket: &str,
        event_types: &[&str],
        rules: &[(&str, &str)],
    ) -> Self {
        let rules: Vec<Value> = rules
            .iter()
            .map(|(kind, pattern)| {
                let mut rule = Map::new();
                rule.insert((*kind).to_string(), Value::from(*pattern));
                Value::Object(rule)
            })
            .collect();
        self.event(
            function,
            json!({
                "kind": "existingS3",
                "bucket": bucket,
                "eventTypes": event_types,
                "filterRules": rules,
            }),
        )
    }

    /// Appends a raw event definition to `function`.
    #[must_use]
    pub fn event(mut self, function: &str, event: Value) -> Self {
        let entry = self
            .functions
            .entry(function.to_string())
            .or_insert_with(|| json!({ "events": [] }));
        if let Some(events) = entry.get_mut("events").and_then(Value::as_array_mut) {
            events.push(event);
        }
        self
    }

    /// Renders the declaration.
    pub fn build(self) -> Value {
        json!({ "functions": self.functions })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_fixture_renders_single_key_rules() {
        let value = DeclaredFixture::new()
            .subscribe("resize", "photos", &[], &[("prefix", "images/")])
            .event("resize", json!({ "kind": "http" }))
            .build();
        let events = &value["functions"]["resize"]["events"];
        assert_eq!(events.as_array().unwrap().len(), 2);
        assert_eq!(events[0]["filterRules"][0]["prefix"], "images/");
    }

    #[test]
    fn seeded_plane_has_targets_and_buckets() {
        let plane = seeded_plane(&["photos"], &["resize"]);
        let snapshot = plane.snapshot().unwrap();
        assert!(snapshot.buckets.contains_key("photos"));
        assert_eq!(snapshot.targets["resize"], function_arn("resize"));
    }
}
