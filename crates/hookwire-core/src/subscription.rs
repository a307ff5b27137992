//! Subscription wiring types.
//!
//! A [`SubscriptionDescriptor`] is the declared unit of wiring: which target
//! should be invoked for which events on which bucket. Once the target's
//! deployed address is known it becomes a [`ResolvedSubscription`], which
//! carries the fingerprint used as the reconciliation key.
//!
//! [`ObservedSubscription`] is the shape read back from a bucket's live
//! notification configuration. Entries written by other tooling use the same
//! shape; ownership is decided by [`Namespace::owns`] on the entry id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::fingerprint::{Fingerprint, Namespace, fingerprint};

/// Event type used when a declaration names none.
pub const DEFAULT_EVENT_TYPE: &str = "s3:ObjectCreated:*";

/// A single key filter rule, e.g. `prefix = images/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRule {
    /// Rule kind (`prefix`, `suffix`).
    pub name: String,
    /// Pattern the rule matches.
    pub value: String,
}

impl FilterRule {
    /// Creates a filter rule.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Declared wiring of one target to one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionDescriptor {
    /// Logical name of the compute target (not yet resolved).
    pub target_id: String,
    /// Storage bucket name.
    pub bucket: String,
    /// Ordered set of event types.
    pub event_types: Vec<String>,
    /// Key filter rules, stable-sorted by rule kind once normalized.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_rules: Vec<FilterRule>,
}

impl SubscriptionDescriptor {
    /// Creates a descriptor subscribed to the default event type.
    #[must_use]
    pub fn new(target_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            bucket: bucket.into(),
            event_types: vec![DEFAULT_EVENT_TYPE.to_string()],
            filter_rules: Vec::new(),
        }
    }

    /// Replaces the event types.
    #[must_use]
    pub fn with_event_types<I, S>(mut self, event_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = event_types.into_iter().map(Into::into).collect();
        self.normalized()
    }

    /// Appends a filter rule.
    #[must_use]
    pub fn with_filter_rule(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.filter_rules.push(FilterRule::new(name, value));
        self.normalized()
    }

    /// Returns the canonical form of this descriptor.
    ///
    /// Duplicate event types collapse to their first occurrence, an empty
    /// list becomes [`DEFAULT_EVENT_TYPE`], and filter rules are stable-sorted
    /// by rule kind.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.event_types = normalize_event_types(&self.event_types);
        self.filter_rules = sorted_rules(&self.filter_rules);
        self
    }

    /// Binds this descriptor to a deployed target address.
    #[must_use]
    pub fn resolve(self, target_address: impl Into<String>, namespace: &Namespace) -> ResolvedSubscription {
        let descriptor = self.normalized();
        let target_address = target_address.into();
        let fingerprint = fingerprint(
            namespace,
            &target_address,
            &descriptor.event_types,
            &descriptor.filter_rules,
        );
        ResolvedSubscription {
            descriptor,
            target_address,
            fingerprint,
        }
    }
}

/// A descriptor whose target has been resolved to a deployed address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSubscription {
    /// The normalized declared wiring.
    pub descriptor: SubscriptionDescriptor,
    /// Fully qualified target address.
    pub target_address: String,
    /// Reconciliation key derived from the address and the wiring.
    pub fingerprint: Fingerprint,
}

impl ResolvedSubscription {
    /// Logical target name.
    #[must_use]
    pub fn target_id(&self) -> &str {
        &self.descriptor.target_id
    }

    /// Bucket this wiring subscribes to.
    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.descriptor.bucket
    }

    /// Renders the notification entry written to the bucket.
    #[must_use]
    pub fn to_entry(&self) -> ObservedSubscription {
        ObservedSubscription {
            id: Some(self.fingerprint.as_str().to_string()),
            target_address: self.target_address.clone(),
            event_types: self.descriptor.event_types.clone(),
            filter_rules: self.descriptor.filter_rules.clone(),
        }
    }
}

/// A function notification entry as stored on a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservedSubscription {
    /// Entry identifier. Optional on the wire; entries without one are never owned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Address of the target invoked by this entry.
    pub target_address: String,
    /// Event types the entry fires on.
    #[serde(default)]
    pub event_types: Vec<String>,
    /// Key filter rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_rules: Vec<FilterRule>,
}

impl ObservedSubscription {
    /// Returns true if this entry was written under `namespace`.
    #[must_use]
    pub fn is_owned_by(&self, namespace: &Namespace) -> bool {
        self.id.as_deref().is_some_and(|id| namespace.owns(id))
    }
}

/// Full notification configuration of one bucket.
///
/// Only function entries are interpreted. Every other section (topic, queue,
/// event-bus configuration) is carried opaquely so a read-modify-write never
/// drops it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationConfiguration {
    /// Function notification entries.
    #[serde(default)]
    pub function_configurations: Vec<ObservedSubscription>,
    /// Sections this crate does not manage.
    #[serde(flatten)]
    pub other_sections: BTreeMap<String, serde_json::Value>,
}

impl NotificationConfiguration {
    /// Creates a configuration holding only the given function entries.
    #[must_use]
    pub fn with_entries(entries: Vec<ObservedSubscription>) -> Self {
        Self {
            function_configurations: entries,
            other_sections: BTreeMap::new(),
        }
    }
}

pub(crate) fn normalize_event_types(event_types: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(event_types.len());
    for event_type in event_types {
        if !out.contains(event_type) {
            out.push(event_type.clone());
        }
    }
    if out.is_empty() {
        out.push(DEFAULT_EVENT_TYPE.to_string());
    }
    out
}

pub(crate) fn sorted_rules(rules: &[FilterRule]) -> Vec<FilterRule> {
    let mut sorted = rules.to_vec();
    // `sort_by` is stable: rules of the same kind keep declared order.
    sorted.sort_by(|a, b| a.name.cmp(&b.name));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_descriptor_defaults_to_object_created() {
        let descriptor = SubscriptionDescriptor::new("resize", "photos");
        assert_eq!(descriptor.event_types, vec![DEFAULT_EVENT_TYPE.to_string()]);
        assert!(descriptor.filter_rules.is_empty());
    }

    #[test]
    fn normalization_collapses_duplicates_and_keeps_order() {
        let descriptor = SubscriptionDescriptor::new("resize", "photos").with_event_types([
            "s3:ObjectRemoved:*",
            "s3:ObjectCreated:Put",
            "s3:ObjectRemoved:*",
        ]);
        assert_eq!(
            descriptor.event_types,
            vec!["s3:ObjectRemoved:*", "s3:ObjectCreated:Put"]
        );
    }

    #[test]
    fn empty_event_types_fall_back_to_default() {
        let descriptor =
            SubscriptionDescriptor::new("resize", "photos").with_event_types(Vec::<String>::new());
        assert_eq!(descriptor.event_types, vec![DEFAULT_EVENT_TYPE.to_string()]);
    }

    #[test]
    fn filter_rules_sort_by_kind() {
        let descriptor = SubscriptionDescriptor::new("resize", "photos")
            .with_filter_rule("suffix", ".jpg")
            .with_filter_rule("prefix", "images/");
        let kinds: Vec<_> = descriptor.filter_rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(kinds, vec!["prefix", "suffix"]);
    }

    #[test]
    fn resolved_entry_carries_fingerprint_id() {
        let namespace = Namespace::default();
        let resolved = SubscriptionDescriptor::new("resize", "photos")
            .resolve("arn:aws:lambda:us-east-1:123456789012:function:resize", &namespace);
        let entry = resolved.to_entry();
        assert_eq!(entry.id.as_deref(), Some(resolved.fingerprint.as_str()));
        assert!(entry.is_owned_by(&namespace));
    }

    #[test]
    fn entry_without_id_is_never_owned() {
        let entry = ObservedSubscription {
            id: None,
            target_address: "arn:aws:lambda:us-east-1:123456789012:function:other".into(),
            event_types: vec![DEFAULT_EVENT_TYPE.into()],
            filter_rules: Vec::new(),
        };
        assert!(!entry.is_owned_by(&Namespace::default()));
    }

    #[test]
    fn notification_configuration_round_trips_foreign_sections() {
        let raw = serde_json::json!({
            "functionConfigurations": [],
            "topicConfigurations": [{"id": "audit", "topicArn": "arn:aws:sns:us-east-1:1:audit"}]
        });
        let config: NotificationConfiguration = serde_json::from_value(raw.clone()).unwrap();
        assert!(config.other_sections.contains_key("topicConfigurations"));
        assert_eq!(serde_json::to_value(&config).unwrap(), raw);
    }
}
