//! Property tests for the differ and the in-place merge.
//!
//! Randomly mixes foreign entries, stale owned entries and copies of desired
//! wirings (some pointing at the wrong address) on a single bucket.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::BTreeMap;

use hookwire_core::{
    Namespace, NotificationConfiguration, ObservedSubscription, ResolvedSubscription,
    SubscriptionDescriptor,
};
use hookwire_reconcile::diff;
use hookwire_test_utils::function_arn;
use proptest::prelude::*;

const TARGETS: [&str; 3] = ["resize", "audit", "index"];
const PREFIXES: [&str; 3] = ["", "raw/", "img/"];

fn arb_desired() -> impl Strategy<Value = Vec<(usize, usize)>> {
    prop::collection::vec((0..TARGETS.len(), 0..PREFIXES.len()), 0..5)
}

/// (kind, index, hex suffix, foreign id)
fn arb_observed() -> impl Strategy<Value = Vec<(u8, usize, String, String)>> {
    prop::collection::vec(
        (0u8..5, 0usize..8, "[0-9a-f]{8}", "custom-[a-z]{1,6}"),
        0..8,
    )
}

fn resolve(desired: &[(usize, usize)], ns: &Namespace) -> Vec<ResolvedSubscription> {
    desired
        .iter()
        .map(|&(t, p)| {
            let mut descriptor = SubscriptionDescriptor::new(TARGETS[t], "photos");
            if !PREFIXES[p].is_empty() {
                descriptor = descriptor.with_filter_rule("prefix", PREFIXES[p]);
            }
            descriptor.resolve(function_arn(TARGETS[t]), ns)
        })
        .collect()
}

fn observe(
    raw: &[(u8, usize, String, String)],
    desired: &[ResolvedSubscription],
    ns: &Namespace,
) -> Vec<ObservedSubscription> {
    raw.iter()
        .map(|(kind, index, hex, foreign_id)| {
            let target = function_arn(TARGETS[index % TARGETS.len()]);
            let foreign = |id: Option<String>| ObservedSubscription {
                id,
                target_address: target.clone(),
                event_types: vec!["s3:ObjectCreated:*".to_string()],
                filter_rules: Vec::new(),
            };
            match (kind, desired.is_empty()) {
                (0, _) => foreign(Some(foreign_id.clone())),
                (1, _) => foreign(None),
                (3, false) => desired[index % desired.len()].to_entry(),
                (4, false) => ObservedSubscription {
                    target_address: function_arn("retired"),
                    ..desired[index % desired.len()].to_entry()
                },
                _ => foreign(Some(format!("{}{hex}", ns.as_str()))),
            }
        })
        .collect()
}

fn fresh(observed: &[ObservedSubscription]) -> NotificationConfiguration {
    let mut config = NotificationConfiguration::with_entries(observed.to_vec());
    config.other_sections = BTreeMap::from([(
        "QueueConfigurations".to_string(),
        serde_json::json!([{"QueueArn": "arn:aws:sqs:us-east-1:1:q"}]),
    )]);
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Entries outside the namespace are never planned for removal.
    #[test]
    fn foreign_entries_are_never_removed(desired in arb_desired(), observed in arb_observed()) {
        let ns = Namespace::default();
        let desired = resolve(&desired, &ns);
        let observed = observe(&observed, &desired, &ns);

        let plan = diff(&ns, "photos", &desired, &observed);
        prop_assert!(plan.removals.iter().all(|e| e.is_owned_by(&ns)));

        let merged = plan.merge_into(&ns, fresh(&observed)).unwrap();
        let foreign_before: Vec<_> = observed.iter().filter(|e| !e.is_owned_by(&ns)).collect();
        let foreign_after: Vec<_> = merged
            .function_configurations
            .iter()
            .filter(|e| !e.is_owned_by(&ns))
            .collect();
        prop_assert_eq!(foreign_before, foreign_after);
        prop_assert!(merged.other_sections.contains_key("QueueConfigurations"));
    }

    /// A merged configuration holds every desired wiring exactly once.
    #[test]
    fn merged_configuration_is_converged(desired in arb_desired(), observed in arb_observed()) {
        let ns = Namespace::default();
        let desired = resolve(&desired, &ns);
        let observed = observe(&observed, &desired, &ns);

        let plan = diff(&ns, "photos", &desired, &observed);
        let merged = plan.merge_into(&ns, fresh(&observed)).unwrap();

        let replan = diff(&ns, "photos", &desired, &merged.function_configurations);
        prop_assert!(replan.is_noop(), "not converged: {:?}", replan);

        for wiring in &desired {
            let copies = merged
                .function_configurations
                .iter()
                .filter(|e| e.id.as_deref() == Some(wiring.fingerprint.as_str()))
                .count();
            prop_assert_eq!(copies, 1);
        }
    }
}
