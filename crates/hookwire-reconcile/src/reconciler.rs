//! Per-bucket differ.
//!
//! [`diff`] compares the resolved desired wirings of one bucket with the
//! entries observed on it and produces a [`BucketPlan`]. The differ only ever
//! schedules removal of entries whose id carries the namespace tag; every
//! other entry lands in `unchanged` and is written back verbatim.
//!
//! [`BucketPlan::merge_into`] applies a plan to a freshly read configuration
//! as one set-union write: an addition whose fingerprint is already present
//! replaces that entry in place instead of deleting it and appending a new
//! one.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use hookwire_core::{Namespace, NotificationConfiguration, ObservedSubscription, ResolvedSubscription};
use serde::{Serialize, Serializer};

use crate::error::{ReconcileError, Result};

/// Convergence work for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketPlan {
    /// Bucket name.
    pub bucket: String,
    /// Desired wirings with no matching owned entry.
    #[serde(serialize_with = "serialize_additions")]
    pub additions: Vec<ResolvedSubscription>,
    /// Owned entries that no longer match any desired wiring.
    pub removals: Vec<ObservedSubscription>,
    /// Entries left as they are: current owned entries and all foreign ones.
    pub unchanged: Vec<ObservedSubscription>,
    /// Owned entries that would have been removed but are kept because the
    /// bucket's desired state is incomplete.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub withheld: Vec<ObservedSubscription>,
}

fn serialize_additions<S: Serializer>(
    additions: &[ResolvedSubscription],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(additions.iter().map(ResolvedSubscription::to_entry))
}

/// Computes the plan for one bucket.
///
/// Pure and total. Desired wirings with equal fingerprints are collapsed to
/// the first occurrence. An owned entry is kept when its id matches a desired
/// fingerprint and it points at the wiring's current address; an owned entry
/// whose id matches but whose address differs is removed and the wiring is
/// re-added, which [`BucketPlan::merge_into`] turns into an in-place replace.
#[must_use]
pub fn diff(
    namespace: &Namespace,
    bucket: &str,
    desired: &[ResolvedSubscription],
    observed: &[ObservedSubscription],
) -> BucketPlan {
    let mut by_fingerprint: HashMap<&str, &ResolvedSubscription> = HashMap::new();
    let mut ordered: Vec<&ResolvedSubscription> = Vec::new();
    for wiring in desired {
        if let Entry::Vacant(slot) = by_fingerprint.entry(wiring.fingerprint.as_str()) {
            slot.insert(wiring);
            ordered.push(wiring);
        }
    }

    let mut kept: HashSet<&str> = HashSet::new();
    let mut removals = Vec::new();
    let mut unchanged = Vec::new();

    for entry in observed {
        let owned_id = entry.id.as_deref().filter(|id| namespace.owns(id));
        let Some(id) = owned_id else {
            unchanged.push(entry.clone());
            continue;
        };
        match by_fingerprint.get(id) {
            Some(&wiring) if wiring.target_address == entry.target_address && !kept.contains(id) => {
                kept.insert(wiring.fingerprint.as_str());
                unchanged.push(entry.clone());
            }
            _ => removals.push(entry.clone()),
        }
    }

    let additions = ordered
        .into_iter()
        .filter(|w| !kept.contains(w.fingerprint.as_str()))
        .cloned()
        .collect();

    BucketPlan {
        bucket: bucket.to_string(),
        additions,
        removals,
        unchanged,
        withheld: Vec::new(),
    }
}

impl BucketPlan {
    /// Plans removal of every owned entry matching `remove`, keeping the rest.
    #[must_use]
    pub fn removing(
        namespace: &Namespace,
        bucket: &str,
        observed: &[ObservedSubscription],
        remove: impl Fn(&ObservedSubscription) -> bool,
    ) -> Self {
        let (removals, unchanged): (Vec<_>, Vec<_>) = observed
            .iter()
            .cloned()
            .partition(|entry| entry.is_owned_by(namespace) && remove(entry));
        Self {
            bucket: bucket.to_string(),
            additions: Vec::new(),
            removals,
            unchanged,
            withheld: Vec::new(),
        }
    }

    /// Returns true if applying the plan would not change the bucket.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    /// Moves every removal to `withheld`. Returns how many were moved.
    pub fn withhold_removals(&mut self) -> usize {
        let count = self.removals.len();
        self.withheld.append(&mut self.removals);
        count
    }

    /// Drops the additions whose target is in `targets`.
    ///
    /// Removals pointing at a dropped wiring's address are withheld as well,
    /// so the bucket keeps its previous entry for that target.
    pub fn drop_additions_for(&mut self, targets: &HashSet<String>) -> Vec<ResolvedSubscription> {
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.additions)
            .into_iter()
            .partition(|w| targets.contains(w.target_id()));
        self.additions = kept;

        if !dropped.is_empty() {
            let addresses: HashSet<&str> = dropped.iter().map(|w| w.target_address.as_str()).collect();
            let (withheld, removals): (Vec<_>, Vec<_>) = std::mem::take(&mut self.removals)
                .into_iter()
                .partition(|e| addresses.contains(e.target_address.as_str()));
            self.removals = removals;
            self.withheld.extend(withheld);
        }
        dropped
    }

    /// Applies this plan to a freshly read configuration.
    ///
    /// Entries are walked in their current order: an owned entry whose id is
    /// a planned addition is replaced in place, one scheduled for removal is
    /// dropped, anything the plan does not know about is kept. Remaining
    /// additions are appended. Non-function sections are carried over.
    ///
    /// # Errors
    ///
    /// Returns `ReconcileError::InvariantViolation` if a removal is not
    /// provably owned by `namespace`.
    pub fn merge_into(
        &self,
        namespace: &Namespace,
        fresh: NotificationConfiguration,
    ) -> Result<NotificationConfiguration> {
        let mut removal_ids: HashSet<&str> = HashSet::new();
        for entry in &self.removals {
            match entry.id.as_deref() {
                Some(id) if namespace.owns(id) => {
                    removal_ids.insert(id);
                }
                other => {
                    return Err(ReconcileError::InvariantViolation {
                        bucket: self.bucket.clone(),
                        message: format!(
                            "refusing to remove entry '{}' not owned by namespace '{namespace}'",
                            other.unwrap_or("<no id>")
                        ),
                    });
                }
            }
        }

        let additions: HashMap<&str, &ResolvedSubscription> = self
            .additions
            .iter()
            .map(|w| (w.fingerprint.as_str(), w))
            .collect();
        let kept: HashMap<&str, &str> = self
            .unchanged
            .iter()
            .filter_map(|e| Some((e.id.as_deref()?, e.target_address.as_str())))
            .filter(|(id, _)| namespace.owns(id))
            .collect();

        let NotificationConfiguration {
            function_configurations,
            other_sections,
        } = fresh;
        let mut placed: HashSet<String> = HashSet::new();
        let mut merged = Vec::with_capacity(function_configurations.len() + self.additions.len());

        for entry in function_configurations {
            let Some(id) = entry.id.as_deref().filter(|id| namespace.owns(id)) else {
                merged.push(entry);
                continue;
            };
            if let Some(wiring) = additions.get(id) {
                if placed.insert(id.to_string()) {
                    merged.push(wiring.to_entry());
                }
            } else if kept.get(id) == Some(&entry.target_address.as_str()) {
                if placed.insert(id.to_string()) {
                    merged.push(entry);
                }
            } else if !removal_ids.contains(id) {
                merged.push(entry);
            }
        }

        merged.extend(
            self.additions
                .iter()
                .filter(|w| !placed.contains(w.fingerprint.as_str()))
                .map(ResolvedSubscription::to_entry),
        );

        Ok(NotificationConfiguration {
            function_configurations: merged,
            other_sections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookwire_core::SubscriptionDescriptor;

    const ARN: &str = "arn:aws:lambda:us-east-1:123456789012:function:resize";

    fn wiring(prefix: &str) -> ResolvedSubscription {
        SubscriptionDescriptor::new("resize", "photos")
            .with_filter_rule("prefix", prefix)
            .resolve(ARN, &Namespace::default())
    }

    fn foreign(id: &str) -> ObservedSubscription {
        ObservedSubscription {
            id: Some(id.to_string()),
            target_address: "arn:aws:lambda:us-east-1:123456789012:function:audit".into(),
            event_types: vec!["s3:ObjectCreated:*".into()],
            filter_rules: Vec::new(),
        }
    }

    #[test]
    fn empty_observed_state_yields_additions() {
        let ns = Namespace::default();
        let plan = diff(&ns, "photos", &[wiring("a/")], &[]);
        assert_eq!(plan.additions.len(), 1);
        assert!(plan.removals.is_empty());
        assert!(!plan.is_noop());
    }

    #[test]
    fn matching_entry_is_unchanged() {
        let ns = Namespace::default();
        let w = wiring("a/");
        let plan = diff(&ns, "photos", &[w.clone()], &[w.to_entry(), foreign("custom-handler-1")]);
        assert!(plan.is_noop());
        assert_eq!(plan.unchanged.len(), 2);
    }

    #[test]
    fn duplicate_desired_wirings_collapse() {
        let ns = Namespace::default();
        let plan = diff(&ns, "photos", &[wiring("a/"), wiring("a/")], &[]);
        assert_eq!(plan.additions.len(), 1);
    }

    #[test]
    fn moved_address_replaces_entry() {
        let ns = Namespace::default();
        let w = wiring("a/");
        let mut stale = w.to_entry();
        stale.target_address = format!("{ARN}:old");
        let plan = diff(&ns, "photos", &[w.clone()], &[stale.clone()]);
        assert_eq!(plan.removals, vec![stale.clone()]);
        assert_eq!(plan.additions, vec![w.clone()]);

        let merged = plan
            .merge_into(&ns, NotificationConfiguration::with_entries(vec![stale]))
            .unwrap();
        assert_eq!(merged.function_configurations, vec![w.to_entry()]);
    }

    #[test]
    fn edited_wiring_is_removed_and_added_in_one_plan() {
        let ns = Namespace::default();
        let old = wiring("a/");
        let new = wiring("b/");
        let plan = diff(&ns, "photos", &[new.clone()], &[old.to_entry()]);
        assert_eq!(plan.removals, vec![old.to_entry()]);
        assert_eq!(plan.additions, vec![new]);
    }

    #[test]
    fn duplicate_owned_entries_are_deduplicated() {
        let ns = Namespace::default();
        let w = wiring("a/");
        let observed = vec![w.to_entry(), w.to_entry()];
        let plan = diff(&ns, "photos", &[w.clone()], &observed);
        assert_eq!(plan.unchanged.len(), 1);
        assert_eq!(plan.removals.len(), 1);

        let merged = plan
            .merge_into(&ns, NotificationConfiguration::with_entries(observed))
            .unwrap();
        assert_eq!(merged.function_configurations, vec![w.to_entry()]);
    }

    #[test]
    fn merge_keeps_the_copy_with_the_current_address() {
        let ns = Namespace::default();
        let w = wiring("a/");
        let moved = ObservedSubscription {
            target_address: format!("{ARN}-old"),
            ..w.to_entry()
        };
        let observed = vec![moved, w.to_entry()];
        let plan = diff(&ns, "photos", &[w.clone()], &observed);
        assert!(plan.additions.is_empty());

        let merged = plan
            .merge_into(&ns, NotificationConfiguration::with_entries(observed))
            .unwrap();
        assert_eq!(merged.function_configurations, vec![w.to_entry()]);
    }

    #[test]
    fn merge_keeps_foreign_and_unknown_entries_in_order() {
        let ns = Namespace::default();
        let old = wiring("a/");
        let new = wiring("b/");
        let plan = diff(&ns, "photos", &[new.clone()], &[foreign("x"), old.to_entry()]);

        // An owned entry written by someone else after the plan was computed.
        let late = wiring("late/").to_entry();
        let fresh = NotificationConfiguration::with_entries(vec![
            foreign("x"),
            old.to_entry(),
            late.clone(),
        ]);
        let merged = plan.merge_into(&ns, fresh).unwrap();
        assert_eq!(
            merged.function_configurations,
            vec![foreign("x"), late, new.to_entry()]
        );
    }

    #[test]
    fn merge_rejects_unowned_removal() {
        let ns = Namespace::default();
        let mut plan = diff(&ns, "photos", &[], &[]);
        plan.removals.push(foreign("custom-handler-1"));
        let err = plan
            .merge_into(&ns, NotificationConfiguration::default())
            .unwrap_err();
        assert!(matches!(err, ReconcileError::InvariantViolation { .. }));
    }

    #[test]
    fn withheld_removals_stay_on_bucket() {
        let ns = Namespace::default();
        let old = wiring("a/");
        let mut plan = diff(&ns, "photos", &[], &[old.to_entry()]);
        assert_eq!(plan.withhold_removals(), 1);
        assert!(plan.is_noop());
        assert_eq!(plan.withheld, vec![old.to_entry()]);
    }

    #[test]
    fn dropping_additions_withholds_their_removals() {
        let ns = Namespace::default();
        let old = wiring("a/");
        let new = wiring("b/");
        let mut plan = diff(&ns, "photos", &[new], &[old.to_entry()]);
        let dropped = plan.drop_additions_for(&HashSet::from(["resize".to_string()]));
        assert_eq!(dropped.len(), 1);
        assert!(plan.is_noop());
        assert_eq!(plan.withheld, vec![old.to_entry()]);
    }

    #[test]
    fn removing_only_touches_owned_matches() {
        let ns = Namespace::default();
        let w = wiring("a/");
        let observed = vec![w.to_entry(), foreign("custom")];
        let plan = BucketPlan::removing(&ns, "photos", &observed, |e| e.target_address == ARN);
        assert_eq!(plan.removals, vec![w.to_entry()]);
        assert_eq!(plan.unchanged, vec![foreign("custom")]);
    }

    #[test]
    fn plan_serializes_additions_as_entries() {
        let ns = Namespace::default();
        let w = wiring("a/");
        let plan = diff(&ns, "photos", &[w.clone()], &[]);
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["additions"][0]["id"], w.fingerprint.as_str());
        assert!(value.get("withheld").is_none());
    }
}
