//! Teardown tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use hookwire_core::{ControlPlanes, NotificationConfiguration, ReconcileConfig};
use hookwire_reconcile::{ConvergentApplier, DeclaredConfig, ReconcileError, RunStatus};
use hookwire_test_utils::{
    ControlPlaneOp, DeclaredFixture, RecordingControlPlane, foreign_entry, seeded_plane,
};

fn declared() -> DeclaredConfig {
    serde_json::from_value(
        DeclaredFixture::new()
            .subscribe("resize", "photos", &[], &[("prefix", "raw/")])
            .subscribe("resize", "archive", &[], &[])
            .subscribe("audit", "photos", &[], &[])
            .build(),
    )
    .unwrap()
}

async fn converged(config: ReconcileConfig) -> (Arc<RecordingControlPlane>, ConvergentApplier) {
    let plane = Arc::new(RecordingControlPlane::wrapping(seeded_plane(
        &["photos", "archive"],
        &["resize", "audit"],
    )));
    let mut photos = plane.inner().snapshot().unwrap().buckets["photos"].clone();
    photos
        .function_configurations
        .push(foreign_entry("custom-handler-1", "resize"));
    plane.inner().put_bucket("photos", photos).unwrap();

    let applier = ConvergentApplier::new(ControlPlanes::from_backend(plane.clone()), config).unwrap();
    let report = applier.converge(&declared()).await.unwrap();
    assert_eq!(report.status, RunStatus::Success);
    plane.clear_operations();
    (plane, applier)
}

fn entries(plane: &RecordingControlPlane, bucket: &str) -> NotificationConfiguration {
    plane.inner().snapshot().unwrap().buckets[bucket].clone()
}

#[tokio::test]
async fn teardown_removes_owned_entries_then_statements() {
    let (plane, applier) = converged(ReconcileConfig::default()).await;

    let report = applier
        .teardown(&declared(), &["resize".to_string()])
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.target("resize").unwrap().revoked.len(), 2);

    // Foreign entry pointing at the same target stays; audit's entry stays.
    let photos = entries(&plane, "photos").function_configurations;
    assert_eq!(photos.len(), 2);
    assert!(photos.iter().any(|e| e.id.as_deref() == Some("custom-handler-1")));
    assert!(entries(&plane, "archive").function_configurations.is_empty());

    let snapshot = plane.inner().snapshot().unwrap();
    assert!(snapshot.policies["resize"].statements.is_empty());
    assert_eq!(snapshot.policies["audit"].statements.len(), 1);

    // Every bucket write precedes every revoke.
    let mutations = plane.mutations();
    let last_put = mutations
        .iter()
        .rposition(|op| matches!(op, ControlPlaneOp::PutNotificationConfig { .. }))
        .unwrap();
    let first_remove = mutations
        .iter()
        .position(|op| matches!(op, ControlPlaneOp::RemovePermission { .. }))
        .unwrap();
    assert!(last_put < first_remove);
}

#[tokio::test]
async fn teardown_removes_qualified_entries() {
    let config = ReconcileConfig {
        qualifier: Some("live".into()),
        ..ReconcileConfig::default()
    };
    let (plane, applier) = converged(config).await;

    applier
        .teardown(&declared(), &["resize".to_string()])
        .await
        .unwrap();
    assert!(entries(&plane, "archive").function_configurations.is_empty());
    assert!(
        plane.inner().snapshot().unwrap().policies["resize:live"]
            .statements
            .is_empty()
    );
}

#[tokio::test]
async fn teardown_keeps_statements_when_bucket_write_fails() {
    let (plane, applier) = converged(ReconcileConfig::default()).await;
    plane.fail_bucket_writes("archive");

    let report = applier
        .teardown(&declared(), &["resize".to_string()])
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.bucket("archive").unwrap().status.is_failed());
    assert_eq!(report.target("resize").unwrap().revoked.len(), 1);
    assert!(report.warnings.iter().any(|w| w.contains("statements kept")));
}

#[tokio::test]
async fn unresolved_teardown_target_aborts_in_strict_mode() {
    let (plane, applier) = converged(ReconcileConfig::default()).await;

    let err = applier
        .teardown(&declared(), &["ghost".to_string(), "resize".to_string()])
        .await
        .unwrap_err();
    assert!(matches!(err, ReconcileError::NotDeployed { .. }));
    assert!(plane.mutations().is_empty());
}

#[tokio::test]
async fn unresolved_teardown_target_is_skipped_when_lenient() {
    let config = ReconcileConfig {
        continue_on_error: true,
        ..ReconcileConfig::default()
    };
    let (_plane, applier) = converged(config).await;

    let report = applier
        .teardown(&declared(), &["ghost".to_string(), "resize".to_string()])
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert!(report.warnings.iter().any(|w| w.contains("ghost")));
    assert_eq!(report.target("resize").unwrap().revoked.len(), 2);
}

#[tokio::test]
async fn qualified_teardown_also_clears_unqualified_statements() {
    // Statements granted by an earlier unqualified run.
    let (plane, _) = converged(ReconcileConfig::default()).await;
    let live = ReconcileConfig {
        qualifier: Some("live".into()),
        ..ReconcileConfig::default()
    };
    let applier = ConvergentApplier::new(ControlPlanes::from_backend(plane.clone()), live).unwrap();
    applier.converge(&declared()).await.unwrap();
    assert_eq!(
        plane.inner().snapshot().unwrap().policies["resize"].statements.len(),
        2
    );

    let report = applier
        .teardown(&declared(), &["resize".to_string()])
        .await
        .unwrap();
    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.target("resize").unwrap().revoked.len(), 4);

    let snapshot = plane.inner().snapshot().unwrap();
    assert!(snapshot.policies["resize"].statements.is_empty());
    assert!(snapshot.policies["resize:live"].statements.is_empty());
    assert_eq!(snapshot.policies["audit"].statements.len(), 1);
}
