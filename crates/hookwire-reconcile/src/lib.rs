//! # hookwire-reconcile
//!
//! Convergence engine that drives bucket event subscriptions and target
//! invoke permissions toward a declared configuration.
//!
//! ## Pipeline
//!
//! ```text
//! DeclaredConfig ─build─▶ BucketGroup ─resolve─▶ ResolvedSubscription
//!                                                      │
//!                      RemoteStateReader ─observed─▶ diff ─▶ BucketPlan
//!                                                      │
//!                  PermissionSynchronizer ◀─ apply ─▶ bucket writes ─▶ ApplyReport
//! ```
//!
//! - [`desired`]: declared functions to normalized descriptors, grouped by bucket
//! - [`remote`]: per-run reader with a single-flight policy memo
//! - [`reconciler`]: the pure differ and the in-place merge
//! - [`permissions`]: the per-statement permission state machine
//! - [`applier`]: plan, permissions, notifications, prune
//! - [`teardown`]: removal of decommissioned targets
//!
//! Entries and statements are only ever removed when their id carries the
//! configured namespace tag; everything else on a shared bucket or policy is
//! left untouched.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hookwire_core::{ControlPlanes, MemoryControlPlane, ReconcileConfig};
//! use hookwire_reconcile::{ConvergentApplier, DeclaredConfig};
//!
//! # async fn example() -> hookwire_reconcile::Result<()> {
//! let planes = ControlPlanes::from_backend(Arc::new(MemoryControlPlane::new()));
//! let applier = ConvergentApplier::new(planes, ReconcileConfig::default())?;
//! let declared = DeclaredConfig::from_json(r#"{"functions": {}}"#)?;
//! let report = applier.converge(&declared).await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod applier;
pub mod cancel;
pub mod desired;
pub mod error;
pub mod metrics;
pub mod permissions;
pub mod reconciler;
pub mod remote;
pub mod report;
pub mod teardown;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::applier::{ConvergencePlan, ConvergentApplier};
    pub use crate::cancel::CancellationFlag;
    pub use crate::desired::{BucketGroup, DeclaredConfig, DeclaredFunction};
    pub use crate::error::{ReconcileError, Result};
    pub use crate::permissions::{PermissionPhase, PermissionState, PermissionSynchronizer};
    pub use crate::reconciler::{BucketPlan, diff};
    pub use crate::remote::RemoteStateReader;
    pub use crate::report::{
        ApplyReport, BucketOutcome, RunStatus, StatementTrace, TargetOutcome, UnitStatus,
    };
}

pub use applier::{ConvergencePlan, ConvergentApplier};
pub use cancel::CancellationFlag;
pub use desired::{BucketGroup, DeclaredConfig, DeclaredFunction, build};
pub use error::{ReconcileError, Result};
pub use permissions::{PermissionPhase, PermissionState, PermissionSync, PermissionSynchronizer};
pub use reconciler::{BucketPlan, diff};
pub use remote::RemoteStateReader;
pub use report::{
    ApplyReport, BucketOutcome, RunStatus, StatementTrace, TargetOutcome, UnitStatus,
};
