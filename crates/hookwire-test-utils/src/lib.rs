//! Shared test utilities for hookwire integration tests.
//!
//! This crate provides:
//! - [`RecordingControlPlane`]: in-memory control plane with operation recording,
//!   failure injection and simulated latency
//! - Factory functions for declared configurations and observed entries
//!
//! # Example
//!
//! ```rust,ignore
//! use hookwire_test_utils::{RecordingControlPlane, ControlPlaneOp};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let plane = Arc::new(RecordingControlPlane::new());
//!     plane.inner().deploy_target("resize", fixtures::function_arn("resize")).unwrap();
//!     // ... run test ...
//!     assert_eq!(plane.count(|op| matches!(op, ControlPlaneOp::AddPermission { .. })), 1);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod recording;

pub use fixtures::*;
pub use recording::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("hookwire=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
