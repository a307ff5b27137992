//! # hookwire-core
//!
//! Shared primitives for reconciling bucket event subscriptions against the
//! storage and compute control planes.
//!
//! - **Wiring types**: declared descriptors, resolved wirings, observed entries
//! - **Fingerprinting**: deterministic, namespaced identifiers for wirings
//! - **Permissions**: invoke-permission statements and their ids
//! - **Control-plane traits**: the remote collaborators, plus an in-memory backend
//! - **Configuration and observability**
//!
//! ## Example
//!
//! ```rust
//! use hookwire_core::prelude::*;
//!
//! let namespace = Namespace::default();
//! let wiring = SubscriptionDescriptor::new("resize", "photos")
//!     .with_filter_rule("suffix", ".jpg")
//!     .resolve("arn:aws:lambda:us-east-1:123456789012:function:resize", &namespace);
//!
//! assert!(namespace.owns(wiring.fingerprint.as_str()));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod control_plane;
pub mod error;
pub mod fingerprint;
pub mod memory;
pub mod observability;
pub mod permission;
pub mod subscription;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::ReconcileConfig;
    pub use crate::control_plane::{
        AddressResolver, ControlPlanes, NotificationControlPlane, PermissionControlPlane,
    };
    pub use crate::error::{Error, Result};
    pub use crate::fingerprint::{Fingerprint, Namespace, fingerprint};
    pub use crate::memory::{MemoryControlPlane, WorldSnapshot};
    pub use crate::permission::{PermissionStatement, Policy};
    pub use crate::subscription::{
        FilterRule, NotificationConfiguration, ObservedSubscription, ResolvedSubscription,
        SubscriptionDescriptor,
    };
}

// Re-export key types at crate root for ergonomics
pub use config::ReconcileConfig;
pub use control_plane::{
    AddressResolver, ControlPlanes, NotificationControlPlane, PermissionControlPlane,
};
pub use error::{Error, Result};
pub use fingerprint::{DEFAULT_NAMESPACE, Fingerprint, Namespace, fingerprint};
pub use memory::{MemoryControlPlane, WorldSnapshot};
pub use observability::{LogFormat, init_logging};
pub use permission::{PermissionStatement, Policy, bucket_arn, statement_id};
pub use subscription::{
    DEFAULT_EVENT_TYPE, FilterRule, NotificationConfiguration, ObservedSubscription,
    ResolvedSubscription, SubscriptionDescriptor,
};
