//! Logging setup and span helpers.
//!
//! A convergence run logs one `reconcile` span per bucket write and one
//! `permission` span per statement sync. Inside them the engine emits the
//! plan per bucket (additions, removals, kept entries), every permission
//! phase transition with its `statement_id`, each grant and revoke, withheld
//! removals, and skipped units with their reason. Run totals are logged once
//! at the end of `converge` and `teardown`.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Filter used when `RUST_LOG` is unset: engine progress at `info`,
/// everything else at `warn`.
pub const DEFAULT_FILTER: &str =
    "warn,hookwire_core=info,hookwire_reconcile=info,hookwire_cli=info";

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for CI and log shipping).
    Json,
    /// Pretty-printed logs (for terminals).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: overrides [`DEFAULT_FILTER`] (e.g. `hookwire_reconcile=debug`
///   to see per-bucket plans)
///
/// # Example
///
/// ```rust
/// use hookwire_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_target(false))
                    .init();
            }
        }
    });
}

/// Creates a span for work scoped to one bucket.
///
/// # Example
///
/// ```rust
/// use hookwire_core::observability::reconcile_span;
///
/// let span = reconcile_span("write_bucket", "photos");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn reconcile_span(operation: &str, bucket: &str) -> Span {
    tracing::info_span!("reconcile", op = operation, bucket = bucket)
}

/// Creates a span for permission work on one target.
#[must_use]
pub fn permission_span(operation: &str, target: &str) -> Span {
    tracing::info_span!("permission", op = operation, target = target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_succeeds() {
        init_logging(LogFormat::Pretty);
        init_logging(LogFormat::Json); // Second call should be no-op
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_span_helpers_create_spans() {
        let span = reconcile_span("test_operation", "photos");
        let _guard = span.enter();
        tracing::info!("message in bucket span");

        let span = permission_span("ensure", "resize");
        let _guard = span.enter();
        tracing::info!("message in target span");
    }
}
