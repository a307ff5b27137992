//! # hookwire-cli
//!
//! Command-line interface for the hookwire convergence engine.
//!
//! ## Commands
//!
//! - `hookwire plan` - Show what a convergence pass would change
//! - `hookwire converge` - Drive subscriptions and permissions to the declared state
//! - `hookwire teardown` - Remove the wiring and statements of decommissioned targets
//!
//! Every command reads a declared configuration (`--declared`) and a JSON
//! snapshot of the remote world (`--state`), which is loaded into the
//! in-memory control plane. Mutating commands write the resulting world back
//! to `--out` (default: `--state`).
//!
//! ## Configuration
//!
//! Settings are read from the environment with `ReconcileConfig::from_env`,
//! then any global flag that was given overrides its variable:
//!
//! - `HOOKWIRE_CONTINUE_ON_ERROR` - keep going past failed units
//! - `HOOKWIRE_QUALIFIER` - alias or version qualifier
//! - `HOOKWIRE_NAMESPACE` - ownership namespace tag
//! - `HOOKWIRE_MAX_IN_FLIGHT` - concurrency bound
//! - `HOOKWIRE_PRUNE_PERMISSIONS` - revoke superseded statements

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use clap::{Parser, Subcommand};
use hookwire_core::{Namespace, ReconcileConfig};

/// Hookwire CLI - bucket subscription and permission convergence.
#[derive(Debug, Parser)]
#[command(name = "hookwire")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Emit JSON logs instead of pretty logs.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Record failed units and keep going instead of aborting.
    #[arg(long, global = true)]
    pub continue_on_error: bool,

    /// Alias or version qualifier appended to target addresses.
    #[arg(long, global = true)]
    pub qualifier: Option<String>,

    /// Ownership namespace tag.
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    /// Maximum concurrent bucket writes and target permission tasks.
    #[arg(long, global = true)]
    pub max_in_flight: Option<usize>,

    /// Revoke superseded statements after a bucket converges.
    #[arg(long, global = true)]
    pub prune_permissions: Option<bool>,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration: `HOOKWIRE_*` variables, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable or flag is malformed or the resulting
    /// engine configuration fails validation.
    pub fn config(&self) -> hookwire_core::Result<Config> {
        self.config_over(ReconcileConfig::from_env()?)
    }

    /// Overlays the flags that were given on `base`.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace tag is malformed or the result fails
    /// validation.
    pub fn config_over(&self, mut reconcile: ReconcileConfig) -> hookwire_core::Result<Config> {
        if self.continue_on_error {
            reconcile.continue_on_error = true;
        }
        if let Some(qualifier) = &self.qualifier {
            reconcile.qualifier = Some(qualifier.clone());
        }
        if let Some(tag) = &self.namespace {
            reconcile.namespace = Namespace::new(tag.clone())?;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            reconcile.max_in_flight = max_in_flight;
        }
        if let Some(prune) = self.prune_permissions {
            reconcile.prune_permissions = prune;
        }
        reconcile.validate()?;

        Ok(Config {
            format: self.format.clone(),
            reconcile,
        })
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the changes a convergence pass would make, without mutating.
    Plan(commands::plan::PlanArgs),
    /// Converge subscriptions and permissions to the declared state.
    Converge(commands::converge::ConvergeArgs),
    /// Remove all owned wiring and statements of the given targets.
    Teardown(commands::teardown::TeardownArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// CLI configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Output format.
    pub format: OutputFormat,
    /// Engine configuration.
    pub reconcile: ReconcileConfig,
}
