//! CLI command implementations.

pub mod converge;
pub mod plan;
pub mod teardown;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use hookwire_core::{ControlPlanes, MemoryControlPlane, WorldSnapshot};
use hookwire_reconcile::{ApplyReport, ConvergentApplier, DeclaredConfig, UnitStatus};
use owo_colors::OwoColorize;

use crate::{Config, OutputFormat};

/// Inputs shared by every command.
#[derive(Debug, Args)]
pub struct WorldArgs {
    /// Declared configuration (JSON with a `functions` map).
    #[arg(long)]
    pub declared: PathBuf,

    /// JSON snapshot of buckets, policies and deployed targets.
    #[arg(long)]
    pub state: PathBuf,
}

/// A loaded world: the declared configuration and the control plane over the snapshot.
pub struct Workspace {
    /// Parsed declared configuration.
    pub declared: DeclaredConfig,
    /// In-memory control plane seeded from the snapshot.
    pub plane: Arc<MemoryControlPlane>,
    /// Applier bound to `plane`.
    pub applier: ConvergentApplier,
}

impl Workspace {
    /// Loads both inputs and builds an applier over them.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read or parsed, or the
    /// configuration is invalid.
    pub async fn load(args: &WorldArgs, config: &Config) -> Result<Self> {
        let declared_json = tokio::fs::read_to_string(&args.declared)
            .await
            .with_context(|| format!("Failed to read declared configuration: {:?}", args.declared))?;
        let declared = DeclaredConfig::from_json(&declared_json)
            .with_context(|| format!("Invalid declared configuration: {:?}", args.declared))?;

        let state_json = tokio::fs::read_to_string(&args.state)
            .await
            .with_context(|| format!("Failed to read state snapshot: {:?}", args.state))?;
        let snapshot: WorldSnapshot = serde_json::from_str(&state_json)
            .with_context(|| format!("Failed to parse state snapshot: {:?}", args.state))?;
        let plane = Arc::new(MemoryControlPlane::from_snapshot(snapshot));

        let applier = ConvergentApplier::new(
            ControlPlanes::from_backend(plane.clone()),
            config.reconcile.clone(),
        )?;
        tracing::debug!(declared = ?args.declared, state = ?args.state, "workspace loaded");

        Ok(Self {
            declared,
            plane,
            applier,
        })
    }

    /// Writes the current world to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be taken or written.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.plane.snapshot()?;
        let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialize state")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write state snapshot: {path:?}"))?;
        tracing::info!(path = ?path, "state written");
        Ok(())
    }
}

/// Prints a run report in the configured format.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn print_report(report: &ApplyReport, config: &Config) -> Result<()> {
    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(report).context("Failed to serialize report")?
            );
        }
        OutputFormat::Text => {
            println!("{} {}", report.operation, format_status(&report.status.to_string()));
            println!();
            for bucket in &report.buckets {
                println!(
                    "  {} {} (+{} -{} ={}{})",
                    bucket.bucket,
                    format_unit(&bucket.status),
                    bucket.added,
                    bucket.removed,
                    bucket.kept,
                    if bucket.withheld > 0 {
                        format!(", {} withheld", bucket.withheld)
                    } else {
                        String::new()
                    }
                );
            }
            for target in &report.targets {
                println!(
                    "  {} {} (granted {}, revoked {})",
                    target.target,
                    format_unit(&target.status),
                    target.granted.len(),
                    target.revoked.len()
                );
            }
            print_warnings(&report.warnings);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct UnitRow {
                #[tabled(rename = "Unit")]
                unit: String,
                #[tabled(rename = "Status")]
                status: String,
                #[tabled(rename = "Changes")]
                changes: String,
            }

            let rows: Vec<_> = report
                .buckets
                .iter()
                .map(|b| UnitRow {
                    unit: format!("bucket {}", b.bucket),
                    status: unit_label(&b.status),
                    changes: format!("+{} -{} ={}", b.added, b.removed, b.kept),
                })
                .chain(report.targets.iter().map(|t| UnitRow {
                    unit: format!("target {}", t.target),
                    status: unit_label(&t.status),
                    changes: format!("granted {} revoked {}", t.granted.len(), t.revoked.len()),
                }))
                .collect();

            if rows.is_empty() {
                println!("Nothing to do");
            } else {
                println!("{}", Table::new(rows));
            }
            print_warnings(&report.warnings);
        }
    }
    Ok(())
}

/// Fails if the run did not succeed, so the process exits non-zero.
///
/// # Errors
///
/// Returns an error for failed or cancelled runs.
pub fn ensure_success(report: &ApplyReport) -> Result<()> {
    if !report.is_success() {
        anyhow::bail!(
            "{} finished with status {} ({} failed units)",
            report.operation,
            report.status,
            report.failed_units()
        );
    }
    Ok(())
}

pub(crate) fn print_warnings(warnings: &[String]) {
    if warnings.is_empty() {
        return;
    }
    println!();
    println!("Warnings:");
    for warning in warnings {
        println!("  {}", warning.yellow());
    }
}

fn unit_label(status: &UnitStatus) -> String {
    match status {
        UnitStatus::Succeeded => "succeeded".to_string(),
        UnitStatus::Skipped { reason } => format!("skipped: {reason}"),
        UnitStatus::Failed { error } => format!("failed: {error}"),
    }
}

fn format_unit(status: &UnitStatus) -> String {
    let label = unit_label(status);
    match status {
        UnitStatus::Succeeded => label.green().to_string(),
        UnitStatus::Skipped { .. } => label.dimmed().to_string(),
        UnitStatus::Failed { .. } => label.red().to_string(),
    }
}

fn format_status(status: &str) -> String {
    match status {
        "success" => status.green().to_string(),
        "partial_failure" => status.yellow().to_string(),
        "failure" => status.red().to_string(),
        _ => status.dimmed().to_string(),
    }
}
