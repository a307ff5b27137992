//! Plan command - dry-run a convergence pass.

use anyhow::{Context, Result};
use clap::Args;
use hookwire_reconcile::ConvergencePlan;
use owo_colors::OwoColorize;

use super::{Workspace, WorldArgs, print_warnings};
use crate::{Config, OutputFormat};

/// Arguments for the plan command.
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Declared configuration and state snapshot.
    #[command(flatten)]
    pub world: WorldArgs,
}

/// Execute the plan command.
///
/// Issues no mutations; the state snapshot is never written.
///
/// # Errors
///
/// Returns an error if the inputs cannot be loaded, or planning aborts on an
/// unresolved target without `--continue-on-error`.
pub async fn execute(args: PlanArgs, config: &Config) -> Result<()> {
    let workspace = Workspace::load(&args.world, config).await?;
    let plan = workspace.applier.plan(&workspace.declared).await?;
    print_plan(&plan, config)
}

fn print_plan(plan: &ConvergencePlan, config: &Config) -> Result<()> {
    match config.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(plan).context("Failed to serialize plan")?
            );
        }
        OutputFormat::Text => {
            if plan.is_noop() && plan.failed_reads.is_empty() {
                println!("{}", "No changes".green());
            }
            for bucket in &plan.buckets {
                if bucket.is_noop() {
                    println!("  {} unchanged ({} entries)", bucket.bucket, bucket.unchanged.len());
                    continue;
                }
                println!("  {}", bucket.bucket.bold());
                for wiring in &bucket.additions {
                    println!(
                        "    {} {} -> {}",
                        "+".green(),
                        wiring.fingerprint.as_str(),
                        wiring.target_address
                    );
                }
                for entry in &bucket.removals {
                    println!(
                        "    {} {} -> {}",
                        "-".red(),
                        entry.id.as_deref().unwrap_or("<no id>"),
                        entry.target_address
                    );
                }
                if !bucket.withheld.is_empty() {
                    println!("    {} removal(s) withheld", bucket.withheld.len());
                }
            }
            for (bucket, error) in &plan.failed_reads {
                println!("  {} {}", bucket, format!("unreadable: {error}").red());
            }
            print_warnings(&plan.warnings);
        }
        OutputFormat::Table => {
            use tabled::{Table, Tabled};

            #[derive(Tabled)]
            struct BucketRow {
                #[tabled(rename = "Bucket")]
                bucket: String,
                #[tabled(rename = "Add")]
                additions: usize,
                #[tabled(rename = "Remove")]
                removals: usize,
                #[tabled(rename = "Keep")]
                unchanged: usize,
                #[tabled(rename = "Withheld")]
                withheld: usize,
            }

            let rows: Vec<_> = plan
                .buckets
                .iter()
                .map(|b| BucketRow {
                    bucket: b.bucket.clone(),
                    additions: b.additions.len(),
                    removals: b.removals.len(),
                    unchanged: b.unchanged.len(),
                    withheld: b.withheld.len(),
                })
                .collect();

            if rows.is_empty() {
                println!("No declared buckets");
            } else {
                println!("{}", Table::new(rows));
            }
            print_warnings(&plan.warnings);
        }
    }
    Ok(())
}
