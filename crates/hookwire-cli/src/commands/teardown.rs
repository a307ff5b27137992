//! Teardown command - remove the wiring of decommissioned targets.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{Workspace, WorldArgs, ensure_success, print_report};
use crate::Config;

/// Arguments for the teardown command.
#[derive(Debug, Args)]
pub struct TeardownArgs {
    /// Declared configuration and state snapshot.
    #[command(flatten)]
    pub world: WorldArgs,

    /// Target to tear down (repeatable).
    #[arg(long = "target", required = true)]
    pub targets: Vec<String>,

    /// Where to write the resulting state (defaults to `--state`).
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Execute the teardown command.
///
/// # Errors
///
/// Returns an error if the inputs cannot be loaded, a target is unresolved
/// without `--continue-on-error`, the state cannot be written, or the run
/// finished with a failure.
pub async fn execute(args: TeardownArgs, config: &Config) -> Result<()> {
    let workspace = Workspace::load(&args.world, config).await?;
    let report = workspace
        .applier
        .teardown(&workspace.declared, &args.targets)
        .await?;

    let out = args.out.as_ref().unwrap_or(&args.world.state);
    workspace.save(out).await?;

    print_report(&report, config)?;
    ensure_success(&report)
}
