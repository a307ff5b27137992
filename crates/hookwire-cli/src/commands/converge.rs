//! Converge command - drive the world to the declared state.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use super::{Workspace, WorldArgs, ensure_success, print_report};
use crate::Config;

/// Arguments for the converge command.
#[derive(Debug, Args)]
pub struct ConvergeArgs {
    /// Declared configuration and state snapshot.
    #[command(flatten)]
    pub world: WorldArgs,

    /// Where to write the resulting state (defaults to `--state`).
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Execute the converge command.
///
/// The resulting world is written even when some units failed, since the
/// units that did converge are already applied.
///
/// # Errors
///
/// Returns an error if the inputs cannot be loaded, the run aborts, the state
/// cannot be written, or the run finished with a failure.
pub async fn execute(args: ConvergeArgs, config: &Config) -> Result<()> {
    let workspace = Workspace::load(&args.world, config).await?;
    let report = workspace.applier.converge(&workspace.declared).await?;

    let out = args.out.as_ref().unwrap_or(&args.world.state);
    workspace.save(out).await?;

    print_report(&report, config)?;
    ensure_success(&report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_converge_args_parsing() {
        use clap::Parser;

        #[derive(Parser)]
        struct TestCli {
            #[command(flatten)]
            args: ConvergeArgs,
        }

        let cli = TestCli::parse_from([
            "test",
            "--declared",
            "d.json",
            "--state",
            "s.json",
            "--out",
            "o.json",
        ]);
        assert_eq!(cli.args.world.declared, PathBuf::from("d.json"));
        assert_eq!(cli.args.out, Some(PathBuf::from("o.json")));
    }
}
