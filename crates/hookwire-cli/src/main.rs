//! Hookwire CLI - converge bucket subscriptions and invoke permissions.
//!
//! The main entry point for the `hookwire` binary.

use anyhow::Result;
use clap::Parser;
use hookwire_core::{LogFormat, init_logging};

use hookwire_cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    });
    hookwire_reconcile::metrics::register_metrics();
    let config = cli.config()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Plan(args) => hookwire_cli::commands::plan::execute(args, &config).await,
            Commands::Converge(args) => {
                hookwire_cli::commands::converge::execute(args, &config).await
            }
            Commands::Teardown(args) => {
                hookwire_cli::commands::teardown::execute(args, &config).await
            }
        }
    })
}
