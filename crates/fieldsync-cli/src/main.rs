mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use fieldsync_core::init_tracing;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("warn");
    let cli = Cli::parse();
    commands::run_from_root(&cli.root, cli.config.as_deref(), cli.command).await
}
