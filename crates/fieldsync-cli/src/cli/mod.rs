use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod args;
mod queue;

#[cfg(test)]
mod tests;

pub use args::{CacheArgs, CacheCommand, ConfigArgs, ConfigCommand, InterceptArgs, NameArg};
pub use queue::{AbandonedArgs, AbandonedCommand, QueueArgs, QueueCommand};

#[derive(Debug, Parser)]
#[command(name = "fieldsync")]
#[command(about = "Inspect and replay a fieldsync offline state root", version)]
pub struct Cli {
    #[arg(long, default_value = ".fieldsync")]
    pub root: PathBuf,

    /// TOML config file; falls back to `FIELDSYNC_CONFIG`.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Init,
    Classify(NameArg),
    Intercept(InterceptArgs),
    Queue(QueueArgs),
    Cache(CacheArgs),
    Abandoned(AbandonedArgs),
    Config(ConfigArgs),
}
