use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct NameArg {
    pub name: String,
}

#[derive(Debug, Args)]
pub struct InterceptArgs {
    #[arg(long)]
    pub name: String,
    /// JSON payload; defaults to `null`.
    #[arg(long)]
    pub payload: Option<String>,
    /// Report connectivity as offline before intercepting.
    #[arg(long, default_value_t = false)]
    pub offline: bool,
}

#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    Get {
        key: String,
    },
    /// Looks up the cache entry written for an intent name.
    ForIntent {
        name: String,
    },
    List,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Show {
        #[arg(long, default_value_t = false)]
        toml: bool,
    },
}
