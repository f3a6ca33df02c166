use clap::{Args, Subcommand};

#[derive(Debug, Args)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub command: QueueCommand,
}

#[derive(Debug, Subcommand)]
pub enum QueueCommand {
    Status,
    List,
    Replay {
        /// Base URL of the marketplace backend.
        #[arg(long)]
        endpoint: String,
        #[arg(long, env = "FIELDSYNC_API_TOKEN", hide_env_values = true)]
        token: Option<String>,
        #[arg(long, default_value_t = 15)]
        timeout_secs: u64,
    },
}

#[derive(Debug, Args)]
pub struct AbandonedArgs {
    #[command(subcommand)]
    pub command: AbandonedCommand,
}

#[derive(Debug, Subcommand)]
pub enum AbandonedCommand {
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Purge,
}
