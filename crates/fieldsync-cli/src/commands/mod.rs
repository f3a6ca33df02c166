use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use fieldsync_core::{
    Classification, Connectivity, FieldSync, FieldSyncConfig, Intent, STATE_DB_FILE,
    cache_key_for,
};

use crate::cli::{AbandonedCommand, CacheCommand, Commands, ConfigCommand, QueueCommand};

mod queue;
mod support;

use self::queue::{handle_queue_list, handle_queue_replay, handle_queue_status};
use self::support::{OfflineOnlyDispatcher, parse_payload, print_json};

pub(crate) async fn run_from_root(
    root: &Path,
    config_path: Option<&Path>,
    command: Commands,
) -> Result<()> {
    let config = FieldSyncConfig::load(config_path).context("failed to load config")?;

    match command {
        Commands::Config(args) => {
            let ConfigCommand::Show { toml } = args.command;
            if toml {
                print!("{}", config.to_toml_string()?);
            } else {
                print_json(&config)?;
            }
            Ok(())
        }
        Commands::Queue(args) => match args.command {
            QueueCommand::Replay {
                endpoint,
                token,
                timeout_secs,
            } => handle_queue_replay(root, config, &endpoint, token, timeout_secs).await,
            QueueCommand::Status => handle_queue_status(&open_app(root, config)?, root).await,
            QueueCommand::List => handle_queue_list(&open_app(root, config)?).await,
        },
        command => {
            let app = open_app(root, config)?;
            run_with_app(&app, root, command).await
        }
    }
}

fn open_app(root: &Path, config: FieldSyncConfig) -> Result<FieldSync> {
    FieldSync::open(root, config, Arc::new(OfflineOnlyDispatcher))
        .with_context(|| format!("failed to open state root {}", root.display()))
}

async fn run_with_app(app: &FieldSync, root: &Path, command: Commands) -> Result<()> {
    match command {
        Commands::Init => {
            print_json(&serde_json::json!({
                "status": "ok",
                "root": root.display().to_string(),
                "state_db": root.join(STATE_DB_FILE).display().to_string(),
            }))?;
        }
        Commands::Classify(args) => {
            let classification = app.classify(&args.name);
            let cache_key = (classification == Classification::Cacheable)
                .then(|| cache_key_for(&args.name));
            print_json(&serde_json::json!({
                "name": args.name,
                "classification": classification,
                "cache_key": cache_key,
            }))?;
        }
        Commands::Intercept(args) => {
            let payload = parse_payload(args.payload.as_deref())?;
            if args.offline {
                app.set_connectivity(Connectivity::Offline).await;
            }
            let intercepted = app.intercept(Intent::new(args.name, payload)).await;
            app.flush().await?;
            print_json(&intercepted)?;
        }
        Commands::Cache(args) => match args.command {
            CacheCommand::Get { key } => {
                let entry = app
                    .cached(&key)
                    .await?
                    .with_context(|| format!("no cache entry for key `{key}`"))?;
                print_json(&entry)?;
            }
            CacheCommand::ForIntent { name } => {
                let entry = app
                    .cached_for_intent(&name)
                    .await?
                    .with_context(|| format!("no cache entry for intent `{name}`"))?;
                print_json(&entry)?;
            }
            CacheCommand::List => {
                print_json(&app.cache_keys().await?)?;
            }
        },
        Commands::Abandoned(args) => match args.command {
            AbandonedCommand::List { limit } => {
                print_json(&app.abandoned(limit).await?)?;
            }
            AbandonedCommand::Purge => {
                let purged = app.purge_abandoned().await?;
                print_json(&serde_json::json!({ "purged": purged }))?;
            }
        },
        Commands::Queue(_) | Commands::Config(_) => {}
    }
    Ok(())
}
