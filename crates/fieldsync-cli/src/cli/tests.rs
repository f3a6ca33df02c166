use super::*;
use clap::Parser;

#[test]
fn queue_status_parses_with_default_root() {
    let cli = Cli::try_parse_from(["fieldsync", "queue", "status"]).expect("parse");
    assert_eq!(cli.root, PathBuf::from(".fieldsync"));
    assert!(cli.config.is_none());
    match cli.command {
        Commands::Queue(QueueArgs {
            command: QueueCommand::Status,
        }) => {}
        _ => panic!("expected queue status command"),
    }
}

#[test]
fn queue_replay_requires_endpoint() {
    let parsed = Cli::try_parse_from(["fieldsync", "queue", "replay"]);
    assert!(parsed.is_err(), "replay without --endpoint must be rejected");
}

#[test]
fn queue_replay_parses_endpoint_and_timeout() {
    let cli = Cli::try_parse_from([
        "fieldsync",
        "--root",
        "/tmp/state",
        "queue",
        "replay",
        "--endpoint",
        "https://api.example.com",
        "--timeout-secs",
        "3",
    ])
    .expect("parse");
    assert_eq!(cli.root, PathBuf::from("/tmp/state"));
    match cli.command {
        Commands::Queue(QueueArgs {
            command:
                QueueCommand::Replay {
                    endpoint,
                    timeout_secs,
                    ..
                },
        }) => {
            assert_eq!(endpoint, "https://api.example.com");
            assert_eq!(timeout_secs, 3);
        }
        _ => panic!("expected queue replay command"),
    }
}

#[test]
fn intercept_parses_payload_and_offline_flag() {
    let cli = Cli::try_parse_from([
        "fieldsync",
        "intercept",
        "--name",
        "orders.create",
        "--payload",
        r#"{"id":"A"}"#,
        "--offline",
    ])
    .expect("parse");
    match cli.command {
        Commands::Intercept(InterceptArgs {
            name,
            payload,
            offline,
        }) => {
            assert_eq!(name, "orders.create");
            assert_eq!(payload.as_deref(), Some(r#"{"id":"A"}"#));
            assert!(offline);
        }
        _ => panic!("expected intercept command"),
    }
}

#[test]
fn abandoned_list_defaults_limit() {
    let cli = Cli::try_parse_from(["fieldsync", "abandoned", "list"]).expect("parse");
    match cli.command {
        Commands::Abandoned(AbandonedArgs {
            command: AbandonedCommand::List { limit },
        }) => assert_eq!(limit, 50),
        _ => panic!("expected abandoned list command"),
    }
}

#[test]
fn cache_for_intent_uses_kebab_case_subcommand() {
    let cli =
        Cli::try_parse_from(["fieldsync", "cache", "for-intent", "orders.setAll"]).expect("parse");
    match cli.command {
        Commands::Cache(CacheArgs {
            command: CacheCommand::ForIntent { name },
        }) => assert_eq!(name, "orders.setAll"),
        _ => panic!("expected cache for-intent command"),
    }
}

#[test]
fn config_show_parses_toml_flag() {
    let cli = Cli::try_parse_from(["fieldsync", "--config", "fs.toml", "config", "show", "--toml"])
        .expect("parse");
    assert_eq!(cli.config, Some(PathBuf::from("fs.toml")));
    match cli.command {
        Commands::Config(ConfigArgs {
            command: ConfigCommand::Show { toml },
        }) => assert!(toml),
        _ => panic!("expected config show command"),
    }
}
