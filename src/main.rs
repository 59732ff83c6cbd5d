mod cli;
mod ops;
mod registry;

use anyhow::Result;
use clap::Parser;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use cli::{Cli, Commands, SnapshotCommands};

fn main() {
    let cli = Cli::parse();
    let _guard = init_logging(cli.config.as_deref(), cli.verbose);

    if let Err(err) = run(cli) {
        tracing::error!("{:#}", err);
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

/// stderr gets warnings (debug with `-v`); the log file next to the settings
/// gets everything `SWITCHYARD_LOG` allows, `info` by default.
fn init_logging(config: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    let stderr_level = if verbose { LevelFilter::DEBUG } else { LevelFilter::WARN };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .compact()
        .with_filter(stderr_level);

    let log_dir = registry::settings_path(config)
        .ok()
        .map(|p| registry::settings_dir(&p))
        .filter(|dir| std::fs::create_dir_all(dir).is_ok());
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, registry::LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let filter = EnvFilter::try_from_env("SWITCHYARD_LOG")
                .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();

    match cli.command {
        Commands::Init { game_path, backup_root, payload_root, maa_path } => {
            ops::do_init(config, game_path, backup_root, payload_root, maa_path)?;
        }
        Commands::Switch { variant, snapshot, launch, yes } => {
            ops::do_switch(config, &variant, snapshot, launch, yes)?;
        }
        Commands::Snapshot(cmd) => match cmd {
            SnapshotCommands::Save { name, variant, yes } => {
                ops::do_snapshot_save(config, &name, variant, yes)?;
            }
            SnapshotCommands::List { variant } => {
                ops::do_snapshot_list(config, variant)?;
            }
            SnapshotCommands::Delete { name, yes } => {
                ops::do_snapshot_delete(config, &name, yes)?;
            }
        },
        Commands::Reset { yes } => {
            ops::do_reset(config, yes)?;
        }
        Commands::Maa => {
            ops::do_maa(config)?;
        }
        Commands::Status => {
            ops::do_status(config)?;
        }
        Commands::Variants => {
            ops::do_variants(config)?;
        }
        Commands::Version => {
            ops::do_version();
        }
    }

    Ok(())
}
