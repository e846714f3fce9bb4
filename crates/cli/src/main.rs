//! `cronned` CLI entry-point.
//!
//! Available sub-commands:
//! - `daemon`   : run every flow until a signal arrives or all roots exit.
//! - `validate` : load, check and build every flow, then print the graphs.
//! - `keyring`  : read or change secrets in the platform credential store.
//! - `ctl`      : send one command to a daemon's control surface.

mod commands;
mod config;
mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::Config;

#[derive(Parser)]
#[command(
    name = "cronned",
    about = "Runs restic backups from flows of timers, retries and jobs",
    version
)]
struct Cli {
    /// Directory containing the description and flow files.
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Directory containing config.json.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start every flow and keep running.
    Daemon {
        /// Serve the control surface on this address.
        #[arg(long)]
        bind: Option<String>,

        /// Read job secrets from CRONNED_SECRET_* variables instead of the keyring.
        #[arg(long)]
        env_secrets: bool,
    },
    /// Check and build every flow without running anything.
    Validate,
    /// Manage secrets in the platform credential store.
    Keyring {
        #[command(subcommand)]
        action: commands::keyring::Action,
    },
    /// Talk to a running daemon.
    Ctl {
        /// Control surface address, e.g. 127.0.0.1:8080.
        addr: String,
        /// queue, describe, stop, restart, reload, trigger, remove or stopall.
        command: String,
        /// Flow name or node ID.
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let bind = match &cli.command {
        Command::Daemon { bind, .. } => bind.clone(),
        _ => None,
    };
    let config = Config::load(&Config::search_path(cli.config.as_deref()))?
        .with_overrides(cli.dir, bind);
    logging::init(&config)?;

    match cli.command {
        Command::Daemon { env_secrets, .. } => commands::daemon::run(&config, env_secrets).await,
        Command::Validate => commands::validate::run(&config),
        Command::Keyring { action } => commands::keyring::run(action),
        Command::Ctl {
            addr,
            command,
            name,
        } => commands::ctl::run(&addr, &command, name.as_deref()).await,
    }
}
