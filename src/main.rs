mod activity;
mod bridge;
mod command;
mod config;
mod discovery;
mod ipc;
mod mpd;
mod player;
mod service;
mod state;
mod types;

use anyhow::{Context, Result};
use clap::Parser;

use crate::bridge::{PresenceLoop, SocketConnector};
use crate::command::CommandBackend;
use crate::config::{split_command, Backend, Cli, Commands, RunOptions};
use crate::ipc::IO_TIMEOUT;
use crate::mpd::MpdBackend;
use crate::state::Shutdown;

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let cli = Cli::parse();

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.options),
        Commands::Install { args } => service::install(&args).map(|path| {
            log::info!("Installed {}", path.display());
        }),
        Commands::Uninstall => service::uninstall(),
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(options: RunOptions) -> Result<()> {
    log::info!("Starting mpd-presence {}", env!("CARGO_PKG_VERSION"));

    // Ctrl+C (SIGINT) and SIGTERM only raise the flag; the loop closes the
    // Discord connection itself and then returns
    let shutdown = Shutdown::new();
    let shutdown_for_signal = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("Received interrupt signal, shutting down...");
        shutdown_for_signal.trigger();
    })
    .context("Failed to set Ctrl+C handler")?;

    let connector = SocketConnector::new(
        discovery::runtime_dir(),
        options.client_id.clone(),
        IO_TIMEOUT,
    );
    let config = options.loop_config();

    match options.backend {
        Backend::Mpd => {
            let address = options.mpd_address();
            log::info!("Using MPD at {}", address);
            let backend = MpdBackend::new(address, IO_TIMEOUT);
            PresenceLoop::new(connector, backend, shutdown, config).run()?;
        }
        Backend::Command => {
            log::info!(
                "Using commands `{}` and `{}`",
                options.status_command,
                options.song_command
            );
            let backend = CommandBackend::new(
                split_command(&options.status_command),
                split_command(&options.song_command),
                IO_TIMEOUT,
            );
            PresenceLoop::new(connector, backend, shutdown, config).run()?;
        }
    }

    log::info!("Stopped");
    Ok(())
}
