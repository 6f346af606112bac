use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use crate::bridge::LoopConfig;
use crate::discovery;
use crate::mpd::{MpdAddress, DEFAULT_PORT};

/// Discord application the presence is shown under
pub const DEFAULT_CLIENT_ID: &str = "1031137720317263873";

#[derive(Debug, Parser)]
#[command(name = "mpd-presence", version, about = "Show what MPD is playing on Discord")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub options: RunOptions,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Mirror the player into Discord until interrupted (default)
    Run,
    /// Install and start a systemd user service
    Install {
        /// Options for the service's command line, after `--`
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Stop and remove the systemd user service
    Uninstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Talk the MPD protocol directly
    Mpd,
    /// Run external commands that print JSON
    Command,
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunOptions {
    /// Discord application id
    #[arg(long, env = "MPD_PRESENCE_CLIENT_ID", default_value = DEFAULT_CLIENT_ID)]
    pub client_id: String,

    #[arg(long, value_enum, env = "MPD_PRESENCE_BACKEND", default_value_t = Backend::Mpd)]
    pub backend: Backend,

    /// MPD socket path or host[:port] [default: $XDG_RUNTIME_DIR/mpd.sock]
    #[arg(long, env = "MPD_HOST")]
    pub mpd_host: Option<String>,

    #[arg(long, env = "MPD_PORT", default_value_t = DEFAULT_PORT)]
    pub mpd_port: u16,

    /// Command printing the player status as JSON (command backend)
    #[arg(long, env = "MPD_PRESENCE_STATUS_COMMAND", default_value = "rmpc status")]
    pub status_command: String,

    /// Command printing the current song as JSON (command backend)
    #[arg(long, env = "MPD_PRESENCE_SONG_COMMAND", default_value = "rmpc song")]
    pub song_command: String,

    /// Seconds between presence updates
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval: u64,

    /// Seconds to wait before looking for Discord again
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub retry_interval: u64,
}

impl RunOptions {
    pub fn mpd_address(&self) -> MpdAddress {
        match self.mpd_host.as_deref().filter(|host| !host.is_empty()) {
            Some(host) => MpdAddress::parse(host, self.mpd_port),
            None => MpdAddress::Unix(discovery::runtime_dir().join("mpd.sock")),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            poll_interval: Duration::from_secs(self.poll_interval),
            retry_interval: Duration::from_secs(self.retry_interval),
        }
    }
}

/// Split a command line on whitespace; no shell quoting
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}
