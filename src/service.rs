use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};

pub const SERVICE_NAME: &str = "mpd-presence";

/// `~/.config/systemd/user/mpd-presence.service` (honours `XDG_CONFIG_HOME`)
pub fn unit_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().context("Failed to determine the config directory")?;
    Ok(unit_path_in(&config_dir))
}

fn unit_path_in(config_dir: &Path) -> PathBuf {
    config_dir
        .join("systemd")
        .join("user")
        .join(format!("{}.service", SERVICE_NAME))
}

/// Quote an ExecStart argument if systemd would otherwise split it
fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.contains(|c: char| c.is_whitespace() || c == '"' || c == '\\') {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
}

/// The unit runs alongside mpd.service and restarts on failure
pub fn render_unit(exe: &Path, args: &[String]) -> String {
    let mut exec = quote(&exe.to_string_lossy());
    for arg in args {
        exec.push(' ');
        exec.push_str(&quote(arg));
    }

    format!(
        "[Unit]
Description=Discord Rich Presence for MPD
After=mpd.service
Requires=mpd.service

[Service]
Type=simple
ExecStart={exec}
Restart=on-failure
RestartSec=5

[Install]
WantedBy=mpd.service
"
    )
}

fn systemctl(args: &[&str]) -> Result<()> {
    let status = Command::new("systemctl")
        .arg("--user")
        .args(args)
        .status()
        .context("Failed to run systemctl")?;
    if !status.success() {
        bail!("systemctl --user {} exited with {}", args.join(" "), status);
    }
    Ok(())
}

/// Check if the service unit is installed
pub fn is_installed() -> bool {
    match dirs::config_dir() {
        Some(config_dir) => is_installed_in(&config_dir),
        None => {
            log::warn!("Failed to check service status: no config directory");
            false
        }
    }
}

fn is_installed_in(config_dir: &Path) -> bool {
    unit_path_in(config_dir).is_file()
}

/// Write the unit for the current executable and start it.
/// `args` are passed through to the service's command line.
pub fn install(args: &[String]) -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    let path = unit_path()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, render_unit(&exe, args))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Service file written to {}", path.display());

    systemctl(&["daemon-reload"])?;
    systemctl(&["enable", "--now", SERVICE_NAME])?;
    log::info!("Service enabled and started");

    Ok(path)
}

/// Stop and disable the service, then remove its unit
pub fn uninstall() -> Result<()> {
    let path = unit_path()?;
    if !is_installed() {
        log::info!("No service file at {}, nothing to do", path.display());
        return Ok(());
    }

    if let Err(e) = systemctl(&["disable", "--now", SERVICE_NAME]) {
        log::warn!("Failed to disable service: {:#}", e);
    }
    std::fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
    systemctl(&["daemon-reload"])?;
    log::info!("Service file removed");

    Ok(())
}
