use std::path::{Path, PathBuf};

use crate::ipc::PresenceError;

/// Where Discord puts its socket, relative to the runtime directory: native
/// installs first, then Flatpak and Snap packages. First match wins.
pub const SOCKET_DIRS: &[&str] = &[
    ".",
    "app/com.discordapp.Discord",
    "snap.discord-canary",
    "snap.discord",
];

const SOCKET_PATTERN: &str = "discord-ipc-*";

/// `$XDG_RUNTIME_DIR`, or `/tmp` when unset
pub fn runtime_dir() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Find the first Discord IPC socket below `base`
pub fn discover(base: &Path) -> Result<PathBuf, PresenceError> {
    for subdir in SOCKET_DIRS {
        let dir = match *subdir {
            "." => base.to_path_buf(),
            subdir => base.join(subdir),
        };
        if !dir.is_dir() {
            continue;
        }

        let pattern = format!(
            "{}/{}",
            glob::Pattern::escape(&dir.to_string_lossy()),
            SOCKET_PATTERN
        );
        let entries = match glob::glob(&pattern) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Invalid socket pattern {}: {}", pattern, e);
                continue;
            }
        };

        if let Some(path) = entries.flatten().next() {
            log::debug!("Found Discord IPC socket at {}", path.display());
            return Ok(path);
        }
    }

    Err(PresenceError::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("mpd.sock"));

        assert!(matches!(discover(dir.path()), Err(PresenceError::NotFound)));
    }

    #[test]
    fn test_missing_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");

        assert!(matches!(discover(&missing), Err(PresenceError::NotFound)));
    }

    #[test]
    fn test_native_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("discord-ipc-0");
        touch(&socket);

        assert_eq!(discover(dir.path()).unwrap(), socket);
    }

    #[test]
    fn test_lowest_numbered_socket_first() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("discord-ipc-3"));
        touch(&dir.path().join("discord-ipc-1"));

        assert_eq!(
            discover(dir.path()).unwrap(),
            dir.path().join("discord-ipc-1")
        );
    }

    #[test]
    fn test_flatpak_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("app/com.discordapp.Discord/discord-ipc-0");
        touch(&socket);

        assert_eq!(discover(dir.path()).unwrap(), socket);
    }

    #[test]
    fn test_native_wins_over_snap() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("snap.discord/discord-ipc-0"));
        touch(&dir.path().join("snap.discord-canary/discord-ipc-0"));
        touch(&dir.path().join("discord-ipc-0"));

        assert_eq!(
            discover(dir.path()).unwrap(),
            dir.path().join("discord-ipc-0")
        );

        fs::remove_file(dir.path().join("discord-ipc-0")).unwrap();
        assert_eq!(
            discover(dir.path()).unwrap(),
            dir.path().join("snap.discord-canary/discord-ipc-0")
        );
    }
}
