use std::path::PathBuf;

#[cfg(unix)]
mod unix;

#[cfg(unix)]
use unix as imp;

/// Check if a process with the given PID is still alive.
pub fn is_process_alive(pid: u32) -> bool {
    imp::is_process_alive(pid)
}

/// Send SIGKILL to a single process.
pub fn force_kill(pid: u32) -> anyhow::Result<()> {
    imp::force_kill(pid)
}

/// Get the current user's home directory.
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir()
}

/// Expand leading `~` or `$HOME` in a path string to the actual home directory.
///
/// Returns the original string unchanged when no home directory is available
/// or the string doesn't start with `~` or `$HOME`.
pub fn expand_home(path: &str) -> String {
    if let Some(home) = home_dir() {
        let home = home.to_string_lossy();
        if path == "~" || path == "$HOME" {
            return home.to_string();
        }
        if let Some(rest) = path.strip_prefix("~/") {
            return format!("{}/{}", home, rest);
        }
        if let Some(rest) = path.strip_prefix("$HOME/") {
            return format!("{}/{}", home, rest);
        }
    }
    path.to_string()
}

/// Parse the contents of a PID file.
pub fn parse_pid(content: &str) -> Option<u32> {
    content.split_whitespace().next()?.parse().ok().filter(|pid| *pid > 0)
}
