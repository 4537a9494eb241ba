use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

use regex::Regex;

/// Transcript file name inside the logs directory.
pub const TRANSCRIPT_FILE: &str = "shell.out";

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-9;?]*[A-Za-z]").expect("ansi regex must compile"));

/// Remove terminal colour and cursor sequences.
pub fn strip_ansi(text: &str) -> std::borrow::Cow<'_, str> {
    ANSI_RE.replace_all(text, "")
}

/// Append-only plain-text record of everything an invocation printed and of
/// the output of the external commands it ran.
pub struct Transcript {
    path: PathBuf,
    file: Mutex<File>,
}

impl Transcript {
    /// Open `logs_dir/shell.out` for appending. When the current file is
    /// larger than `max_bytes` it is first moved to `shell.out.1`, replacing
    /// any previous rotation.
    pub fn open(logs_dir: &Path, max_bytes: u64) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(TRANSCRIPT_FILE);
        if let Ok(meta) = std::fs::metadata(&path) {
            if meta.len() > max_bytes {
                std::fs::rename(&path, rotated_path(&path))?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Mark the start of an invocation.
    pub fn header(&self, command_line: &str) {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
        self.append(&format!("=== {} {} ===", now, command_line));
    }

    /// Append text, stripped of ANSI sequences and newline-terminated.
    pub fn append(&self, text: &str) {
        let clean = strip_ansi(text);
        let Ok(mut file) = self.file.lock() else {
            return;
        };
        let result = if clean.ends_with('\n') {
            file.write_all(clean.as_bytes())
        } else {
            writeln!(file, "{}", clean)
        };
        if let Err(e) = result {
            tracing::debug!(path = %self.path.display(), error = %e, "transcript write failed");
        }
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".1");
    PathBuf::from(name)
}
