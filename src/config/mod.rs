pub mod model;
pub mod resolve;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use model::Settings;

/// Name of the optional settings file in the installation directory.
pub const SETTINGS_FILE: &str = "nodectl.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{what} not found: {}", path.display())]
    Missing { what: &'static str, path: PathBuf },
    #[error("failed to read {what} {}: {source}", path.display())]
    Read {
        what: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {what} {}: {message}", path.display())]
    Parse {
        what: &'static str,
        path: PathBuf,
        message: String,
    },
}

/// Load `nodectl.toml` from the installation directory, falling back to the
/// stock layout when the file does not exist.
pub fn load_settings(home: &Path) -> Result<Settings, ConfigError> {
    let path = home.join(SETTINGS_FILE);
    if !path.is_file() {
        return Ok(Settings::default());
    }
    let content = read(&path, "settings file")?;
    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        what: "settings file",
        path,
        message: e.to_string(),
    })
}

/// Read and deserialize a JSON document, naming it `what` in errors.
pub fn load_json<T: DeserializeOwned>(path: &Path, what: &'static str) -> Result<T, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::Missing {
            what,
            path: path.to_path_buf(),
        });
    }
    let content = read(path, what)?;
    serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
        what,
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn read(path: &Path, what: &'static str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        what,
        path: path.to_path_buf(),
        source,
    })
}
