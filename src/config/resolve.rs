use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::model::{Descriptor, NodeConfig, Settings};
use super::{load_json, ConfigError, SETTINGS_FILE};

/// Deployment network the installation is operated on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Devnet,
}

impl Network {
    pub const ALL: [Network; 3] = [Network::Mainnet, Network::Testnet, Network::Devnet];

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Devnet => "devnet",
        }
    }

    /// Built-in snapshot download location for this network.
    pub fn default_download_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://downloads.lisk.io/lisk/main",
            Network::Testnet => "https://downloads.lisk.io/lisk/test",
            Network::Devnet => "https://downloads.lisk.io/lisk/dev",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported network '{0}' (use mainnet, testnet or devnet)")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Network::ALL
            .into_iter()
            .find(|n| n.as_str() == s)
            .ok_or_else(|| UnknownNetwork(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub name: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub port: u16,
    pub password: Option<String>,
}

/// Everything an invocation needs from the node's configuration, read once
/// and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub app_name: String,
    pub descriptor_path: PathBuf,
    pub config_path: PathBuf,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub log_file: PathBuf,
}

/// Walk up the directory tree from `start`, checking for `filename` at each level.
/// Returns the full path to the file if found, or None if the root is reached
/// without finding it.
pub fn find_config(start: &Path, filename: &str) -> Option<PathBuf> {
    let mut current = start.to_path_buf();
    loop {
        let candidate = current.join(filename);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !current.pop() {
            return None;
        }
    }
}

/// Resolve the installation directory. An explicit `--home` must exist.
/// Otherwise search from the current working directory upward for
/// `nodectl.toml`, and finally fall back to the directory holding the
/// executable.
pub fn resolve_home(cli_home: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(path) = cli_home {
        let expanded = PathBuf::from(crate::platform::expand_home(&path.to_string_lossy()));
        if expanded.is_dir() {
            return Ok(expanded.canonicalize()?);
        }
        anyhow::bail!("Installation directory not found: {}", expanded.display());
    }

    let cwd = std::env::current_dir()?;
    if let Some(settings) = find_config(&cwd, SETTINGS_FILE) {
        if let Some(dir) = settings.parent() {
            return Ok(dir.to_path_buf());
        }
    }

    let exe = std::env::current_exe()?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow::anyhow!("cannot determine installation directory"))
}

/// Program names containing a path separator are relative to `home`;
/// bare names are left for `PATH` lookup.
pub fn binary_path(home: &Path, name: &str) -> String {
    let expanded = crate::platform::expand_home(name);
    if expanded.contains('/') {
        home.join(expanded).to_string_lossy().into_owned()
    } else {
        expanded
    }
}

/// Substitute `{network}` and resolve the template against `home`.
pub fn network_path(home: &Path, template: &str, network: Network) -> PathBuf {
    home.join(template.replace("{network}", network.as_str()))
}

/// Produce the [`ResolvedConfig`] for `network`.
///
/// Without a descriptor override the network's default descriptor supplies
/// the app name and the network's config path supplies everything else.
/// With an override the descriptor must exist, and the config path is the one
/// embedded in its app arguments.
pub fn resolve(
    home: &Path,
    network: Network,
    settings: &Settings,
    descriptor_override: Option<&Path>,
) -> Result<ResolvedConfig, ConfigError> {
    let descriptor_path = match descriptor_override {
        Some(path) => path.to_path_buf(),
        None => network_path(home, &settings.paths.descriptor, network),
    };
    let descriptor: Descriptor = load_json(&descriptor_path, "process descriptor")?;
    let app = descriptor.apps.first().ok_or_else(|| ConfigError::Parse {
        what: "process descriptor",
        path: descriptor_path.clone(),
        message: "no apps defined".to_string(),
    })?;

    let config_path = match descriptor_override {
        None => network_path(home, &settings.paths.config, network),
        Some(_) => {
            let embedded = app.config_arg().ok_or_else(|| ConfigError::Parse {
                what: "process descriptor",
                path: descriptor_path.clone(),
                message: format!("app '{}' has no -c/--config argument", app.name),
            })?;
            let base = match &app.cwd {
                Some(cwd) if cwd.is_absolute() => cwd.clone(),
                Some(cwd) => home.join(cwd),
                None => home.to_path_buf(),
            };
            base.join(embedded)
        }
    };

    let node: NodeConfig = load_json(&config_path, "node config")?;

    Ok(ResolvedConfig {
        app_name: app.name.clone(),
        descriptor_path,
        log_file: home.join(&node.log_file_name),
        database: DatabaseConfig {
            name: node.db.database,
            port: node.db.port,
            user: node.db.user,
            password: node.db.password,
        },
        cache: CacheConfig {
            enabled: node.cache_enabled,
            port: node.redis.port,
            password: node.redis.password,
        },
        config_path,
    })
}
