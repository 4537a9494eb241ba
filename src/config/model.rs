use serde::{de, Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

// ---------------------------------------------------------------------------
// nodectl.toml: installation settings
// ---------------------------------------------------------------------------

/// Optional `nodectl.toml` in the installation directory. Every field has a
/// default matching the stock installation layout, so an absent file is the
/// same as an empty one.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub binaries: BinariesConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
}

fn default_config_template() -> String {
    "config/{network}/config.json".to_string()
}

fn default_descriptor_template() -> String {
    "etc/pm2-lisk_{network}.json".to_string()
}

fn default_data_dir() -> String {
    "pgsql/data".to_string()
}

fn default_logs_dir() -> String {
    "logs".to_string()
}

fn default_redis_config() -> String {
    "etc/redis.conf".to_string()
}

fn default_redis_pid_file() -> String {
    "redis/redis_{port}.pid".to_string()
}

fn default_lisky() -> String {
    "bin/lisky".to_string()
}

/// Installation-relative locations. `{network}` and `{port}` placeholders
/// are substituted where noted.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    /// Node configuration file, `{network}` substituted.
    #[serde(default = "default_config_template")]
    pub config: String,
    /// Default process-manager descriptor, `{network}` substituted.
    #[serde(default = "default_descriptor_template")]
    pub descriptor: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: String,
    #[serde(default = "default_redis_config")]
    pub redis_config: String,
    /// Redis PID file, `{port}` substituted.
    #[serde(default = "default_redis_pid_file")]
    pub redis_pid_file: String,
    #[serde(default = "default_lisky")]
    pub lisky: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            config: default_config_template(),
            descriptor: default_descriptor_template(),
            data_dir: default_data_dir(),
            logs_dir: default_logs_dir(),
            redis_config: default_redis_config(),
            redis_pid_file: default_redis_pid_file(),
            lisky: default_lisky(),
        }
    }
}

/// Names (or paths) of the external programs. Values containing a path
/// separator are resolved against the installation directory.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BinariesConfig {
    pub pm2: String,
    pub pg_ctl: String,
    pub psql: String,
    pub createuser: String,
    pub dropuser: String,
    pub createdb: String,
    pub dropdb: String,
    pub pgrep: String,
    pub pkill: String,
    pub redis_server: String,
    pub redis_cli: String,
    pub crontab: String,
    pub node: String,
}

impl Default for BinariesConfig {
    fn default() -> Self {
        Self {
            pm2: "pm2".to_string(),
            pg_ctl: "pg_ctl".to_string(),
            psql: "psql".to_string(),
            createuser: "createuser".to_string(),
            dropuser: "dropuser".to_string(),
            createdb: "createdb".to_string(),
            dropdb: "dropdb".to_string(),
            pgrep: "pgrep".to_string(),
            pkill: "pkill".to_string(),
            redis_server: "redis-server".to_string(),
            redis_cli: "redis-cli".to_string(),
            crontab: "crontab".to_string(),
            node: "node".to_string(),
        }
    }
}

fn default_snapshot_name() -> String {
    "blockchain.db.gz".to_string()
}

fn default_bundled_snapshot() -> String {
    "etc/blockchain.db.gz".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    /// File name requested from the download URL.
    #[serde(default = "default_snapshot_name")]
    pub name: String,
    /// Snapshot shipped with the installation, used by `-0`.
    #[serde(default = "default_bundled_snapshot")]
    pub bundled: String,
    /// Per-network download base URLs replacing the built-in defaults.
    #[serde(default)]
    pub urls: BTreeMap<String, String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            name: default_snapshot_name(),
            bundled: default_bundled_snapshot(),
            urls: BTreeMap::new(),
        }
    }
}

fn default_process_name() -> String {
    "postgres".to_string()
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSettings {
    /// Exact process name used to detect a live server.
    #[serde(default = "default_process_name")]
    pub process_name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            process_name: default_process_name(),
        }
    }
}

fn default_cache_port() -> u16 {
    6379
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Port of an OS-managed Redis; a node configured with this port is left alone.
    #[serde(default = "default_cache_port")]
    pub default_port: u16,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_port: default_cache_port(),
        }
    }
}

fn default_node_ready() -> Duration {
    Duration::from_secs(30)
}

fn default_database_ready() -> Duration {
    Duration::from_secs(15)
}

fn default_database_stop() -> Duration {
    Duration::from_secs(10)
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsConfig {
    /// How long to wait for the node PID to come alive after `pm2 start`.
    #[serde(default = "default_node_ready", deserialize_with = "human_duration")]
    pub node_ready: Duration,
    /// How long coldstart waits for a freshly started database.
    #[serde(default = "default_database_ready", deserialize_with = "human_duration")]
    pub database_ready: Duration,
    /// How long to wait for a force-killed database to disappear.
    #[serde(default = "default_database_stop", deserialize_with = "human_duration")]
    pub database_stop: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            node_ready: default_node_ready(),
            database_ready: default_database_ready(),
            database_stop: default_database_stop(),
        }
    }
}

fn default_transcript_max_bytes() -> u64 {
    5 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TranscriptConfig {
    #[serde(default = "default_transcript_max_bytes")]
    pub max_bytes: u64,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_transcript_max_bytes(),
        }
    }
}

fn human_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(de::Error::custom)
}

// ---------------------------------------------------------------------------
// config.json: the node's own configuration
// ---------------------------------------------------------------------------

/// The subset of the node's JSON configuration that operations depend on.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    pub log_file_name: String,
    pub cache_enabled: bool,
    pub db: DbSection,
    pub redis: RedisSection,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DbSection {
    pub database: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RedisSection {
    pub port: u16,
    #[serde(default, deserialize_with = "password_or_null")]
    pub password: Option<String>,
}

/// Accepts JSON `null`, a missing field, the literal string `"null"` or an
/// empty string as "no password".
fn password_or_null<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|p| !p.is_empty() && p != "null"))
}

// ---------------------------------------------------------------------------
// pm2 descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Descriptor {
    pub apps: Vec<AppDescriptor>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AppDescriptor {
    pub name: String,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub args: Option<StringOrList>,
}

impl AppDescriptor {
    /// The node config path embedded in the app arguments, from `-c PATH`,
    /// `--config PATH` or `--config=PATH`.
    pub fn config_arg(&self) -> Option<String> {
        let args = self.args.as_ref()?;
        let tokens: Vec<&str> = args
            .as_slice()
            .iter()
            .flat_map(|a| a.split_whitespace())
            .collect();
        let mut iter = tokens.iter();
        while let Some(token) = iter.next() {
            if let Some(value) = token.strip_prefix("--config=") {
                return Some(value.to_string());
            }
            if *token == "-c" || *token == "--config" {
                return iter.next().map(|v| v.to_string());
            }
        }
        None
    }
}

/// A value that can be either a single string or a list of strings.
/// When given a string, it is kept as a single-element list.
#[derive(Debug, Clone, PartialEq)]
pub struct StringOrList(pub Vec<String>);

impl StringOrList {
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }
}

impl<'de> Deserialize<'de> for StringOrList {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct StringOrListVisitor;

        impl<'de> de::Visitor<'de> for StringOrListVisitor {
            type Value = StringOrList;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or a list of strings")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<StringOrList, E> {
                Ok(StringOrList(vec![value.to_string()]))
            }

            fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<StringOrList, A::Error> {
                let mut values = Vec::new();
                while let Some(value) = seq.next_element::<String>()? {
                    values.push(value);
                }
                Ok(StringOrList(values))
            }
        }

        deserializer.deserialize_any(StringOrListVisitor)
    }
}
