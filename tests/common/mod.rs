#![allow(dead_code)]
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{bail, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use nodectl::config::model::Settings;
use nodectl::config::resolve::{resolve, Network};
use nodectl::host::{CommandOutput, Host, Input, Invocation};
use nodectl::orchestrator::snapshot::SnapshotSource;
use nodectl::orchestrator::Context;
use tempfile::TempDir;

pub const NODE_PID: u32 = 4242;
pub const REDIS_PID: u32 = 777;
pub const PROGRAM: &str = "/opt/nodectl/nodectl";

/// Per-network node settings written into a test installation.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub database: String,
    pub db_port: u16,
    pub cache_enabled: bool,
    pub redis_port: u16,
    pub redis_password: Option<String>,
}

impl NodeSettings {
    pub fn for_network(network: Network) -> Self {
        let suffix = match network {
            Network::Mainnet => "main",
            Network::Testnet => "test",
            Network::Devnet => "dev",
        };
        Self {
            database: format!("lisk_{suffix}"),
            db_port: 5432,
            cache_enabled: false,
            redis_port: 6380,
            redis_password: None,
        }
    }
}

/// A throwaway installation directory with a config and descriptor for
/// every network.
pub struct TestInstall {
    pub dir: TempDir,
}

impl TestInstall {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    /// Customise each network's settings before they are written.
    pub fn with(customise: impl Fn(&mut NodeSettings)) -> Self {
        let dir = TempDir::new().unwrap();
        for network in Network::ALL {
            let mut settings = NodeSettings::for_network(network);
            customise(&mut settings);
            write_network(dir.path(), network, &settings);
        }
        Self { dir }
    }

    pub fn home(&self) -> &Path {
        self.dir.path()
    }

    pub fn context(&self, network: Network) -> Context {
        self.context_with(network, None, None, false)
    }

    pub fn context_with(
        &self,
        network: Network,
        url: Option<&str>,
        file: Option<&Path>,
        bundled: bool,
    ) -> Context {
        let settings = Settings::default();
        let config = resolve(self.home(), network, &settings, None).unwrap();
        let snapshot =
            SnapshotSource::select(self.home(), network, &settings, url, file, bundled);
        Context {
            home: self.home().to_path_buf(),
            network,
            settings,
            config,
            snapshot,
            program: PathBuf::from(PROGRAM),
        }
    }
}

fn write_network(home: &Path, network: Network, s: &NodeSettings) {
    let config_dir = home.join("config").join(network.as_str());
    std::fs::create_dir_all(&config_dir).unwrap();
    let password = match &s.redis_password {
        Some(p) => format!("\"{p}\""),
        None => "null".to_string(),
    };
    std::fs::write(
        config_dir.join("config.json"),
        format!(
            r#"{{
                "logFileName": "logs/lisk.log",
                "cacheEnabled": {cache},
                "db": {{"port": {db_port}, "database": "{database}", "user": "lisk", "password": "password"}},
                "redis": {{"port": {redis_port}, "password": {password}}}
            }}"#,
            cache = s.cache_enabled,
            db_port = s.db_port,
            database = s.database,
            redis_port = s.redis_port,
        ),
    )
    .unwrap();

    std::fs::create_dir_all(home.join("etc")).unwrap();
    std::fs::write(
        home.join("etc").join(format!("pm2-lisk_{network}.json")),
        format!(
            r#"{{"apps": [{{"name": "lisk.{network}", "script": "app.js", "args": "-c config/{network}/config.json"}}]}}"#
        ),
    )
    .unwrap();
}

/// Gzip `body` into `path`.
pub fn write_gzip(path: &Path, body: &str) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(body.as_bytes()).unwrap();
    std::fs::write(path, encoder.finish().unwrap()).unwrap();
}

#[derive(Debug)]
pub struct SimState {
    pub postgres_running: bool,
    /// `pg_ctl stop` fails and leaves the server up.
    pub postgres_ignores_stop: bool,
    /// `pg_ctl stop` reports success but the server stays up.
    pub postgres_lingers: bool,
    /// `pkill -9` has no effect.
    pub postgres_unkillable: bool,
    pub postgres_start_fails: bool,
    pub initialized: bool,
    pub databases: BTreeSet<String>,
    pub users: BTreeSet<String>,
    pub height: Option<String>,
    pub restores: Vec<PathBuf>,
    pub restore_fails: bool,
    pub role_sql: Vec<String>,
    pub psql_missing: bool,

    /// pm2 apps and their PIDs.
    pub apps: BTreeMap<String, u32>,
    pub app_name: String,
    pub pm2_start_fails: bool,

    pub redis_pid_file: Option<PathBuf>,
    pub redis_shutdown_fails: bool,
    pub redis_auth: Option<String>,

    pub alive: BTreeSet<u32>,
    pub killed: Vec<u32>,

    /// `None` means the user has no crontab yet.
    pub crontab: Option<String>,
    pub crontab_missing: bool,
    pub crontab_install_fails: bool,

    pub downloads: Vec<(String, PathBuf)>,
    pub download_fails: bool,
}

/// Stateful stand-in for postgres, pm2, redis, crontab and HTTP.
pub struct SimHost {
    pub root: PathBuf,
    pub state: Mutex<SimState>,
    pub log: Mutex<Vec<Invocation>>,
}

impl SimHost {
    pub fn new(ctx: &Context) -> Self {
        let port = ctx.config.cache.port.to_string();
        let redis_pid_file = ctx.path(&ctx.settings.paths.redis_pid_file.replace("{port}", &port));
        Self {
            root: ctx.home.clone(),
            state: Mutex::new(SimState {
                postgres_running: false,
                postgres_ignores_stop: false,
                postgres_lingers: false,
                postgres_unkillable: false,
                postgres_start_fails: false,
                initialized: true,
                databases: BTreeSet::from(["postgres".to_string()]),
                users: BTreeSet::new(),
                height: Some("12345".to_string()),
                restores: Vec::new(),
                restore_fails: false,
                role_sql: Vec::new(),
                psql_missing: false,
                apps: BTreeMap::new(),
                app_name: ctx.config.app_name.clone(),
                pm2_start_fails: false,
                redis_pid_file: Some(redis_pid_file),
                redis_shutdown_fails: false,
                redis_auth: None,
                alive: BTreeSet::new(),
                killed: Vec::new(),
                crontab: None,
                crontab_missing: false,
                crontab_install_fails: false,
                downloads: Vec::new(),
                download_fails: false,
            }),
            log: Mutex::new(Vec::new()),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut SimState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn read<T>(&self, f: impl FnOnce(&SimState) -> T) -> T {
        f(&self.state.lock().unwrap())
    }

    /// Every command line that was run, in order.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|i| i.to_string()).collect()
    }

    /// Index of the first command starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.starts_with(prefix))
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.position(prefix).is_some()
    }

    /// Commands that changed something, ignoring probes.
    pub fn mutating_commands(&self) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| {
                !(c.starts_with("pgrep")
                    || c.starts_with("pm2 jlist")
                    || c.starts_with("psql -ltAq")
                    || c.contains("select"))
            })
            .collect()
    }

    fn pm2_pid_file(&self, app: &str) -> PathBuf {
        self.root.join("pm2").join("pids").join(format!("{app}-0.pid"))
    }

    fn handle(&self, inv: &Invocation) -> Result<CommandOutput> {
        let args: Vec<&str> = inv.args.iter().map(String::as_str).collect();
        let mut s = self.state.lock().unwrap();
        let running = s.postgres_running;
        let down = || CommandOutput::failed("could not connect to server");

        let out = match (inv.program.as_str(), args.as_slice()) {
            (_, ["--version" | "-V"]) => CommandOutput::ok(format!("{} 1.0.0\n", inv.program)),
            ("pgrep", _) => {
                if running {
                    CommandOutput::ok("1234\n")
                } else {
                    CommandOutput::failed("exit status 1")
                }
            }
            ("pkill", _) => {
                if !s.postgres_unkillable {
                    s.postgres_running = false;
                }
                CommandOutput::ok("")
            }
            ("pg_ctl", ["initdb", ..]) => {
                s.initialized = true;
                s.databases = BTreeSet::from(["postgres".to_string()]);
                s.users.clear();
                CommandOutput::ok("Success.\n")
            }
            ("pg_ctl", [.., "start"]) => {
                if s.postgres_start_fails || !s.initialized {
                    CommandOutput::failed("pg_ctl: could not start server")
                } else {
                    s.postgres_running = true;
                    CommandOutput::ok("server started\n")
                }
            }
            ("pg_ctl", [.., "stop"]) => {
                if s.postgres_ignores_stop {
                    CommandOutput::failed("pg_ctl: server does not shut down")
                } else {
                    if !s.postgres_lingers {
                        s.postgres_running = false;
                    }
                    CommandOutput::ok("server stopped\n")
                }
            }
            ("dropuser", [_, user, ..]) if running => {
                s.users.remove(*user);
                CommandOutput::ok("")
            }
            ("createuser", [_, user, ..]) if running => {
                s.users.insert(user.to_string());
                CommandOutput::ok("")
            }
            ("dropdb", [_, name, ..]) if running => {
                s.databases.remove(*name);
                CommandOutput::ok("")
            }
            ("createdb", [name, ..]) if running => {
                if s.databases.insert(name.to_string()) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed("database already exists")
                }
            }
            ("psql", _) if s.psql_missing => {
                bail!("failed to run psql: No such file or directory")
            }
            ("psql", ["-ltAq", ..]) if running => {
                let listing: String = s
                    .databases
                    .iter()
                    .map(|d| format!("{d}|postgres|UTF8|C|C|\n"))
                    .collect();
                CommandOutput::ok(listing)
            }
            ("psql", ["-qAt", ..]) if running => CommandOutput::ok("1\n"),
            ("psql", ["-qd", ..]) if running => match &inv.input {
                Input::Bytes(sql) if sql.starts_with(b"ALTER USER") => {
                    s.role_sql.push(String::from_utf8(sql.clone())?);
                    CommandOutput::ok("")
                }
                _ => CommandOutput::failed("no input"),
            },
            ("psql", ["-d", name, ..]) if running => match &s.height {
                Some(h) if s.databases.contains(*name) => CommandOutput::ok(format!(" {h}\n\n")),
                _ => CommandOutput::failed("relation \"blocks\" does not exist"),
            },
            ("psql", ["-q", ..]) if running => match &inv.input {
                Input::Gzip(path) => {
                    s.restores.push(path.clone());
                    if s.restore_fails || !path.is_file() {
                        CommandOutput::failed("ERROR: syntax error")
                    } else {
                        CommandOutput::ok("")
                    }
                }
                _ => CommandOutput::failed("no input"),
            },
            ("dropuser" | "createuser" | "dropdb" | "createdb" | "psql", _) => down(),

            ("pm2", ["start", _]) => {
                if s.pm2_start_fails {
                    CommandOutput::failed("[PM2][ERROR] Script not found")
                } else {
                    let app = s.app_name.clone();
                    let pid_file = self.pm2_pid_file(&app);
                    std::fs::create_dir_all(pid_file.parent().unwrap())?;
                    std::fs::write(&pid_file, format!("{NODE_PID}\n"))?;
                    s.apps.insert(app, NODE_PID);
                    s.alive.insert(NODE_PID);
                    CommandOutput::ok("[PM2] App launched\n")
                }
            }
            ("pm2", ["delete", "all"]) => {
                let pids: Vec<u32> = s.apps.values().copied().collect();
                for pid in pids {
                    s.alive.remove(&pid);
                }
                s.apps.clear();
                CommandOutput::ok("")
            }
            ("pm2", ["delete", _]) => {
                let app = s.app_name.clone();
                match s.apps.remove(&app) {
                    Some(pid) => {
                        s.alive.remove(&pid);
                        CommandOutput::ok("[PM2] Applying action deleteProcessId\n")
                    }
                    None => CommandOutput::failed("[PM2][ERROR] Process not found"),
                }
            }
            ("pm2", ["kill"]) => CommandOutput::ok("[PM2] pm2 daemon stopped\n"),
            ("pm2", ["jlist"]) => {
                let entries: Vec<serde_json::Value> = s
                    .apps
                    .iter()
                    .map(|(name, pid)| {
                        serde_json::json!({
                            "pid": pid,
                            "name": name,
                            "pm2_env": {"pm_pid_path": self.pm2_pid_file(name), "status": "online"}
                        })
                    })
                    .collect();
                CommandOutput::ok(serde_json::to_string(&entries)?)
            }

            ("redis-server", [_]) => {
                if let Some(pid_file) = &s.redis_pid_file {
                    std::fs::create_dir_all(pid_file.parent().unwrap())?;
                    std::fs::write(pid_file, format!("{REDIS_PID}\n"))?;
                }
                s.alive.insert(REDIS_PID);
                CommandOutput::ok("")
            }
            ("redis-cli", [.., "shutdown"]) => {
                s.redis_auth = inv
                    .env
                    .iter()
                    .find(|(k, _)| k == "REDISCLI_AUTH")
                    .map(|(_, v)| v.clone());
                if s.redis_shutdown_fails {
                    CommandOutput::failed("NOAUTH Authentication required.")
                } else {
                    if let Some(pid_file) = &s.redis_pid_file {
                        let _ = std::fs::remove_file(pid_file);
                    }
                    s.alive.remove(&REDIS_PID);
                    CommandOutput::ok("")
                }
            }

            ("crontab", _) if s.crontab_missing => bail!("failed to run crontab: not found"),
            ("crontab", ["-l"]) => match &s.crontab {
                Some(content) => CommandOutput::ok(content.clone()),
                None => CommandOutput::failed("no crontab for lisk"),
            },
            ("crontab", ["-"]) => {
                if s.crontab_install_fails {
                    CommandOutput::failed("crontab: installing new crontab failed")
                } else {
                    let Input::Bytes(bytes) = &inv.input else {
                        bail!("crontab - without input");
                    };
                    s.crontab = Some(String::from_utf8(bytes.clone())?);
                    CommandOutput::ok("")
                }
            }

            ("node", _) => CommandOutput::ok(""),
            (program, _) => bail!("failed to run {program}: not simulated"),
        };
        Ok(out)
    }
}

impl Host for SimHost {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.log.lock().unwrap().push(invocation.clone());
        self.handle(invocation)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let fails = self.read(|s| s.download_fails);
        self.update(|s| s.downloads.push((url.to_string(), dest.to_path_buf())));
        if fails {
            std::fs::write(dest, b"partial")?;
            bail!("HTTP status server error (503 Service Unavailable) for url ({url})");
        }
        write_gzip(dest, "INSERT INTO blocks VALUES (1);\n");
        Ok(())
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        self.read(|s| s.alive.contains(&pid))
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        self.update(|s| {
            s.alive.remove(&pid);
            s.killed.push(pid);
        });
        Ok(())
    }
}
