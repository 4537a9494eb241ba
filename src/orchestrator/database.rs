use std::path::Path;

use anyhow::Result;
use tracing::debug;

use super::ready::wait_until;
use super::snapshot::SnapshotFetcher;
use super::{explain, step, Context};
use crate::host::{Host, Input, Invocation};
use crate::ui::report::Reporter;

/// Shown instead of a height when the database cannot answer.
pub const HEIGHT_UNAVAILABLE: &str = "Unavailable";

const HEIGHT_QUERY: &str = "select height from blocks order by height desc limit 1;";

/// PostgreSQL lifecycle. Whether the server runs is always read from the
/// process table, never remembered.
pub struct Database<'a, H: Host> {
    ctx: &'a Context,
    host: &'a H,
    report: &'a Reporter,
}

impl<'a, H: Host> Database<'a, H> {
    pub fn new(ctx: &'a Context, host: &'a H, report: &'a Reporter) -> Self {
        Self { ctx, host, report }
    }

    fn command(&self, program: &str) -> Invocation {
        Invocation::new(self.ctx.binary(program))
    }

    fn port(&self) -> String {
        self.ctx.config.database.port.to_string()
    }

    fn data_dir(&self) -> String {
        self.ctx.data_dir().to_string_lossy().into_owned()
    }

    /// A live server process exists.
    pub async fn is_running(&self) -> bool {
        let inv = self
            .command(&self.ctx.settings.binaries.pgrep)
            .args(["-x", self.ctx.settings.database.process_name.as_str()]);
        match self.host.run(&inv).await {
            Ok(output) => output.succeeded(),
            Err(e) => {
                debug!("{:#}", e);
                false
            }
        }
    }

    pub async fn start(&self) -> Result<()> {
        if self.is_running().await {
            self.report.ok("Postgresql is running.");
            return Ok(());
        }

        let log_file = self.ctx.logs_dir().join("pgsql.log");
        let inv = self.command(&self.ctx.settings.binaries.pg_ctl).args([
            "-w".to_string(),
            "-D".to_string(),
            self.data_dir(),
            "-l".to_string(),
            log_file.to_string_lossy().into_owned(),
            "-o".to_string(),
            format!("-p {}", self.port()),
            "start".to_string(),
        ]);
        let output = step(self.host, self.report, &inv).await;
        if !output.succeeded() {
            explain(&output);
            return Err(self.report.fatal("Failed to start Postgresql."));
        }
        self.report.ok("Postgresql started successfully.");
        Ok(())
    }

    /// Stop the server. Converges: a server that survives the graceful stop
    /// is killed, and the call only returns `Ok` once no server process is
    /// left.
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running().await {
            self.report.ok("Postgresql is not running.");
            return Ok(());
        }

        let inv = self
            .command(&self.ctx.settings.binaries.pg_ctl)
            .args(["-D".to_string(), self.data_dir(), "stop".to_string()]);
        let output = step(self.host, self.report, &inv).await;
        if output.succeeded() && !self.is_running().await {
            self.report.ok("Postgresql stopped successfully.");
            return Ok(());
        }
        if !output.succeeded() {
            explain(&output);
            self.report.fail("Failed to stop Postgresql.");
        }

        let kill = self.command(&self.ctx.settings.binaries.pkill).args([
            "-9",
            "-x",
            self.ctx.settings.database.process_name.as_str(),
        ]);
        step(self.host, self.report, &kill).await;

        let gone = wait_until("postgres exit", self.ctx.settings.timeouts.database_stop, || async {
            !self.is_running().await
        })
        .await;
        if !gone {
            return Err(self.report.fatal("Postgresql is still running after kill."));
        }
        self.report.ok("Postgresql killed.");
        Ok(())
    }

    /// Remove the data directory.
    pub async fn wipe(&self) -> Result<()> {
        let data_dir = self.ctx.data_dir();
        match tokio::fs::remove_dir_all(&data_dir).await {
            Ok(()) => debug!(path = %data_dir.display(), "removed data directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %data_dir.display(), "{}", e);
                return Err(self.report.fatal("Failed to remove Postgresql data directory."));
            }
        }
        Ok(())
    }

    /// Create a new cluster in the data directory.
    pub async fn init(&self) -> Result<()> {
        let inv = self
            .command(&self.ctx.settings.binaries.pg_ctl)
            .args(["initdb".to_string(), "-D".to_string(), self.data_dir()]);
        let output = step(self.host, self.report, &inv).await;
        if !output.succeeded() {
            explain(&output);
            return Err(self.report.fatal("Failed to initialize Postgresql."));
        }
        self.report.ok("Postgresql initialized successfully.");
        Ok(())
    }

    /// The server answers queries.
    pub async fn accepts_queries(&self) -> bool {
        let inv = self
            .command(&self.ctx.settings.binaries.psql)
            .args(["-qAt", "-d", "postgres", "-p"])
            .arg(self.port())
            .args(["-c", "select 1;"]);
        match self.host.run(&inv).await {
            Ok(output) => output.succeeded(),
            Err(_) => false,
        }
    }

    /// Poll until the freshly started server answers, fatal on timeout.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let timeout = self.ctx.settings.timeouts.database_ready;
        if !wait_until("postgres", timeout, || self.accepts_queries()).await {
            return Err(self.report.fatal(format!(
                "Postgresql did not accept connections within {}.",
                humantime::format_duration(timeout)
            )));
        }
        Ok(())
    }

    /// Recreate the application role and set its password.
    pub async fn create_user(&self) -> Result<()> {
        let db = &self.ctx.config.database;
        let binaries = &self.ctx.settings.binaries;

        let drop = self
            .command(&binaries.dropuser)
            .args(["--if-exists", db.user.as_str(), "-p"])
            .arg(self.port());
        step(self.host, self.report, &drop).await;

        let create = self
            .command(&binaries.createuser)
            .args(["--createdb", db.user.as_str(), "-p"])
            .arg(self.port());
        let mut output = step(self.host, self.report, &create).await;

        if output.succeeded() {
            let sql = format!(
                "ALTER USER {} WITH PASSWORD {};",
                quote_ident(&db.user),
                quote_literal(&db.password)
            );
            // The password travels on stdin so it never shows up in argv or logs.
            let alter = self
                .command(&binaries.psql)
                .args(["-qd", "postgres", "-p"])
                .arg(self.port())
                .args(["-v", "ON_ERROR_STOP=1"])
                .input(Input::Bytes(sql.into_bytes()));
            output = step(self.host, self.report, &alter).await;
        }

        if !output.succeeded() {
            explain(&output);
            return Err(self.report.fatal("Failed to create Postgresql user."));
        }
        self.report.ok("Postgresql user created successfully.");
        Ok(())
    }

    /// Drop and recreate the application database.
    pub async fn create_database(&self) -> Result<()> {
        let db = &self.ctx.config.database;
        let binaries = &self.ctx.settings.binaries;

        let drop = self
            .command(&binaries.dropdb)
            .args(["--if-exists", db.name.as_str(), "-p"])
            .arg(self.port());
        step(self.host, self.report, &drop).await;

        let create = self
            .command(&binaries.createdb)
            .args([db.name.as_str(), "-p"])
            .arg(self.port());
        let output = step(self.host, self.report, &create).await;
        if !output.succeeded() {
            explain(&output);
            return Err(self.report.fatal("Failed to create Postgresql database."));
        }
        self.report.ok("Postgresql database created successfully.");
        Ok(())
    }

    /// The application database appears in the server's database list.
    pub async fn exists(&self) -> bool {
        let inv = self
            .command(&self.ctx.settings.binaries.psql)
            .args(["-ltAq", "-p"])
            .arg(self.port());
        match self.host.run(&inv).await {
            Ok(output) if output.succeeded() => {
                database_listed(&output.stdout, &self.ctx.config.database.name)
            }
            _ => false,
        }
    }

    /// Download and restore the snapshot into the application database, but
    /// only when that database is present.
    pub async fn populate(&self, fetcher: &SnapshotFetcher<'_, H>) -> Result<()> {
        if !self.exists().await {
            self.report.note(format!(
                "Database {} not found, skipping snapshot restore.",
                self.ctx.config.database.name
            ));
            return Ok(());
        }
        fetcher.fetch().await?;
        self.restore(self.ctx.snapshot.path()).await
    }

    /// Pipe the decompressed snapshot into `psql` as the application user.
    pub async fn restore(&self, snapshot: &Path) -> Result<()> {
        let db = &self.ctx.config.database;
        self.report
            .note(format!("Restoring blockchain with {}", snapshot.display()));

        if !snapshot.is_file() {
            tracing::warn!(path = %snapshot.display(), "snapshot file not found");
            return Err(self.report.fatal("Failed to restore blockchain."));
        }

        let inv = self
            .command(&self.ctx.settings.binaries.psql)
            .args(["-q", "-U", db.user.as_str(), "-d", db.name.as_str(), "-p"])
            .arg(self.port())
            .env("PGPASSWORD", db.password.as_str())
            .input(Input::Gzip(snapshot.to_path_buf()));
        let output = step(self.host, self.report, &inv).await;
        if !output.succeeded() {
            explain(&output);
            return Err(self.report.fatal("Failed to restore blockchain."));
        }
        self.report.ok("Blockchain restored successfully.");
        Ok(())
    }

    /// Latest block height, or [`HEIGHT_UNAVAILABLE`] when the query fails or
    /// returns nothing.
    pub async fn height(&self) -> String {
        let db = &self.ctx.config.database;
        let inv = self
            .command(&self.ctx.settings.binaries.psql)
            .args(["-d", db.name.as_str(), "-t", "-p"])
            .arg(self.port())
            .args(["-c", HEIGHT_QUERY]);
        match self.host.run(&inv).await {
            Ok(output) if output.succeeded() && !output.stdout.trim().is_empty() => {
                output.stdout.trim().to_string()
            }
            _ => HEIGHT_UNAVAILABLE.to_string(),
        }
    }

    pub async fn report_height(&self) {
        let height = self.height().await;
        self.report.note(format!("Current Block Height: {}", height));
    }
}

/// Whether `name` is a database in `psql -ltAq` output.
pub fn database_listed(listing: &str, name: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split('|').next())
        .any(|db| db == name)
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
