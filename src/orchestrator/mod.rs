pub mod autostart;
pub mod cache;
pub mod database;
pub mod node;
pub mod ready;
pub mod snapshot;

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::Verb;
use crate::config::model::Settings;
use crate::config::resolve::{binary_path, Network, ResolvedConfig};
use crate::host::{CommandOutput, Host, Invocation, Outcome};
use crate::ui::report::Reporter;

use autostart::Autostart;
use cache::Cache;
use database::Database;
use node::Node;
use snapshot::{SnapshotFetcher, SnapshotSource};

/// Everything an invocation decided up front. Built once in `main` and
/// shared read-only by every controller.
#[derive(Debug, Clone)]
pub struct Context {
    pub home: PathBuf,
    pub network: Network,
    pub settings: Settings,
    pub config: ResolvedConfig,
    pub snapshot: SnapshotSource,
    /// Path of the running `nodectl` executable, used for the autostart entry.
    pub program: PathBuf,
}

impl Context {
    /// Resolve a configured program name.
    pub fn binary(&self, name: &str) -> String {
        binary_path(&self.home, name)
    }

    /// Resolve an installation-relative path.
    pub fn path(&self, relative: &str) -> PathBuf {
        self.home.join(crate::platform::expand_home(relative))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.path(&self.settings.paths.logs_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.path(&self.settings.paths.data_dir)
    }
}

/// Run a command as one orchestration step: its output goes to the
/// transcript and a program that cannot be started counts as a failure.
pub(crate) async fn step<H: Host>(
    host: &H,
    report: &Reporter,
    invocation: &Invocation,
) -> CommandOutput {
    match host.run(invocation).await {
        Ok(output) => {
            report.record(&output);
            if let Outcome::Fail(reason) = &output.outcome {
                debug!(command = %invocation, %reason, "command failed");
            }
            output
        }
        Err(e) => {
            warn!(command = %invocation, "{:#}", e);
            CommandOutput::failed(format!("{:#}", e))
        }
    }
}

/// Log why a step failed, for the operator's terminal and the transcript.
pub(crate) fn explain(output: &CommandOutput) {
    if let Outcome::Fail(reason) = &output.outcome {
        warn!("{}", reason);
    }
}

/// Maps verbs onto ordered sequences of controller operations.
pub struct Orchestrator<'a, H: Host> {
    ctx: &'a Context,
    host: &'a H,
    report: &'a Reporter,
}

impl<'a, H: Host> Orchestrator<'a, H> {
    pub fn new(ctx: &'a Context, host: &'a H, report: &'a Reporter) -> Self {
        Self { ctx, host, report }
    }

    pub fn database(&self) -> Database<'a, H> {
        Database::new(self.ctx, self.host, self.report)
    }

    pub fn cache(&self) -> Cache<'a, H> {
        Cache::new(self.ctx, self.host, self.report)
    }

    pub fn node(&self) -> Node<'a, H> {
        Node::new(self.ctx, self.host, self.report)
    }

    pub fn fetcher(&self) -> SnapshotFetcher<'a, H> {
        SnapshotFetcher::new(self.ctx, self.host, self.report)
    }

    pub fn autostart(&self) -> Autostart<'a, H> {
        Autostart::new(self.ctx, self.host, self.report)
    }

    /// Execute `verb`. Each step finishes, or aborts the sequence with a
    /// fatal error, before the next one starts.
    pub async fn run(&self, verb: Verb) -> Result<()> {
        info!(verb = verb.as_str(), network = %self.ctx.network, "dispatching");
        match verb {
            Verb::Coldstart => self.coldstart().await,
            Verb::Start => {
                self.database().start().await?;
                self.node().start().await
            }
            Verb::StartNode => self.node().start().await,
            Verb::Stop => {
                self.node().stop().await?;
                self.database().stop().await
            }
            Verb::StopNode => self.node().stop().await,
            Verb::Reload => self.node().reload().await,
            Verb::Rebuild => self.rebuild().await,
            Verb::StartDb => self.database().start().await,
            Verb::StopDb => self.database().stop().await,
            Verb::Cleanup => self.node().cleanup().await,
            Verb::Status => self.node().status().await,
            Verb::Logs => crate::commands::logs::follow(&self.ctx.config.log_file, 10).await,
            Verb::Lisky => self.node().lisky().await,
            Verb::Doctor | Verb::Help => {
                crate::commands::run_local(
                    verb,
                    self.host,
                    &self.ctx.home,
                    &self.ctx.settings,
                    self.report,
                )
                .await
            }
        }
    }

    /// Rebuild the installation from nothing: fresh data directory, user,
    /// database and snapshot, then register autostart and start the node.
    pub async fn coldstart(&self) -> Result<()> {
        let database = self.database();

        self.node().stop().await?;
        database.stop().await?;
        database.wipe().await?;
        database.init().await?;
        database.start().await?;
        database.wait_until_ready().await?;
        database.create_user().await?;
        database.create_database().await?;
        database.populate(&self.fetcher()).await?;
        // Non-fatal: the node can run without an @reboot entry.
        self.autostart().register().await;
        self.node().start().await
    }

    /// Replace the chain database with a fresh snapshot.
    pub async fn rebuild(&self) -> Result<()> {
        let database = self.database();

        self.node().stop().await?;
        database.start().await?;
        database.create_database().await?;
        self.fetcher().fetch().await?;
        database.restore(self.ctx.snapshot.path()).await?;
        self.node().start().await
    }
}

/// Quote a value for a POSIX shell line when it needs it.
pub(crate) fn shell_quote(value: &Path) -> String {
    let text = value.to_string_lossy();
    let safe = text
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-+:@%=,".contains(c));
    if safe && !text.is_empty() {
        text.into_owned()
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}
