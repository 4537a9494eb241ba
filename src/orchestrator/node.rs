use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;
use tracing::debug;

use super::cache::Cache;
use super::database::Database;
use super::ready::wait_until;
use super::{explain, step, Context};
use crate::host::{Host, Invocation};
use crate::platform::parse_pid;
use crate::ui::report::Reporter;

/// What the process manager and the process table say about the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    pub pid: Option<u32>,
    pub alive: bool,
}

impl ProcessStatus {
    const DOWN: ProcessStatus = ProcessStatus {
        pid: None,
        alive: false,
    };
}

#[derive(Debug, Deserialize)]
struct Pm2Process {
    name: String,
    #[serde(default)]
    pm2_env: Pm2Env,
}

#[derive(Debug, Default, Deserialize)]
struct Pm2Env {
    pm_pid_path: Option<PathBuf>,
}

/// Find the PID file pm2 keeps for `app` in `pm2 jlist` output. pm2 may
/// print `[PM2] ...` banner lines before the JSON array.
pub fn pid_path_for(jlist: &str, app: &str) -> Option<PathBuf> {
    let processes = jlist
        .match_indices('[')
        .find_map(|(start, _)| serde_json::from_str::<Vec<Pm2Process>>(&jlist[start..]).ok());
    let Some(processes) = processes else {
        debug!("no process list in pm2 jlist output");
        return None;
    };
    processes
        .into_iter()
        .find(|p| p.name == app)
        .and_then(|p| p.pm2_env.pm_pid_path)
}

/// The node process, supervised by pm2.
pub struct Node<'a, H: Host> {
    ctx: &'a Context,
    host: &'a H,
    report: &'a Reporter,
}

impl<'a, H: Host> Node<'a, H> {
    pub fn new(ctx: &'a Context, host: &'a H, report: &'a Reporter) -> Self {
        Self { ctx, host, report }
    }

    fn app(&self) -> &str {
        &self.ctx.config.app_name
    }

    fn pm2(&self) -> Invocation {
        Invocation::new(self.ctx.binary(&self.ctx.settings.binaries.pm2))
    }

    fn descriptor(&self) -> String {
        self.ctx
            .config
            .descriptor_path
            .to_string_lossy()
            .into_owned()
    }

    /// Start the cache, hand the descriptor to pm2 and wait for the node to
    /// come up. A pm2 failure is reported and the invocation carries on.
    pub async fn start(&self) -> Result<()> {
        Cache::new(self.ctx, self.host, self.report).start().await?;

        let inv = self.pm2().arg("start").arg(self.descriptor());
        let output = step(self.host, self.report, &inv).await;
        if !output.succeeded() {
            explain(&output);
            self.report.fail(format!("Failed to start {}.", self.app()));
            return Ok(());
        }
        self.report
            .ok(format!("{} started successfully.", self.app()));

        wait_until(self.app(), self.ctx.settings.timeouts.node_ready, || async {
            self.probe().await.alive
        })
        .await;
        self.status().await
    }

    pub async fn stop(&self) -> Result<()> {
        // pm2 exits non-zero when the app is not registered; that is a stopped node too.
        let inv = self.pm2().arg("delete").arg(self.descriptor());
        step(self.host, self.report, &inv).await;
        self.report
            .ok(format!("{} stopped successfully.", self.app()));

        Cache::new(self.ctx, self.host, self.report).stop().await
    }

    /// Restart under the current descriptor.
    pub async fn reload(&self) -> Result<()> {
        self.report.note(format!(
            "Stopping {} to reload the process descriptor.",
            self.app()
        ));
        self.stop().await?;
        self.start().await
    }

    /// Remove every pm2 app and stop the pm2 daemon.
    pub async fn cleanup(&self) -> Result<()> {
        let delete = step(self.host, self.report, &self.pm2().args(["delete", "all"])).await;
        let kill = step(self.host, self.report, &self.pm2().arg("kill")).await;
        if kill.succeeded() {
            self.report.ok("Process manager cleaned up.");
        } else {
            explain(&delete);
            explain(&kill);
            self.report.fail("Failed to clean up the process manager.");
        }
        Ok(())
    }

    /// Ask pm2 where the node's PID file is and check that PID.
    pub async fn probe(&self) -> ProcessStatus {
        let output = match self.host.run(&self.pm2().arg("jlist")).await {
            Ok(output) if output.succeeded() => output,
            Ok(output) => {
                explain(&output);
                return ProcessStatus::DOWN;
            }
            Err(e) => {
                debug!("{:#}", e);
                return ProcessStatus::DOWN;
            }
        };
        let Some(pid_path) = pid_path_for(&output.stdout, self.app()) else {
            return ProcessStatus::DOWN;
        };
        let pid = tokio::fs::read_to_string(&pid_path)
            .await
            .ok()
            .and_then(|content| parse_pid(&content));
        match pid {
            Some(pid) => ProcessStatus {
                pid: Some(pid),
                alive: self.host.is_process_alive(pid),
            },
            None => ProcessStatus::DOWN,
        }
    }

    /// Print whether the node runs and the chain height. A node that is not
    /// running makes the invocation fail.
    pub async fn status(&self) -> Result<()> {
        let status = self.probe().await;
        match status.pid {
            Some(pid) if status.alive => {
                self.report
                    .ok(format!("{} is running as PID: {}", self.app(), pid));
                Database::new(self.ctx, self.host, self.report)
                    .report_height()
                    .await;
                Ok(())
            }
            _ => Err(self
                .report
                .fatal(format!("{} is not running.", self.app()))),
        }
    }

    /// Hand the terminal to the lisky client.
    pub async fn lisky(&self) -> Result<()> {
        let script = self.ctx.path(&self.ctx.settings.paths.lisky);
        let inv = Invocation::new(self.ctx.binary(&self.ctx.settings.binaries.node))
            .arg(script.to_string_lossy())
            .interactive();
        match self.host.run(&inv).await {
            Ok(output) => {
                debug!(outcome = ?output.outcome, "lisky exited");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("{:#}", e);
                Err(self.report.fatal("Failed to launch lisky."))
            }
        }
    }
}
