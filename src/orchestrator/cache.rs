use std::path::PathBuf;

use anyhow::Result;
use tracing::debug;

use super::{explain, step, Context};
use crate::host::{Host, Invocation};
use crate::platform::parse_pid;
use crate::ui::report::Reporter;

/// Locally managed Redis. Every operation is a no-op when caching is
/// disabled, and start/stop leave an instance on the OS default port alone.
pub struct Cache<'a, H: Host> {
    ctx: &'a Context,
    host: &'a H,
    report: &'a Reporter,
}

impl<'a, H: Host> Cache<'a, H> {
    pub fn new(ctx: &'a Context, host: &'a H, report: &'a Reporter) -> Self {
        Self { ctx, host, report }
    }

    pub fn pid_file(&self) -> PathBuf {
        let port = self.ctx.config.cache.port.to_string();
        self.ctx
            .path(&self.ctx.settings.paths.redis_pid_file.replace("{port}", &port))
    }

    fn os_managed(&self) -> bool {
        self.ctx.config.cache.port == self.ctx.settings.cache.default_port
    }

    pub async fn start(&self) -> Result<()> {
        if !self.ctx.config.cache.enabled {
            debug!("cache disabled, not starting redis");
            return Ok(());
        }
        if self.os_managed() {
            self.report
                .ok("Using OS Redis-Server, skipping local Redis-Server.");
            return Ok(());
        }
        if self.pid_file().exists() {
            self.report.ok("Redis-Server is already running.");
            return Ok(());
        }

        let config = self.ctx.path(&self.ctx.settings.paths.redis_config);
        let inv = Invocation::new(self.ctx.binary(&self.ctx.settings.binaries.redis_server))
            .arg(config.to_string_lossy());
        let output = step(self.host, self.report, &inv).await;
        if !output.succeeded() {
            explain(&output);
            return Err(self.report.fatal("Failed to start Redis-Server."));
        }
        self.report.ok("Redis-Server started successfully.");
        Ok(())
    }

    /// Shut Redis down through its CLI, killing it by PID if that fails.
    /// Never fatal.
    pub async fn stop(&self) -> Result<()> {
        let cache = &self.ctx.config.cache;
        if !cache.enabled {
            debug!("cache disabled, not stopping redis");
            return Ok(());
        }
        if self.os_managed() {
            self.report
                .ok("OS Redis-Server detected, skipping shutdown.");
            return Ok(());
        }
        let pid_file = self.pid_file();
        if !pid_file.exists() {
            self.report.ok("Redis-Server is not running.");
            return Ok(());
        }

        let mut inv = Invocation::new(self.ctx.binary(&self.ctx.settings.binaries.redis_cli))
            .args(["-p".to_string(), cache.port.to_string()]);
        if let Some(password) = &cache.password {
            inv = inv.env("REDISCLI_AUTH", password.as_str());
        }
        let inv = inv.arg("shutdown");

        let output = step(self.host, self.report, &inv).await;
        if output.succeeded() {
            self.report.ok("Redis-Server stopped successfully.");
            return Ok(());
        }
        explain(&output);
        self.report.fail("Failed to stop Redis-Server.");

        let pid = tokio::fs::read_to_string(&pid_file)
            .await
            .ok()
            .and_then(|content| parse_pid(&content));
        let Some(pid) = pid else {
            self.report
                .fail(format!("No usable PID in {}.", pid_file.display()));
            return Ok(());
        };
        match self.host.force_kill(pid) {
            Ok(()) => {
                // SIGKILL leaves the PID file behind; drop it so the next start runs.
                let _ = tokio::fs::remove_file(&pid_file).await;
                self.report.ok("Redis-Server killed.");
            }
            Err(e) => {
                tracing::warn!("{:#}", e);
                self.report.fail("Failed to kill Redis-Server.");
            }
        }
        Ok(())
    }
}
