use tracing::debug;

use super::{explain, shell_quote, step, Context};
use crate::config::resolve::network_path;
use crate::host::{Host, Input, Invocation};
use crate::ui::report::Reporter;

/// Keeps an `@reboot` crontab entry that starts this installation.
pub struct Autostart<'a, H: Host> {
    ctx: &'a Context,
    host: &'a H,
    report: &'a Reporter,
}

impl<'a, H: Host> Autostart<'a, H> {
    pub fn new(ctx: &'a Context, host: &'a H, report: &'a Reporter) -> Self {
        Self { ctx, host, report }
    }

    /// Identifies an existing entry for this installation and network.
    pub fn marker(&self) -> String {
        format!(
            "{} start {}",
            shell_quote(&self.ctx.program),
            self.ctx.network
        )
    }

    pub fn entry(&self) -> String {
        let ctx = self.ctx;
        let mut line = format!(
            "@reboot {} --home {}",
            self.marker(),
            shell_quote(&ctx.home)
        );
        let default_descriptor = network_path(
            &ctx.home,
            &ctx.settings.paths.descriptor,
            ctx.network,
        );
        if ctx.config.descriptor_path != default_descriptor {
            line.push_str(" -p ");
            line.push_str(&shell_quote(&ctx.config.descriptor_path));
        }
        line.push_str(&format!(
            " > {} 2>&1",
            shell_quote(&ctx.logs_dir().join("cron.log"))
        ));
        line
    }

    /// Install or refresh the entry. Failures are reported and returned as
    /// `false`; they never abort the invocation.
    pub async fn register(&self) -> bool {
        let crontab = self.ctx.binary(&self.ctx.settings.binaries.crontab);

        let current = match self.host.run(&Invocation::new(&crontab).arg("-l")).await {
            // `crontab -l` fails when the user has no crontab yet.
            Ok(output) if output.succeeded() => output.stdout,
            Ok(_) => String::new(),
            Err(e) => {
                tracing::warn!("{:#}", e);
                self.report.fail("Failed to execute crontab.");
                return false;
            }
        };

        let updated = merged_crontab(&current, &self.marker(), &self.entry());
        debug!(lines = updated.lines().count(), "installing crontab");

        let install = Invocation::new(&crontab)
            .arg("-")
            .input(Input::Bytes(updated.into_bytes()));
        let output = step(self.host, self.report, &install).await;
        if !output.succeeded() {
            explain(&output);
            self.report.fail("Failed to update crontab.");
            return false;
        }
        self.report.ok("Crontab updated successfully.");
        true
    }
}

/// `current` with every line containing `marker` replaced by a single `entry`.
pub fn merged_crontab(current: &str, marker: &str, entry: &str) -> String {
    let mut out: String = current
        .lines()
        .filter(|line| !line.contains(marker))
        .map(|line| format!("{}\n", line))
        .collect();
    out.push_str(entry);
    out.push('\n');
    out
}
