use std::path::Path;

use anyhow::Result;

use crate::config::model::Settings;
use crate::config::resolve::binary_path;
use crate::host::{Host, Invocation};
use crate::ui::report::Reporter;

/// Report which of the external tools the controllers call are installed.
pub async fn run<H: Host>(
    host: &H,
    home: &Path,
    settings: &Settings,
    report: &Reporter,
) -> Result<()> {
    report.note("nodectl doctor");
    report.note("==============");

    let bin = &settings.binaries;
    let checks: [(&str, &str, &str); 8] = [
        ("pm2", bin.pm2.as_str(), "--version"),
        ("pg_ctl", bin.pg_ctl.as_str(), "--version"),
        ("psql", bin.psql.as_str(), "--version"),
        ("createdb", bin.createdb.as_str(), "--version"),
        ("pgrep", bin.pgrep.as_str(), "-V"),
        ("redis-server", bin.redis_server.as_str(), "--version"),
        ("redis-cli", bin.redis_cli.as_str(), "--version"),
        ("node", bin.node.as_str(), "--version"),
    ];

    let mut all_ok = true;
    for (name, program, flag) in checks {
        let inv = Invocation::new(binary_path(home, program)).arg(flag);
        match host.run(&inv).await {
            Ok(output) if output.succeeded() => {
                // Some tools print their version on stderr.
                let text = if output.stdout.trim().is_empty() {
                    &output.stderr
                } else {
                    &output.stdout
                };
                let version = text.lines().next().unwrap_or("").trim();
                report.ok(format!("{:<13} {}", name, version));
            }
            _ => {
                report.fail(format!("{:<13} not found", name));
                all_ok = false;
            }
        }
    }

    if all_ok {
        report.note("All tools found.");
    } else {
        report.note("Some tools are missing. Install them or point nodectl.toml [binaries] at them.");
    }
    Ok(())
}
