pub mod doctor;
pub mod logs;

use std::path::Path;

use anyhow::{bail, Result};

use crate::cli::{usage, Verb};
use crate::config::model::Settings;
use crate::host::Host;
use crate::ui::report::Reporter;

/// Run a verb that works on the installation as a whole and takes no network.
pub async fn run_local<H: Host>(
    verb: Verb,
    host: &H,
    home: &Path,
    settings: &Settings,
    report: &Reporter,
) -> Result<()> {
    match verb {
        Verb::Doctor => doctor::run(host, home, settings, report).await,
        Verb::Help => {
            report.note(usage());
            Ok(())
        }
        other => bail!("'{}' needs a network", other),
    }
}
