use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use nodectl::cli::{usage, verb_list, Cli, Verb};
use nodectl::commands;
use nodectl::config::load_settings;
use nodectl::config::resolve::{resolve, resolve_home, Network};
use nodectl::error::{self, OpsError};
use nodectl::host::SystemHost;
use nodectl::orchestrator::snapshot::SnapshotSource;
use nodectl::orchestrator::{Context, Orchestrator};
use nodectl::platform::expand_home;
use nodectl::ui::report::Reporter;
use nodectl::ui::transcript::Transcript;

#[tokio::main]
async fn main() {
    // Operator output goes through the reporter; tracing is for diagnostics.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let mut report = Reporter::stdout(None);

    let code = match run(cli, &mut report).await {
        Ok(()) => 0,
        Err(e) => {
            if !error::is_reported(&e) {
                report.fail(format!("{:#}", e));
            }
            error::exit_code(&e)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, report: &mut Reporter) -> Result<()> {
    let home = resolve_home(cli.global.home.as_deref())?;
    let settings = load_settings(&home)?;

    let logs_dir = home.join(expand_home(&settings.paths.logs_dir));
    match Transcript::open(&logs_dir, settings.transcript.max_bytes) {
        Ok(transcript) => {
            transcript.header(&std::env::args().collect::<Vec<_>>().join(" "));
            report.attach(transcript);
        }
        Err(e) => tracing::debug!("no transcript: {:#}", e),
    }
    let report = &*report;

    let verb = match cli.verb.as_deref().map(str::parse::<Verb>) {
        None => {
            report.note(usage());
            return Err(OpsError::Aborted("no command".to_string()).into());
        }
        Some(Err(unknown)) => {
            report.fail("Unrecognized command.");
            if let Some(close) = Verb::suggest(&unknown.0) {
                report.note(format!("Did you mean '{}'?", close));
            }
            report.note(format!("Available commands are: {}", verb_list()));
            report.note(usage());
            return Err(OpsError::Aborted(unknown.to_string()).into());
        }
        Some(Ok(verb)) => verb,
    };

    if !verb.needs_network() {
        let host = SystemHost::new()?;
        return commands::run_local(verb, &host, &home, &settings, report).await;
    }

    let network = match cli.network.as_deref().map(str::parse::<Network>) {
        Some(Ok(network)) => network,
        Some(Err(unknown)) => {
            report.fail(format!(
                "Network '{}' is not supported. Use mainnet, testnet or devnet.",
                unknown.0
            ));
            report.note(usage());
            return Err(OpsError::Aborted(unknown.to_string()).into());
        }
        None => {
            report.fail("No network given. Use mainnet, testnet or devnet.");
            report.note(usage());
            return Err(OpsError::Aborted("no network".to_string()).into());
        }
    };

    let cwd = std::env::current_dir()?;
    let descriptor = cli.run.descriptor.as_deref().map(|p| absolutize(&cwd, p));
    let config = match resolve(&home, network, &settings, descriptor.as_deref()) {
        Ok(config) => config,
        Err(e) => return Err(report.fatal(e.to_string())),
    };
    tracing::debug!(
        app = %config.app_name,
        descriptor = %config.descriptor_path.display(),
        "resolved configuration"
    );

    let file = cli.run.file.as_deref().map(|p| absolutize(&cwd, p));
    let snapshot = SnapshotSource::select(
        &home,
        network,
        &settings,
        cli.run.url.as_deref(),
        file.as_deref(),
        cli.run.bundled,
    );

    let ctx = Context {
        program: std::env::current_exe()?,
        home,
        network,
        settings,
        config,
        snapshot,
    };
    let host = SystemHost::new()?;
    Orchestrator::new(&ctx, &host, report).run(verb).await
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    let expanded = PathBuf::from(expand_home(&path.to_string_lossy()));
    if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    }
}
