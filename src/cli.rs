use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser};

/// Command line. Verb and network stay plain strings so that unknown values
/// get the operator-facing `X` treatment instead of a clap error.
#[derive(Debug, Parser)]
#[command(
    name = "nodectl",
    version,
    about = "Start, stop, rebuild and monitor a blockchain node with its database and cache"
)]
pub struct Cli {
    /// Operation to perform (see `nodectl help`)
    pub verb: Option<String>,

    /// Network to operate on: mainnet, testnet or devnet
    pub network: Option<String>,

    #[command(flatten)]
    pub run: RunOpts,

    #[command(flatten)]
    pub global: GlobalOpts,
}

#[derive(Debug, Args)]
pub struct RunOpts {
    /// Use an alternate process descriptor
    #[arg(short = 'p', value_name = "DESCRIPTOR")]
    pub descriptor: Option<PathBuf>,

    /// Download the snapshot from this base URL
    #[arg(short = 'u', value_name = "URL")]
    pub url: Option<String>,

    /// Restore this snapshot file; downloaded under that name if it does not exist
    #[arg(short = 'f', value_name = "FILE")]
    pub file: Option<PathBuf>,

    /// Restore the snapshot bundled with the installation
    #[arg(short = '0')]
    pub bundled: bool,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Installation directory
    #[arg(long, env = "NODECTL_HOME", value_name = "DIR")]
    pub home: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Coldstart,
    Start,
    StartNode,
    Stop,
    StopNode,
    Reload,
    Rebuild,
    StartDb,
    StopDb,
    Cleanup,
    Status,
    Logs,
    Lisky,
    Doctor,
    Help,
}

impl Verb {
    pub const ALL: [Verb; 15] = [
        Verb::Coldstart,
        Verb::Start,
        Verb::StartNode,
        Verb::Stop,
        Verb::StopNode,
        Verb::Reload,
        Verb::Rebuild,
        Verb::StartDb,
        Verb::StopDb,
        Verb::Cleanup,
        Verb::Status,
        Verb::Logs,
        Verb::Lisky,
        Verb::Doctor,
        Verb::Help,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Coldstart => "coldstart",
            Verb::Start => "start",
            Verb::StartNode => "start_node",
            Verb::Stop => "stop",
            Verb::StopNode => "stop_node",
            Verb::Reload => "reload",
            Verb::Rebuild => "rebuild",
            Verb::StartDb => "start_db",
            Verb::StopDb => "stop_db",
            Verb::Cleanup => "cleanup",
            Verb::Status => "status",
            Verb::Logs => "logs",
            Verb::Lisky => "lisky",
            Verb::Doctor => "doctor",
            Verb::Help => "help",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Verb::Coldstart => "Recreate the database from scratch, restore a snapshot and start",
            Verb::Start => "Start the database and the node",
            Verb::StartNode => "Start the node only",
            Verb::Stop => "Stop the node and the database",
            Verb::StopNode => "Stop the node only",
            Verb::Reload => "Restart the node",
            Verb::Rebuild => "Recreate the chain database from a snapshot",
            Verb::StartDb => "Start the database",
            Verb::StopDb => "Stop the database",
            Verb::Cleanup => "Remove all process manager apps and stop its daemon",
            Verb::Status => "Show whether the node runs and the block height",
            Verb::Logs => "Follow the node log",
            Verb::Lisky => "Launch the lisky client",
            Verb::Doctor => "Check that the external tools are installed",
            Verb::Help => "Show this help",
        }
    }

    /// Verbs that act on a network's installation.
    pub fn needs_network(&self) -> bool {
        !matches!(self, Verb::Doctor | Verb::Help)
    }

    /// The known verb closest to `input`, if any is close enough.
    pub fn suggest(input: &str) -> Option<Verb> {
        Verb::ALL
            .into_iter()
            .map(|v| (v, strsim::jaro_winkler(input, v.as_str())))
            .filter(|(_, score)| *score >= 0.8)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(v, _)| v)
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized command '{0}'")]
pub struct UnknownVerb(pub String);

impl FromStr for Verb {
    type Err = UnknownVerb;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Verb::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| UnknownVerb(s.to_string()))
    }
}

pub fn verb_list() -> String {
    Verb::ALL
        .iter()
        .map(Verb::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn usage() -> String {
    let mut out = String::from(
        "Usage: nodectl <command> <mainnet|testnet|devnet> [-p DESCRIPTOR] [-u URL] [-f FILE] [-0] [--home DIR]\n\nCommands:\n",
    );
    for verb in Verb::ALL {
        out.push_str(&format!("  {:<12} {}\n", verb.as_str(), verb.description()));
    }
    out.push_str(
        "\nOptions:\n  \
         -p DESCRIPTOR  Use an alternate process descriptor\n  \
         -u URL         Download the snapshot from URL\n  \
         -f FILE        Restore FILE; it is downloaded under that name if missing\n  \
         -0             Restore the snapshot bundled with the installation\n  \
         --home DIR     Installation directory (env: NODECTL_HOME)",
    );
    out
}
