use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::warn;

use super::Context;
use crate::config::model::Settings;
use crate::config::resolve::Network;
use crate::host::Host;
use crate::ui::report::Reporter;

/// Where the snapshot restored into the database comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Download `{base_url}/{file_name}` to `dest`.
    Remote {
        base_url: String,
        file_name: String,
        dest: PathBuf,
    },
    /// Use a file already on disk.
    Local { path: PathBuf },
}

impl SnapshotSource {
    /// Choose the source from the command-line flags.
    ///
    /// `bundled` wins over `file`. A `file` that exists disables the
    /// download; one that does not is downloaded under its own name. An
    /// empty or missing `url` falls back to the configured or built-in
    /// default for `network`. `file` must already be absolute.
    pub fn select(
        home: &Path,
        network: Network,
        settings: &Settings,
        url: Option<&str>,
        file: Option<&Path>,
        bundled: bool,
    ) -> Self {
        if bundled {
            return SnapshotSource::Local {
                path: home.join(crate::platform::expand_home(&settings.snapshot.bundled)),
            };
        }

        let base_url = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
            .or_else(|| settings.snapshot.urls.get(network.as_str()).cloned())
            .unwrap_or_else(|| network.default_download_url().to_string());

        match file {
            Some(path) if path.is_file() => SnapshotSource::Local {
                path: path.to_path_buf(),
            },
            Some(path) => SnapshotSource::Remote {
                base_url,
                file_name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| settings.snapshot.name.clone()),
                dest: path.to_path_buf(),
            },
            None => SnapshotSource::Remote {
                base_url,
                file_name: settings.snapshot.name.clone(),
                dest: home.join(&settings.snapshot.name),
            },
        }
    }

    /// The file that gets restored.
    pub fn path(&self) -> &Path {
        match self {
            SnapshotSource::Remote { dest, .. } => dest,
            SnapshotSource::Local { path } => path,
        }
    }

    pub fn download_url(&self) -> Option<String> {
        match self {
            SnapshotSource::Remote {
                base_url,
                file_name,
                ..
            } => Some(format!("{}/{}", base_url.trim_end_matches('/'), file_name)),
            SnapshotSource::Local { .. } => None,
        }
    }
}

pub struct SnapshotFetcher<'a, H: Host> {
    ctx: &'a Context,
    host: &'a H,
    report: &'a Reporter,
}

impl<'a, H: Host> SnapshotFetcher<'a, H> {
    pub fn new(ctx: &'a Context, host: &'a H, report: &'a Reporter) -> Self {
        Self { ctx, host, report }
    }

    /// Make the snapshot available locally. A failed download leaves no
    /// partial file behind and is fatal.
    pub async fn fetch(&self) -> Result<()> {
        let source = &self.ctx.snapshot;
        let Some(url) = source.download_url() else {
            self.report.ok("Using local snapshot.");
            return Ok(());
        };
        let dest = source.path();

        remove_if_present(dest).await?;
        if let SnapshotSource::Remote {
            base_url,
            file_name,
            ..
        } = source
        {
            self.report
                .ok(format!("Downloading {} from {}", file_name, base_url));
        }

        if let Err(e) = self.host.download(&url, dest).await {
            warn!(url = %url, "{:#}", e);
            let _ = remove_if_present(dest).await;
            return Err(self
                .report
                .fatal("Failed to download blockchain snapshot."));
        }
        self.report
            .ok("Blockchain snapshot downloaded successfully.");
        Ok(())
    }
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::anyhow!("removing {}: {}", path.display(), e)),
    }
}
