//! The boundary between orchestration logic and the machine it runs on.
//!
//! Every external effect (running a program, downloading a file, probing or
//! killing a PID) goes through [`Host`]. [`SystemHost`] performs them for
//! real; tests substitute a simulated host.

use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tracing::debug;

/// Result of an external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    Fail(String),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok)
    }
}

/// What to feed a command on stdin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Input {
    #[default]
    Null,
    Bytes(Vec<u8>),
    /// Stream the gzip-decompressed contents of a file.
    Gzip(PathBuf),
}

/// A program invocation. No shell is involved.
#[derive(Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables; never displayed.
    pub env: Vec<(String, String)>,
    pub input: Input,
    /// Inherit the terminal instead of capturing output.
    pub interactive: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            input: Input::Null,
            interactive: false,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn input(mut self, input: Input) -> Self {
        self.input = input;
        self
    }

    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env: Vec<&str> = self.env.iter().map(|(k, _)| k.as_str()).collect();
        let input = match &self.input {
            Input::Null => "null",
            Input::Bytes(_) => "bytes",
            Input::Gzip(_) => "gzip",
        };
        f.debug_struct("Invocation")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env)
            .field("input", &input)
            .field("interactive", &self.interactive)
            .finish()
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub outcome: Outcome,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Ok,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            outcome: Outcome::Fail(reason.clone()),
            stdout: String::new(),
            stderr: reason,
        }
    }

    fn from_status(status: ExitStatus, stdout: String, stderr: String) -> Self {
        let outcome = if status.success() {
            Outcome::Ok
        } else {
            let first_line = stderr.lines().find(|l| !l.trim().is_empty());
            let code = status
                .code()
                .map(|c| format!("exit status {}", c))
                .unwrap_or_else(|| "terminated by signal".to_string());
            match first_line {
                Some(line) => Outcome::Fail(format!("{}: {}", code, line.trim())),
                None => Outcome::Fail(code),
            }
        };
        Self {
            outcome,
            stdout,
            stderr,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// External effects used by the controllers.
///
/// `run` returns `Err` only when the program could not be started at all; a
/// program that ran and failed yields `Ok` with [`Outcome::Fail`].
#[allow(async_fn_in_trait)]
pub trait Host {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Fetch `url` into `dest`, failing on transport errors and non-2xx statuses.
    async fn download(&self, url: &str, dest: &Path) -> Result<()>;

    fn is_process_alive(&self, pid: u32) -> bool;

    fn force_kill(&self, pid: u32) -> Result<()>;
}

/// [`Host`] backed by real processes, HTTP and signals.
pub struct SystemHost {
    client: reqwest::Client,
}

impl SystemHost {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("nodectl/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self { client })
    }
}

impl Host for SystemHost {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        debug!(command = %invocation, "running");
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args);
        cmd.envs(invocation.env.iter().map(|(k, v)| (k, v)));

        if invocation.interactive {
            let status = cmd
                .status()
                .await
                .with_context(|| format!("failed to run {}", invocation.program))?;
            return Ok(CommandOutput::from_status(status, String::new(), String::new()));
        }

        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.stdin(match invocation.input {
            Input::Null => Stdio::null(),
            _ => Stdio::piped(),
        });
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to run {}", invocation.program))?;

        let feeder = child.stdin.take().map(|stdin| {
            let input = invocation.input.clone();
            tokio::spawn(feed(input, stdin))
        });

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("waiting on {}", invocation.program))?;

        let fed = match feeder {
            Some(handle) => handle.await.map_err(anyhow::Error::from).and_then(|r| r),
            None => Ok(()),
        };

        let mut result = CommandOutput::from_status(
            output.status,
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        );
        if let Err(e) = fed {
            if result.succeeded() {
                result.outcome = Outcome::Fail(format!("feeding stdin: {:#}", e));
            }
        }
        debug!(command = %invocation, outcome = ?result.outcome, "finished");
        Ok(result)
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {}", url))?
            .error_for_status()?;

        let mut file = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("creating {}", dest.display()))?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await.context("reading response body")? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        debug!(url, bytes = written, "download complete");
        Ok(())
    }

    fn is_process_alive(&self, pid: u32) -> bool {
        crate::platform::is_process_alive(pid)
    }

    fn force_kill(&self, pid: u32) -> Result<()> {
        crate::platform::force_kill(pid)
    }
}

async fn feed(input: Input, mut stdin: ChildStdin) -> Result<()> {
    match input {
        Input::Null => {}
        Input::Bytes(bytes) => stdin.write_all(&bytes).await?,
        Input::Gzip(path) => feed_gzip(path, &mut stdin).await?,
    }
    stdin.flush().await?;
    Ok(())
}

/// Decompress on a blocking thread and forward chunks to the child.
async fn feed_gzip(path: PathBuf, stdin: &mut ChildStdin) -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::channel::<std::io::Result<Vec<u8>>>(8);

    let decoder = tokio::task::spawn_blocking(move || {
        let file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
        let mut gz = flate2::read::GzDecoder::new(std::io::BufReader::new(file));
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            match gz.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(Ok(buf[..n].to_vec())).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });

    let mut forwarded = Ok(());
    while let Some(chunk) = rx.recv().await {
        let written = match chunk {
            Ok(bytes) => stdin.write_all(&bytes).await.context("writing to child stdin"),
            Err(e) => Err(anyhow::Error::from(e).context("decompressing snapshot")),
        };
        if let Err(e) = written {
            forwarded = Err(e);
            break;
        }
    }
    // Unblocks the decoder if we stopped early.
    drop(rx);
    decoder.await?;
    forwarded
}
