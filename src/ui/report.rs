use std::sync::{Arc, Mutex};

use is_terminal::IsTerminal;
use owo_colors::OwoColorize;

use crate::error::OpsError;
use crate::host::CommandOutput;
use crate::ui::transcript::Transcript;

const OK_MARK: &str = "\u{221a}";
const FAIL_MARK: &str = "X";

enum Sink {
    Stdout,
    Captured(CapturedLines),
}

/// Lines written by a captured [`Reporter`], without colour.
#[derive(Debug, Clone, Default)]
pub struct CapturedLines(Arc<Mutex<Vec<String>>>);

impl CapturedLines {
    pub fn lines(&self) -> Vec<String> {
        self.0.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn contains(&self, line: &str) -> bool {
        self.lines().iter().any(|l| l == line)
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.0.lock() {
            lines.push(line);
        }
    }
}

/// Operator-facing output: `√` confirmations, `X` failures and plain notes,
/// mirrored into the transcript when one is attached.
pub struct Reporter {
    use_color: bool,
    sink: Sink,
    transcript: Option<Transcript>,
}

impl Reporter {
    pub fn stdout(transcript: Option<Transcript>) -> Self {
        Self {
            use_color: std::io::stdout().is_terminal(),
            sink: Sink::Stdout,
            transcript,
        }
    }

    /// A reporter that records lines in memory instead of printing them.
    pub fn captured() -> (Self, CapturedLines) {
        let lines = CapturedLines::default();
        let reporter = Self {
            use_color: false,
            sink: Sink::Captured(lines.clone()),
            transcript: None,
        };
        (reporter, lines)
    }

    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.attach(transcript);
        self
    }

    /// Mirror every following line into `transcript`.
    pub fn attach(&mut self, transcript: Transcript) {
        self.transcript = Some(transcript);
    }

    pub fn transcript(&self) -> Option<&Transcript> {
        self.transcript.as_ref()
    }

    /// `√ message`
    pub fn ok(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let colored = format!("{} {}", OK_MARK.green(), message);
        self.emit(&format!("{} {}", OK_MARK, message), &colored);
    }

    /// `X message`; the caller carries on.
    pub fn fail(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let colored = format!("{} {}", FAIL_MARK.red(), message);
        self.emit(&format!("{} {}", FAIL_MARK, message), &colored);
    }

    /// `X message`, returning the error that aborts the invocation.
    pub fn fatal(&self, message: impl Into<String>) -> anyhow::Error {
        let message = message.into();
        self.fail(&message);
        OpsError::Fatal(message).into()
    }

    /// A plain line.
    pub fn note(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.emit(message, message);
    }

    /// Keep an external command's output in the transcript only.
    pub fn record(&self, output: &CommandOutput) {
        let Some(transcript) = &self.transcript else {
            return;
        };
        for text in [&output.stdout, &output.stderr] {
            if !text.trim().is_empty() {
                transcript.append(text);
            }
        }
    }

    fn emit(&self, plain: &str, colored: &str) {
        match &self.sink {
            Sink::Stdout if self.use_color => println!("{}", colored),
            Sink::Stdout => println!("{}", plain),
            Sink::Captured(lines) => lines.push(plain.to_string()),
        }
        if let Some(transcript) = &self.transcript {
            transcript.append(plain);
        }
    }
}
