/// Errors that end an invocation on purpose. The failure line has already
/// been printed by the reporter when one of these is raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OpsError {
    /// A step failed and the remaining sequence must not run.
    #[error("{0}")]
    Fatal(String),
    /// The invocation was rejected before doing anything; exits successfully.
    #[error("{0}")]
    Aborted(String),
}

impl OpsError {
    pub fn exit_code(&self) -> i32 {
        match self {
            OpsError::Fatal(_) => 1,
            OpsError::Aborted(_) => 0,
        }
    }
}

/// Exit status for an error that reached `main`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<OpsError>()
        .map(OpsError::exit_code)
        .unwrap_or(1)
}

/// Whether the error's failure line was already shown to the operator.
pub fn is_reported(err: &anyhow::Error) -> bool {
    err.downcast_ref::<OpsError>().is_some()
}
