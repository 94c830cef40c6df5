use std::time::Duration;

/// Errors surfaced by the subprocess runner.
///
/// Each variant is terminal for the process that produced it; callers decide
/// whether the logical job should be retried, the runner never does.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to start {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process exited with code {0}")]
    NonZeroExit(i32),

    #[error("process terminated by signal {0}")]
    Signal(i32),

    #[error("process cancelled while waiting for exit (grace period {grace:?})")]
    Cancelled { grace: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    /// True when the process ran but finished unsuccessfully, as opposed to
    /// never starting or being interrupted.
    pub fn is_exit_failure(&self) -> bool {
        matches!(self, ProcessError::NonZeroExit(_) | ProcessError::Signal(_))
    }
}
