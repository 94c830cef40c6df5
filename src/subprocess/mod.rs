//! Subprocess execution layer: structured command assembly and a streaming
//! runner with process-group cancellation escalation.

pub mod command;
pub mod error;
pub mod runner;

pub use command::CommandSpec;
pub use error::ProcessError;
pub use runner::{
    cancellation, OutputLine, ProcessRunner, RunRequest, TokioProcessRunner, DEFAULT_GRACE_PERIOD,
};
