//! Error types for the job store.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Job exists in neither the volatile nor the durable tier.
    #[error("job not found: {0}")]
    NotFound(String),

    /// Write attempted against a job whose output is already immutable.
    #[error("job already complete: {0}")]
    JobComplete(String),

    /// Close attempted against a job that was already closed.
    #[error("job already closed: {0}")]
    AlreadyComplete(String),

    /// Durable tier failure; the volatile tier retains the job.
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
