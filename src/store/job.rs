use serde::{Deserialize, Serialize};

/// Lifecycle state of a job. Exactly one transition exists:
/// `Processing` → `Complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Processing,
    Complete,
}

/// A job's accumulated output transcript and lifecycle state. Output is
/// append-only while `Processing` and immutable once `Complete`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub output: Vec<String>,
    pub status: JobStatus,
}

impl Job {
    pub(crate) fn new() -> Self {
        Self {
            output: Vec::new(),
            status: JobStatus::Processing,
        }
    }

    /// Synthesize a record for a transcript recovered from durable storage;
    /// durable storage only ever holds completed jobs.
    pub(crate) fn from_persisted(output: Vec<String>) -> Self {
        Self {
            output,
            status: JobStatus::Complete,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == JobStatus::Complete
    }
}
