//! Durable storage boundary for completed job transcripts.

use async_trait::async_trait;

use super::error::StoreResult;

/// Key convention for persisted transcripts.
pub fn output_key(job_id: &str) -> String {
    format!("output/{job_id}")
}

/// Write-once-on-completion transcript storage. Content encoding is
/// newline-joined UTF-8 text.
#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Read the persisted transcript for a key, or `None` if absent.
    async fn read(&self, key: &str) -> StoreResult<Option<Vec<String>>>;

    /// Persist a full transcript. Returns `false` when the backend is
    /// configured not to persist (the job then stays in the volatile tier).
    async fn write(&self, key: &str, lines: &[String]) -> StoreResult<bool>;
}
