//! Two-tier job store: a volatile in-memory tier that is authoritative
//! while a job runs, backed by a durable tier that is authoritative once
//! the job completes.

pub mod backends;
pub mod error;
pub mod job;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use job::{Job, JobStatus};
pub use memory::MemoryJobStore;
pub use traits::{output_key, OutputStore};

use std::sync::Arc;

pub struct JobStore {
    volatile: MemoryJobStore,
    durable: Arc<dyn OutputStore>,
}

impl JobStore {
    pub fn new(durable: Arc<dyn OutputStore>) -> Self {
        Self {
            volatile: MemoryJobStore::new(),
            durable,
        }
    }

    /// Volatile tier first; on a miss, fall back to the durable tier and
    /// synthesize a `Complete` job from the persisted transcript.
    pub async fn get(&self, job_id: &str) -> StoreResult<Job> {
        match self.volatile.get(job_id) {
            Ok(job) => Ok(job),
            Err(StoreError::NotFound(_)) => {
                match self.durable.read(&output_key(job_id)).await? {
                    Some(lines) => Ok(Job::from_persisted(lines)),
                    None => Err(StoreError::NotFound(job_id.to_string())),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Appends go to the volatile tier only; the durable tier is
    /// write-once-on-completion.
    pub fn append(&self, job_id: &str, line: &str) -> StoreResult<()> {
        self.volatile.append(job_id, line)
    }

    /// Flip the job's status, then persist its transcript. On persisted
    /// success the volatile copy is evicted and the durable tier becomes
    /// the single source of truth. On failure the job is retained in
    /// memory, still readable and still `Complete`, and the error is
    /// surfaced; no retry is scheduled.
    pub async fn close(&self, job_id: &str, status: JobStatus) -> StoreResult<()> {
        self.volatile.close(job_id, status)?;

        // Point-in-time copy; the durable write runs outside any lock.
        let job = self.volatile.get(job_id)?;
        match self.durable.write(&output_key(job_id), &job.output).await {
            Ok(true) => {
                self.volatile.remove(job_id);
                Ok(())
            }
            Ok(false) => {
                tracing::debug!(job_id = %job_id, "transcript not persisted, retaining in memory");
                Ok(())
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, "failed to persist transcript, retaining in memory: {e}");
                Err(e)
            }
        }
    }

    pub fn remove(&self, job_id: &str) {
        self.volatile.remove(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::backends::{FileOutputStore, NoopOutputStore};
    use super::*;
    use async_trait::async_trait;

    /// Durable tier that always fails, for the retained-on-failure path.
    struct FailingOutputStore;

    #[async_trait]
    impl OutputStore for FailingOutputStore {
        async fn read(&self, _key: &str) -> StoreResult<Option<Vec<String>>> {
            Err(StoreError::Backend(anyhow::anyhow!("backend down")))
        }

        async fn write(&self, _key: &str, _lines: &[String]) -> StoreResult<bool> {
            Err(StoreError::Backend(anyhow::anyhow!("backend down")))
        }
    }

    fn file_store(dir: &tempfile::TempDir) -> JobStore {
        JobStore::new(Arc::new(FileOutputStore::new(dir.path().to_path_buf())))
    }

    #[tokio::test]
    async fn test_close_persists_and_evicts_volatile_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);

        store.append("job", "a").unwrap();
        store.append("job", "b").unwrap();
        store.close("job", JobStatus::Complete).await.unwrap();

        // Volatile copy is gone; get falls through to the durable tier.
        let job = store.get("job").await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.output, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_get_unknown_job_checks_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let store = file_store(&dir);
        assert!(matches!(
            store.get("ghost").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_failure_retains_job_in_memory() {
        let store = JobStore::new(Arc::new(FailingOutputStore));

        store.append("job", "a").unwrap();
        let err = store.close("job", JobStatus::Complete).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));

        // Still readable with full content, still marked complete.
        let job = store.get("job").await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.output, vec!["a"]);
    }

    #[tokio::test]
    async fn test_noop_backend_retains_job_without_error() {
        let store = JobStore::new(Arc::new(NoopOutputStore::new()));

        store.append("job", "a").unwrap();
        store.close("job", JobStatus::Complete).await.unwrap();

        let job = store.get("job").await.unwrap();
        assert_eq!(job.status, JobStatus::Complete);
        assert_eq!(job.output, vec!["a"]);
    }

    #[tokio::test]
    async fn test_append_after_close_fails() {
        let store = JobStore::new(Arc::new(NoopOutputStore::new()));

        store.append("job", "a").unwrap();
        store.close("job", JobStatus::Complete).await.unwrap();
        assert!(matches!(
            store.append("job", "b"),
            Err(StoreError::JobComplete(_))
        ));
    }

    #[tokio::test]
    async fn test_double_close_fails() {
        let store = JobStore::new(Arc::new(NoopOutputStore::new()));

        store.append("job", "a").unwrap();
        store.close("job", JobStatus::Complete).await.unwrap();
        assert!(matches!(
            store.close("job", JobStatus::Complete).await,
            Err(StoreError::AlreadyComplete(_))
        ));
    }

    #[tokio::test]
    async fn test_close_unknown_job_fails() {
        let store = JobStore::new(Arc::new(NoopOutputStore::new()));
        assert!(matches!(
            store.close("ghost", JobStatus::Complete).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
