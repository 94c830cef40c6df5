//! Volatile tier: in-memory record of active jobs.

use std::collections::HashMap;
use std::sync::RwLock;

use super::error::{StoreError, StoreResult};
use super::job::{Job, JobStatus};

/// Authoritative store for a job while it is running. Jobs are created
/// implicitly by the first write and evicted once the durable tier has the
/// transcript (or on explicit removal).
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job_id: &str) -> StoreResult<Job> {
        let jobs = match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))
    }

    /// Append a line, creating the job record on first write. Fails with
    /// `JobComplete` once the job has been closed.
    pub fn append(&self, job_id: &str, line: &str) -> StoreResult<()> {
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let job = jobs.entry(job_id.to_string()).or_insert_with(Job::new);
        if job.is_complete() {
            return Err(StoreError::JobComplete(job_id.to_string()));
        }
        job.output.push(line.to_string());
        Ok(())
    }

    /// Flip the job's status. The only operation allowed to do so, exactly
    /// once per job.
    pub fn close(&self, job_id: &str, status: JobStatus) -> StoreResult<()> {
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| StoreError::NotFound(job_id.to_string()))?;
        if job.is_complete() {
            return Err(StoreError::AlreadyComplete(job_id.to_string()));
        }
        job.status = status;
        Ok(())
    }

    /// Unconditional eviction.
    pub fn remove(&self, job_id: &str) {
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        jobs.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_creates_job() {
        let store = MemoryJobStore::new();
        store.append("job", "a").unwrap();

        let job = store.get("job").unwrap();
        assert_eq!(job.output, vec!["a"]);
        assert_eq!(job.status, JobStatus::Processing);
    }

    #[test]
    fn test_get_missing_job() {
        let store = MemoryJobStore::new();
        assert!(matches!(store.get("nope"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_write_after_complete_fails_without_mutation() {
        let store = MemoryJobStore::new();
        store.append("job", "a").unwrap();
        store.close("job", JobStatus::Complete).unwrap();

        let err = store.append("job", "b").unwrap_err();
        assert!(matches!(err, StoreError::JobComplete(_)));
        assert_eq!(store.get("job").unwrap().output, vec!["a"]);
    }

    #[test]
    fn test_close_missing_job_fails() {
        let store = MemoryJobStore::new();
        let err = store.close("nope", JobStatus::Complete).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_double_close_fails_and_keeps_status() {
        let store = MemoryJobStore::new();
        store.append("job", "a").unwrap();
        store.close("job", JobStatus::Complete).unwrap();

        let err = store.close("job", JobStatus::Complete).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyComplete(_)));
        assert_eq!(store.get("job").unwrap().status, JobStatus::Complete);
    }

    #[test]
    fn test_remove_is_unconditional() {
        let store = MemoryJobStore::new();
        store.append("job", "a").unwrap();
        store.remove("job");
        assert!(matches!(store.get("job"), Err(StoreError::NotFound(_))));

        // Removing an unknown id is fine.
        store.remove("job");
    }
}
