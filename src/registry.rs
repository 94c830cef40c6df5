//! In-process fan-out of job output to viewer delivery queues.
//!
//! The registry holds weak registrations only: the gateway owns each queue
//! and drains it, the registry just pushes. Broadcasting never awaits, so a
//! slow or absent viewer cannot stall the producing side.

use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::subprocess::OutputLine;

#[derive(Default)]
pub struct ReceiverRegistry {
    receivers: RwLock<HashMap<String, Vec<mpsc::Sender<String>>>>,
}

impl ReceiverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a viewer queue under a job id. Safe to call concurrently
    /// with `broadcast`/`close` for other ids.
    pub fn add_receiver(&self, job_id: &str, tx: mpsc::Sender<String>) {
        let mut receivers = match self.receivers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        receivers.entry(job_id.to_string()).or_default().push(tx);
    }

    /// Deliver a line to every queue registered for its job. A full or
    /// closed queue is evicted rather than waited on; the producer never
    /// blocks. Zero registered queues is a no-op.
    pub fn broadcast(&self, line: &OutputLine) {
        let mut receivers = match self.receivers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(queues) = receivers.get_mut(&line.job_id) else {
            return;
        };
        queues.retain(|tx| match tx.try_send(line.line.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(job_id = %line.job_id, "receiver queue full, evicting slow viewer");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    /// Close every queue for a job by dropping its senders; each attached
    /// viewer observes end-of-stream. Idempotent.
    pub fn close(&self, job_id: &str) {
        let mut receivers = match self.receivers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if receivers.remove(job_id).is_some() {
            tracing::debug!(job_id = %job_id, "closed receiver registrations");
        }
    }

    /// Number of queues currently registered for a job.
    pub fn receiver_count(&self, job_id: &str) -> usize {
        self.receivers
            .read()
            .map(|r| r.get(job_id).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}
