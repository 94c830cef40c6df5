//! The stream handler: the single sequential consumer that joins the
//! producing side (subprocess runners) to the distribution side (receiver
//! registry) and the job store.
//!
//! One loop processes every job's events, so per-job broadcast+append order
//! is total; no two lines of the same job can be reordered, and a close
//! event queued after a job's lines cannot overtake them.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::filter::LogFilter;
use crate::registry::ReceiverRegistry;
use crate::store::{JobStatus, JobStore, StoreResult};
use crate::subprocess::OutputLine;

/// Unit of work on the shared intake queue.
pub enum StreamEvent {
    Line(OutputLine),
    Close {
        job_id: String,
        status: JobStatus,
        /// Optional ack so the enqueuer can observe the close result in
        /// queue order.
        done: Option<oneshot::Sender<StoreResult<()>>>,
    },
}

pub struct StreamHandler {
    store: Arc<JobStore>,
    registry: Arc<ReceiverRegistry>,
    filter: Arc<LogFilter>,
}

impl StreamHandler {
    pub fn new(store: Arc<JobStore>, registry: Arc<ReceiverRegistry>, filter: Arc<LogFilter>) -> Self {
        Self {
            store,
            registry,
            filter,
        }
    }

    /// Consume the shared intake queue until every producer has hung up.
    pub async fn run(&self, mut intake: mpsc::Receiver<StreamEvent>) {
        while let Some(event) = intake.recv().await {
            match event {
                StreamEvent::Line(line) => self.handle(&line),
                StreamEvent::Close {
                    job_id,
                    status,
                    done,
                } => {
                    let result = self.close_job(&job_id, status).await;
                    match done {
                        Some(done) => {
                            let _ = done.send(result);
                        }
                        None => {
                            if let Err(e) = result {
                                tracing::error!(job_id = %job_id, "failed to close job: {e}");
                            }
                        }
                    }
                }
            }
        }
        tracing::debug!("stream handler intake closed");
    }

    /// Filter, broadcast, then append. Broadcast comes first: a viewer that
    /// registers after backfill can then never see a line twice, only miss
    /// one in the documented attach gap. Append failures are logged and
    /// swallowed; a storage hiccup must not abort a running command.
    pub fn handle(&self, line: &OutputLine) {
        if self.filter.is_filtered(&line.line) {
            tracing::trace!(job_id = %line.job_id, "filtered line");
            return;
        }
        self.registry.broadcast(line);
        if let Err(e) = self.store.append(&line.job_id, &line.line) {
            tracing::error!(job_id = %line.job_id, "failed to store output line: {e}");
        }
    }

    /// Finalize a job: close the registry entry first so no viewer is left
    /// waiting on a queue after the job record itself is complete, then
    /// close the store entry. The trailing registry sweep catches a viewer
    /// that registered between the two closes; every later registration
    /// sees a complete store and detaches on its own.
    pub async fn close_job(&self, job_id: &str, status: JobStatus) -> StoreResult<()> {
        tracing::info!(job_id = %job_id, ?status, "closing job");
        self.registry.close(job_id);
        let result = self.store.close(job_id, status).await;
        self.registry.close(job_id);
        result
    }
}
