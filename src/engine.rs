//! Assembly of the core pipeline: shared intake queue, the single stream
//! handler loop, and job execution through it.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::filter::LogFilter;
use crate::registry::ReceiverRegistry;
use crate::store::{JobStatus, JobStore, StoreError};
use crate::stream::{StreamEvent, StreamHandler};
use crate::subprocess::{OutputLine, ProcessError, ProcessRunner, RunRequest};

pub struct Engine {
    store: Arc<JobStore>,
    registry: Arc<ReceiverRegistry>,
    intake: mpsc::Sender<StreamEvent>,
    handler_task: JoinHandle<()>,
}

impl Engine {
    /// Spawn the stream handler loop and return the assembled engine.
    pub fn start(store: Arc<JobStore>, filter: Arc<LogFilter>, intake_capacity: usize) -> Self {
        let registry = Arc::new(ReceiverRegistry::new());
        let handler = Arc::new(StreamHandler::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            filter,
        ));
        let (intake, intake_rx) = mpsc::channel(intake_capacity);
        let handler_task = tokio::spawn(async move { handler.run(intake_rx).await });

        Self {
            store,
            registry,
            intake,
            handler_task,
        }
    }

    pub fn store(&self) -> Arc<JobStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> Arc<ReceiverRegistry> {
        Arc::clone(&self.registry)
    }

    /// Run one command as a job, then finalize it. The job record goes
    /// `Complete` whether the process succeeded or not: viewers receive
    /// every line the job produced before failing, followed by a clean
    /// close. The process outcome is returned to the caller, who decides
    /// whether the logical job should be retried.
    pub async fn execute(
        &self,
        runner: &dyn ProcessRunner,
        request: RunRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), ProcessError> {
        let job_id = request.job_id.clone();

        // Per-run producer channel, forwarded into the shared intake. The
        // forwarder is joined before the close event is queued, so the
        // close cannot overtake the job's own lines.
        let (line_tx, mut line_rx) = mpsc::channel::<OutputLine>(64);
        let intake = self.intake.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(line) = line_rx.recv().await {
                if intake.send(StreamEvent::Line(line)).await.is_err() {
                    break;
                }
            }
        });

        let result = runner.run(request, line_tx, cancel).await;
        let _ = forwarder.await;

        self.finalize(&job_id).await;
        result
    }

    async fn finalize(&self, job_id: &str) {
        let (done_tx, done_rx) = oneshot::channel();
        let close = StreamEvent::Close {
            job_id: job_id.to_string(),
            status: JobStatus::Complete,
            done: Some(done_tx),
        };
        if self.intake.send(close).await.is_err() {
            tracing::error!(job_id = %job_id, "stream handler gone, job left unfinalized");
            return;
        }
        match done_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(StoreError::NotFound(_))) => {
                // The command produced no unfiltered output, so no record
                // was ever created.
                tracing::debug!(job_id = %job_id, "no output recorded for job");
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, "failed to finalize job: {e}");
            }
            Err(_) => {
                tracing::error!(job_id = %job_id, "stream handler dropped close ack");
            }
        }
    }

    /// Stop the handler loop once all producers are done. Intended for
    /// shutdown paths and tests.
    pub async fn shutdown(self) {
        drop(self.intake);
        let _ = self.handler_task.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backends::NoopOutputStore;
    use crate::subprocess::{cancellation, CommandSpec, TokioProcessRunner};
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn engine() -> Engine {
        Engine::start(
            Arc::new(JobStore::new(Arc::new(NoopOutputStore::new()))),
            Arc::new(LogFilter::empty()),
            64,
        )
    }

    fn shell_request(job_id: &str, script: &str) -> RunRequest {
        RunRequest {
            job_id: job_id.to_string(),
            executable: PathBuf::from("sh"),
            working_dir: std::env::temp_dir(),
            command: CommandSpec::allow_duplicates("-c").input(script),
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_execute_records_and_finalizes() {
        let engine = engine();
        let runner = TokioProcessRunner::default();
        let (_cancel_tx, cancel_rx) = cancellation();

        engine
            .execute(&runner, shell_request("job", "echo a; echo b"), cancel_rx)
            .await
            .unwrap();

        let job = engine.store().get("job").await.unwrap();
        assert!(job.is_complete());
        assert_eq!(job.output, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_command_still_finalizes_with_output() {
        let engine = engine();
        let runner = TokioProcessRunner::default();
        let (_cancel_tx, cancel_rx) = cancellation();

        let err = engine
            .execute(&runner, shell_request("job", "echo before; exit 2"), cancel_rx)
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::NonZeroExit(2)));

        let job = engine.store().get("job").await.unwrap();
        assert!(job.is_complete());
        assert_eq!(job.output, vec!["before"]);
    }

    #[tokio::test]
    async fn test_silent_command_finalizes_without_record() {
        let engine = engine();
        let runner = TokioProcessRunner::default();
        let (_cancel_tx, cancel_rx) = cancellation();

        engine
            .execute(&runner, shell_request("job", "true"), cancel_rx)
            .await
            .unwrap();
        assert!(matches!(
            engine.store().get("job").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_live_viewer_sees_lines_then_end_of_stream() {
        let engine = engine();
        let runner = TokioProcessRunner::default();
        let (_cancel_tx, cancel_rx) = cancellation();

        let (tx, mut rx) = mpsc::channel(16);
        engine.registry().add_receiver("job", tx);

        engine
            .execute(&runner, shell_request("job", "echo a; echo b"), cancel_rx)
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some("a".to_string()));
        assert_eq!(rx.recv().await, Some("b".to_string()));
        assert_eq!(rx.recv().await, None);
    }
}
