use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};

use super::command::CommandSpec;
use super::error::ProcessError;

/// A single line of merged stdout/stderr output, tagged with the job that
/// produced it. The unit of transport between the runner and the
/// distribution layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub job_id: String,
    pub line: String,
}

/// Everything the runner needs to execute one command: the resolved
/// executable (supplied by an external version-cache collaborator), the
/// working directory (supplied by an external repository-fetch
/// collaborator), and the structured command-line.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub job_id: String,
    pub executable: PathBuf,
    pub working_dir: PathBuf,
    pub command: CommandSpec,
    pub env: HashMap<String, String>,
}

/// Grace window between SIGTERM and SIGKILL on cancellation.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Per-line buffer cap; a longer line is truncated rather than growing the
/// buffer without bound.
const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Create a cancellation pair for a runner invocation. Flipping the sender
/// to `true` requests graceful termination.
pub fn cancellation() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run the command to completion, streaming merged stdout/stderr lines
    /// into `output` in arrival order. Returns `Ok(())` only for a clean
    /// zero exit; all other outcomes are classified `ProcessError`s.
    async fn run(
        &self,
        request: RunRequest,
        output: mpsc::Sender<OutputLine>,
        cancel: watch::Receiver<bool>,
    ) -> Result<(), ProcessError>;
}

/// Production runner on `tokio::process`.
pub struct TokioProcessRunner {
    grace_period: Duration,
}

impl Default for TokioProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_PERIOD)
    }
}

impl TokioProcessRunner {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }
}

enum WaitOutcome {
    Exited(std::process::ExitStatus),
    Cancelled,
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        request: RunRequest,
        output: mpsc::Sender<OutputLine>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<(), ProcessError> {
        let args = request.command.build();
        tracing::debug!(
            job_id = %request.job_id,
            "executing {} {} in {}",
            request.executable.display(),
            args.join(" "),
            request.working_dir.display()
        );

        let mut cmd = Command::new(&request.executable);
        cmd.args(&args)
            .current_dir(&request.working_dir)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so signals aimed at us do not reach the child
        // and group-wide kills do not reach us.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| ProcessError::SpawnFailed {
            command: format!("{} {}", request.executable.display(), args.join(" ")),
            source,
        })?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Io(std::io::Error::other("stderr not captured")))?;

        let mut stdout_lines = LineReader::new(stdout, MAX_LINE_BYTES);
        let mut stderr_lines = LineReader::new(stderr, MAX_LINE_BYTES);

        // Single forwarding loop merging both pipes in arrival order; this
        // is the job's only producer, so per-job ordering holds end-to-end.
        let job_id = request.job_id.clone();
        let forward = async {
            let mut stdout_done = false;
            let mut stderr_done = false;
            while !(stdout_done && stderr_done) {
                let line = tokio::select! {
                    res = stdout_lines.next_line(), if !stdout_done => {
                        flatten_read(res, &mut stdout_done, &job_id, "stdout")
                    }
                    res = stderr_lines.next_line(), if !stderr_done => {
                        flatten_read(res, &mut stderr_done, &job_id, "stderr")
                    }
                };
                if let Some(line) = line {
                    let item = OutputLine {
                        job_id: job_id.clone(),
                        line,
                    };
                    if output.send(item).await.is_err() {
                        // Intake gone; keep draining pipes so the child is
                        // not blocked on a full pipe.
                        tracing::warn!(job_id = %job_id, "output intake closed, discarding lines");
                    }
                }
            }
        };

        let grace = self.grace_period;
        let supervise = async {
            let first = tokio::select! {
                status = child.wait() => WaitOutcome::Exited(status?),
                _ = cancel_requested(&mut cancel) => WaitOutcome::Cancelled,
            };
            match first {
                WaitOutcome::Exited(status) => classify_exit(status),
                WaitOutcome::Cancelled => {
                    tracing::info!(job_id = %request.job_id, "cancellation requested, terminating process group");
                    signal_group(&mut child, pid, TerminateKind::Graceful).await;
                    match tokio::time::timeout(grace, child.wait()).await {
                        Ok(status) => {
                            status?;
                        }
                        Err(_) => {
                            tracing::warn!(
                                job_id = %request.job_id,
                                "process survived {:?} grace period, killing",
                                grace
                            );
                            signal_group(&mut child, pid, TerminateKind::Forceful).await;
                            child.wait().await?;
                        }
                    }
                    Err(ProcessError::Cancelled { grace })
                }
            }
        };

        let (_, result) = tokio::join!(forward, supervise);
        match &result {
            Ok(()) => tracing::debug!(job_id = %request.job_id, "process completed successfully"),
            Err(e) => tracing::debug!(job_id = %request.job_id, "process failed: {e}"),
        }
        result
    }
}

fn flatten_read(
    res: std::io::Result<Option<String>>,
    done: &mut bool,
    job_id: &str,
    pipe: &str,
) -> Option<String> {
    match res {
        Ok(Some(line)) => Some(line),
        Ok(None) => {
            *done = true;
            None
        }
        Err(e) => {
            tracing::warn!(job_id = %job_id, "error reading {pipe}: {e}");
            *done = true;
            None
        }
    }
}

/// Resolves once cancellation is requested; pends forever if the
/// cancellation sender is dropped without firing.
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn classify_exit(status: std::process::ExitStatus) -> Result<(), ProcessError> {
    if status.success() {
        return Ok(());
    }
    if let Some(code) = status.code() {
        return Err(ProcessError::NonZeroExit(code));
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Err(ProcessError::Signal(signal));
        }
    }
    Err(ProcessError::NonZeroExit(-1))
}

enum TerminateKind {
    Graceful,
    Forceful,
}

/// Signal the whole process group so grandchildren are not orphaned.
#[cfg(unix)]
async fn signal_group(_child: &mut tokio::process::Child, pid: Option<u32>, kind: TerminateKind) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    let pgid = Pid::from_raw(-(pid as i32));
    let signal = match kind {
        TerminateKind::Graceful => Signal::SIGTERM,
        TerminateKind::Forceful => Signal::SIGKILL,
    };
    if let Err(e) = signal::kill(pgid, signal) {
        tracing::warn!("failed to send {signal} to process group {pid}: {e}");
    }
}

#[cfg(not(unix))]
async fn signal_group(child: &mut tokio::process::Child, _pid: Option<u32>, kind: TerminateKind) {
    if matches!(kind, TerminateKind::Forceful) {
        let _ = child.start_kill();
    }
}

/// Cancel-safe line reader over an async pipe. Partial reads accumulate in
/// `buf`, which survives a cancelled `next_line` call, so lines are never
/// torn by `select!`.
struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max: usize,
    truncated: bool,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    fn new(inner: R, max: usize) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
            max,
            truncated: false,
        }
    }

    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                // EOF: flush any trailing line without a newline.
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }
            let newline = available.iter().position(|&b| b == b'\n');
            let take = newline.unwrap_or(available.len());
            push_capped(&mut self.buf, &mut self.truncated, self.max, &available[..take]);
            self.reader.consume(take + usize::from(newline.is_some()));
            if newline.is_some() {
                return Ok(Some(self.take_line()));
            }
        }
    }

    fn take_line(&mut self) -> String {
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }
        let line = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        self.truncated = false;
        line
    }
}

fn push_capped(buf: &mut Vec<u8>, truncated: &mut bool, max: usize, chunk: &[u8]) {
    let room = max.saturating_sub(buf.len());
    if chunk.len() > room {
        buf.extend_from_slice(&chunk[..room]);
        if !*truncated {
            tracing::warn!("output line exceeded {max} bytes, truncating");
            *truncated = true;
        }
    } else {
        buf.extend_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(job_id: &str, script: &str) -> RunRequest {
        RunRequest {
            job_id: job_id.to_string(),
            executable: PathBuf::from("sh"),
            working_dir: std::env::temp_dir(),
            command: CommandSpec::allow_duplicates("-c").input(script),
            env: HashMap::new(),
        }
    }

    async fn collect(mut rx: mpsc::Receiver<OutputLine>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(item) = rx.recv().await {
            lines.push(item.line);
        }
        lines
    }

    #[tokio::test]
    async fn test_streams_lines_in_order() {
        let (tx, rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = cancellation();
        let runner = TokioProcessRunner::default();

        let result = runner
            .run(request("job-1", "echo a; echo b; echo c"), tx, cancel_rx)
            .await;
        assert!(result.is_ok());
        assert_eq!(collect(rx).await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_merges_stderr() {
        let (tx, rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = cancellation();
        let runner = TokioProcessRunner::default();

        let result = runner
            .run(request("job-2", "echo out; echo err >&2"), tx, cancel_rx)
            .await;
        assert!(result.is_ok());

        let mut lines = collect(rx).await;
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[tokio::test]
    async fn test_non_zero_exit_classified() {
        let (tx, _rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = cancellation();
        let runner = TokioProcessRunner::default();

        let err = runner
            .run(request("job-3", "exit 3"), tx, cancel_rx)
            .await
            .unwrap_err();
        match err {
            ProcessError::NonZeroExit(code) => assert_eq!(code, 3),
            other => panic!("expected NonZeroExit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_classified() {
        let (tx, _rx) = mpsc::channel(16);
        let (_cancel_tx, cancel_rx) = cancellation();
        let runner = TokioProcessRunner::default();

        let mut req = request("job-4", "true");
        req.executable = PathBuf::from("/nonexistent/binary/xyz");
        let err = runner.run(req, tx, cancel_rx).await.unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed { .. }));
    }

    #[tokio::test]
    async fn test_line_reader_caps_and_strips_crlf() {
        let input: &[u8] = b"short\r\naaaaaaaaaaaaaaaaaaaa\nlast";
        let mut reader = LineReader::new(input, 8);

        assert_eq!(reader.next_line().await.unwrap(), Some("short".to_string()));
        assert_eq!(reader.next_line().await.unwrap(), Some("aaaaaaaa".to_string()));
        assert_eq!(reader.next_line().await.unwrap(), Some("last".to_string()));
        assert_eq!(reader.next_line().await.unwrap(), None);
    }
}
