//! A single executor worker: the process, its stdio, and the one
//! `execute` operation a leased caller may perform on it.

use std::process::Stdio;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::task::JoinHandle;
use tracing::Instrument;

use parallite_protocol::{read_frame, write_frame};

use crate::config::DaemonConfig;
use crate::error::TaskError;

/// Monotonic identifier assigned to each spawned worker process, so a
/// recycled slot never reuses a prior worker's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker#{}", self.0)
    }
}

/// A live executor process, exclusively owned by whichever caller leased
/// it from the pool. Never reused once `execute` fails.
pub struct WorkerProcess {
    pub id: WorkerId,
    pub pid: u32,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr_task: JoinHandle<()>,
}

impl WorkerProcess {
    /// Spawns a fresh executor process for `id`.
    pub fn spawn(cfg: &DaemonConfig, id: WorkerId) -> std::io::Result<Self> {
        let mut command = tokio::process::Command::new(&cfg.worker_cmd);
        command
            .args(&cfg.worker_args)
            .env("PARALLITE_WORKER_NAME", format!("{}-{}", cfg.prefix_name, id.0))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(config_path) = &cfg.config_path {
            command.env("CONFIG_PATH", config_path);
        }

        let mut child = command.spawn()?;
        let pid = child.id().ok_or_else(|| {
            std::io::Error::other("spawned worker process has no pid (already exited)")
        })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        let stderr = child.stderr.take().expect("piped stderr");

        let stderr_task = tokio::spawn(
            drain_stderr(stderr).instrument(tracing::info_span!("worker_stderr", worker = %id)),
        );

        Ok(WorkerProcess {
            id,
            pid,
            child,
            stdin,
            stdout,
            stderr_task,
        })
    }

    /// Writes one request frame, reads exactly one response frame. Any
    /// failure here means the worker must never be reused.
    pub async fn execute(
        &mut self,
        request: &[u8],
        max_payload_bytes: u32,
    ) -> Result<Vec<u8>, TaskError> {
        write_frame(&mut self.stdin, request)
            .await
            .map_err(|err| TaskError::WorkerIo(err.to_string()))?;

        match read_frame(&mut self.stdout, max_payload_bytes).await {
            Ok(frame) => Ok(frame),
            Err(parallite_protocol::FramingError::Eof) => {
                Err(TaskError::WorkerCrash("worker closed its stdout".to_string()))
            }
            Err(err) => Err(TaskError::WorkerIo(err.to_string())),
        }
    }

    /// Whether the underlying process has exited on its own, without a
    /// blocking wait (polled opportunistically by the pool's reaper).
    pub fn try_wait_exited(&mut self) -> std::io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }

    /// Asks the worker to exit (closing stdin), escalating to SIGTERM and
    /// then SIGKILL if it doesn't, per the shutdown grace periods.
    pub async fn terminate(mut self, term_grace: std::time::Duration, kill_grace: std::time::Duration) {
        drop(self.stdin);

        if tokio::time::timeout(term_grace, self.child.wait()).await.is_ok() {
            self.stderr_task.abort();
            return;
        }

        signal_terminate(self.pid);
        if tokio::time::timeout(kill_grace, self.child.wait()).await.is_ok() {
            self.stderr_task.abort();
            return;
        }

        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.stderr_task.abort();
    }
}

#[cfg(unix)]
fn signal_terminate(pid: u32) {
    // SAFETY: sending SIGTERM to a pid we own (our own child) is always
    // sound; a failed kill (e.g. already exited) is reported via errno and
    // ignored here, matching the best-effort escalation in §4.3.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn signal_terminate(_pid: u32) {}

async fn drain_stderr(stderr: tokio::process::ChildStderr) {
    use tokio::io::AsyncBufReadExt;
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::warn!(target: "worker_stderr", "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!("stderr read error: {err}");
                break;
            }
        }
    }
}
