//! Daemon-wide configuration, independent of how it's parsed (the CLI
//! binary builds one of these from `clap`; tests build one directly).

use std::path::PathBuf;
use std::time::Duration;

/// Where the daemon listens for client connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A Unix domain socket path. Conventionally ends in `.sock`.
    Unix(PathBuf),
    /// A TCP loopback `host:port`.
    Tcp { host: String, port: u16 },
}

/// What a worker failure does to the rest of the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailMode {
    /// A worker failure affects only its current task.
    #[default]
    Continue,
    /// The supervisor initiates shutdown after the first worker failure.
    Stop,
}

impl std::str::FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "continue" => Ok(FailMode::Continue),
            "stop" => Ok(FailMode::Stop),
            other => Err(format!("invalid fail-mode: {other:?} (expected continue|stop)")),
        }
    }
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Opaque to the daemon core; forwarded to workers as `CONFIG_PATH`.
    pub config_path: Option<PathBuf>,
    pub endpoint: Endpoint,
    pub timeout_ms: u64,
    /// `0` means auto-size to `max(1, cpu_count)`.
    pub fixed_workers: usize,
    pub prefix_name: String,
    pub fail_mode: FailMode,
    pub max_payload_bytes: u32,
    /// The executor program to spawn for each worker.
    pub worker_cmd: PathBuf,
    pub worker_args: Vec<String>,
}

impl DaemonConfig {
    pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
    pub const DEFAULT_MAX_PAYLOAD_BYTES: u32 = 10_485_760;
    pub const DEFAULT_PREFIX_NAME: &'static str = "parallite_worker";
    pub const DEFAULT_PORT_SCAN_ATTEMPTS: u16 = 128;
    pub const WORKER_TERM_GRACE: Duration = Duration::from_secs(2);
    pub const WORKER_KILL_GRACE: Duration = Duration::from_secs(2);

    /// Resolves the effective pool capacity from `fixed_workers`.
    pub fn capacity(&self) -> usize {
        if self.fixed_workers > 0 {
            self.fixed_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .max(1)
        }
    }
}
