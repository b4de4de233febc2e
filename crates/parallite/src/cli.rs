use std::path::PathBuf;

use clap::Parser;

use parallite_daemon::config::{DaemonConfig, Endpoint, FailMode};

fn parse_fail_mode(s: &str) -> Result<FailMode, String> {
    s.parse()
}

fn parse_endpoint(s: &str) -> Result<Endpoint, String> {
    if s.ends_with(".sock") {
        return Ok(Endpoint::Unix(PathBuf::from(s)));
    }
    let (host, port) = s
        .rsplit_once(':')
        .ok_or_else(|| format!("--socket must be a `.sock` path or `host:port`, got {s:?}"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port in --socket={s:?}"))?;
    Ok(Endpoint::Tcp { host: host.to_string(), port })
}

#[derive(Debug, Clone, Parser)]
#[command(name = "parallite", version, about = "parallite executor-pool daemon")]
pub struct Cli {
    /// Opaque config path, forwarded to workers as CONFIG_PATH.
    #[arg(long, env = "PARALLITE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Unix socket path (must end in `.sock`) or `host:port` for TCP.
    #[arg(long, env = "PARALLITE_SOCKET", value_parser = parse_endpoint)]
    pub socket: Endpoint,

    /// Per-task deadline in milliseconds.
    #[arg(long = "timeout-ms", env = "PARALLITE_TIMEOUT_MS", default_value_t = DaemonConfig::DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// Fixed pool size; 0 selects max(1, cpu_count).
    #[arg(long = "fixed-workers", env = "PARALLITE_FIXED_WORKERS", default_value_t = 0)]
    pub fixed_workers: usize,

    /// Prefix applied to spawned worker process names where the OS allows.
    #[arg(long = "prefix-name", env = "PARALLITE_PREFIX_NAME", default_value = DaemonConfig::DEFAULT_PREFIX_NAME)]
    pub prefix_name: String,

    /// What a worker failure does to the rest of the daemon.
    #[arg(long = "fail-mode", env = "PARALLITE_FAIL_MODE", default_value = "continue", value_parser = parse_fail_mode)]
    pub fail_mode: FailMode,

    /// Frame size ceiling in bytes.
    #[arg(long = "max-payload-bytes", env = "PARALLITE_MAX_PAYLOAD_BYTES", default_value_t = DaemonConfig::DEFAULT_MAX_PAYLOAD_BYTES)]
    pub max_payload_bytes: u32,

    /// Executor program to spawn for each worker.
    #[arg(long = "worker-cmd", env = "PARALLITE_WORKER_CMD")]
    pub worker_cmd: PathBuf,

    /// Arguments passed to each spawned worker program.
    #[arg(long = "worker-arg", env = "PARALLITE_WORKER_ARGS", value_delimiter = ' ')]
    pub worker_args: Vec<String>,
}

impl Cli {
    pub fn into_config(self) -> DaemonConfig {
        DaemonConfig {
            config_path: self.config,
            endpoint: self.socket,
            timeout_ms: self.timeout_ms,
            fixed_workers: self.fixed_workers,
            prefix_name: self.prefix_name,
            fail_mode: self.fail_mode,
            max_payload_bytes: self.max_payload_bytes,
            worker_cmd: self.worker_cmd,
            worker_args: self.worker_args,
        }
    }
}
