//! Accepts client connections on either a Unix socket or a TCP port and
//! services each with the one-frame-in, one-frame-out-then-close protocol.
//!
//! Both transports share the same connection handler because framing and
//! the envelope codec are identical on the wire; only the accept loop
//! differs.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

use parallite_protocol::{read_frame, write_frame, FramingError};

use crate::config::{DaemonConfig, Endpoint};
use crate::dispatcher::Dispatcher;
use crate::shutdown::ShutdownSignal;

pub enum BoundListener {
    #[cfg(unix)]
    Unix { listener: UnixListener, path: std::path::PathBuf },
    Tcp { listener: TcpListener },
}

impl BoundListener {
    /// Binds according to `cfg.endpoint`. For TCP, scans forward from the
    /// requested port up to `DEFAULT_PORT_SCAN_ATTEMPTS` times if it's
    /// already in use, since the supervisor may be racing a just-freed port
    /// from a prior instance.
    pub async fn bind(cfg: &DaemonConfig) -> std::io::Result<Self> {
        match &cfg.endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                Ok(BoundListener::Unix { listener, path: path.clone() })
            }
            #[cfg(not(unix))]
            Endpoint::Unix(_) => Err(std::io::Error::other("unix sockets are not supported on this platform")),
            Endpoint::Tcp { host, port } => {
                let mut last_err = None;
                for attempt in 0..DaemonConfig::DEFAULT_PORT_SCAN_ATTEMPTS {
                    let candidate = port.saturating_add(attempt);
                    match TcpListener::bind((host.as_str(), candidate)).await {
                        Ok(listener) => return Ok(BoundListener::Tcp { listener }),
                        Err(err) => last_err = Some(err),
                    }
                }
                Err(last_err.unwrap_or_else(|| std::io::Error::other("no TCP port available")))
            }
        }
    }

    /// Runs the accept loop until `shutdown` is triggered, spawning one
    /// task per connection. Returns only once every spawned connection task
    /// has finished writing its response, so a caller awaiting this future
    /// can safely tear down the runtime afterwards without truncating a
    /// response still in flight.
    pub async fn serve(self, dispatcher: Dispatcher, shutdown: ShutdownSignal) {
        let dispatcher = Arc::new(dispatcher);
        let mut connections = tokio::task::JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.triggered() => {
                    tracing::info!("listener shutting down, no longer accepting connections");
                    break;
                }
                accepted = self.accept() => {
                    match accepted {
                        Ok(conn) => {
                            let dispatcher = dispatcher.clone();
                            connections.spawn(async move { conn.serve(dispatcher).await });
                        }
                        Err(err) => tracing::warn!("accept failed: {err}"),
                    }
                }
                Some(_) = connections.join_next() => {}
            }
        }
        self.cleanup();
        while connections.join_next().await.is_some() {}
    }

    async fn accept(&self) -> std::io::Result<Connection> {
        match self {
            #[cfg(unix)]
            BoundListener::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::Unix(stream))
            }
            BoundListener::Tcp { listener } => {
                let (stream, _addr) = listener.accept().await?;
                Ok(Connection::Tcp(stream))
            }
        }
    }

    fn cleanup(&self) {
        #[cfg(unix)]
        if let BoundListener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

enum Connection {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Connection {
    async fn serve(self, dispatcher: Arc<Dispatcher>) {
        match self {
            #[cfg(unix)]
            Connection::Unix(stream) => serve_stream(stream, dispatcher).await,
            Connection::Tcp(stream) => serve_stream(stream, dispatcher).await,
        }
    }
}

/// Reads exactly one frame, dispatches it, writes exactly one response
/// frame, then closes — connections are not kept alive across requests.
async fn serve_stream<S>(mut stream: S, dispatcher: Arc<Dispatcher>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = match read_frame(&mut stream, dispatcher.max_payload_bytes()).await {
        Ok(frame) => frame,
        Err(FramingError::Eof) => return,
        Err(err) => {
            tracing::debug!("connection framing error: {err}");
            return;
        }
    };

    let response = dispatcher.dispatch(&frame).await;
    if let Err(err) = write_frame(&mut stream, &response).await {
        tracing::debug!("failed to write response frame: {err}");
    }
}
