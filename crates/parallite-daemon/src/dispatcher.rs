//! Turns one inbound request frame into one outbound response frame:
//! decode, register, lease a worker, execute, and resolve whichever of
//! {response, deadline, shutdown} comes first.

use std::sync::Arc;

use parallite_protocol::codec::{decode, encode};
use parallite_protocol::envelope::{EnvelopeError, Response, Submission};
use parallite_protocol::Value;

use crate::config::{DaemonConfig, FailMode};
use crate::error::TaskError;
use crate::pool::{LeaseError, WorkerPool};
use crate::registry::TaskRegistry;
use crate::shutdown::ShutdownSignal;

#[derive(Clone)]
pub struct Dispatcher {
    cfg: Arc<DaemonConfig>,
    pool: WorkerPool,
    registry: Arc<TaskRegistry>,
    shutdown: ShutdownSignal,
}

impl Dispatcher {
    pub fn new(
        cfg: Arc<DaemonConfig>,
        pool: WorkerPool,
        registry: Arc<TaskRegistry>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Dispatcher {
            cfg,
            pool,
            registry,
            shutdown,
        }
    }

    /// Decodes `frame`, runs it to completion, and always returns a frame
    /// worth writing back — callers never see a decode or worker error
    /// directly, only the response envelope it was turned into.
    pub async fn dispatch(&self, frame: &[u8]) -> Vec<u8> {
        let value = match decode(frame) {
            Ok(value) => value,
            Err(err) => {
                return encode(&Response::failure("unknown", TaskError::from(err).as_response_message()).to_value());
            }
        };

        let submission = match Submission::from_value(&value) {
            Ok(submission) => submission,
            Err((err, task_id)) => {
                let id = task_id.unwrap_or_else(|| "unknown".to_string());
                return encode(&Response::failure(id, envelope_message(err)).to_value());
            }
        };

        let task_id = submission.task_id.clone();
        let guard = match self.registry.register(task_id.clone(), self.cfg.timeout_ms).await {
            Ok(guard) => guard,
            Err(err) => return encode(&Response::failure(task_id.clone(), err.as_response_message()).to_value()),
        };

        match self.run(&submission, guard.deadline).await {
            Ok(bytes) => bytes,
            Err(err) => encode(&Response::failure(task_id, err.as_response_message()).to_value()),
        }
    }

    pub fn max_payload_bytes(&self) -> u32 {
        self.cfg.max_payload_bytes
    }

    async fn run(&self, submission: &Submission, deadline: tokio::time::Instant) -> Result<Vec<u8>, TaskError> {
        let mut worker = match self.pool.lease(&self.shutdown).await {
            Ok(worker) => worker,
            Err(LeaseError::Cancelled) => return Err(TaskError::Shutdown),
            Err(LeaseError::SpawnFailed(err)) => {
                let err = TaskError::WorkerIo(err.to_string());
                if matches!(self.cfg.fail_mode, FailMode::Stop) {
                    tracing::error!("worker spawn failure under fail-mode=stop, initiating shutdown");
                    self.shutdown.trigger();
                }
                return Err(err);
            }
        };
        let request = encode(&submission.to_value());

        // Once a worker is leased, only the deadline races the response — a
        // shutdown in progress must let an already-dispatched task finish
        // within the drain window rather than cut it off (see DESIGN.md's
        // Open Question decision on fail_mode=stop).
        let outcome = tokio::select! {
            result = worker.execute(&request, self.cfg.max_payload_bytes) => {
                match result {
                    Ok(bytes) => match validate_worker_response(&bytes) {
                        Ok(()) => {
                            self.pool.release(worker).await;
                            return Ok(bytes);
                        }
                        Err(msg) => Err(TaskError::WorkerCrash(msg)),
                    },
                    Err(err) => Err(err),
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                Err(TaskError::Timeout { timeout_ms: self.cfg.timeout_ms })
            }
        };

        self.pool.recycle(worker).await;
        if matches!(self.cfg.fail_mode, FailMode::Stop) && matches!(outcome, Err(TaskError::WorkerIo(_)) | Err(TaskError::WorkerCrash(_))) {
            tracing::error!("worker failure under fail-mode=stop, initiating shutdown");
            self.shutdown.trigger();
        }
        outcome
    }
}

fn envelope_message(err: EnvelopeError) -> String {
    TaskError::from(err).as_response_message()
}

/// Confirms a worker's reply is a well-formed response envelope (§6.4): a
/// worker that emits a well-framed but undecodable or non-envelope payload
/// is treated as a failed worker rather than relayed to the client
/// verbatim.
fn validate_worker_response(bytes: &[u8]) -> Result<(), String> {
    let value = decode(bytes).map_err(|err| format!("malformed response: {err}"))?;
    Response::from_value(&value).map_err(|err| format!("malformed response: {err}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use parallite_protocol::codec::MapKey;
    use std::path::PathBuf;

    fn test_cfg() -> Arc<DaemonConfig> {
        Arc::new(DaemonConfig {
            config_path: None,
            endpoint: Endpoint::Unix(PathBuf::from("/tmp/parallite-dispatch-test.sock")),
            timeout_ms: 2_000,
            fixed_workers: 1,
            prefix_name: DaemonConfig::DEFAULT_PREFIX_NAME.to_string(),
            fail_mode: FailMode::Continue,
            max_payload_bytes: DaemonConfig::DEFAULT_MAX_PAYLOAD_BYTES,
            worker_cmd: PathBuf::from("/bin/cat"),
            worker_args: Vec::new(),
        })
    }

    fn dispatcher(cfg: Arc<DaemonConfig>) -> Dispatcher {
        let pool = WorkerPool::new(cfg.clone());
        let shutdown = ShutdownSignal::new();
        let registry = TaskRegistry::new(shutdown.clone());
        Dispatcher::new(cfg, pool, registry, shutdown)
    }

    #[tokio::test]
    async fn malformed_frame_yields_unknown_task_failure_response() {
        let dispatcher = dispatcher(test_cfg());
        let response_bytes = dispatcher.dispatch(b"not a valid frame at all").await;
        let value = decode(&response_bytes).unwrap();
        let response = Response::from_value(&value).unwrap();
        assert!(!response.ok);
        assert_eq!(response.task_id, "unknown");
    }

    #[tokio::test]
    async fn missing_task_id_yields_unknown_task_failure_response() {
        let dispatcher = dispatcher(test_cfg());
        let submission_bytes = encode(&Value::Map(vec![(MapKey::from("payload"), Value::Bytes(vec![1]))]));
        let response_bytes = dispatcher.dispatch(&submission_bytes).await;
        let value = decode(&response_bytes).unwrap();
        let response = Response::from_value(&value).unwrap();
        assert!(!response.ok);
        assert_eq!(response.task_id, "unknown");
    }

    #[tokio::test]
    async fn spawn_failure_with_no_live_worker_yields_failure_response_instead_of_hanging() {
        let mut cfg = (*test_cfg()).clone();
        cfg.worker_cmd = PathBuf::from("/nonexistent/parallite-worker-does-not-exist");
        let dispatcher = dispatcher(Arc::new(cfg));

        let submission = Submission {
            task_id: "T1".to_string(),
            payload: b"hi".to_vec(),
            context: Value::Map(vec![]),
            enable_benchmark: None,
        };
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            dispatcher.dispatch(&encode(&submission.to_value())),
        )
        .await;
        let response_bytes = result.expect("dispatch resolved instead of hanging");
        let value = decode(&response_bytes).unwrap();
        let response = Response::from_value(&value).unwrap();
        assert!(!response.ok);
        assert_eq!(response.task_id, "T1");
    }

    #[test]
    fn validate_worker_response_rejects_undecodable_bytes() {
        let err = validate_worker_response(&[0xff]).unwrap_err();
        assert!(err.contains("malformed response"));
    }

    #[test]
    fn validate_worker_response_rejects_non_envelope_values() {
        let bytes = encode(&Value::Int(7));
        let err = validate_worker_response(&bytes).unwrap_err();
        assert!(err.contains("malformed response"));
    }

    #[test]
    fn validate_worker_response_accepts_a_well_formed_envelope() {
        let bytes = encode(&Response::success("T1", Value::Bytes(vec![1])).to_value());
        assert!(validate_worker_response(&bytes).is_ok());
    }

    #[tokio::test]
    async fn shutdown_before_lease_yields_shutdown_failure() {
        let cfg = test_cfg();
        let dispatcher = dispatcher(cfg);
        dispatcher.shutdown.trigger();

        let submission = Submission {
            task_id: "T1".to_string(),
            payload: b"hi".to_vec(),
            context: Value::Map(vec![]),
            enable_benchmark: None,
        };
        let response_bytes = dispatcher.dispatch(&encode(&submission.to_value())).await;
        let value = decode(&response_bytes).unwrap();
        let response = Response::from_value(&value).unwrap();
        assert!(!response.ok);
        assert_eq!(response.task_id, "T1");
    }
}
