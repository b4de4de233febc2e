//! A minimal stand-in executor used only by the integration tests: it
//! speaks the daemon<->worker wire protocol and behaves according to the
//! submission's `context`, since the real executor payload is out of scope
//! here.
//!
//! Recognized `context` keys:
//! - `mode: "echo"` (default) — responds with `result = payload`.
//! - `mode: "sleep"`, `sleep_ms: <int>` — sleeps, then echoes.
//! - `mode: "crash"` — exits the process without responding.
//! - `mode: "benchmark"` — responds with a `benchmark` map attached.
//! - `mode: "garbage"` — responds with a well-framed payload that is not a
//!   valid response envelope, to exercise the daemon's "malformed worker
//!   response is a worker failure" handling.

use tokio::io::{stdin, stdout};

use parallite_protocol::codec::{MapKey, Value};
use parallite_protocol::envelope::{Response, Submission};
use parallite_protocol::{read_frame, write_frame, FramingError};

const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;

#[tokio::main]
async fn main() {
    let mut input = stdin();
    let mut output = stdout();

    loop {
        let frame = match read_frame(&mut input, MAX_FRAME_BYTES).await {
            Ok(frame) => frame,
            Err(FramingError::Eof) => break,
            Err(_) => break,
        };

        let value = match parallite_protocol::codec::decode(&frame) {
            Ok(value) => value,
            Err(_) => continue,
        };
        let submission = match Submission::from_value(&value) {
            Ok(submission) => submission,
            Err(_) => continue,
        };

        let mode = submission.context.get("mode").and_then(Value::as_str).unwrap_or("echo");

        if mode == "crash" {
            std::process::exit(1);
        }

        if mode == "garbage" {
            let encoded = parallite_protocol::codec::encode(&Value::Int(0));
            if write_frame(&mut output, &encoded).await.is_err() {
                break;
            }
            continue;
        }

        if mode == "sleep" {
            let sleep_ms = submission
                .context
                .get("sleep_ms")
                .and_then(|v| if let Value::Int(n) = v { Some(*n) } else { None })
                .unwrap_or(0);
            tokio::time::sleep(std::time::Duration::from_millis(sleep_ms.max(0) as u64)).await;
        }

        let mut response = Response::success(submission.task_id.clone(), Value::Bytes(submission.payload.clone()));

        if mode == "benchmark" {
            response.benchmark = Some(Value::Map(vec![(MapKey::from("iters"), Value::Int(1))]));
        }

        let encoded = parallite_protocol::codec::encode(&response.to_value());
        if write_frame(&mut output, &encoded).await.is_err() {
            break;
        }
    }
}
