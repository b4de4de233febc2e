//! Wire protocol shared by the client-facing and worker-facing sides of the
//! daemon: length-prefixed framing, a compact opaque value codec, and the
//! submission/response envelope types built on top of them.

pub mod codec;
pub mod envelope;
pub mod framing;

pub use codec::{DecodeError, MapKey, Value};
pub use envelope::{Response, Submission};
pub use framing::{read_frame, write_frame, FramingError};
