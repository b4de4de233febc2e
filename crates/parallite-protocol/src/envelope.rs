//! The submission and response envelopes exchanged over both wire
//! protocols, built on top of the [`crate::codec::Value`] map format.

use crate::codec::{MapKey, Value};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("envelope is not a map")]
    NotAMap,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` has the wrong type")]
    WrongType(&'static str),
}

/// A client submission (or, verbatim, the request forwarded to a worker).
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub task_id: String,
    /// Opaque payload bytes; never interpreted by the daemon.
    pub payload: Vec<u8>,
    /// Opaque key-value context, forwarded unchanged to the worker.
    pub context: Value,
    pub enable_benchmark: Option<bool>,
}

impl Submission {
    pub fn to_value(&self) -> Value {
        let mut entries = vec![
            (MapKey::from("type"), Value::Str("submit".to_string())),
            (MapKey::from("task_id"), Value::Str(self.task_id.clone())),
            (MapKey::from("payload"), Value::Bytes(self.payload.clone())),
            (MapKey::from("context"), self.context.clone()),
        ];
        if let Some(b) = self.enable_benchmark {
            entries.push((MapKey::from("enable_benchmark"), Value::Bool(b)));
        }
        Value::Map(entries)
    }

    /// Parses a submission from a decoded envelope value.
    ///
    /// On error, also returns the `task_id` if it could be recovered from
    /// the partially-valid map, so the caller can send a best-effort error
    /// response per the wire protocol's recovery rule.
    pub fn from_value(value: &Value) -> Result<Submission, (EnvelopeError, Option<String>)> {
        let Some(map) = value.as_map() else {
            return Err((EnvelopeError::NotAMap, None));
        };

        let recovered_task_id = find_str(map, "task_id").map(str::to_string);

        let task_id = recovered_task_id
            .clone()
            .ok_or((EnvelopeError::MissingField("task_id"), None))?;

        let payload = match find(map, "payload") {
            Some(Value::Bytes(b)) => b.clone(),
            Some(Value::Str(s)) => s.clone().into_bytes(),
            Some(_) => {
                return Err((EnvelopeError::WrongType("payload"), Some(task_id)));
            }
            None => return Err((EnvelopeError::MissingField("payload"), Some(task_id))),
        };

        let context = find(map, "context").cloned().unwrap_or(Value::Map(vec![]));

        let enable_benchmark = match find(map, "enable_benchmark") {
            Some(Value::Bool(b)) => Some(*b),
            Some(_) => return Err((EnvelopeError::WrongType("enable_benchmark"), Some(task_id))),
            None => None,
        };

        Ok(Submission {
            task_id,
            payload,
            context,
            enable_benchmark,
        })
    }
}

/// A daemon response (or, verbatim, the response read from a worker).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub ok: bool,
    pub task_id: String,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub benchmark: Option<Value>,
    /// Unknown top-level keys, preserved in order and forwarded verbatim.
    pub extra: Vec<(MapKey, Value)>,
}

impl Response {
    pub fn success(task_id: impl Into<String>, result: Value) -> Self {
        Response {
            ok: true,
            task_id: task_id.into(),
            result: Some(result),
            error: None,
            benchmark: None,
            extra: Vec::new(),
        }
    }

    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Response {
            ok: false,
            task_id: task_id.into(),
            result: None,
            error: Some(error.into()),
            benchmark: None,
            extra: Vec::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut entries = vec![
            (MapKey::from("ok"), Value::Bool(self.ok)),
            (MapKey::from("task_id"), Value::Str(self.task_id.clone())),
        ];
        if let Some(result) = &self.result {
            entries.push((MapKey::from("result"), result.clone()));
        }
        if let Some(error) = &self.error {
            entries.push((MapKey::from("error"), Value::Str(error.clone())));
        }
        if let Some(benchmark) = &self.benchmark {
            entries.push((MapKey::from("benchmark"), benchmark.clone()));
        }
        entries.extend(self.extra.iter().cloned());
        Value::Map(entries)
    }

    pub fn from_value(value: &Value) -> Result<Response, EnvelopeError> {
        let map = value.as_map().ok_or(EnvelopeError::NotAMap)?;

        let ok = match find(map, "ok") {
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(EnvelopeError::WrongType("ok")),
            None => return Err(EnvelopeError::MissingField("ok")),
        };
        let task_id = find_str(map, "task_id")
            .map(str::to_string)
            .ok_or(EnvelopeError::MissingField("task_id"))?;
        let result = find(map, "result").cloned();
        let error = match find(map, "error") {
            Some(Value::Str(s)) => Some(s.clone()),
            Some(_) => return Err(EnvelopeError::WrongType("error")),
            None => None,
        };
        let benchmark = find(map, "benchmark").cloned();

        let known = ["ok", "task_id", "result", "error", "benchmark"];
        let extra = map
            .iter()
            .filter(|(k, _)| !matches!(k, MapKey::Str(s) if known.contains(&s.as_str())))
            .cloned()
            .collect();

        Ok(Response {
            ok,
            task_id,
            result,
            error,
            benchmark,
            extra,
        })
    }
}

fn find<'a>(map: &'a [(MapKey, Value)], key: &str) -> Option<&'a Value> {
    map.iter().find_map(|(k, v)| match k {
        MapKey::Str(s) if s == key => Some(v),
        _ => None,
    })
}

fn find_str<'a>(map: &'a [(MapKey, Value)], key: &str) -> Option<&'a str> {
    find(map, key).and_then(Value::as_str)
}
