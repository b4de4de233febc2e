//! Compact binary value codec for payloads carried inside a frame.
//!
//! The daemon passes submission `payload`/`context` and response
//! `result`/`benchmark` values through untouched, so this format has to
//! round-trip arbitrary nested values without the daemon ever needing a
//! schema for them.
//!
//! Wire shape (all multi-byte integers big-endian):
//!
//! ```text
//! Null    := 0x00
//! False   := 0x01
//! True    := 0x02
//! Int     := 0x03 i64
//! Float   := 0x04 u64            (IEEE-754 bits; see `Value::Float` docs)
//! Str     := 0x05 u32(len) bytes (utf-8)
//! Bytes   := 0x06 u32(len) bytes
//! Array   := 0x07 u32(count) Value*
//! Map     := 0x08 u32(count) (MapKey Value)*
//! MapKey  := 0x00 u32(len) bytes (utf-8)  |  0x01 i64
//! ```

use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of payload")]
    Eof,
    #[error("unknown value tag {0:#x}")]
    UnknownTag(u8),
    #[error("unknown map key tag {0:#x}")]
    UnknownKeyTag(u8),
    #[error("string is not valid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error("trailing bytes after a complete value")]
    TrailingBytes,
}

/// A key in a [`Value::Map`]: either a UTF-8 string or a signed integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Str(String),
    Int(i64),
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapKey::Str(s) => write!(f, "{s}"),
            MapKey::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for MapKey {
    fn from(s: &str) -> Self {
        MapKey::Str(s.to_string())
    }
}

impl From<String> for MapKey {
    fn from(s: String) -> Self {
        MapKey::Str(s)
    }
}

impl From<i64> for MapKey {
    fn from(i: i64) -> Self {
        MapKey::Int(i)
    }
}

/// An opaque value. `Map` preserves insertion order so an unknown key
/// round-trips byte-identically even though the daemon never reads it.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    /// NaN and infinities are the worker's own policy to avoid: the codec
    /// encodes whatever bits it's given, but callers that want the
    /// "NaN/Inf as null" convention described in the wire protocol should
    /// map those to `Value::Null` before encoding.
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<Value>),
    Map(Vec<(MapKey, Value)>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(MapKey, Value)]> {
        match self {
            Value::Map(entries) => Some(entries.as_slice()),
            _ => None,
        }
    }

    /// Looks up a string-keyed entry in a `Map`, returning `None` for any
    /// other variant or a missing key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find_map(|(k, v)| match k {
            MapKey::Str(s) if s == key => Some(v),
            _ => None,
        })
    }
}

const TAG_NULL: u8 = 0x00;
const TAG_FALSE: u8 = 0x01;
const TAG_TRUE: u8 = 0x02;
const TAG_INT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_STR: u8 = 0x05;
const TAG_BYTES: u8 = 0x06;
const TAG_ARRAY: u8 = 0x07;
const TAG_MAP: u8 = 0x08;

const KEY_TAG_STR: u8 = 0x00;
const KEY_TAG_INT: u8 = 0x01;

/// Encodes a value into a fresh buffer.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(false) => buf.push(TAG_FALSE),
        Value::Bool(true) => buf.push(TAG_TRUE),
        Value::Int(n) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&n.to_be_bytes());
        }
        Value::Float(f) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Str(s) => {
            buf.push(TAG_STR);
            buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            buf.extend_from_slice(&(b.len() as u32).to_be_bytes());
            buf.extend_from_slice(b);
        }
        Value::Array(items) => {
            buf.push(TAG_ARRAY);
            buf.extend_from_slice(&(items.len() as u32).to_be_bytes());
            for item in items {
                encode_into(item, buf);
            }
        }
        Value::Map(entries) => {
            buf.push(TAG_MAP);
            buf.extend_from_slice(&(entries.len() as u32).to_be_bytes());
            for (key, val) in entries {
                match key {
                    MapKey::Str(s) => {
                        buf.push(KEY_TAG_STR);
                        buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
                        buf.extend_from_slice(s.as_bytes());
                    }
                    MapKey::Int(i) => {
                        buf.push(KEY_TAG_INT);
                        buf.extend_from_slice(&i.to_be_bytes());
                    }
                }
                encode_into(val, buf);
            }
        }
    }
}

/// Decodes exactly one value from `input`, requiring the whole slice to be
/// consumed (no trailing bytes).
pub fn decode(input: &[u8]) -> Result<Value, DecodeError> {
    let mut cursor = Cursor { buf: input, pos: 0 };
    let value = decode_value(&mut cursor)?;
    if cursor.pos != cursor.buf.len() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Eof)?;
        let slice = self.buf.get(self.pos..end).ok_or(DecodeError::Eof)?;
        self.pos = end;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn take_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes: [u8; 4] = self.take(4)?.try_into().expect("take(4) returns 4 bytes");
        Ok(u32::from_be_bytes(bytes))
    }

    fn take_i64(&mut self) -> Result<i64, DecodeError> {
        let bytes: [u8; 8] = self.take(8)?.try_into().expect("take(8) returns 8 bytes");
        Ok(i64::from_be_bytes(bytes))
    }
}

fn decode_value(cursor: &mut Cursor<'_>) -> Result<Value, DecodeError> {
    let tag = cursor.take_u8()?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_INT => Ok(Value::Int(cursor.take_i64()?)),
        TAG_FLOAT => {
            let bytes: [u8; 8] = cursor.take(8)?.try_into().expect("take(8) returns 8 bytes");
            Ok(Value::Float(f64::from_bits(u64::from_be_bytes(bytes))))
        }
        TAG_STR => {
            let len = cursor.take_u32()? as usize;
            let bytes = cursor.take(len)?.to_vec();
            Ok(Value::Str(String::from_utf8(bytes)?))
        }
        TAG_BYTES => {
            let len = cursor.take_u32()? as usize;
            Ok(Value::Bytes(cursor.take(len)?.to_vec()))
        }
        TAG_ARRAY => {
            let count = cursor.take_u32()?;
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(decode_value(cursor)?);
            }
            Ok(Value::Array(items))
        }
        TAG_MAP => {
            let count = cursor.take_u32()?;
            let mut entries = Vec::with_capacity(count as usize);
            for _ in 0..count {
                let key_tag = cursor.take_u8()?;
                let key = match key_tag {
                    KEY_TAG_STR => {
                        let len = cursor.take_u32()? as usize;
                        let bytes = cursor.take(len)?.to_vec();
                        MapKey::Str(String::from_utf8(bytes)?)
                    }
                    KEY_TAG_INT => MapKey::Int(cursor.take_i64()?),
                    other => return Err(DecodeError::UnknownKeyTag(other)),
                };
                let val = decode_value(cursor)?;
                entries.push((key, val));
            }
            Ok(Value::Map(entries))
        }
        other => Err(DecodeError::UnknownTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars() {
        for v in [
            Value::Null,
            Value::Bool(true),
            Value::Bool(false),
            Value::Int(-42),
            Value::Float(3.5),
            Value::Str("hi".into()),
            Value::Bytes(vec![1, 2, 3]),
        ] {
            assert_eq!(decode(&encode(&v)).unwrap(), v);
        }
    }

    #[test]
    fn round_trips_nested_map_preserving_order() {
        let v = Value::Map(vec![
            (MapKey::from("z"), Value::Int(1)),
            (MapKey::from("a"), Value::Int(2)),
            (MapKey::from(7i64), Value::Array(vec![Value::Str("x".into())])),
        ]);
        let encoded = encode(&v);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded, v);
        assert_eq!(encode(&decoded), encoded);
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut encoded = encode(&Value::Int(1));
        encoded.push(0xff);
        assert!(matches!(decode(&encoded), Err(DecodeError::TrailingBytes)));
    }

    #[test]
    fn rejects_truncated_input() {
        let encoded = encode(&Value::Str("hello".into()));
        let err = decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, DecodeError::Eof));
    }

    #[test]
    fn get_looks_up_string_keys_only() {
        let v = Value::Map(vec![
            (MapKey::from("name"), Value::Str("t1".into())),
            (MapKey::from(1i64), Value::Bool(true)),
        ]);
        assert_eq!(v.get("name").and_then(Value::as_str), Some("t1"));
        assert!(v.get("missing").is_none());
    }
}
