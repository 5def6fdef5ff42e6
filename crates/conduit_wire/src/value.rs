use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::WireError;

const TAG_UNDEFINED: u8 = 0;
const TAG_STRING: u8 = 1;
const TAG_NATIVE_BUFFER: u8 = 2;
const TAG_BUFFER: u8 = 3;
const TAG_ARRAY: u8 = 4;
const TAG_JSON: u8 = 5;

/// One wire value: a byte tag followed by tag-specific content.
///
/// Strings, raw buffers and arrays have first-class tags; everything else
/// (numbers, booleans, records, nested structures) rides in the [`Json`]
/// case as UTF-8 JSON text. All lengths are big-endian `u32`.
///
/// Two buffer tags exist on the wire for historical reasons; Rust has a
/// single owned byte type, so both decode to [`Buffer`] and encoding always
/// writes the internal-buffer tag.
///
/// [`Json`]: Payload::Json
/// [`Buffer`]: Payload::Buffer
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Undefined,
    String(String),
    Buffer(Vec<u8>),
    Array(Vec<Payload>),
    Json(Value),
}

impl Payload {
    /// Encode a serde value using the codec's native tags where they exist:
    /// strings and arrays get their own tag, `null` maps to `Undefined`,
    /// everything else is carried as JSON.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, WireError> {
        Ok(Self::from_json(serde_json::to_value(value)?))
    }

    /// See [`Payload::json`].
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Null => Payload::Undefined,
            Value::String(s) => Payload::String(s),
            Value::Array(items) => Payload::Array(items.into_iter().map(Self::from_json).collect()),
            other => Payload::Json(other),
        }
    }

    /// Lower the value into plain JSON. Buffers become arrays of numbers,
    /// `Undefined` becomes `null`.
    pub fn into_json(self) -> Value {
        match self {
            Payload::Undefined => Value::Null,
            Payload::String(s) => Value::String(s),
            Payload::Buffer(bytes) => Value::Array(bytes.into_iter().map(Value::from).collect()),
            Payload::Array(items) => Value::Array(items.into_iter().map(Self::into_json).collect()),
            Payload::Json(value) => value,
        }
    }

    /// Deserialize the value into a serde type via its JSON form.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, WireError> {
        Ok(serde_json::from_value(self.clone().into_json())?)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        match self {
            Payload::Undefined => out.push(TAG_UNDEFINED),
            Payload::String(s) => {
                out.push(TAG_STRING);
                write_len(out, s.len());
                out.extend_from_slice(s.as_bytes());
            }
            Payload::Buffer(bytes) => {
                out.push(TAG_BUFFER);
                write_len(out, bytes.len());
                out.extend_from_slice(bytes);
            }
            Payload::Array(items) => {
                out.push(TAG_ARRAY);
                write_len(out, items.len());
                for item in items {
                    item.write(out);
                }
            }
            Payload::Json(value) => {
                let text = value.to_string();
                out.push(TAG_JSON);
                write_len(out, text.len());
                out.extend_from_slice(text.as_bytes());
            }
        }
    }

    /// Decode a buffer holding exactly one value.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let mut reader = Reader::new(bytes);
        let value = Self::read(&mut reader)?;
        if !reader.is_empty() {
            return Err(WireError::TrailingBytes);
        }
        Ok(value)
    }

    /// Read one value, leaving the remainder in the reader.
    pub fn read(reader: &mut Reader<'_>) -> Result<Self, WireError> {
        match reader.u8()? {
            TAG_UNDEFINED => Ok(Payload::Undefined),
            TAG_STRING => {
                let len = reader.u32_be()? as usize;
                Ok(Payload::String(String::from_utf8(reader.take(len)?.to_vec())?))
            }
            TAG_NATIVE_BUFFER | TAG_BUFFER => {
                let len = reader.u32_be()? as usize;
                Ok(Payload::Buffer(reader.take(len)?.to_vec()))
            }
            TAG_ARRAY => {
                let count = reader.u32_be()? as usize;
                let mut items = Vec::with_capacity(count.min(4096));
                for _ in 0..count {
                    items.push(Self::read(reader)?);
                }
                Ok(Payload::Array(items))
            }
            TAG_JSON => {
                let len = reader.u32_be()? as usize;
                Ok(Payload::Json(serde_json::from_slice(reader.take(len)?)?))
            }
            tag => Err(WireError::UnknownTag(tag)),
        }
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_be_bytes());
}

/// Forward-only cursor over a frame's bytes.
pub struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.buf.len() < n {
            return Err(WireError::UnexpectedEof);
        }
        let (head, rest) = self.buf.split_at(n);
        self.buf = rest;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u32_be(&mut self) -> Result<u32, WireError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
