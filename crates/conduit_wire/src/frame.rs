use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::value::Reader;
use crate::{Payload, WireError};

/// Correlates a request with its response(s). Allocated monotonically per
/// client; never recycled within a connection.
pub type RequestId = u32;

pub const REQUEST_PROMISE: u8 = 100;
pub const REQUEST_PROMISE_CANCEL: u8 = 101;
pub const REQUEST_EVENT_LISTEN: u8 = 102;
pub const REQUEST_EVENT_DISPOSE: u8 = 103;

pub const RESPONSE_INITIALIZE: u8 = 200;
pub const RESPONSE_PROMISE_SUCCESS: u8 = 201;
pub const RESPONSE_PROMISE_ERROR: u8 = 202;
pub const RESPONSE_PROMISE_ERROR_OBJ: u8 = 203;
pub const RESPONSE_EVENT_FIRE: u8 = 204;

/// Client-to-server message.
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    Promise { id: RequestId, channel: String, command: String, arg: Payload },
    PromiseCancel { id: RequestId },
    EventListen { id: RequestId, channel: String, event: String, arg: Payload },
    EventDispose { id: RequestId },
}

/// Server-to-client message.
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Initialize,
    PromiseSuccess { id: RequestId, data: Payload },
    PromiseError { id: RequestId, error: RemoteError },
    PromiseErrorObj { id: RequestId, data: Payload },
    EventFire { id: RequestId, data: Payload },
}

/// One decoded transport message.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
}

/// Structured error crossing the wire as the body of a `PromiseError`.
#[derive(Clone, Debug, PartialEq, Error, Serialize, Deserialize)]
#[error("{name}: {message}")]
pub struct RemoteError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<ErrorStack>,
}

/// Stack trace attached to a [`RemoteError`]: either pre-split frames or the
/// raw string when the sender could not split it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorStack {
    Frames(Vec<String>),
    Raw(String),
}

impl ErrorStack {
    /// Split a raw stack string into frames on newlines.
    pub fn from_raw(stack: &str) -> Self {
        ErrorStack::Frames(stack.split('\n').map(str::to_string).collect())
    }
}

impl RemoteError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self { message: message.into(), name: name.into(), stack: None }
    }

    pub fn with_stack(mut self, stack: ErrorStack) -> Self {
        self.stack = Some(stack);
        self
    }

    /// The error shape a canceled operation settles with.
    pub fn canceled() -> Self {
        Self::new("Canceled", "Canceled")
    }
}

impl Request {
    pub fn id(&self) -> RequestId {
        match self {
            Request::Promise { id, .. }
            | Request::PromiseCancel { id }
            | Request::EventListen { id, .. }
            | Request::EventDispose { id } => *id,
        }
    }

    /// Target channel, for the variants that address one.
    pub fn channel(&self) -> Option<&str> {
        match self {
            Request::Promise { channel, .. } | Request::EventListen { channel, .. } => {
                Some(channel)
            }
            _ => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::Promise { id, channel, command, arg } => encode_frame(
                vec![num(REQUEST_PROMISE), num(*id), Payload::String(channel.clone()), Payload::String(command.clone())],
                arg,
            ),
            Request::PromiseCancel { id } => {
                encode_frame(vec![num(REQUEST_PROMISE_CANCEL), num(*id)], &Payload::Undefined)
            }
            Request::EventListen { id, channel, event, arg } => encode_frame(
                vec![num(REQUEST_EVENT_LISTEN), num(*id), Payload::String(channel.clone()), Payload::String(event.clone())],
                arg,
            ),
            Request::EventDispose { id } => {
                encode_frame(vec![num(REQUEST_EVENT_DISPOSE), num(*id)], &Payload::Undefined)
            }
        }
    }
}

impl Response {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Response::Initialize => encode_frame(vec![num(RESPONSE_INITIALIZE)], &Payload::Undefined),
            Response::PromiseSuccess { id, data } => {
                encode_frame(vec![num(RESPONSE_PROMISE_SUCCESS), num(*id)], data)
            }
            Response::PromiseError { id, error } => {
                let body = Payload::Json(serde_json::to_value(error).unwrap_or_default());
                encode_frame(vec![num(RESPONSE_PROMISE_ERROR), num(*id)], &body)
            }
            Response::PromiseErrorObj { id, data } => {
                encode_frame(vec![num(RESPONSE_PROMISE_ERROR_OBJ), num(*id)], data)
            }
            Response::EventFire { id, data } => {
                encode_frame(vec![num(RESPONSE_EVENT_FIRE), num(*id)], data)
            }
        }
    }
}

impl Frame {
    /// Decode one transport message (header value + body value).
    pub fn decode(bytes: &[u8]) -> Result<Frame, WireError> {
        let mut reader = Reader::new(bytes);
        let header = Payload::read(&mut reader)?;
        let body = Payload::read(&mut reader)?;

        let Payload::Array(parts) = header else {
            return Err(WireError::MalformedHeader("header is not an array"));
        };

        let kind = header_num(&parts, 0)?;
        let frame = match u8::try_from(kind).map_err(|_| WireError::UnknownMessageType(kind))? {
            REQUEST_PROMISE => Frame::Request(Request::Promise {
                id: header_id(&parts)?,
                channel: header_str(&parts, 2)?,
                command: header_str(&parts, 3)?,
                arg: body,
            }),
            REQUEST_PROMISE_CANCEL => {
                Frame::Request(Request::PromiseCancel { id: header_id(&parts)? })
            }
            REQUEST_EVENT_LISTEN => Frame::Request(Request::EventListen {
                id: header_id(&parts)?,
                channel: header_str(&parts, 2)?,
                event: header_str(&parts, 3)?,
                arg: body,
            }),
            REQUEST_EVENT_DISPOSE => {
                Frame::Request(Request::EventDispose { id: header_id(&parts)? })
            }
            RESPONSE_INITIALIZE => Frame::Response(Response::Initialize),
            RESPONSE_PROMISE_SUCCESS => {
                Frame::Response(Response::PromiseSuccess { id: header_id(&parts)?, data: body })
            }
            RESPONSE_PROMISE_ERROR => Frame::Response(Response::PromiseError {
                id: header_id(&parts)?,
                error: body.deserialize()?,
            }),
            RESPONSE_PROMISE_ERROR_OBJ => {
                Frame::Response(Response::PromiseErrorObj { id: header_id(&parts)?, data: body })
            }
            RESPONSE_EVENT_FIRE => {
                Frame::Response(Response::EventFire { id: header_id(&parts)?, data: body })
            }
            other => return Err(WireError::UnknownMessageType(u64::from(other))),
        };

        Ok(frame)
    }
}

fn encode_frame(header: Vec<Payload>, body: &Payload) -> Vec<u8> {
    let mut out = Payload::Array(header).encode();
    body.write(&mut out);
    out
}

fn num(n: impl Into<u64>) -> Payload {
    Payload::Json(Value::from(n.into()))
}

fn header_num(parts: &[Payload], index: usize) -> Result<u64, WireError> {
    match parts.get(index) {
        Some(Payload::Json(value)) => value
            .as_u64()
            .ok_or(WireError::MalformedHeader("header field is not an unsigned number")),
        Some(_) => Err(WireError::MalformedHeader("header field is not a number")),
        None => Err(WireError::MalformedHeader("header is too short")),
    }
}

fn header_id(parts: &[Payload]) -> Result<RequestId, WireError> {
    RequestId::try_from(header_num(parts, 1)?)
        .map_err(|_| WireError::MalformedHeader("request id overflows 32 bits"))
}

fn header_str(parts: &[Payload], index: usize) -> Result<String, WireError> {
    match parts.get(index) {
        Some(Payload::String(s)) => Ok(s.clone()),
        Some(_) => Err(WireError::MalformedHeader("header field is not a string")),
        None => Err(WireError::MalformedHeader("header is too short")),
    }
}
