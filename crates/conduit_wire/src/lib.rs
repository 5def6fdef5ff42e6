#![forbid(unsafe_code)]
//! Wire types for the conduit IPC core.
//!
//! A transport message ("frame") is two self-describing values concatenated:
//! a header and a body. Values are tag-length encoded ([`Payload`]), headers
//! carry the routing fields (message type, request id, channel and operation
//! names), bodies carry the argument or result. [`Frame::decode`] classifies
//! an inbound message as a [`Request`] or a [`Response`] in a single pass so
//! a connection pump can hand it to the right half of an endpoint.
//!
//! This crate is runtime-agnostic: serde and the codec only.

mod error;
mod frame;
mod value;

pub use error::WireError;
pub use frame::{
    ErrorStack, Frame, RemoteError, Request, RequestId, Response, REQUEST_EVENT_DISPOSE,
    REQUEST_EVENT_LISTEN, REQUEST_PROMISE, REQUEST_PROMISE_CANCEL, RESPONSE_EVENT_FIRE,
    RESPONSE_INITIALIZE, RESPONSE_PROMISE_ERROR, RESPONSE_PROMISE_ERROR_OBJ,
    RESPONSE_PROMISE_SUCCESS,
};
pub use value::{Payload, Reader};
