#![forbid(unsafe_code)]
//! Bidirectional channel-based IPC between a main process and its
//! renderer/child processes, over any ordered, reliable message transport.
//!
//! Two peers each hold one end of a [`MessagePassingProtocol`]. A peer
//! exposes named channels — small services with request/response commands
//! and push events — through a [`ChannelServer`]; the other side reaches
//! them through a [`ChannelClient`]. [`IpcServer`] manages many connected
//! peers at once and routes logical channels to one of them via a pluggable
//! [`ClientRouter`]; [`IpcClient`] is the symmetric connecting endpoint.
//! [`DelayedChannel`] and [`NextTickChannel`] adapt not-yet-available
//! channels into immediately usable ones.
//!
//! Requests correlate by per-client monotonic ids. Calls carry cancellation
//! on both sides of the send: a token that fires before the request leaves
//! suppresses it entirely, afterwards a cancel frame chases it. Requests
//! addressed to channels that have not been registered yet queue
//! server-side until registration drains them or the pending timeout
//! answers with an `Unknown channel` error.
//!
//! ```no_run
//! use conduit::{loopback, ChannelClient, ChannelServer, Payload};
//!
//! # async fn demo() -> Result<(), conduit::IpcError> {
//! let (main_side, renderer_side) = loopback();
//! let server = ChannelServer::new(main_side, "main".to_string());
//! // server.register_channel("files", Arc::new(FilesChannel::default()));
//! let client = ChannelClient::new(renderer_side);
//! let files = client.get_channel("files");
//! let stat = files.call("stat", Payload::String("/tmp".into())).await?;
//! # let _ = stat;
//! # Ok(()) }
//! ```

mod adapters;
mod channel;
mod client;
mod endpoint;
mod error;
mod events;
mod hub;
mod protocol;
mod router;
mod server;
mod services;

#[cfg(test)]
mod tests;

pub use adapters::{DelayedChannel, NextTickChannel};
pub use channel::{ClientChannel, EventFeed, ServerChannel};
pub use client::{ChannelClient, RemoteChannel};
pub use endpoint::IpcClient;
pub use error::IpcError;
pub use events::{EventEmitter, EventSource, EventStream};
pub use hub::{Connection, ConnectionHub, IpcServer, RoutedChannel};
pub use protocol::{loopback, LoopbackProtocol, MessagePassingProtocol};
pub use router::{ClientRouter, StaticRouter};
pub use server::{ChannelServer, DEFAULT_PENDING_TIMEOUT};
pub use services::ServiceCollection;

pub use conduit_wire::{
    ErrorStack, Frame, Payload, RemoteError, Request, RequestId, Response, WireError,
};

/// Re-export for service implementations and callers minting cancellation
/// tokens.
pub use tokio_util::sync::CancellationToken;
