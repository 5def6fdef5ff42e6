use async_trait::async_trait;
use conduit_wire::Payload;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::IpcError;
use crate::events::EventSource;

/// Stream of event payloads produced by a server-side subscription.
///
/// The unbounded queue doubles as the event buffer: emissions produced
/// before the forwarder attaches are held rather than lost.
pub type EventFeed = mpsc::UnboundedReceiver<Payload>;

/// What a registered service implements: a set of named commands and a set
/// of named events, both shaped by the wire payload model.
///
/// `C` is the per-connection context exchanged during the handshake.
#[async_trait]
pub trait ServerChannel<C>: Send + Sync {
    /// Invoke `command` with `arg`. The token fires when the caller sends a
    /// cancel request; the service may stop early and settle however it
    /// likes — a late response is dropped on the caller side.
    async fn call(
        &self,
        ctx: C,
        command: &str,
        arg: Payload,
        cancel: CancellationToken,
    ) -> Result<Payload, IpcError>;

    /// Open the named event stream. Unknown events should return
    /// [`IpcError::unknown_event`].
    fn listen(&self, ctx: C, event: &str, arg: Payload) -> Result<EventFeed, IpcError>;
}

/// Caller-side channel surface: a remote channel proxy, a routed hub
/// channel, or one of the adapter channels.
#[async_trait]
pub trait ClientChannel: Send + Sync {
    /// Invoke `command` with `arg`, racing the cancellation token. A token
    /// that fires before the request leaves the endpoint suppresses it
    /// entirely; afterwards a cancel request chases it.
    async fn call_with_cancel(
        &self,
        command: &str,
        arg: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload, IpcError>;

    /// Subscribe to the named event. The remote subscription is opened
    /// lazily by the first [`EventStream`](crate::EventStream) and disposed
    /// with the last.
    fn listen(&self, event: &str, arg: Payload) -> EventSource;

    /// [`call_with_cancel`](ClientChannel::call_with_cancel) with a token
    /// that never fires.
    async fn call(&self, command: &str, arg: Payload) -> Result<Payload, IpcError> {
        self.call_with_cancel(command, arg, &CancellationToken::new()).await
    }
}
