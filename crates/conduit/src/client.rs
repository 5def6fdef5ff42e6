use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit_wire::{Frame, Payload, Request, RequestId, Response};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ClientChannel;
use crate::error::IpcError;
use crate::events::{EventEmitter, EventSource, WeakEmitter};
use crate::protocol::MessagePassingProtocol;

/// Client half of an endpoint: allocates request ids, sends requests, and
/// correlates responses back to pending calls and live subscriptions.
///
/// Outgoing requests gate on the peer's `Initialize` frame; nothing is put
/// on the wire before it arrives.
pub struct ChannelClient {
    shared: Arc<ClientShared>,
}

impl Clone for ChannelClient {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

struct ClientShared {
    protocol: Arc<dyn MessagePassingProtocol>,
    next_id: AtomicU32,
    init: watch::Sender<bool>,
    closed: CancellationToken,
    state: Mutex<ClientState>,
}

struct ClientState {
    handlers: HashMap<RequestId, ResponseHandler>,
    pump: Option<JoinHandle<()>>,
    disposed: bool,
}

enum ResponseHandler {
    Call(oneshot::Sender<Result<Payload, IpcError>>),
    Event(EventEmitter),
}

/// Lifecycle of one `listen` proxy: at most one remote subscription exists
/// at a time, keyed by the current subscriber count.
#[derive(Default)]
enum ListenSlot {
    #[default]
    Idle,
    Activating { cancel: CancellationToken },
    Live { id: RequestId },
}

impl ChannelClient {
    /// Attach to a transport this client has to itself.
    pub fn new(protocol: Arc<dyn MessagePassingProtocol>) -> Self {
        let client = Self::detached(protocol.clone());
        let pump = {
            let client = client.clone();
            tokio::spawn(async move {
                while let Some(message) = protocol.recv().await {
                    match Frame::decode(&message) {
                        Ok(Frame::Response(response)) => client.handle_response(response),
                        Ok(Frame::Request(_)) => {
                            debug!("channel client ignoring request frame");
                        }
                        Err(err) => warn!("dropping undecodable frame: {err}"),
                    }
                }
            })
        };
        client.shared.state.lock().unwrap().pump = Some(pump);
        client
    }

    /// Constructor for endpoints that demultiplex a shared transport
    /// themselves and feed [`handle_response`](Self::handle_response)
    /// directly.
    pub(crate) fn detached(protocol: Arc<dyn MessagePassingProtocol>) -> Self {
        let (init, _) = watch::channel(false);
        Self {
            shared: Arc::new(ClientShared {
                protocol,
                next_id: AtomicU32::new(0),
                init,
                closed: CancellationToken::new(),
                state: Mutex::new(ClientState {
                    handlers: HashMap::new(),
                    pump: None,
                    disposed: false,
                }),
            }),
        }
    }

    /// Proxy for the named channel on the remote peer. No validation that
    /// the peer actually hosts it; unknown channels surface through the
    /// server's pending-request timeout.
    pub fn get_channel(&self, name: impl Into<String>) -> RemoteChannel {
        RemoteChannel { client: self.clone(), name: name.into() }
    }

    /// Resolves once the peer's `Initialize` frame has been observed, or
    /// once this client is disposed.
    pub async fn initialized(&self) {
        let mut init = self.shared.init.subscribe();
        tokio::select! {
            _ = self.shared.closed.cancelled() => {}
            _ = init.wait_for(|ready| *ready) => {}
        }
    }

    /// Fail pending calls, end event streams, and stop reacting to the
    /// transport.
    pub fn dispose(&self) {
        let handlers: Vec<_> = {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return;
            }
            state.disposed = true;
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            state.handlers.drain().collect()
        };
        self.shared.closed.cancel();
        for (_, handler) in handlers {
            match handler {
                ResponseHandler::Call(tx) => {
                    let _ = tx.send(Err(IpcError::Disposed));
                }
                ResponseHandler::Event(emitter) => emitter.close(),
            }
        }
    }

    /// Feed one already-decoded response into the client.
    pub(crate) fn handle_response(&self, response: Response) {
        match response {
            Response::Initialize => {
                let transitioned = self.shared.init.send_if_modified(|ready| {
                    if *ready {
                        false
                    } else {
                        *ready = true;
                        true
                    }
                });
                if !transitioned {
                    debug!("duplicate initialize frame ignored");
                }
            }
            Response::PromiseSuccess { id, data } => self.settle(id, Ok(data)),
            Response::PromiseError { id, error } => self.settle(id, Err(IpcError::Remote(error))),
            Response::PromiseErrorObj { id, data } => self.settle(id, Err(IpcError::Rejected(data))),
            Response::EventFire { id, data } => {
                let emitter = {
                    let state = self.shared.state.lock().unwrap();
                    match state.handlers.get(&id) {
                        Some(ResponseHandler::Event(emitter)) => Some(emitter.clone()),
                        _ => None,
                    }
                };
                match emitter {
                    Some(emitter) => emitter.fire(data),
                    None => debug!("event fire for unknown subscription {id}"),
                }
            }
        }
    }

    /// At most one terminal response settles a request; stragglers land in
    /// the `None` arm and are dropped.
    fn settle(&self, id: RequestId, result: Result<Payload, IpcError>) {
        let handler = self.shared.state.lock().unwrap().handlers.remove(&id);
        match handler {
            Some(ResponseHandler::Call(tx)) => {
                let _ = tx.send(result);
            }
            Some(ResponseHandler::Event(emitter)) => {
                // A terminal error for a subscription ends its streams.
                emitter.close();
            }
            None => debug!("response for unknown or settled request {id}"),
        }
    }

    pub(crate) async fn call(
        &self,
        channel: &str,
        command: &str,
        arg: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload, IpcError> {
        if cancel.is_cancelled() {
            return Err(IpcError::Canceled);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);

        // A token fired during this wait suppresses the request entirely.
        let mut init = self.shared.init.subscribe();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IpcError::Canceled),
            _ = self.shared.closed.cancelled() => return Err(IpcError::Disposed),
            result = init.wait_for(|ready| *ready) => {
                if result.is_err() {
                    return Err(IpcError::Disposed);
                }
            }
        }

        let (tx, mut rx) = oneshot::channel();
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return Err(IpcError::Disposed);
            }
            state.handlers.insert(id, ResponseHandler::Call(tx));
        }
        self.send(Request::Promise {
            id,
            channel: channel.to_string(),
            command: command.to_string(),
            arg,
        });

        // From here a cancel chases the request with a cancel frame and
        // settles locally without waiting for the peer.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.shared.state.lock().unwrap().handlers.remove(&id);
                self.send(Request::PromiseCancel { id });
                Err(IpcError::Canceled)
            }
            response = &mut rx => response.unwrap_or(Err(IpcError::Disposed)),
        }
    }

    pub(crate) fn listen(&self, channel: &str, event: &str, arg: Payload) -> EventSource {
        let emitter = EventEmitter::new();
        let slot: Arc<Mutex<ListenSlot>> = Arc::default();

        let on_first = {
            let shared = Arc::downgrade(&self.shared);
            let slot = slot.clone();
            let emitter = emitter.downgrade();
            let channel = channel.to_string();
            let event = event.to_string();
            let arg = arg.clone();
            move || {
                let Some(shared) = shared.upgrade() else {
                    return;
                };
                let id = shared.next_id.fetch_add(1, Ordering::SeqCst);
                let cancel = CancellationToken::new();
                *slot.lock().unwrap() = ListenSlot::Activating { cancel: cancel.clone() };
                tokio::spawn(activate_listen(
                    ChannelClient { shared },
                    slot.clone(),
                    emitter.clone(),
                    id,
                    cancel,
                    channel.clone(),
                    event.clone(),
                    arg.clone(),
                ));
            }
        };

        let on_last = {
            let shared = Arc::downgrade(&self.shared);
            let slot = slot.clone();
            move || match std::mem::take(&mut *slot.lock().unwrap()) {
                ListenSlot::Activating { cancel } => cancel.cancel(),
                ListenSlot::Live { id } => {
                    let Some(shared) = shared.upgrade() else {
                        return;
                    };
                    shared.state.lock().unwrap().handlers.remove(&id);
                    shared.protocol.send(Request::EventDispose { id }.encode());
                }
                ListenSlot::Idle => {}
            }
        };

        emitter.set_lifecycle(on_first, on_last);
        emitter.source()
    }

    fn send(&self, request: Request) {
        self.shared.protocol.send(request.encode());
    }
}

#[allow(clippy::too_many_arguments)]
async fn activate_listen(
    client: ChannelClient,
    slot: Arc<Mutex<ListenSlot>>,
    emitter: WeakEmitter,
    id: RequestId,
    cancel: CancellationToken,
    channel: String,
    event: String,
    arg: Payload,
) {
    let mut init = client.shared.init.subscribe();
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = client.shared.closed.cancelled() => return,
        result = init.wait_for(|ready| *ready) => {
            if result.is_err() {
                return;
            }
        }
    }

    // Publish the handler and the frame under the slot lock so a racing
    // last-unsubscribe either cancels before the frame leaves or sends its
    // dispose strictly after.
    let mut slot_guard = slot.lock().unwrap();
    if cancel.is_cancelled() {
        return;
    }
    let Some(emitter) = emitter.upgrade() else {
        return;
    };
    {
        let mut state = client.shared.state.lock().unwrap();
        if state.disposed {
            return;
        }
        state.handlers.insert(id, ResponseHandler::Event(emitter));
    }
    *slot_guard = ListenSlot::Live { id };
    client.send(Request::EventListen { id, channel, event, arg });
}

impl Drop for ClientShared {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
        }
    }
}

/// Caller-side proxy for one named channel on the remote peer. Stateless;
/// cheap to clone.
#[derive(Clone)]
pub struct RemoteChannel {
    client: ChannelClient,
    name: String,
}

impl RemoteChannel {
    /// Invoke `command` with `arg` and await its single response value.
    pub async fn call(&self, command: &str, arg: Payload) -> Result<Payload, IpcError> {
        self.call_with_cancel(command, arg, &CancellationToken::new()).await
    }

    /// Invoke `command`, racing the caller's cancellation token.
    pub async fn call_with_cancel(
        &self,
        command: &str,
        arg: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload, IpcError> {
        self.client.call(&self.name, command, arg, cancel).await
    }

    /// Subscribe to the named event.
    pub fn listen(&self, event: &str, arg: Payload) -> EventSource {
        self.client.listen(&self.name, event, arg)
    }
}

#[async_trait]
impl ClientChannel for RemoteChannel {
    async fn call_with_cancel(
        &self,
        command: &str,
        arg: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload, IpcError> {
        RemoteChannel::call_with_cancel(self, command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Payload) -> EventSource {
        RemoteChannel::listen(self, event, arg)
    }
}
