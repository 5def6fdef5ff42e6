use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conduit_wire::{Frame, Payload, RemoteError, Request, RequestId, Response};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::ServerChannel;
use crate::error::IpcError;
use crate::protocol::MessagePassingProtocol;

/// Grace period for requests that arrive before their channel registers.
pub const DEFAULT_PENDING_TIMEOUT: Duration = Duration::from_millis(1000);

/// Server half of an endpoint: demultiplexes inbound requests onto the
/// registered channels, tracks in-flight calls and live subscriptions, and
/// queues requests whose channel has not been registered yet.
///
/// Advertises readiness by sending `Initialize` as its first frame.
pub struct ChannelServer<C> {
    shared: Arc<ServerShared<C>>,
}

impl<C> Clone for ChannelServer<C> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

struct ServerShared<C> {
    protocol: Arc<dyn MessagePassingProtocol>,
    ctx: C,
    pending_timeout: Duration,
    state: Mutex<ServerState<C>>,
}

struct ServerState<C> {
    channels: HashMap<String, Arc<dyn ServerChannel<C>>>,
    pending: HashMap<String, Vec<PendingRequest>>,
    active: HashMap<RequestId, ActiveRequest>,
    pump: Option<JoinHandle<()>>,
    disposed: bool,
}

struct PendingRequest {
    request: Request,
    timer: Option<JoinHandle<()>>,
}

enum ActiveRequest {
    Call { cancel: CancellationToken },
    Subscription { forwarder: JoinHandle<()> },
}

impl<C: Clone + Send + Sync + 'static> ChannelServer<C> {
    /// Attach to a transport this server has to itself, with the default
    /// pending timeout.
    pub fn new(protocol: Arc<dyn MessagePassingProtocol>, ctx: C) -> Self {
        Self::with_timeout(protocol, ctx, DEFAULT_PENDING_TIMEOUT)
    }

    pub fn with_timeout(
        protocol: Arc<dyn MessagePassingProtocol>,
        ctx: C,
        pending_timeout: Duration,
    ) -> Self {
        let server = Self::detached(protocol.clone(), ctx, pending_timeout);
        let pump = {
            let server = server.clone();
            tokio::spawn(async move {
                while let Some(message) = protocol.recv().await {
                    match Frame::decode(&message) {
                        Ok(Frame::Request(request)) => server.handle_request(request),
                        Ok(Frame::Response(_)) => {
                            debug!("channel server ignoring response frame");
                        }
                        Err(err) => warn!("dropping undecodable frame: {err}"),
                    }
                }
            })
        };
        server.shared.state.lock().unwrap().pump = Some(pump);
        server
    }

    /// Constructor for endpoints that demultiplex a shared transport
    /// themselves and feed [`handle_request`](Self::handle_request) directly.
    pub(crate) fn detached(
        protocol: Arc<dyn MessagePassingProtocol>,
        ctx: C,
        pending_timeout: Duration,
    ) -> Self {
        let server = Self {
            shared: Arc::new(ServerShared {
                protocol,
                ctx,
                pending_timeout,
                state: Mutex::new(ServerState {
                    channels: HashMap::new(),
                    pending: HashMap::new(),
                    active: HashMap::new(),
                    pump: None,
                    disposed: false,
                }),
            }),
        };
        server.send(&Response::Initialize);
        server
    }

    /// Register a channel under `name` and schedule a drain of any requests
    /// queued for it. The drain runs on its own task so user code never
    /// re-enters the caller's stack.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn ServerChannel<C>>) {
        let name = name.into();
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return;
            }
            state.channels.insert(name.clone(), channel);
        }
        let server = self.clone();
        tokio::spawn(async move {
            server.flush_pending(&name);
        });
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<dyn ServerChannel<C>>> {
        self.shared.state.lock().unwrap().channels.get(name).cloned()
    }

    /// Feed one already-decoded request into the server.
    pub(crate) fn handle_request(&self, request: Request) {
        let mut state = self.shared.state.lock().unwrap();
        if state.disposed {
            return;
        }
        self.dispatch(&mut state, request);
    }

    /// Tear down: stop the pump, cancel every in-flight call, abort every
    /// forwarder and pending timer, clear the registry.
    pub fn dispose(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.disposed {
            return;
        }
        state.disposed = true;
        if let Some(pump) = state.pump.take() {
            pump.abort();
        }
        for (_, active) in state.active.drain() {
            active.dispose();
        }
        for (_, queue) in state.pending.drain() {
            for pending in queue {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
            }
        }
        state.channels.clear();
    }

    fn dispatch(&self, state: &mut ServerState<C>, request: Request) {
        match request {
            Request::Promise { id, channel, command, arg } => {
                match self.ready_channel(state, &channel) {
                    Some(target) => self.invoke_call(state, id, target, command, arg),
                    None => {
                        let request = Request::Promise { id, channel: channel.clone(), command, arg };
                        self.enqueue(state, channel, request, true);
                    }
                }
            }
            Request::EventListen { id, channel, event, arg } => {
                match self.ready_channel(state, &channel) {
                    Some(target) => self.invoke_listen(state, id, target, event, arg),
                    None => {
                        let request = Request::EventListen { id, channel: channel.clone(), event, arg };
                        self.enqueue(state, channel, request, false);
                    }
                }
            }
            Request::PromiseCancel { id } | Request::EventDispose { id } => {
                match state.active.remove(&id) {
                    Some(active) => active.dispose(),
                    None => debug!("cancel/dispose for unknown request {id}"),
                }
            }
        }
    }

    /// A channel is ready for direct dispatch once it is registered and its
    /// pending queue has drained; until then new requests join the queue so
    /// arrival order is preserved.
    fn ready_channel(
        &self,
        state: &ServerState<C>,
        channel: &str,
    ) -> Option<Arc<dyn ServerChannel<C>>> {
        if state.pending.contains_key(channel) {
            return None;
        }
        state.channels.get(channel).cloned()
    }

    fn invoke_call(
        &self,
        state: &mut ServerState<C>,
        id: RequestId,
        channel: Arc<dyn ServerChannel<C>>,
        command: String,
        arg: Payload,
    ) {
        let cancel = CancellationToken::new();
        state.active.insert(id, ActiveRequest::Call { cancel: cancel.clone() });

        let server = self.clone();
        let ctx = self.shared.ctx.clone();
        tokio::spawn(async move {
            let result = channel.call(ctx, &command, arg, cancel).await;
            server.complete_call(id, result);
        });
    }

    fn invoke_listen(
        &self,
        state: &mut ServerState<C>,
        id: RequestId,
        channel: Arc<dyn ServerChannel<C>>,
        event: String,
        arg: Payload,
    ) {
        let ctx = self.shared.ctx.clone();
        match channel.listen(ctx, &event, arg) {
            Ok(mut feed) => {
                let server = self.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(data) = feed.recv().await {
                        server.send(&Response::EventFire { id, data });
                    }
                });
                state.active.insert(id, ActiveRequest::Subscription { forwarder });
            }
            Err(err) => self.send(&error_response(id, err)),
        }
    }

    fn complete_call(&self, id: RequestId, result: Result<Payload, IpcError>) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return;
            }
            state.active.remove(&id);
        }
        let response = match result {
            Ok(data) => Response::PromiseSuccess { id, data },
            Err(err) => error_response(id, err),
        };
        self.send(&response);
    }

    fn enqueue(&self, state: &mut ServerState<C>, channel: String, request: Request, with_timer: bool) {
        let id = request.id();
        let timer = with_timer.then(|| {
            let server = self.clone();
            let channel = channel.clone();
            let timeout = self.shared.pending_timeout;
            tokio::spawn(async move {
                time::sleep(timeout).await;
                server.expire_pending(&channel, id);
            })
        });
        state.pending.entry(channel).or_default().push(PendingRequest { request, timer });
    }

    /// Drain the pending queue for `channel`, re-dispatching in arrival
    /// order. Runs under the state lock so requests arriving concurrently
    /// cannot overtake the queue.
    fn flush_pending(&self, channel: &str) {
        let mut state = self.shared.state.lock().unwrap();
        if state.disposed {
            return;
        }
        let Some(queue) = state.pending.remove(channel) else {
            return;
        };
        for pending in queue {
            if let Some(timer) = pending.timer {
                timer.abort();
            }
            self.dispatch(&mut state, pending.request);
        }
    }

    fn expire_pending(&self, channel: &str, id: RequestId) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.disposed {
                return;
            }
            let Some(queue) = state.pending.get_mut(channel) else {
                return;
            };
            let Some(position) = queue.iter().position(|p| p.request.id() == id) else {
                return;
            };
            queue.remove(position);
            if queue.is_empty() {
                state.pending.remove(channel);
            }
        }
        let message = format!(
            "Channel name '{channel}' timed out after {}ms",
            self.shared.pending_timeout.as_millis()
        );
        self.send(&Response::PromiseError {
            id,
            error: RemoteError::new("Unknown channel", message),
        });
    }

    fn send(&self, response: &Response) {
        self.shared.protocol.send(response.encode());
    }
}

fn error_response(id: RequestId, err: IpcError) -> Response {
    match err {
        IpcError::Remote(error) => Response::PromiseError { id, error },
        IpcError::Rejected(data) => Response::PromiseErrorObj { id, data },
        IpcError::Canceled => Response::PromiseError { id, error: RemoteError::canceled() },
        other => Response::PromiseError {
            id,
            error: RemoteError::new("Error", other.to_string()),
        },
    }
}

impl ActiveRequest {
    fn dispose(self) {
        match self {
            ActiveRequest::Call { cancel } => cancel.cancel(),
            ActiveRequest::Subscription { forwarder } => forwarder.abort(),
        }
    }
}

impl<C> Drop for ServerShared<C> {
    fn drop(&mut self) {
        if let Ok(state) = self.state.get_mut() {
            if let Some(pump) = state.pump.take() {
                pump.abort();
            }
            for (_, active) in state.active.drain() {
                active.dispose();
            }
            for (_, queue) in state.pending.drain() {
                for pending in queue {
                    if let Some(timer) = pending.timer {
                        timer.abort();
                    }
                }
            }
        }
    }
}
