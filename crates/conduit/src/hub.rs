use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use conduit_wire::{Frame, Payload};
use serde::de::DeserializeOwned;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::adapters::DelayedChannel;
use crate::channel::{ClientChannel, ServerChannel};
use crate::client::ChannelClient;
use crate::error::IpcError;
use crate::events::EventSource;
use crate::protocol::MessagePassingProtocol;
use crate::router::ClientRouter;
use crate::server::{ChannelServer, DEFAULT_PENDING_TIMEOUT};

/// One attached peer: the context it sent during the handshake plus the two
/// endpoint halves sharing its transport.
pub struct Connection<C> {
    id: u64,
    ctx: C,
    server: ChannelServer<C>,
    client: ChannelClient,
}

impl<C: Clone> Clone for Connection<C> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            ctx: self.ctx.clone(),
            server: self.server.clone(),
            client: self.client.clone(),
        }
    }
}

impl<C> Connection<C> {
    pub fn ctx(&self) -> &C {
        &self.ctx
    }

    pub fn channel_server(&self) -> &ChannelServer<C> {
        &self.server
    }

    pub fn channel_client(&self) -> &ChannelClient {
        &self.client
    }
}

struct HubShared<C> {
    pending_timeout: Duration,
    next_connection: AtomicU64,
    connections: Mutex<Vec<Connection<C>>>,
    channels: Mutex<HashMap<String, Arc<dyn ServerChannel<C>>>>,
    changes: watch::Sender<u64>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

/// Hub over many connected peers. Accepts transports, performs the context
/// handshake, replays the channel registry into every new peer, and routes
/// outgoing operations through a pluggable [`ClientRouter`].
pub struct IpcServer<C> {
    shared: Arc<HubShared<C>>,
}

impl<C> Clone for IpcServer<C> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<C: DeserializeOwned + Clone + Send + Sync + 'static> IpcServer<C> {
    pub fn new() -> Self {
        Self::with_pending_timeout(DEFAULT_PENDING_TIMEOUT)
    }

    /// Hub whose per-connection channel servers use the given pending
    /// timeout for requests to unregistered channels.
    pub fn with_pending_timeout(pending_timeout: Duration) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            shared: Arc::new(HubShared {
                pending_timeout,
                next_connection: AtomicU64::new(0),
                connections: Mutex::new(Vec::new()),
                channels: Mutex::new(HashMap::new()),
                changes,
                tasks: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Adopt a freshly connected transport. The first inbound message must
    /// be the peer's context; everything after is regular channel traffic.
    /// The connection unpublishes itself when the transport closes.
    pub fn accept(&self, protocol: Arc<dyn MessagePassingProtocol>) {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        let task = tokio::spawn(run_connection(shared, protocol));
        self.shared.tasks.lock().unwrap().push(task);
    }

    /// Router-facing view of the hub.
    pub fn hub(&self) -> ConnectionHub<C> {
        ConnectionHub { shared: self.shared.clone() }
    }

    pub fn connections(&self) -> Vec<Connection<C>> {
        self.shared.connections.lock().unwrap().clone()
    }

    /// Register a channel hub-wide: recorded for future peers and forwarded
    /// to every currently attached one.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn ServerChannel<C>>) {
        let name = name.into();
        self.shared.channels.lock().unwrap().insert(name.clone(), channel.clone());
        for connection in self.connections() {
            connection.server.register_channel(name.clone(), channel.clone());
        }
    }

    /// Channel proxy whose peer is chosen per operation by `router`.
    pub fn get_channel(
        &self,
        name: impl Into<String>,
        router: Arc<dyn ClientRouter<C>>,
    ) -> RoutedChannel<C> {
        RoutedChannel { hub: self.hub(), name: name.into(), router }
    }

    /// Tear down every connection and stop accepting new ones.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in self.shared.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        for connection in self.shared.connections.lock().unwrap().drain(..) {
            connection.server.dispose();
            connection.client.dispose();
        }
        self.shared.changes.send_modify(|generation| *generation += 1);
    }
}

impl<C: DeserializeOwned + Clone + Send + Sync + 'static> Default for IpcServer<C> {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_connection<C: DeserializeOwned + Clone + Send + Sync + 'static>(
    shared: Arc<HubShared<C>>,
    protocol: Arc<dyn MessagePassingProtocol>,
) {
    let Some(first) = protocol.recv().await else {
        return;
    };
    let ctx: C = match Payload::decode(&first).and_then(|payload| payload.deserialize()) {
        Ok(ctx) => ctx,
        Err(err) => {
            warn!("rejecting connection with malformed handshake: {err}");
            return;
        }
    };

    let server = ChannelServer::detached(protocol.clone(), ctx.clone(), shared.pending_timeout);
    let client = ChannelClient::detached(protocol.clone());

    let registered: Vec<_> = {
        let channels = shared.channels.lock().unwrap();
        channels.iter().map(|(name, channel)| (name.clone(), channel.clone())).collect()
    };
    for (name, channel) in registered {
        server.register_channel(name, channel);
    }

    let id = shared.next_connection.fetch_add(1, Ordering::SeqCst);
    shared.connections.lock().unwrap().push(Connection {
        id,
        ctx,
        server: server.clone(),
        client: client.clone(),
    });
    shared.changes.send_modify(|generation| *generation += 1);

    while let Some(message) = protocol.recv().await {
        match Frame::decode(&message) {
            Ok(Frame::Request(request)) => server.handle_request(request),
            Ok(Frame::Response(response)) => client.handle_response(response),
            Err(err) => warn!("dropping undecodable frame: {err}"),
        }
    }

    server.dispose();
    client.dispose();
    shared.connections.lock().unwrap().retain(|connection| connection.id != id);
    shared.changes.send_modify(|generation| *generation += 1);
}

/// Router-facing view of the hub: a snapshot of attached peers plus a
/// change signal that fires on connect and disconnect.
pub struct ConnectionHub<C> {
    shared: Arc<HubShared<C>>,
}

impl<C> Clone for ConnectionHub<C> {
    fn clone(&self) -> Self {
        Self { shared: self.shared.clone() }
    }
}

impl<C: Clone> ConnectionHub<C> {
    pub fn connections(&self) -> Vec<Connection<C>> {
        self.shared.connections.lock().unwrap().clone()
    }

    /// Generation counter bumped on every connect and disconnect. Routers
    /// mark the current generation seen before scanning so no change is
    /// missed between a scan and the wait.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }
}

/// Hub channel whose peer is chosen per operation by a [`ClientRouter`].
/// Operations forward through a [`DelayedChannel`] built from the routing
/// future, so callers never see the routing delay as anything but latency.
pub struct RoutedChannel<C> {
    hub: ConnectionHub<C>,
    name: String,
    router: Arc<dyn ClientRouter<C>>,
}

impl<C> Clone for RoutedChannel<C> {
    fn clone(&self) -> Self {
        Self { hub: self.hub.clone(), name: self.name.clone(), router: self.router.clone() }
    }
}

impl<C: Clone + Send + Sync + 'static> RoutedChannel<C> {
    fn delayed_for_call(&self, command: &str, arg: &Payload) -> DelayedChannel {
        let hub = self.hub.clone();
        let router = self.router.clone();
        let name = self.name.clone();
        let command = command.to_string();
        let arg = arg.clone();
        DelayedChannel::new(async move {
            let connection = router.route_call(&hub, &command, &arg).await;
            Arc::new(connection.channel_client().get_channel(name)) as Arc<dyn ClientChannel>
        })
    }

    fn delayed_for_event(&self, event: &str, arg: &Payload) -> DelayedChannel {
        let hub = self.hub.clone();
        let router = self.router.clone();
        let name = self.name.clone();
        let event = event.to_string();
        let arg = arg.clone();
        DelayedChannel::new(async move {
            let connection = router.route_event(&hub, &event, &arg).await;
            Arc::new(connection.channel_client().get_channel(name)) as Arc<dyn ClientChannel>
        })
    }
}

#[async_trait]
impl<C: Clone + Send + Sync + 'static> ClientChannel for RoutedChannel<C> {
    async fn call_with_cancel(
        &self,
        command: &str,
        arg: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload, IpcError> {
        self.delayed_for_call(command, &arg).call_with_cancel(command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Payload) -> EventSource {
        self.delayed_for_event(event, &arg).listen(event, arg)
    }
}
