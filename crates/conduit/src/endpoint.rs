use std::sync::{Arc, Mutex};

use conduit_wire::{Frame, Payload};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::ServerChannel;
use crate::client::{ChannelClient, RemoteChannel};
use crate::error::IpcError;
use crate::protocol::MessagePassingProtocol;
use crate::server::{ChannelServer, DEFAULT_PENDING_TIMEOUT};

/// Symmetric endpoint for the connecting side: one client half and one
/// server half sharing the transport, prefixed by the context handshake the
/// hub consumes before wiring up its own halves.
pub struct IpcClient<C> {
    client: ChannelClient,
    server: ChannelServer<C>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<C: Serialize + Clone + Send + Sync + 'static> IpcClient<C> {
    pub fn new(protocol: Arc<dyn MessagePassingProtocol>, ctx: C) -> Result<Self, IpcError> {
        // The handshake frame is a single value, not a header/body pair.
        protocol.send(Payload::json(&ctx)?.encode());

        let client = ChannelClient::detached(protocol.clone());
        let server = ChannelServer::detached(protocol.clone(), ctx, DEFAULT_PENDING_TIMEOUT);

        let pump = {
            let client = client.clone();
            let server = server.clone();
            let protocol = protocol.clone();
            tokio::spawn(async move {
                while let Some(message) = protocol.recv().await {
                    match Frame::decode(&message) {
                        Ok(Frame::Request(request)) => server.handle_request(request),
                        Ok(Frame::Response(response)) => client.handle_response(response),
                        Err(err) => warn!("dropping undecodable frame: {err}"),
                    }
                }
                server.dispose();
                client.dispose();
            })
        };

        Ok(Self { client, server, pump: Mutex::new(Some(pump)) })
    }

    /// Proxy for a channel hosted by the peer.
    pub fn get_channel(&self, name: impl Into<String>) -> RemoteChannel {
        self.client.get_channel(name)
    }

    /// Expose a channel to the peer.
    pub fn register_channel(&self, name: impl Into<String>, channel: Arc<dyn ServerChannel<C>>) {
        self.server.register_channel(name, channel);
    }

    pub fn channel_client(&self) -> &ChannelClient {
        &self.client
    }

    pub fn channel_server(&self) -> &ChannelServer<C> {
        &self.server
    }

    pub fn dispose(&self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
        self.client.dispose();
        self.server.dispose();
    }
}

impl<C> Drop for IpcClient<C> {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
    }
}
