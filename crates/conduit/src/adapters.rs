use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit_wire::Payload;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::channel::ClientChannel;
use crate::error::IpcError;
use crate::events::{EventEmitter, EventSource, WeakEmitter};

type SharedChannel = Shared<BoxFuture<'static, Arc<dyn ClientChannel>>>;

/// Channel facade over a channel that is still being resolved — a routing
/// decision, a service still starting up. Calls chain on the future;
/// `listen` hands back a relay immediately and binds it once the future
/// lands.
#[derive(Clone)]
pub struct DelayedChannel {
    channel: SharedChannel,
}

impl DelayedChannel {
    pub fn new(channel: impl Future<Output = Arc<dyn ClientChannel>> + Send + 'static) -> Self {
        Self { channel: channel.boxed().shared() }
    }
}

#[async_trait]
impl ClientChannel for DelayedChannel {
    async fn call_with_cancel(
        &self,
        command: &str,
        arg: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload, IpcError> {
        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IpcError::Canceled),
            channel = self.channel.clone() => channel,
        };
        channel.call_with_cancel(command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Payload) -> EventSource {
        relay(self.channel.clone(), event.to_string(), arg)
    }
}

/// Event source that becomes live once `channel` resolves. Subscriptions
/// made in the meantime miss nothing: the forwarder only attaches to the
/// underlying event when someone is listening.
fn relay(channel: SharedChannel, event: String, arg: Payload) -> EventSource {
    let emitter = EventEmitter::new();
    let slot: Arc<Mutex<Option<JoinHandle<()>>>> = Arc::default();

    let on_first = {
        let slot = slot.clone();
        let emitter = emitter.downgrade();
        move || {
            let forward =
                tokio::spawn(forward_events(channel.clone(), event.clone(), arg.clone(), emitter.clone()));
            *slot.lock().unwrap() = Some(forward);
        }
    };
    let on_last = {
        let slot = slot.clone();
        move || {
            if let Some(task) = slot.lock().unwrap().take() {
                // Aborting drops the inner stream, which tears the remote
                // subscription down with it.
                task.abort();
            }
        }
    };
    emitter.set_lifecycle(on_first, on_last);
    emitter.source()
}

async fn forward_events(
    channel: SharedChannel,
    event: String,
    arg: Payload,
    emitter: WeakEmitter,
) {
    let channel = channel.await;
    let source = channel.listen(&event, arg);
    let mut stream = source.subscribe();
    while let Some(data) = stream.recv().await {
        let Some(emitter) = emitter.upgrade() else {
            return;
        };
        emitter.fire(data);
    }
}

/// Channel that waits one scheduler tick before its first operation, so a
/// transport finishing its own same-tick setup is not raced by the first
/// frame. Subsequent operations proxy straight through.
pub struct NextTickChannel {
    inner: Arc<dyn ClientChannel>,
    deferred: AtomicBool,
}

impl NextTickChannel {
    pub fn new(inner: Arc<dyn ClientChannel>) -> Self {
        Self { inner, deferred: AtomicBool::new(true) }
    }
}

#[async_trait]
impl ClientChannel for NextTickChannel {
    async fn call_with_cancel(
        &self,
        command: &str,
        arg: Payload,
        cancel: &CancellationToken,
    ) -> Result<Payload, IpcError> {
        if self.deferred.swap(false, Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.call_with_cancel(command, arg, cancel).await
    }

    fn listen(&self, event: &str, arg: Payload) -> EventSource {
        if self.deferred.swap(false, Ordering::SeqCst) {
            let inner = self.inner.clone();
            DelayedChannel::new(async move {
                tokio::task::yield_now().await;
                inner
            })
            .listen(event, arg)
        } else {
            self.inner.listen(event, arg)
        }
    }
}
