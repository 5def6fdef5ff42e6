use std::sync::{Arc, Mutex, Weak};

use conduit_wire::Payload;
use tokio::sync::mpsc;

type Hook = Arc<dyn Fn() + Send + Sync>;

/// Multicast event dispatcher with subscriber-lifecycle hooks.
///
/// `fire` delivers a payload to every live [`EventStream`]. The lifecycle
/// hooks run when the subscriber count crosses zero: `on_first` on 0 → 1,
/// `on_last` on the return to 0. The channel client uses the pair to open a
/// remote event subscription for the first local listener and to dispose it
/// when the last one is dropped. Hooks run outside the subscriber lock.
#[derive(Clone)]
pub struct EventEmitter {
    shared: Arc<EmitterShared>,
}

struct EmitterShared {
    inner: Mutex<EmitterInner>,
    hooks: Mutex<Lifecycle>,
}

#[derive(Default)]
struct Lifecycle {
    on_first: Option<Hook>,
    on_last: Option<Hook>,
}

#[derive(Default)]
struct EmitterInner {
    subscribers: Vec<(u64, mpsc::UnboundedSender<Payload>)>,
    next_serial: u64,
    closed: bool,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EmitterShared {
                inner: Mutex::new(EmitterInner::default()),
                hooks: Mutex::new(Lifecycle::default()),
            }),
        }
    }

    /// Install the lifecycle hooks.
    pub fn set_lifecycle(
        &self,
        on_first: impl Fn() + Send + Sync + 'static,
        on_last: impl Fn() + Send + Sync + 'static,
    ) {
        let mut hooks = self.shared.hooks.lock().unwrap();
        hooks.on_first = Some(Arc::new(on_first));
        hooks.on_last = Some(Arc::new(on_last));
    }

    /// Deliver one payload to every live subscriber.
    pub fn fire(&self, payload: Payload) {
        let inner = self.shared.inner.lock().unwrap();
        for (_, tx) in &inner.subscribers {
            let _ = tx.send(payload.clone());
        }
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let (guard, first) = {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.closed {
                // A closed emitter yields a stream that ends immediately.
                return EventStream { rx, _guard: None };
            }
            let serial = inner.next_serial;
            inner.next_serial += 1;
            inner.subscribers.push((serial, tx));
            let guard = SubscriberGuard { shared: self.shared.clone(), serial };
            (guard, inner.subscribers.len() == 1)
        };
        if first {
            if let Some(hook) = self.shared.hook(|hooks| hooks.on_first.clone()) {
                hook();
            }
        }
        EventStream { rx, _guard: Some(guard) }
    }

    /// End every stream and drop the hooks. Further subscriptions end
    /// immediately.
    pub fn close(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            inner.closed = true;
            inner.subscribers.clear();
        }
        let mut hooks = self.shared.hooks.lock().unwrap();
        hooks.on_first = None;
        hooks.on_last = None;
    }

    pub fn source(&self) -> EventSource {
        EventSource { emitter: self.clone() }
    }

    pub(crate) fn downgrade(&self) -> WeakEmitter {
        WeakEmitter { shared: Arc::downgrade(&self.shared) }
    }
}

impl EmitterShared {
    fn hook(&self, pick: impl Fn(&Lifecycle) -> Option<Hook>) -> Option<Hook> {
        pick(&self.hooks.lock().unwrap())
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

/// Weak handle used by forwarding tasks so they never keep an abandoned
/// emitter (and whatever its hooks capture) alive.
#[derive(Clone)]
pub(crate) struct WeakEmitter {
    shared: Weak<EmitterShared>,
}

impl WeakEmitter {
    pub(crate) fn upgrade(&self) -> Option<EventEmitter> {
        self.shared.upgrade().map(|shared| EventEmitter { shared })
    }
}

/// Subscription surface of an event: what `listen` hands back to callers.
#[derive(Clone)]
pub struct EventSource {
    emitter: EventEmitter,
}

impl EventSource {
    /// Attach a subscriber. The remote subscription is opened when the
    /// first stream attaches and disposed when the last one is dropped.
    pub fn subscribe(&self) -> EventStream {
        self.emitter.subscribe()
    }
}

/// One subscriber's view of an event. Dropping the stream detaches it.
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Payload>,
    _guard: Option<SubscriberGuard>,
}

impl EventStream {
    /// Next event payload, or `None` once the emitter is closed.
    pub async fn recv(&mut self) -> Option<Payload> {
        self.rx.recv().await
    }
}

struct SubscriberGuard {
    shared: Arc<EmitterShared>,
    serial: u64,
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        let last = {
            let mut inner = self.shared.inner.lock().unwrap();
            let before = inner.subscribers.len();
            inner.subscribers.retain(|(serial, _)| *serial != self.serial);
            before > 0 && inner.subscribers.is_empty() && !inner.closed
        };
        if last {
            if let Some(hook) = self.shared.hook(|hooks| hooks.on_last.clone()) {
                hook();
            }
        }
    }
}
