use super::*;

use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use crate::{EventFeed, MessagePassingProtocol, ServerChannel};

/// Echo-flavored test service over a `String` context.
#[derive(Default)]
pub(super) struct EchoChannel {
    ticks: Mutex<Vec<mpsc::UnboundedSender<Payload>>>,
}

impl EchoChannel {
    pub(super) fn fire_tick(&self, payload: Payload) {
        let ticks = self.ticks.lock().unwrap();
        for tx in ticks.iter() {
            let _ = tx.send(payload.clone());
        }
    }

    pub(super) fn tick_subscribers(&self) -> usize {
        self.ticks.lock().unwrap().len()
    }
}

#[async_trait]
impl ServerChannel<String> for EchoChannel {
    async fn call(
        &self,
        ctx: String,
        command: &str,
        arg: Payload,
        _cancel: CancellationToken,
    ) -> Result<Payload, IpcError> {
        match command {
            "ping" => {
                let Payload::String(text) = arg else {
                    return Err(IpcError::Remote(RemoteError::new(
                        "TypeError",
                        "ping expects a string",
                    )));
                };
                Ok(Payload::String(format!("{text}!")))
            }
            "echo" => Ok(arg),
            "ctx" => Ok(Payload::String(ctx)),
            "fail" => Err(IpcError::Remote(
                RemoteError::new("CustomError", "nope")
                    .with_stack(ErrorStack::from_raw("line1\nline2")),
            )),
            "reject" => Err(IpcError::Rejected(Payload::Json(json!({"code": 12})))),
            other => Err(IpcError::unknown_command(other)),
        }
    }

    fn listen(&self, _ctx: String, event: &str, _arg: Payload) -> Result<EventFeed, IpcError> {
        match event {
            "onTick" => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.ticks.lock().unwrap().push(tx);
                Ok(rx)
            }
            other => Err(IpcError::unknown_event(other)),
        }
    }
}

/// Service whose `work` command parks until its cancellation token fires.
#[derive(Default)]
pub(super) struct HangChannel {
    pub(super) started: Arc<Notify>,
    pub(super) observed_cancel: Arc<AtomicBool>,
}

#[async_trait]
impl ServerChannel<String> for HangChannel {
    async fn call(
        &self,
        _ctx: String,
        command: &str,
        _arg: Payload,
        cancel: CancellationToken,
    ) -> Result<Payload, IpcError> {
        match command {
            "work" => {
                self.started.notify_one();
                cancel.cancelled().await;
                self.observed_cancel.store(true, Ordering::SeqCst);
                Err(IpcError::Canceled)
            }
            other => Err(IpcError::unknown_command(other)),
        }
    }

    fn listen(&self, _ctx: String, event: &str, _arg: Payload) -> Result<EventFeed, IpcError> {
        Err(IpcError::unknown_event(event))
    }
}

/// Service that records command arrival order.
#[derive(Default)]
pub(super) struct OrderChannel {
    pub(super) log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ServerChannel<String> for OrderChannel {
    async fn call(
        &self,
        _ctx: String,
        command: &str,
        _arg: Payload,
        _cancel: CancellationToken,
    ) -> Result<Payload, IpcError> {
        self.log.lock().unwrap().push(command.to_string());
        Ok(Payload::Undefined)
    }

    fn listen(&self, _ctx: String, event: &str, _arg: Payload) -> Result<EventFeed, IpcError> {
        Err(IpcError::unknown_event(event))
    }
}

/// Transport decorator that records every frame the wrapped side sends.
pub(super) struct RecordingProtocol {
    inner: Arc<dyn MessagePassingProtocol>,
    sent: Mutex<Vec<Frame>>,
}

impl RecordingProtocol {
    pub(super) fn wrap(inner: Arc<dyn MessagePassingProtocol>) -> Arc<Self> {
        Arc::new(Self { inner, sent: Mutex::new(Vec::new()) })
    }

    pub(super) fn sent(&self) -> Vec<Frame> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessagePassingProtocol for RecordingProtocol {
    fn send(&self, message: Vec<u8>) {
        if let Ok(frame) = Frame::decode(&message) {
            self.sent.lock().unwrap().push(frame);
        }
        self.inner.send(message);
    }

    async fn recv(&self) -> Option<Vec<u8>> {
        self.inner.recv().await
    }
}

/// Poll until `predicate` holds, yielding to the scheduler between checks.
pub(super) async fn eventually(mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}

/// Let in-flight frames and spawned dispatches settle.
pub(super) async fn settle() {
    for _ in 0..25 {
        tokio::task::yield_now().await;
    }
}
