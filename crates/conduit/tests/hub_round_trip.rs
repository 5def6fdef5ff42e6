//! End-to-end flows over the in-process transport: a hub serving renderer
//! endpoints, routed calls, and events crossing the wire.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use conduit::{
    loopback, CancellationToken, ClientChannel, EventFeed, IpcClient, IpcError, IpcServer,
    Payload, RemoteError, ServerChannel, StaticRouter,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct RendererCtx {
    kind: String,
    pid: u32,
}

/// Search-flavored service: one command plus a hit event.
#[derive(Default)]
struct SearchChannel {
    hits: Mutex<Vec<mpsc::UnboundedSender<Payload>>>,
}

impl SearchChannel {
    fn publish_hit(&self, hit: Payload) {
        for tx in self.hits.lock().unwrap().iter() {
            let _ = tx.send(hit.clone());
        }
    }

    fn subscriber_count(&self) -> usize {
        self.hits.lock().unwrap().len()
    }
}

#[async_trait]
impl ServerChannel<RendererCtx> for SearchChannel {
    async fn call(
        &self,
        ctx: RendererCtx,
        command: &str,
        arg: Payload,
        _cancel: CancellationToken,
    ) -> Result<Payload, IpcError> {
        match command {
            "query" => {
                let Payload::String(term) = arg else {
                    return Err(IpcError::Remote(RemoteError::new(
                        "TypeError",
                        "query expects a string",
                    )));
                };
                Ok(Payload::Json(json!({ "term": term, "from": ctx.kind })))
            }
            other => Err(IpcError::unknown_command(other)),
        }
    }

    fn listen(&self, _ctx: RendererCtx, event: &str, _arg: Payload) -> Result<EventFeed, IpcError> {
        match event {
            "onHit" => {
                let (tx, rx) = mpsc::unbounded_channel();
                self.hits.lock().unwrap().push(tx);
                Ok(rx)
            }
            other => Err(IpcError::unknown_event(other)),
        }
    }
}

fn renderer(server: &IpcServer<RendererCtx>, kind: &str, pid: u32) -> IpcClient<RendererCtx> {
    let (client_side, server_side) = loopback();
    server.accept(server_side);
    IpcClient::new(client_side, RendererCtx { kind: kind.to_string(), pid }).unwrap()
}

async fn eventually(mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition was not reached");
}

#[tokio::test]
async fn renderer_reaches_a_hub_service() {
    let server = IpcServer::<RendererCtx>::new();
    server.register_channel("search", Arc::new(SearchChannel::default()));

    let editor = renderer(&server, "editor", 100);
    let search = editor.get_channel("search");
    let hit = search.call("query", Payload::String("needle".into())).await.unwrap();
    assert_eq!(hit, Payload::Json(json!({ "term": "needle", "from": "editor" })));

    editor.dispose();
    server.dispose();
}

#[tokio::test]
async fn hub_routes_calls_to_the_matching_renderer() {
    let server = IpcServer::<RendererCtx>::new();
    let _settings = renderer(&server, "settings", 1);
    let editor = renderer(&server, "editor", 2);
    editor.register_channel("search", Arc::new(SearchChannel::default()));

    let router = Arc::new(StaticRouter::matching(|ctx: &RendererCtx| ctx.kind == "editor"));
    let routed = server.get_channel("search", router);
    let hit = routed.call("query", Payload::String("needle".into())).await.unwrap();
    assert_eq!(hit, Payload::Json(json!({ "term": "needle", "from": "editor" })));
}

#[tokio::test]
async fn events_stream_across_the_hub() {
    let server = IpcServer::<RendererCtx>::new();
    let search = Arc::new(SearchChannel::default());
    let editor = renderer(&server, "editor", 2);
    editor.register_channel("search", search.clone());

    let router = Arc::new(StaticRouter::matching(|ctx: &RendererCtx| ctx.kind == "editor"));
    let routed = server.get_channel("search", router);
    let source = routed.listen("onHit", Payload::Undefined);
    let mut stream = source.subscribe();

    eventually(|| search.subscriber_count() == 1).await;
    search.publish_hit(Payload::Json(json!({ "line": 3 })));
    assert_eq!(stream.recv().await, Some(Payload::Json(json!({ "line": 3 }))));
}

#[tokio::test]
async fn structured_errors_cross_the_hub_boundary() {
    let server = IpcServer::<RendererCtx>::new();
    server.register_channel("search", Arc::new(SearchChannel::default()));

    let editor = renderer(&server, "editor", 100);
    let search = editor.get_channel("search");
    let err = search.call("query", Payload::Undefined).await.unwrap_err();
    let IpcError::Remote(remote) = err else {
        panic!("expected a remote error, got {err:?}");
    };
    assert_eq!(remote.name, "TypeError");
}
