use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use conduit_wire::Payload;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::hub::{Connection, ConnectionHub};

/// Strategy that picks which attached peer services a hub operation.
///
/// Routing may suspend indefinitely, e.g. until a matching peer connects;
/// callers see that as call latency through the delayed channel.
#[async_trait]
pub trait ClientRouter<C>: Send + Sync {
    async fn route_call(
        &self,
        hub: &ConnectionHub<C>,
        command: &str,
        arg: &Payload,
    ) -> Connection<C>;

    async fn route_event(
        &self,
        hub: &ConnectionHub<C>,
        event: &str,
        arg: &Payload,
    ) -> Connection<C>;
}

/// Routes to the first connection whose context satisfies a predicate,
/// waiting for new connections while none match. No timeout.
pub struct StaticRouter<C> {
    filter: Arc<dyn Fn(&C) -> BoxFuture<'static, bool> + Send + Sync>,
}

impl<C> Clone for StaticRouter<C> {
    fn clone(&self) -> Self {
        Self { filter: self.filter.clone() }
    }
}

impl<C: Clone + Send + Sync + 'static> StaticRouter<C> {
    pub fn new<F, Fut>(filter: F) -> Self
    where
        F: Fn(&C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        Self { filter: Arc::new(move |ctx| filter(ctx).boxed()) }
    }

    /// [`StaticRouter::new`] over a synchronous predicate.
    pub fn matching<F>(predicate: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        Self::new(move |ctx| std::future::ready(predicate(ctx)))
    }

    async fn route(&self, hub: &ConnectionHub<C>) -> Connection<C> {
        let mut changes = hub.changes();
        loop {
            // Mark the current generation seen before scanning so a peer
            // joining mid-scan re-wakes the loop.
            changes.borrow_and_update();
            for connection in hub.connections() {
                if (self.filter)(connection.ctx()).await {
                    return connection;
                }
            }
            if changes.changed().await.is_err() {
                // The hub is gone; no peer will ever match.
                futures::future::pending::<()>().await;
            }
        }
    }
}

#[async_trait]
impl<C: Clone + Send + Sync + 'static> ClientRouter<C> for StaticRouter<C> {
    async fn route_call(
        &self,
        hub: &ConnectionHub<C>,
        _command: &str,
        _arg: &Payload,
    ) -> Connection<C> {
        self.route(hub).await
    }

    async fn route_event(
        &self,
        hub: &ConnectionHub<C>,
        _event: &str,
        _arg: &Payload,
    ) -> Connection<C> {
        self.route(hub).await
    }
}
