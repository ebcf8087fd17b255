//! Broker-facing [`Service`].

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use keystone_core::{
    BoxFuture, Context, Error, FnHandler, Handler, Payload, Protocol, Request, Response,
    CORRELATION_ID_KEY,
};
use keystone_middleware::{compose, BoxedMiddleware, Chain};
use keystone_server::{Service, ServiceError, ServiceResult, ShutdownSignal};
use parking_lot::RwLock;
use tracing::{error, info};

use crate::client::{MessageClient, SubscriptionHandle};
use crate::error::BrokerResult;
use crate::handler::{EventHandler, OperationHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouteKind {
    Operation,
    Event,
    Index,
}

struct Route {
    subject: String,
    kind: RouteKind,
    handler: Arc<dyn Handler>,
}

/// Serves broker subjects through the platform's middleware chain.
///
/// Every delivery becomes a [`Request`] with protocol `broker`, the subject
/// as method and path, the raw bytes as payload and the `correlation-id`
/// in the metadata. Subscriptions are made on `start` and dropped on `stop`.
///
/// # Example
///
/// ```rust,ignore
/// let users = BrokerService::new("users", client)
///     .operation("users.get", use_case(get_user))
///     .event("users.created", subscriber(on_created));
///
/// Platform::builder().service(users).build().serve().await?;
/// ```
pub struct BrokerService {
    name: String,
    client: MessageClient,
    routes: Vec<Route>,
    middlewares: RwLock<Vec<BoxedMiddleware>>,
    shutdown: ShutdownSignal,
}

impl BrokerService {
    /// Creates a service without routes.
    pub fn new(name: impl Into<String>, client: MessageClient) -> Self {
        Self {
            name: name.into(),
            client,
            routes: Vec::new(),
            middlewares: RwLock::new(Vec::new()),
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Answers requests on `subject` (`gw-worker` group).
    #[must_use]
    pub fn operation(mut self, subject: impl Into<String>, handler: impl OperationHandler) -> Self {
        let handler = Arc::new(handler);
        let terminal = FnHandler::new(move |request: Request| {
            let handler = Arc::clone(&handler);
            async move {
                let (context, payload) = request.into_parts();
                let reply = handler.handle(context, payload.into_bytes()).await?;
                Ok(Response::new(Payload::Bytes(reply)))
            }
        });
        self.routes.push(Route {
            subject: subject.into(),
            kind: RouteKind::Operation,
            handler: Arc::new(terminal),
        });
        self
    }

    /// Consumes events on `subject` (`gw-worker` group).
    #[must_use]
    pub fn event(self, subject: impl Into<String>, handler: impl EventHandler) -> Self {
        self.event_route(subject.into(), RouteKind::Event, handler)
    }

    /// Consumes index operations on `subject` (`query-worker` group).
    #[must_use]
    pub fn index_operation(self, subject: impl Into<String>, handler: impl EventHandler) -> Self {
        self.event_route(subject.into(), RouteKind::Index, handler)
    }

    fn event_route(mut self, subject: String, kind: RouteKind, handler: impl EventHandler) -> Self {
        let handler = Arc::new(handler);
        let terminal = FnHandler::new(move |request: Request| {
            let handler = Arc::clone(&handler);
            async move {
                let (context, payload) = request.into_parts();
                handler.handle(context, payload.into_bytes()).await?;
                Ok(Response::empty())
            }
        });
        self.routes.push(Route {
            subject,
            kind,
            handler: Arc::new(terminal),
        });
        self
    }

    /// Returns the client the service subscribes with.
    #[must_use]
    pub const fn client(&self) -> &MessageClient {
        &self.client
    }

    /// Returns the subscribed subjects.
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|r| r.subject.as_str())
    }

    async fn subscribe(&self, route: &Route, chain: Chain) -> BrokerResult<SubscriptionHandle> {
        let chain = Arc::new(chain);
        let subject = route.subject.clone();

        match route.kind {
            RouteKind::Operation => {
                let handler = move |context: Context, payload: Bytes| {
                    let chain = Arc::clone(&chain);
                    let request = broker_request(context, &subject, payload);
                    async move {
                        match chain.call(request).await {
                            Ok(response) => {
                                let (payload, error, _, _) = response.into_parts();
                                match error {
                                    Some(err) => encode_error(&err),
                                    None => Ok(payload.into_bytes()),
                                }
                            }
                            Err(Error::App(err)) => encode_error(&err),
                            Err(err) => Err(err),
                        }
                    }
                };
                self.client
                    .subscribe_operation(&route.subject, handler)
                    .await
            }
            RouteKind::Event | RouteKind::Index => {
                let handler = move |context: Context, payload: Bytes| {
                    let chain = Arc::clone(&chain);
                    let request = broker_request(context, &subject, payload);
                    async move {
                        let response = chain.call(request).await?;
                        match response.error() {
                            Some(err) => Err(Error::App(err.clone())),
                            None => Ok(()),
                        }
                    }
                };
                if route.kind == RouteKind::Index {
                    self.client
                        .listen_index_operation(&route.subject, handler)
                        .await
                } else {
                    self.client.subscribe_event(&route.subject, handler).await
                }
            }
        }
    }
}

fn broker_request(context: Context, subject: &str, payload: Bytes) -> Request {
    let correlation_id = context.correlation_id().map(str::to_string);
    let request = Request::new(Protocol::Broker, subject, subject, Payload::Bytes(payload))
        .with_context(context);
    match correlation_id {
        Some(id) => request.with_metadata(CORRELATION_ID_KEY, id),
        None => request,
    }
}

fn encode_error(err: &keystone_core::AppError) -> Result<Bytes, Error> {
    serde_json::to_vec(err)
        .map(Bytes::from)
        .map_err(|e| Error::internal_with_source("failed to encode reply", e))
}

impl Service for BrokerService {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Broker
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("routes".to_string(), self.routes.len().to_string())])
    }

    fn use_middlewares(&self, middlewares: &[BoxedMiddleware]) {
        *self.middlewares.write() = middlewares.to_vec();
    }

    fn start(&self) -> BoxFuture<'_, ServiceResult> {
        Box::pin(async move {
            let middlewares = self.middlewares.read().clone();
            let mut subscriptions = Vec::with_capacity(self.routes.len());

            for route in &self.routes {
                let chain = compose(Arc::clone(&route.handler), &middlewares);
                match self.subscribe(route, chain).await {
                    Ok(handle) => subscriptions.push(handle),
                    Err(err) => {
                        error!(service = %self.name, subject = %route.subject, error = %err, "Failed to register route");
                        for handle in subscriptions {
                            handle.unsubscribe().await;
                        }
                        return Err(ServiceError::msg(err));
                    }
                }
            }
            info!(service = %self.name, routes = subscriptions.len(), "Broker service listening");

            self.shutdown.recv().await;

            for handle in subscriptions {
                handle.unsubscribe().await;
            }
            info!(service = %self.name, "Broker service stopped");
            Ok(())
        })
    }

    fn stop(&self, _ctx: Context) -> BoxFuture<'_, ServiceResult> {
        self.shutdown.trigger();
        Box::pin(async { Ok(()) })
    }
}

impl std::fmt::Debug for BrokerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerService")
            .field("name", &self.name)
            .field("subjects", &self.subjects().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
