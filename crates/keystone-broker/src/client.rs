//! Request/reply and publish/subscribe client.
//!
//! # Queue groups
//!
//! | Method | Queue group | Reply |
//! |---|---|---|
//! | [`MessageClient::listen_index_operation`] | `query-worker` | no |
//! | [`MessageClient::subscribe_event`] | `gw-worker` | no |
//! | [`MessageClient::subscribe_operation`] | `gw-worker` | yes |
//!
//! Each subscription runs its callbacks on the client's [`WorkerPool`]. A
//! failing callback is logged; the subscription keeps running.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use keystone_config::BrokerConfig;
use keystone_core::retry::RetryPolicy;
use keystone_core::{BoxFuture, Context, CORRELATION_ID_KEY};
use keystone_telemetry::metrics::record_broker_message;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};
use crate::handler::{EventHandler, OperationHandler};
use crate::message::Message;
use crate::transport::{NatsTransport, Subscription, Transport};
use crate::worker::WorkerPool;

/// Default bound on [`MessageClient::request_operation`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Queue group of index listeners.
pub const INDEX_QUEUE: &str = "query-worker";

/// Queue group of gateway subscriptions.
pub const GATEWAY_QUEUE: &str = "gw-worker";

/// A running subscription.
///
/// Dropping the handle leaves the subscription running; call
/// [`SubscriptionHandle::unsubscribe`] to end it.
#[derive(Debug)]
pub struct SubscriptionHandle {
    subject: String,
    queue: &'static str,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SubscriptionHandle {
    /// Returns the subscribed subject.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the queue group.
    #[must_use]
    pub const fn queue(&self) -> &'static str {
        self.queue
    }

    /// Returns `true` until the subscription ends.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stops receiving and cancels callbacks still running.
    pub async fn unsubscribe(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            warn!(subject = %self.subject, error = %err, "Subscription task ended abnormally");
        }
        debug!(subject = %self.subject, queue = self.queue, "Unsubscribed");
    }
}

type Dispatch = Arc<dyn Fn(Context, Message) -> BoxFuture<'static, ()> + Send + Sync>;

/// Messaging client over a [`Transport`].
///
/// Cheap to clone; clones share the transport and the worker pool.
#[derive(Clone)]
pub struct MessageClient {
    transport: Arc<dyn Transport>,
    request_timeout: Duration,
    workers: WorkerPool,
}

impl MessageClient {
    /// Creates a client over `transport`.
    pub fn new(transport: impl Transport) -> Self {
        Self::from_arc(Arc::new(transport))
    }

    /// Creates a client over a shared transport.
    #[must_use]
    pub fn from_arc(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            workers: WorkerPool::default(),
        }
    }

    /// Connects to NATS with the URL, retries and timeout from `config`.
    pub async fn connect(config: &BrokerConfig) -> BrokerResult<Self> {
        let policy = RetryPolicy::with_max_retries(config.connect_retries);
        let transport = NatsTransport::connect(&config.url, &policy).await?;
        Ok(Self::new(transport).with_request_timeout(config.request_timeout()))
    }

    /// Sets the default request bound.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Uses `workers` for subscription callbacks.
    #[must_use]
    pub fn with_workers(mut self, workers: WorkerPool) -> Self {
        self.workers = workers;
        self
    }

    /// Returns the default request bound.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Sends `payload` as JSON to `subject` and waits for the reply bytes.
    ///
    /// Waits for the client's request timeout (2 s unless configured).
    pub async fn request_operation<T>(
        &self,
        context: &Context,
        subject: &str,
        payload: &T,
    ) -> BrokerResult<Bytes>
    where
        T: Serialize + ?Sized,
    {
        self.request_operation_with_timeout(context, subject, payload, self.request_timeout)
            .await
    }

    /// Like [`MessageClient::request_operation`] with an explicit bound.
    ///
    /// The wait is also cut short by the context: its deadline tightens the
    /// bound and cancelling it returns [`BrokerError::Cancelled`].
    pub async fn request_operation_with_timeout<T>(
        &self,
        context: &Context,
        subject: &str,
        payload: &T,
        timeout: Duration,
    ) -> BrokerResult<Bytes>
    where
        T: Serialize + ?Sized,
    {
        info!(subject, request_id = %context.request_id(), "Requesting operation");

        let body = serde_json::to_vec(payload).map_err(|err| {
            error!(subject, error = %err, "Failed to encode request");
            BrokerError::from(err)
        })?;
        let mut message = Message::new(subject, body);
        if let Some(id) = context.correlation_id() {
            message = message.with_header(CORRELATION_ID_KEY, id);
        }
        let timeout = context
            .remaining()
            .map_or(timeout, |left| left.min(timeout));

        let result = tokio::select! {
            biased;
            () = context.token().cancelled() => Err(BrokerError::Cancelled),
            reply = self.transport.request(message, timeout) => reply,
        };
        record_broker_message("out", subject, result.is_ok());

        match result {
            Ok(reply) => Ok(reply.payload),
            Err(err) => {
                error!(subject, error = %err, "Operation request failed");
                Err(err)
            }
        }
    }

    /// Publishes `payload` as JSON under a fresh correlation id.
    ///
    /// Returns the correlation id. Failures are returned, never retried.
    pub async fn publish_event<T>(
        &self,
        context: &Context,
        subject: &str,
        payload: &T,
    ) -> BrokerResult<String>
    where
        T: Serialize + ?Sized,
    {
        let correlation_id = Uuid::new_v4().to_string();
        info!(
            subject,
            correlation_id = %correlation_id,
            request_id = %context.request_id(),
            "Publishing event"
        );

        let body = serde_json::to_vec(payload).map_err(|err| {
            error!(subject, error = %err, "Failed to encode event");
            BrokerError::from(err)
        })?;
        let message =
            Message::new(subject, body).with_header(CORRELATION_ID_KEY, correlation_id.clone());

        let result = self.transport.publish(message).await;
        record_broker_message("out", subject, result.is_ok());
        match result {
            Ok(()) => Ok(correlation_id),
            Err(err) => {
                error!(subject, error = %err, "Failed to publish event");
                Err(err)
            }
        }
    }

    /// Consumes index operations on `subject` in the `query-worker` group.
    pub async fn listen_index_operation(
        &self,
        subject: &str,
        handler: impl EventHandler,
    ) -> BrokerResult<SubscriptionHandle> {
        self.listen_events(subject, INDEX_QUEUE, handler).await
    }

    /// Consumes events on `subject` in the `gw-worker` group.
    pub async fn subscribe_event(
        &self,
        subject: &str,
        handler: impl EventHandler,
    ) -> BrokerResult<SubscriptionHandle> {
        self.listen_events(subject, GATEWAY_QUEUE, handler).await
    }

    /// Answers requests on `subject` in the `gw-worker` group.
    ///
    /// The handler's output is published to the request's reply subject.
    /// When the handler fails nothing is sent and the requester times out.
    pub async fn subscribe_operation(
        &self,
        subject: &str,
        handler: impl OperationHandler,
    ) -> BrokerResult<SubscriptionHandle> {
        let stream = self.subscribe(subject, GATEWAY_QUEUE).await?;
        let handler = Arc::new(handler);
        let transport = Arc::clone(&self.transport);

        let dispatch: Dispatch = Arc::new(move |context: Context, message: Message| -> BoxFuture<'static, ()> {
            let handler = Arc::clone(&handler);
            let transport = Arc::clone(&transport);
            Box::pin(async move {
                let Message {
                    subject,
                    reply,
                    headers,
                    payload,
                } = message;
                debug!(subject = %subject, correlation_id = ?context.correlation_id(), "Operation received");

                let result = handler.handle(context, payload).await;
                record_broker_message("in", &subject, result.is_ok());
                let answer = match result {
                    Ok(answer) => answer,
                    Err(err) => {
                        error!(subject = %subject, error = %err, "Operation handler failed");
                        return;
                    }
                };

                let Some(reply) = reply else {
                    warn!(subject = %subject, "Operation has no reply subject");
                    return;
                };
                let mut out = Message::new(reply, answer);
                if let Some(id) = headers.get(CORRELATION_ID_KEY) {
                    out = out.with_header(CORRELATION_ID_KEY, id.clone());
                }
                if let Err(err) = transport.publish(out).await {
                    error!(subject = %subject, error = %err, "Failed to send reply");
                }
            })
        });

        Ok(self.spawn_listener(subject, GATEWAY_QUEUE, stream, dispatch))
    }

    /// Waits until published messages reached the broker.
    pub async fn flush(&self) -> BrokerResult<()> {
        self.transport.flush().await
    }

    async fn subscribe(&self, subject: &str, queue: &'static str) -> BrokerResult<Subscription> {
        match self.transport.queue_subscribe(subject, queue).await {
            Ok(stream) => {
                info!(subject, queue, "Subscribed");
                Ok(stream)
            }
            Err(err) => {
                error!(subject, queue, error = %err, "Failed to subscribe");
                Err(err)
            }
        }
    }

    async fn listen_events(
        &self,
        subject: &str,
        queue: &'static str,
        handler: impl EventHandler,
    ) -> BrokerResult<SubscriptionHandle> {
        let stream = self.subscribe(subject, queue).await?;
        let handler = Arc::new(handler);

        let dispatch: Dispatch = Arc::new(move |context: Context, message: Message| -> BoxFuture<'static, ()> {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                debug!(
                    subject = %message.subject,
                    correlation_id = ?context.correlation_id(),
                    "Event received"
                );
                let result = handler.handle(context, message.payload).await;
                record_broker_message("in", &message.subject, result.is_ok());
                if let Err(err) = result {
                    error!(subject = %message.subject, error = %err, "Event handler failed");
                }
            })
        });

        Ok(self.spawn_listener(subject, queue, stream, dispatch))
    }

    fn spawn_listener(
        &self,
        subject: &str,
        queue: &'static str,
        mut stream: Subscription,
        dispatch: Dispatch,
    ) -> SubscriptionHandle {
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let workers = self.workers.clone();
        let name = subject.to_string();

        let task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    next = stream.next() => match next {
                        Some(message) => message,
                        None => break,
                    },
                };

                let mut context = Context::with_token(stop.child_token());
                if let Some(id) = message.correlation_id() {
                    context.set_correlation_id(id);
                }
                workers.execute(dispatch(context, message)).await;
            }
            debug!(subject = %name, queue, "Subscription closed");
        });

        SubscriptionHandle {
            subject: subject.to_string(),
            queue,
            cancel,
            task,
        }
    }
}

impl std::fmt::Debug for MessageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageClient")
            .field("request_timeout", &self.request_timeout)
            .field("workers", &self.workers.size())
            .finish_non_exhaustive()
    }
}
