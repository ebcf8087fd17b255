//! HTTP adapter on hyper 1.x.
//!
//! Each inbound HTTP request becomes a protocol-neutral [`Request`]:
//!
//! - method and path are the routing identity
//! - the collected body is the payload, undecoded
//! - headers (lowercased) and the query string land in the metadata
//!
//! The [`Response`](keystone_core::Response) coming back out of the chain is
//! written with its status and metadata headers. Failures are rendered as
//! `{"success":false,"error":"..."}`: domain errors with their own status and
//! message, anything else as a generic 500 whose detail only reaches the
//! logs.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use keystone_core::{
    BoxFuture, Context, Error, ErrorBody, Handler, HandlerResult, Metadata, Payload, Protocol,
    Request, Response, SuccessBody,
};
use keystone_middleware::{compose, BoxedMiddleware, Chain};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::error::{ServiceError, ServiceResult};
use crate::service::Service;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Body type of every response written by the adapter.
pub type HttpBody = Full<Bytes>;

/// Metadata key carrying the raw query string.
pub const QUERY_KEY: &str = "query";

const JSON: &str = "application/json";

/// An HTTP server running one handler behind the platform's middleware.
///
/// The handler sees every request; routing on [`Request::method`] and
/// [`Request::path`] is its business. The listener is bound during `init`,
/// so an unavailable port aborts platform startup.
///
/// # Example
///
/// ```rust
/// use keystone_core::{FnHandler, HandlerResult, Response};
/// use keystone_server::HttpService;
///
/// let api = HttpService::new(
///     "api",
///     "127.0.0.1:0",
///     FnHandler::new(|_req| async { HandlerResult::Ok(Response::empty()) }),
/// );
/// assert!(api.local_addr().is_none());
/// ```
pub struct HttpService {
    name: String,
    addr: String,
    handler: Arc<dyn Handler>,
    chain: RwLock<Chain>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    request_timeout: Option<Duration>,
    shutdown: ShutdownSignal,
    tracker: ConnectionTracker,
}

impl HttpService {
    /// Creates a service that will listen on `addr`.
    pub fn new(name: impl Into<String>, addr: impl Into<String>, handler: impl Handler) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        Self {
            name: name.into(),
            addr: addr.into(),
            chain: RwLock::new(compose(Arc::clone(&handler), &[])),
            handler,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            request_timeout: None,
            shutdown: ShutdownSignal::new(),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Gives every request context this deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Returns the bound address once initialized.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Returns the number of open connections.
    pub fn active_connections(&self) -> usize {
        self.tracker.active_connections()
    }

    /// Runs one HTTP request through the chain without a socket.
    pub async fn handle<B>(&self, request: http::Request<B>) -> http::Response<HttpBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Display,
    {
        let chain = self.chain.read().clone();
        dispatch(&chain, request, self.request_timeout).await
    }

    async fn serve_connection(
        chain: Chain,
        stream: TcpStream,
        remote: SocketAddr,
        timeout: Option<Duration>,
        shutdown: ShutdownSignal,
    ) {
        let io = TokioIo::new(stream);
        let service = service_fn(move |request: http::Request<Incoming>| {
            let chain = chain.clone();
            async move { Ok::<_, Infallible>(dispatch(&chain, request, timeout).await) }
        });

        let conn = http1::Builder::new().serve_connection(io, service);
        tokio::pin!(conn);

        let mut draining = false;
        let result = loop {
            tokio::select! {
                result = conn.as_mut() => break result,
                () = shutdown.recv(), if !draining => {
                    conn.as_mut().graceful_shutdown();
                    draining = true;
                }
            }
        };

        if let Err(err) = result {
            debug!(%remote, error = %err, "Connection closed with error");
        }
    }
}

impl Service for HttpService {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn metadata(&self) -> BTreeMap<String, String> {
        let addr = self
            .local_addr()
            .map_or_else(|| self.addr.clone(), |a| a.to_string());
        BTreeMap::from([("addr".to_string(), addr)])
    }

    fn init(&self) -> BoxFuture<'_, ServiceResult> {
        Box::pin(async move {
            let listener = TcpListener::bind(&self.addr)
                .await
                .map_err(|source| ServiceError::Bind {
                    addr: self.addr.clone(),
                    source,
                })?;
            let local = listener.local_addr().ok();
            info!(service = %self.name, addr = ?local, "HTTP listener bound");
            *self.local_addr.lock() = local;
            *self.listener.lock() = Some(listener);
            Ok(())
        })
    }

    fn use_middlewares(&self, middlewares: &[BoxedMiddleware]) {
        *self.chain.write() = compose(Arc::clone(&self.handler), middlewares);
    }

    fn start(&self) -> BoxFuture<'_, ServiceResult> {
        Box::pin(async move {
            let listener = self
                .listener
                .lock()
                .take()
                .ok_or_else(|| ServiceError::NotInitialized(self.name.clone()))?;
            let chain = self.chain.read().clone();
            info!(service = %self.name, "HTTP service accepting connections");

            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, remote)) => {
                            let token = self.tracker.acquire();
                            let conn = Self::serve_connection(
                                chain.clone(),
                                stream,
                                remote,
                                self.request_timeout,
                                self.shutdown.clone(),
                            );
                            tokio::spawn(async move {
                                conn.await;
                                drop(token);
                            });
                        }
                        Err(err) => error!(service = %self.name, error = %err, "Failed to accept connection"),
                    },
                    () = self.shutdown.recv() => break,
                }
            }

            drop(listener);
            info!(
                service = %self.name,
                connections = self.tracker.active_connections(),
                "Draining HTTP connections"
            );
            self.tracker.wait_idle().await;
            info!(service = %self.name, "HTTP service stopped");
            Ok(())
        })
    }

    fn stop(&self, ctx: Context) -> BoxFuture<'_, ServiceResult> {
        self.shutdown.trigger();
        Box::pin(async move {
            tokio::select! {
                () = self.tracker.wait_idle() => {}
                () = ctx.cancelled() => warn!(
                    service = %self.name,
                    connections = self.tracker.active_connections(),
                    "Shutdown window closed with connections open"
                ),
            }
            Ok(())
        })
    }
}

impl std::fmt::Debug for HttpService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpService")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("chain", &*self.chain.read())
            .finish_non_exhaustive()
    }
}

async fn dispatch<B>(
    chain: &Chain,
    request: http::Request<B>,
    timeout: Option<Duration>,
) -> http::Response<HttpBody>
where
    B: Body<Data = Bytes>,
    B::Error: Display,
{
    let request = match to_request(request).await {
        Ok(request) => request,
        Err(err) => {
            debug!(error = %err, "Failed to read request body");
            return error_response(StatusCode::BAD_REQUEST, "failed to read request body", None);
        }
    };
    let request = match timeout {
        Some(timeout) => {
            let context = request.context().clone().with_timeout(timeout);
            request.with_context(context)
        }
        None => request,
    };

    into_http_response(chain.call(request).await)
}

/// Converts an HTTP request into a [`Request`] with a fresh context.
pub async fn to_request<B>(request: http::Request<B>) -> Result<Request, B::Error>
where
    B: Body<Data = Bytes>,
{
    let (parts, body) = request.into_parts();
    let bytes = body.collect().await?.to_bytes();

    let payload = if bytes.is_empty() {
        Payload::Empty
    } else {
        Payload::Bytes(bytes)
    };
    let mut request = Request::new(
        Protocol::Http,
        parts.method.as_str(),
        parts.uri.path(),
        payload,
    )
    .with_context(Context::new());

    let metadata = request.metadata_mut();
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            metadata.insert(name.as_str().to_string(), value.to_string());
        }
    }
    if let Some(query) = parts.uri.query() {
        metadata.insert(QUERY_KEY.to_string(), query.to_string());
    }

    Ok(request)
}

/// Renders a handler result as an HTTP response.
pub fn into_http_response(result: HandlerResult) -> http::Response<HttpBody> {
    match result {
        Ok(response) => {
            let (payload, error, metadata, status) = response.into_parts();
            if let Some(err) = error {
                return error_response(err.status_code(), &err.message, Some(&metadata));
            }

            let mut http_response = http::Response::new(Full::new(payload.into_bytes()));
            *http_response.status_mut() = status.unwrap_or(StatusCode::OK);
            copy_headers(&mut http_response, &metadata);
            http_response
        }
        Err(err) => {
            if matches!(err, Error::Internal { .. }) {
                error!(error = ?err, "Request failed with internal error");
            }
            error_response(err.status_code(), err.public_message(), None)
        }
    }
}

/// Wraps `data` as `{"success":true,"data":...}` with a JSON content type.
pub fn json_success<T: Serialize>(data: &T) -> HandlerResult {
    Response::json(&SuccessBody::new(data))
        .map(|r| r.with_metadata(CONTENT_TYPE.as_str(), JSON))
        .map_err(|e| Error::internal_with_source("failed to encode response", e))
}

fn error_response(
    status: StatusCode,
    message: &str,
    metadata: Option<&Metadata>,
) -> http::Response<HttpBody> {
    let body = serde_json::to_vec(&ErrorBody::new(message))
        .unwrap_or_else(|_| br#"{"success":false,"error":"internal server error"}"#.to_vec());

    let mut response = http::Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Some(metadata) = metadata {
        copy_headers(&mut response, metadata);
    }
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(JSON));
    response
}

fn copy_headers(response: &mut http::Response<HttpBody>, metadata: &Metadata) {
    let headers = response.headers_mut();
    for (key, value) in metadata {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_core::AppError;

    async fn body_json(response: http::Response<HttpBody>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_domain_error_keeps_status_and_message() {
        let response = into_http_response(Err(AppError::query_not_found("user missing").into()));
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"success": false, "error": "user missing"})
        );
    }

    #[tokio::test]
    async fn test_internal_error_is_generic() {
        let response = into_http_response(Err(Error::internal("db password leaked")));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"success": false, "error": "internal server error"})
        );
    }

    #[tokio::test]
    async fn test_error_carried_in_response() {
        let response =
            into_http_response(Ok(Response::from_error(AppError::mq_timeout())
                .with_metadata("correlation-id", "abc")));
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(response.headers()["correlation-id"], "abc");
    }

    #[tokio::test]
    async fn test_json_success_envelope() {
        let response = into_http_response(json_success(&serde_json::json!({"id": 7})));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], JSON);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"success": true, "data": {"id": 7}})
        );
    }

    #[tokio::test]
    async fn test_to_request_maps_routing_identity() {
        let http_request = http::Request::builder()
            .method("POST")
            .uri("/users/7?verbose=1")
            .header("X-Request-Id", "req-1")
            .body(Full::new(Bytes::from_static(b"{\"name\":\"ada\"}")))
            .unwrap();

        let request = to_request(http_request).await.unwrap();
        assert_eq!(request.protocol(), Protocol::Http);
        assert_eq!(request.method(), "POST");
        assert_eq!(request.path(), "/users/7");
        assert_eq!(request.metadata_value("x-request-id"), Some("req-1"));
        assert_eq!(request.metadata_value(QUERY_KEY), Some("verbose=1"));
        assert_eq!(
            request.payload().as_bytes().map(|b| b.as_ref()),
            Some(&b"{\"name\":\"ada\"}"[..])
        );
    }
}
