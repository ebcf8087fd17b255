//! In-process RPC adapter.
//!
//! RPC calls carry native Rust values instead of bytes. The method name is
//! both the routing method and the path, the request value travels as
//! [`Payload::Native`](keystone_core::Payload::Native), and the handler
//! answers with a native value of the type the caller expects.

use std::any::{type_name, Any};
use std::future::Future;
use std::sync::Arc;

use keystone_core::{
    BoxFuture, Context, Error, FnHandler, Handler, HandlerResult, Protocol, Payload, Request,
    Response,
};
use keystone_middleware::{compose, BoxedMiddleware, Chain};
use parking_lot::RwLock;
use tracing::info;

use crate::error::ServiceResult;
use crate::service::Service;
use crate::shutdown::ShutdownSignal;

/// Dispatches typed calls through the platform's middleware chain.
///
/// # Example
///
/// ```rust
/// use keystone_core::{Context, Error};
/// use keystone_server::{unary, RpcService};
///
/// # tokio_test::block_on(async {
/// let rpc = RpcService::new("math", unary(|_ctx, n: u32| async move { Ok::<_, Error>(n * 2) }));
/// let doubled: u32 = rpc.invoke(Context::new(), "Double", 21_u32).await.unwrap();
/// assert_eq!(doubled, 42);
/// # });
/// ```
pub struct RpcService {
    name: String,
    handler: Arc<dyn Handler>,
    chain: RwLock<Chain>,
    shutdown: ShutdownSignal,
}

impl RpcService {
    /// Creates a service dispatching to `handler`.
    pub fn new(name: impl Into<String>, handler: impl Handler) -> Self {
        let handler: Arc<dyn Handler> = Arc::new(handler);
        Self {
            name: name.into(),
            chain: RwLock::new(compose(Arc::clone(&handler), &[])),
            handler,
            shutdown: ShutdownSignal::new(),
        }
    }

    /// Runs a prepared request through the chain.
    pub async fn call(&self, request: Request) -> HandlerResult {
        let chain = self.chain.read().clone();
        chain.call(request).await
    }

    /// Calls `method` with `request` and returns the typed answer.
    ///
    /// A domain error carried in the response is returned as
    /// [`Error::App`]. An answer of the wrong type is an internal error.
    pub async fn invoke<Req, Resp>(
        &self,
        context: Context,
        method: &str,
        request: Req,
    ) -> Result<Resp, Error>
    where
        Req: Any + Send + Sync,
        Resp: Any,
    {
        let request = Request::new(Protocol::Rpc, method, method, Payload::native(request))
            .with_context(context);

        let (payload, error, _, _) = self.call(request).await?.into_parts();
        if let Some(err) = error {
            return Err(err.into());
        }
        payload.downcast::<Resp>().map_err(|_| {
            Error::internal(format!(
                "{method} did not answer with {}",
                type_name::<Resp>()
            ))
        })
    }
}

impl Service for RpcService {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Rpc
    }

    fn use_middlewares(&self, middlewares: &[BoxedMiddleware]) {
        *self.chain.write() = compose(Arc::clone(&self.handler), middlewares);
    }

    fn start(&self) -> BoxFuture<'_, ServiceResult> {
        Box::pin(async move {
            info!(service = %self.name, "RPC service ready");
            self.shutdown.recv().await;
            Ok(())
        })
    }

    fn stop(&self, _ctx: Context) -> BoxFuture<'_, ServiceResult> {
        self.shutdown.trigger();
        Box::pin(async { Ok(()) })
    }
}

impl std::fmt::Debug for RpcService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcService")
            .field("name", &self.name)
            .field("chain", &*self.chain.read())
            .finish_non_exhaustive()
    }
}

/// Wraps a typed function as an RPC handler.
///
/// The request payload must be a native `Req`; the answer is sent back as a
/// native `Resp`.
pub fn unary<Req, Resp, F, Fut>(func: F) -> impl Handler
where
    Req: Any + Send + Sync,
    Resp: Any + Send + Sync,
    F: Fn(Context, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Resp, Error>> + Send + 'static,
{
    let func = Arc::new(func);
    FnHandler::new(move |request: Request| {
        let func = Arc::clone(&func);
        async move {
            let method = request.method().to_string();
            let (context, payload) = request.into_parts();
            let value = payload.downcast::<Req>().map_err(|_| {
                Error::internal(format!("{method} expects {}", type_name::<Req>()))
            })?;
            func(context, value).await.map(Response::native)
        }
    })
}
