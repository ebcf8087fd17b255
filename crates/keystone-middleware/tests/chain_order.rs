//! Ordering guarantees of composed middleware.

use keystone_core::{BoxFuture, Handler, HandlerResult, Payload, Protocol, Request, Response};
use keystone_middleware::{compose, BoxedMiddleware, Middleware, Next};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

type Trace = Arc<Mutex<Vec<String>>>;

struct Recording {
    label: String,
    trace: Trace,
}

impl Middleware for Recording {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            self.trace.lock().push(format!("in:{}", self.label));
            let result = next.run(request).await;
            self.trace.lock().push(format!("out:{}", self.label));
            result
        })
    }
}

struct RecordingHandler {
    trace: Trace,
}

impl Handler for RecordingHandler {
    fn call(&self, _request: Request) -> BoxFuture<'_, HandlerResult> {
        Box::pin(async move {
            self.trace.lock().push("handler".to_string());
            Ok(Response::empty())
        })
    }
}

fn build(n: usize, trace: &Trace) -> (Arc<dyn Handler>, Vec<BoxedMiddleware>) {
    let handler: Arc<dyn Handler> = Arc::new(RecordingHandler {
        trace: Arc::clone(trace),
    });
    let middlewares = (0..n)
        .map(|i| {
            Arc::new(Recording {
                label: format!("m{i}"),
                trace: Arc::clone(trace),
            }) as BoxedMiddleware
        })
        .collect();
    (handler, middlewares)
}

fn expected(n: usize) -> Vec<String> {
    let mut out: Vec<String> = (0..n).map(|i| format!("in:m{i}")).collect();
    out.push("handler".to_string());
    out.extend((0..n).rev().map(|i| format!("out:m{i}")));
    out
}

fn request() -> Request {
    Request::new(Protocol::Http, "GET", "/", Payload::Empty)
}

#[tokio::test]
async fn first_registered_is_outermost() {
    let trace = Trace::default();
    let (handler, middlewares) = build(3, &trace);
    let chain = compose(handler, &middlewares);

    chain.call(request()).await.unwrap();

    assert_eq!(
        *trace.lock(),
        vec!["in:m0", "in:m1", "in:m2", "handler", "out:m2", "out:m1", "out:m0"]
    );
}

proptest! {
    #[test]
    fn order_holds_for_any_length(n in 0usize..12) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let trace = Trace::default();
        let (handler, middlewares) = build(n, &trace);
        let chain = compose(handler, &middlewares);

        runtime.block_on(chain.call(request())).unwrap();

        prop_assert_eq!(trace.lock().clone(), expected(n));
    }
}
