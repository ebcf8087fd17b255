//! Message client and broker service over the in-memory transport.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use keystone_broker::{
    decode_reply, subscriber, use_case, BrokerError, BrokerService, MemoryTransport,
    MessageClient, Transport, GATEWAY_QUEUE, INDEX_QUEUE,
};
use keystone_core::{
    AppError, BoxFuture, Context, Error, HandlerResult, Protocol, Request, CORRELATION_ID_KEY,
};
use keystone_middleware::{Middleware, Next};
use keystone_server::{Platform, ServiceState, ShutdownSignal};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Order {
    id: u64,
    total: u32,
}

fn client() -> (MemoryTransport, MessageClient) {
    let transport = MemoryTransport::new();
    (transport.clone(), MessageClient::new(transport))
}

#[tokio::test]
async fn test_echo_round_trip() {
    let (_, client) = client();
    let _echo = client
        .subscribe_operation("echo", |_ctx: Context, payload: Bytes| async move {
            Ok::<_, Error>(payload)
        })
        .await
        .unwrap();

    let order = Order { id: 1, total: 30 };
    let reply = client
        .request_operation(&Context::new(), "echo", &order)
        .await
        .unwrap();
    assert_eq!(reply, serde_json::to_vec(&order).unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_silent_subscriber_times_out() {
    let (_, client) = client();
    assert_eq!(client.request_timeout(), Duration::from_secs(2));

    let _silent = client
        .subscribe_operation("orders.get", |_ctx: Context, _payload: Bytes| async move {
            Err::<Bytes, _>(Error::internal("store down"))
        })
        .await
        .unwrap();

    let started = tokio::time::Instant::now();
    let err = client
        .request_operation(&Context::new(), "orders.get", &1)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(started.elapsed() >= Duration::from_secs(2));

    let err = Error::from(err);
    assert_eq!(err.as_app(), Some(&AppError::mq_timeout()));
}

#[tokio::test]
async fn test_cancelled_context_aborts_wait() {
    let (_, client) = client();
    let _silent = client
        .subscribe_operation("slow", |_ctx: Context, _payload: Bytes| async move {
            std::future::pending::<Result<Bytes, Error>>().await
        })
        .await
        .unwrap();

    let context = Context::new();
    let canceller = context.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let err = client
        .request_operation_with_timeout(&context, "slow", &(), Duration::from_secs(30))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Cancelled));
}

#[tokio::test]
async fn test_publish_sets_fresh_correlation_id() {
    let (transport, client) = client();
    let mut raw = transport.queue_subscribe("orders.created", "audit").await.unwrap();

    let first = client
        .publish_event(&Context::new(), "orders.created", &Order { id: 2, total: 5 })
        .await
        .unwrap();
    let second = client
        .publish_event(&Context::new(), "orders.created", &Order { id: 3, total: 5 })
        .await
        .unwrap();
    assert_ne!(first, second);
    assert!(uuid::Uuid::parse_str(&first).is_ok());

    let message = raw.next().await.unwrap();
    assert_eq!(message.header(CORRELATION_ID_KEY), Some(first.as_str()));
    let order: Order = serde_json::from_slice(&message.payload).unwrap();
    assert_eq!(order.id, 2);
}

#[tokio::test]
async fn test_failing_handler_keeps_subscription() {
    let (_, client) = client();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = client
        .subscribe_event(
            "orders.created",
            subscriber(move |_ctx, order: Order| {
                let tx = tx.clone();
                async move {
                    tx.send(order.id).ok();
                    if order.id == 1 {
                        return Err(AppError::query_invalid("rejected"));
                    }
                    Ok(())
                }
            }),
        )
        .await
        .unwrap();
    assert_eq!(handle.queue(), GATEWAY_QUEUE);

    for id in [1, 2] {
        client
            .publish_event(&Context::new(), "orders.created", &Order { id, total: 1 })
            .await
            .unwrap();
    }
    let mut seen = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
    seen.sort_unstable();
    assert_eq!(seen, [1, 2]);
    assert!(handle.is_active());

    handle.unsubscribe().await;
}

#[tokio::test]
async fn test_index_listener_uses_query_group() {
    let (transport, client) = client();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let handle = client
        .listen_index_operation("orders.index", move |ctx: Context, payload: Bytes| {
            let tx = tx.clone();
            async move {
                tx.send((ctx.correlation_id().map(str::to_string), payload)).ok();
                Ok::<_, Error>(())
            }
        })
        .await
        .unwrap();
    assert_eq!(handle.queue(), INDEX_QUEUE);

    let id = client
        .publish_event(&Context::new(), "orders.index", &7)
        .await
        .unwrap();
    let (correlation_id, payload) = rx.recv().await.unwrap();
    assert_eq!(correlation_id, Some(id));
    assert_eq!(payload, "7");

    handle.unsubscribe().await;
    assert_eq!(transport.subscriber_count("orders.index"), 0);
}

struct Tagging {
    seen: Arc<Mutex<Vec<(Protocol, String, Option<String>)>>>,
}

impl Middleware for Tagging {
    fn name(&self) -> &'static str {
        "tagging"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        self.seen.lock().push((
            request.protocol(),
            request.path().to_string(),
            request.metadata_value(CORRELATION_ID_KEY).map(str::to_string),
        ));
        next.run(request)
    }
}

#[tokio::test]
async fn test_broker_service_runs_through_chain() {
    let (transport, client) = client();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let service = BrokerService::new("orders", client.clone())
        .operation(
            "orders.get",
            use_case(|_ctx, id: u64| async move {
                if id == 0 {
                    return Err(AppError::query_not_found("order not found"));
                }
                Ok(Order { id, total: 99 })
            }),
        )
        .event(
            "orders.created",
            subscriber(|_ctx, _order: Order| async { Ok::<_, AppError>(()) }),
        );

    let signal = ShutdownSignal::new();
    let platform = Arc::new(
        Platform::builder()
            .shutdown_signal(signal.clone())
            .middleware(Tagging {
                seen: Arc::clone(&seen),
            })
            .service(service)
            .build(),
    );
    let runner = Arc::clone(&platform);
    let run = tokio::spawn(async move { runner.run().await });

    tokio::time::timeout(Duration::from_secs(5), async {
        while transport.subscriber_count("orders.get") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let context = Context::new().with_correlation_id("corr-1");
    let reply = client
        .request_operation(&context, "orders.get", &5_u64)
        .await
        .unwrap();
    assert_eq!(
        decode_reply::<Order>(&reply).unwrap(),
        Order { id: 5, total: 99 }
    );

    let reply = client
        .request_operation(&Context::new(), "orders.get", &0_u64)
        .await
        .unwrap();
    let err = decode_reply::<Order>(&reply).unwrap_err();
    assert!(err.as_app().is_some_and(AppError::is_query_not_found));

    assert_eq!(
        seen.lock()[0],
        (
            Protocol::Broker,
            "orders.get".to_string(),
            Some("corr-1".to_string())
        )
    );

    signal.trigger();
    run.await.unwrap().unwrap();
    platform.shutdown().await.unwrap();
    assert_eq!(platform.service_state("orders"), Some(ServiceState::Stopped));
    assert_eq!(transport.subscriber_count("orders.get"), 0);
    assert_eq!(transport.subscriber_count("orders.created"), 0);
}
