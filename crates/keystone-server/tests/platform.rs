//! Platform orchestration tests against in-process services.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use keystone_core::{BoxFuture, Context, FnHandler, HandlerResult, Protocol, Request, Response};
use keystone_middleware::{BoxedMiddleware, Middleware, Next};
use keystone_server::{
    json_success, HttpService, Lifecycle, Platform, PlatformError, Service, ServiceError,
    ServiceResult, ServiceState, ShutdownSignal,
};
use parking_lot::Mutex;
use tokio::net::TcpStream;

type Log = Arc<Mutex<Vec<String>>>;

#[derive(Default, Clone, Copy)]
enum Fault {
    #[default]
    None,
    Init,
    Start,
    HangOnStop,
    /// `start` ignores stop requests and returns after ten seconds.
    SlowStart,
}

struct FakeService {
    name: &'static str,
    fault: Fault,
    signal: ShutdownSignal,
    middlewares: AtomicUsize,
    stop_window: Mutex<Option<Duration>>,
    log: Log,
}

impl FakeService {
    fn new(name: &'static str, log: &Log) -> Self {
        Self::with_fault(name, Fault::None, log)
    }

    fn with_fault(name: &'static str, fault: Fault, log: &Log) -> Self {
        Self {
            name,
            fault,
            signal: ShutdownSignal::new(),
            middlewares: AtomicUsize::new(0),
            stop_window: Mutex::new(None),
            log: Arc::clone(log),
        }
    }

    fn record(&self, event: &str) {
        self.log.lock().push(format!("{}:{event}", self.name));
    }
}

impl Service for FakeService {
    fn name(&self) -> &str {
        self.name
    }

    fn protocol(&self) -> Protocol {
        Protocol::Broker
    }

    fn init(&self) -> BoxFuture<'_, ServiceResult> {
        Box::pin(async move {
            self.record("init");
            match self.fault {
                Fault::Init => Err(ServiceError::msg("init refused")),
                _ => Ok(()),
            }
        })
    }

    fn use_middlewares(&self, middlewares: &[BoxedMiddleware]) {
        self.middlewares.store(middlewares.len(), Ordering::SeqCst);
    }

    fn start(&self) -> BoxFuture<'_, ServiceResult> {
        Box::pin(async move {
            self.record("start");
            if matches!(self.fault, Fault::Start) {
                return Err(ServiceError::msg("start refused"));
            }
            if matches!(self.fault, Fault::SlowStart) {
                tokio::time::sleep(Duration::from_secs(10)).await;
                self.record("finished");
                return Ok(());
            }
            self.signal.recv().await;
            Ok(())
        })
    }

    fn stop(&self, ctx: Context) -> BoxFuture<'_, ServiceResult> {
        self.record("stop");
        *self.stop_window.lock() = ctx.remaining();
        let hang = matches!(self.fault, Fault::HangOnStop);
        if !hang {
            self.signal.trigger();
        }
        Box::pin(async move {
            if hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        })
    }
}

struct Passthrough;

impl Middleware for Passthrough {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, HandlerResult> {
        next.run(request)
    }
}

async fn wait_for(platform: &Platform, name: &str, state: ServiceState) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while platform.service_state(name) != Some(state) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{name} never reached {state}"));
}

#[tokio::test]
async fn test_run_and_shutdown() {
    let log = Log::default();
    let transitions = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&transitions);
    let signal = ShutdownSignal::new();

    let platform = Arc::new(
        Platform::builder()
            .shutdown_signal(signal.clone())
            .service(FakeService::new("a", &log))
            .service(FakeService::new("b", &log))
            .on_state_change(move |name, from, to| seen.lock().push((name.to_string(), from, to)))
            .build(),
    );

    let runner = Arc::clone(&platform);
    let run = tokio::spawn(async move { runner.run().await });
    wait_for(&platform, "a", ServiceState::Running).await;
    wait_for(&platform, "b", ServiceState::Running).await;
    assert!(platform.health().is_healthy());

    signal.trigger();
    run.await.unwrap().unwrap();
    platform.shutdown().await.unwrap();

    assert_eq!(
        platform.states(),
        vec![
            ("a".to_string(), ServiceState::Stopped),
            ("b".to_string(), ServiceState::Stopped),
        ]
    );
    let a: Vec<_> = transitions
        .lock()
        .iter()
        .filter(|(name, _, _)| name == "a")
        .map(|(_, from, to)| (*from, *to))
        .collect();
    assert_eq!(
        a,
        vec![
            (ServiceState::Starting, ServiceState::Running),
            (ServiceState::Running, ServiceState::Stopping),
            (ServiceState::Stopping, ServiceState::Stopped),
        ]
    );
}

#[tokio::test]
async fn test_init_failure_starts_nothing() {
    let log = Log::default();
    let platform = Platform::builder()
        .shutdown_signal(ShutdownSignal::new())
        .service(FakeService::new("a", &log))
        .service(FakeService::with_fault("b", Fault::Init, &log))
        .service(FakeService::new("c", &log))
        .build();

    let err = platform.run().await.unwrap_err();
    assert!(matches!(err, PlatformError::Init { ref service, .. } if service == "b"));
    assert_eq!(*log.lock(), vec!["a:init", "b:init"]);
    assert_eq!(platform.service_state("b"), Some(ServiceState::Failed));
    assert_eq!(platform.service_state("c"), Some(ServiceState::Starting));
}

#[tokio::test]
async fn test_start_failure_is_isolated() {
    let log = Log::default();
    let signal = ShutdownSignal::new();
    let platform = Arc::new(
        Platform::builder()
            .shutdown_signal(signal.clone())
            .service(FakeService::with_fault("broken", Fault::Start, &log))
            .service(FakeService::new("healthy", &log))
            .build(),
    );

    let runner = Arc::clone(&platform);
    let run = tokio::spawn(async move { runner.run().await });
    wait_for(&platform, "broken", ServiceState::Failed).await;
    wait_for(&platform, "healthy", ServiceState::Running).await;

    let health = platform.health();
    assert_eq!(health.status(), "degraded");
    assert_eq!(
        health.service("broken").map(|s| s.state()),
        Some(ServiceState::Failed)
    );

    signal.trigger();
    run.await.unwrap().unwrap();
    platform.shutdown().await.unwrap();
    assert_eq!(platform.service_state("healthy"), Some(ServiceState::Stopped));
    assert_eq!(platform.service_state("broken"), Some(ServiceState::Failed));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_deadline() {
    let log = Log::default();
    let signal = ShutdownSignal::new();
    let quick = Arc::new(FakeService::new("quick", &log));
    let platform = Arc::new(
        Platform::builder()
            .shutdown_signal(signal.clone())
            .shutdown_timeout(Duration::from_secs(2))
            .service(FakeService::with_fault("stuck", Fault::HangOnStop, &log))
            .service_arc(Arc::clone(&quick) as Arc<dyn Service>)
            .build(),
    );

    let runner = Arc::clone(&platform);
    let run = tokio::spawn(async move { runner.run().await });
    wait_for(&platform, "quick", ServiceState::Running).await;
    wait_for(&platform, "stuck", ServiceState::Running).await;
    signal.trigger();
    run.await.unwrap().unwrap();

    let err = platform.shutdown().await.unwrap_err();
    assert!(matches!(err, PlatformError::ShutdownTimeout(d) if d == Duration::from_secs(2)));
    assert_eq!(platform.service_state("quick"), Some(ServiceState::Stopped));
    assert_eq!(platform.service_state("stuck"), Some(ServiceState::Stopping));
    assert_eq!(*quick.stop_window.lock(), Some(Duration::from_secs(2)));
}

#[tokio::test(start_paused = true)]
async fn test_overdue_service_is_abandoned_not_killed() {
    let log = Log::default();
    let signal = ShutdownSignal::new();
    let platform = Arc::new(
        Platform::builder()
            .shutdown_signal(signal.clone())
            .shutdown_timeout(Duration::from_secs(2))
            .service(FakeService::with_fault("slow", Fault::SlowStart, &log))
            .build(),
    );

    let runner = Arc::clone(&platform);
    let run = tokio::spawn(async move { runner.run().await });
    wait_for(&platform, "slow", ServiceState::Running).await;
    signal.trigger();
    run.await.unwrap().unwrap();

    let err = platform.shutdown().await.unwrap_err();
    assert!(matches!(err, PlatformError::ShutdownTimeout(_)));
    assert!(!log.lock().contains(&"slow:finished".to_string()));

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(log.lock().contains(&"slow:finished".to_string()));
    assert_eq!(platform.service_state("slow"), Some(ServiceState::Stopped));
}

#[tokio::test]
async fn test_middleware_and_hooks() {
    let log = Log::default();
    let hooks = Arc::clone(&log);
    let hooks_down = Arc::clone(&log);
    let lifecycle = Lifecycle::new()
        .on_startup("audit", move || {
            hooks.lock().push("hook:startup".into());
            std::future::ready(Ok(()))
        })
        .on_shutdown("audit", move || {
            hooks_down.lock().push("hook:shutdown".into());
            std::future::ready(Ok(()))
        });

    let service = Arc::new(FakeService::new("svc", &log));
    let signal = ShutdownSignal::new();
    let platform = Arc::new(
        Platform::builder()
            .shutdown_signal(signal.clone())
            .middleware(Passthrough)
            .lifecycle(lifecycle)
            .service_arc(Arc::clone(&service) as Arc<dyn Service>)
            .build(),
    );
    platform.use_middleware(Passthrough).unwrap();

    let runner = Arc::clone(&platform);
    let run = tokio::spawn(async move { runner.run().await });
    wait_for(&platform, "svc", ServiceState::Running).await;
    assert!(matches!(
        platform.use_middleware(Passthrough),
        Err(PlatformError::AlreadyRunning)
    ));
    assert_eq!(service.middlewares.load(Ordering::SeqCst), 2);

    signal.trigger();
    run.await.unwrap().unwrap();
    platform.shutdown().await.unwrap();

    assert_eq!(
        *log.lock(),
        vec!["hook:startup", "svc:init", "svc:start", "svc:stop", "hook:shutdown"]
    );
}

#[tokio::test]
async fn test_http_service_end_to_end() {
    let handler = FnHandler::new(|request: Request| async move {
        match (request.method(), request.path()) {
            ("GET", "/ping") => json_success(&"pong"),
            _ => Ok(Response::from_error(keystone_core::AppError::query_not_found(
                "no route",
            ))),
        }
    });
    let http = Arc::new(HttpService::new("api", "127.0.0.1:0", handler));
    let signal = ShutdownSignal::new();
    let platform = Arc::new(
        Platform::builder()
            .shutdown_signal(signal.clone())
            .service_arc(Arc::clone(&http) as Arc<dyn Service>)
            .build(),
    );

    let runner = Arc::clone(&platform);
    let run = tokio::spawn(async move { runner.run().await });
    wait_for(&platform, "api", ServiceState::Running).await;
    let addr = http.local_addr().unwrap();
    assert_eq!(
        platform.health().service("api").unwrap().metadata()["addr"],
        addr.to_string()
    );

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(conn);

    let send = |path: &str| {
        http::Request::builder()
            .uri(path)
            .header("host", addr.to_string())
            .body(Empty::<Bytes>::new())
            .unwrap()
    };

    sender.ready().await.unwrap();
    let response = sender.send_request(send("/ping")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"success":true,"data":"pong"}"#);

    sender.ready().await.unwrap();
    let response = sender.send_request(send("/missing")).await.unwrap();
    assert_eq!(response.status(), 404);
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], br#"{"success":false,"error":"no route"}"#);
    drop(sender);

    signal.trigger();
    run.await.unwrap().unwrap();
    platform.shutdown().await.unwrap();
    assert_eq!(platform.service_state("api"), Some(ServiceState::Stopped));
}
