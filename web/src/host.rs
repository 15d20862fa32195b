//! Service and worker host lifecycle.
//!
//! [`ServiceHost`] mounts domain services behind the request pipeline and
//! serves them over HTTP/1.1:
//!
//! 1. Build the router (host endpoints, service routes, fallback, layers).
//! 2. Bind the listener and accept connections, each served on its own task
//!    with a read-header timeout.
//! 3. When the shutdown future resolves, stop accepting and drain in-flight
//!    connections up to the shutdown deadline.
//!
//! [`WorkerHost`] has the same construction but no listener: it runs
//! registered background tasks until shutdown and then drains them.

use crate::handlers::{health, healthz, metrics, readyz};
use crate::middleware::{not_found, request_id_layer, track_metrics};
use crate::service::DomainService;
use crate::state::HostState;
use axum::{Router, middleware::from_fn_with_state, routing::get};
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::server::graceful::GracefulShutdown;
use hyper_util::service::TowerToHyperService;
use service_spine_core::environment::Clock;
use service_spine_core::health::{ConfiguredDependency, HealthCheck};
use service_spine_runtime::{Config, ConfigError, HttpMetrics, MetricsRegistry};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, debug, info, warn};

/// Errors that end a host's run loop.
#[derive(Error, Debug)]
pub enum HostError {
    /// Configuration could not be turned into a listen address.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },

    /// The listener failed with a non-transient error.
    #[error("listener failed: {0}")]
    Accept(#[source] io::Error),

    /// A background task panicked or was cancelled abnormally.
    #[error("worker task failed: {0}")]
    Worker(String),
}

/// HTTP host for one or more domain services.
///
/// ```ignore
/// let host = ServiceHost::new(config, Arc::new(SystemClock))
///     .mount(CacheService::new(...))
///     .mount(ObservabilityService::new(...));
/// host.run(shutdown_signal()).await?;
/// ```
pub struct ServiceHost {
    config: Config,
    clock: Arc<dyn Clock>,
    metrics: HttpMetrics,
    checks: Vec<Arc<dyn HealthCheck>>,
    services: Vec<Arc<dyn DomainService>>,
}

impl std::fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHost")
            .field("service_id", &self.config.service_id)
            .field("services", &self.services.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ServiceHost {
    /// Create a host with a fresh metrics registry.
    ///
    /// The configured external dependencies (`database`, `redis`, `kafka`)
    /// are registered as informational health checks.
    #[must_use]
    pub fn new(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self::with_registry(config, clock, MetricsRegistry::new())
    }

    /// Create a host recording into an existing registry.
    #[must_use]
    pub fn with_registry(config: Config, clock: Arc<dyn Clock>, registry: MetricsRegistry) -> Self {
        let metrics = HttpMetrics::new(registry, config.service_id.clone());
        let deps = &config.dependencies;
        let checks: Vec<Arc<dyn HealthCheck>> = vec![
            Arc::new(ConfiguredDependency::new("database", deps.database_url.clone())),
            Arc::new(ConfiguredDependency::new("redis", deps.redis_url.clone())),
            Arc::new(ConfiguredDependency::new("kafka", deps.kafka_brokers.clone())),
        ];
        Self {
            config,
            clock,
            metrics,
            checks,
            services: Vec::new(),
        }
    }

    /// Mount a domain service.
    #[must_use]
    pub fn mount(mut self, service: impl DomainService) -> Self {
        self.checks.extend(service.health_checks());
        self.services.push(Arc::new(service));
        self
    }

    /// Add a health check reported by `/health`.
    #[must_use]
    pub fn with_health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.checks.push(check);
        self
    }

    /// Configuration the host was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Request metrics recorder.
    #[must_use]
    pub const fn metrics(&self) -> &HttpMetrics {
        &self.metrics
    }

    /// The complete application router.
    ///
    /// Host endpoints: `/healthz`, `/readyz`, `/health`, `/metrics`. Unknown
    /// paths get a `404 not_found` envelope.
    #[must_use]
    pub fn router(&self) -> Router {
        let state = HostState::new(
            &self.config.service_id,
            self.metrics.clone(),
            self.checks.clone(),
            self.services.clone(),
            Arc::clone(&self.clock),
        );

        let mut app = Router::new()
            .route("/healthz", get(healthz))
            .route("/readyz", get(readyz))
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            .with_state(state);

        for service in &self.services {
            debug!(service = service.name(), "Mounting service routes");
            app = app.merge(service.routes());
        }

        app.fallback(not_found)
            .layer(from_fn_with_state(self.metrics.clone(), track_metrics))
            .layer(TraceLayer::new_for_http())
            .layer(request_id_layer())
    }

    /// Bind the configured address and serve until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] if the address is invalid, binding fails, or the
    /// listener fails with a non-transient error.
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send) -> Result<(), HostError> {
        let addr = self.config.bind_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HostError::Bind { addr, source })?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Accept`] for the first listener error that is not
    /// a transient per-connection failure.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send,
    ) -> Result<(), HostError> {
        let app = self.router();
        let graceful = GracefulShutdown::new();
        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .header_read_timeout(self.config.read_header_timeout());

        if let Ok(addr) = listener.local_addr() {
            info!(service_id = %self.config.service_id, %addr, "Service host listening");
        }

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested; no longer accepting connections");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(error) if is_transient(&error) => {
                            debug!(error = %error, "Transient accept error");
                            continue;
                        }
                        Err(error) => return Err(HostError::Accept(error)),
                    };

                    let service = TowerToHyperService::new(app.clone());
                    let connection = graceful.watch(builder.serve_connection(TokioIo::new(stream), service));
                    tokio::spawn(async move {
                        if let Err(error) = connection.await {
                            debug!(%peer, error = %error, "Connection closed with error");
                        }
                    });
                }
            }
        }
        drop(listener);

        drain(graceful, self.config.shutdown_timeout()).await;
        Ok(())
    }
}

async fn drain(graceful: GracefulShutdown, deadline: Duration) {
    tokio::select! {
        () = graceful.shutdown() => info!("All connections drained"),
        () = tokio::time::sleep(deadline) => {
            warn!(deadline_ms = deadline.as_millis(), "Shutdown deadline reached; dropping remaining connections");
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

/// Cancellation handle given to worker tasks.
#[derive(Debug, Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    /// Resolve once shutdown has been requested.
    pub async fn cancelled(&mut self) {
        // A dropped sender means the host is gone; treat it as cancelled.
        let _ = self.0.wait_for(|cancelled| *cancelled).await;
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Host for schedule-driven background tasks.
///
/// ```ignore
/// let mut worker = WorkerHost::new(config);
/// worker.spawn("outbox-relay", |mut cancel| async move {
///     loop {
///         tokio::select! {
///             () = cancel.cancelled() => break,
///             () = tokio::time::sleep(Duration::from_secs(1)) => relay_once().await,
///         }
///     }
/// });
/// worker.run(shutdown_signal()).await?;
/// ```
#[derive(Debug)]
pub struct WorkerHost {
    config: Config,
    tasks: JoinSet<()>,
    cancel: watch::Sender<bool>,
}

impl WorkerHost {
    /// Create a worker host with no tasks.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            config,
            tasks: JoinSet::new(),
            cancel,
        }
    }

    /// Number of tasks still registered.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Start a background task. It must return promptly once its
    /// [`Cancellation`] fires.
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(Cancellation) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancellation = Cancellation(self.cancel.subscribe());
        let span = tracing::info_span!("worker_task", task = name);
        self.tasks.spawn(task(cancellation).instrument(span));
        debug!(task = name, "Worker task started");
    }

    /// Wait for `shutdown`, cancel every task, and drain them within the
    /// shutdown deadline.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Worker`] for the first task that panicked.
    pub async fn run(mut self, shutdown: impl Future<Output = ()> + Send) -> Result<(), HostError> {
        info!(service_id = %self.config.service_id, tasks = self.tasks.len(), "Worker host started");
        shutdown.await;
        info!("Shutdown requested; cancelling worker tasks");
        self.cancel.send_replace(true);

        let deadline = self.config.shutdown_timeout();
        let mut first_failure = None;
        let drained = tokio::time::timeout(deadline, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(error) = joined {
                    warn!(error = %error, "Worker task failed");
                    first_failure.get_or_insert_with(|| error.to_string());
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                deadline_ms = deadline.as_millis(),
                remaining = self.tasks.len(),
                "Shutdown deadline reached; aborting worker tasks"
            );
            self.tasks.abort_all();
        }

        first_failure.map_or(Ok(()), |failure| Err(HostError::Worker(failure)))
    }
}

/// Resolve on Ctrl+C or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use service_spine_testing::test_clock;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    fn config() -> Config {
        Config {
            service_id: "host-test".into(),
            host: "127.0.0.1".into(),
            port: 0,
            shutdown_timeout_seconds: 1,
            ..Config::default()
        }
    }

    async fn raw_get(addr: SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_serves_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();

        let host = ServiceHost::new(config(), Arc::new(test_clock()));
        let server = tokio::spawn(host.serve(listener, async {
            let _ = stopped.await;
        }));

        let response = raw_get(addr, "/healthz").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.contains(r#"{"status":"ok"}"#));
        assert!(response.to_ascii_lowercase().contains("x-request-id: req-"));

        let response = raw_get(addr, "/metrics").await;
        assert!(response.contains("http_requests_total{"));

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_router_sets_single_request_id() {
        use service_spine_testing::TestRequest;
        use tower::ServiceExt;

        let router = ServiceHost::new(config(), Arc::new(test_clock())).router();

        let synthesized = router
            .clone()
            .oneshot(TestRequest::get("/healthz").build())
            .await
            .unwrap();
        let ids: Vec<_> = synthesized.headers().get_all("x-request-id").iter().collect();
        assert_eq!(ids.len(), 1);
        assert!(ids[0].to_str().unwrap().starts_with("req-"));

        let echoed = router
            .oneshot(TestRequest::get("/healthz").request_id("req-given").build())
            .await
            .unwrap();
        let ids: Vec<&str> = echoed
            .headers()
            .get_all("x-request-id")
            .iter()
            .map(|value| value.to_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["req-given"]);
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_host() {
        let config = Config {
            host: "not an ip".into(),
            ..config()
        };
        let result = ServiceHost::new(config, Arc::new(test_clock()))
            .run(std::future::ready(()))
            .await;
        assert!(matches!(result, Err(HostError::Config(_))));
    }

    #[tokio::test]
    async fn test_worker_tasks_see_cancellation() {
        let observed = Arc::new(AtomicBool::new(false));
        let mut worker = WorkerHost::new(config());
        let flag = Arc::clone(&observed);
        worker.spawn("waiter", |mut cancel| async move {
            cancel.cancelled().await;
            flag.store(cancel.is_cancelled(), Ordering::SeqCst);
        });
        assert_eq!(worker.task_count(), 1);

        assert_ok!(worker.run(std::future::ready(())).await);
        assert!(observed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_worker_reports_panicked_task() {
        let mut worker = WorkerHost::new(config());
        worker.spawn("broken", |_| async {
            let ready: Option<u8> = None;
            assert!(ready.is_some(), "boom");
        });
        tokio::task::yield_now().await;

        let error = assert_err!(worker.run(std::future::ready(())).await);
        assert!(matches!(error, HostError::Worker(_)));
    }

    #[tokio::test]
    async fn test_worker_aborts_tasks_past_deadline() {
        let mut worker = WorkerHost::new(config());
        worker.spawn("stubborn", |_| std::future::pending::<()>());
        let started = tokio::time::Instant::now();
        worker.run(std::future::ready(())).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
