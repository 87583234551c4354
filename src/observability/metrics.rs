//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Install the Prometheus recorder behind the `metrics` facade
//! - Push mode: send the rendered registry to a push gateway on an interval
//!   and once more on shutdown
//! - Pull mode: serve `/metrics` for a scraper
//! - Define the echo service's metrics
//!
//! # Metrics
//! - `echo_requests_total` (counter): requests by route and status
//! - `echo_request_duration_seconds` (histogram): request latency
//! - `echo_client_requests_total` (counter): client calls by outcome
//! - `process_*` / `runtime_*` (gauges): push mode only, see `runtime.rs`
//!
//! # Design Decisions
//! - The provider records against its own recorder, so nothing depends on
//!   the process-global one being installed
//! - At most one recorder per process is installed globally; a second
//!   install is a setup error
//! - Background tasks share a private shutdown signal that the provider
//!   triggers before the final push

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::State, routing::get, Router};
use metrics::{Counter, Gauge, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::config::{CollectorConfig, MetricsConfig, MetricsMode};
use crate::lifecycle::{ProviderError, Shutdown, ShutdownSignal, Subsystem, TelemetryProvider};
use crate::observability::exporter::{Encoder, ExportError, Exporter, HttpExporter, HttpExporterConfig};
use crate::observability::registry::{ErrorHandler, ProviderRegistry};
use crate::observability::runtime;

pub const REQUESTS_TOTAL: &str = "echo_requests_total";
pub const REQUEST_DURATION: &str = "echo_request_duration_seconds";
pub const CLIENT_REQUESTS_TOTAL: &str = "echo_client_requests_total";

/// The Prometheus recorder, shared by the provider, its background tasks
/// and, optionally, the global `metrics` facade.
#[derive(Clone)]
pub struct SharedRecorder(Arc<PrometheusRecorder>);

impl SharedRecorder {
    pub fn new(recorder: PrometheusRecorder) -> Self {
        Self(Arc::new(recorder))
    }

    pub fn handle(&self) -> PrometheusHandle {
        self.0.handle()
    }

    /// Run `f` with this recorder behind the `metrics` macros.
    pub fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        ::metrics::with_local_recorder(self, f)
    }
}

impl Recorder for SharedRecorder {
    fn describe_counter(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.0.describe_counter(key, unit, description)
    }

    fn describe_gauge(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.0.describe_gauge(key, unit, description)
    }

    fn describe_histogram(&self, key: KeyName, unit: Option<Unit>, description: SharedString) {
        self.0.describe_histogram(key, unit, description)
    }

    fn register_counter(&self, key: &Key, metadata: &Metadata<'_>) -> Counter {
        self.0.register_counter(key, metadata)
    }

    fn register_gauge(&self, key: &Key, metadata: &Metadata<'_>) -> Gauge {
        self.0.register_gauge(key, metadata)
    }

    fn register_histogram(&self, key: &Key, metadata: &Metadata<'_>) -> Histogram {
        self.0.register_histogram(key, metadata)
    }
}

/// Prometheus text exposition format.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusText;

impl Encoder<String> for PrometheusText {
    fn content_type(&self) -> &'static str {
        "text/plain; version=0.0.4"
    }

    fn encode(&self, batch: &[String]) -> Result<Vec<u8>, ExportError> {
        Ok(batch.concat().into_bytes())
    }
}

/// Owns the recorder and the background metric tasks.
pub struct MeterProvider {
    recorder: SharedRecorder,
    handle: PrometheusHandle,
    pusher: Option<Arc<Pusher>>,
    stop: Shutdown,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for MeterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeterProvider")
            .field("push", &self.pusher.is_some())
            .field("stopped", &self.stop.is_triggered())
            .finish()
    }
}

impl MeterProvider {
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Current registry in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Run `f` with this provider's recorder behind the `metrics` macros.
    pub fn record<T>(&self, f: impl FnOnce() -> T) -> T {
        self.recorder.scoped(f)
    }

    /// Record one handled server request.
    pub fn record_request(&self, route: &str, status: u16, latency: Duration) {
        self.record(|| {
            ::metrics::counter!(REQUESTS_TOTAL, "route" => route.to_string(), "status" => status.to_string())
                .increment(1);
            ::metrics::histogram!(REQUEST_DURATION, "route" => route.to_string())
                .record(latency.as_secs_f64());
        })
    }

    /// Record one client call.
    pub fn record_client_request(&self, outcome: &'static str) {
        self.record(|| {
            ::metrics::counter!(CLIENT_REQUESTS_TOTAL, "outcome" => outcome).increment(1);
        })
    }

    fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(task);
    }
}

#[async_trait]
impl TelemetryProvider for MeterProvider {
    async fn force_flush(&self) -> Result<(), ProviderError> {
        match &self.pusher {
            Some(pusher) => Ok(pusher.push(&self.handle).await?),
            None => Ok(()),
        }
    }

    async fn shutdown(&self) -> Result<(), ProviderError> {
        if self.stop.is_triggered() {
            return Err(ProviderError::AlreadyShutdown);
        }
        self.stop.trigger();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                return Err(ProviderError::Other(format!("metrics task failed: {}", e)));
            }
        }

        match &self.pusher {
            Some(pusher) => Ok(pusher.push(&self.handle).await?),
            None => Ok(()),
        }
    }
}

/// Sends the rendered registry to the push gateway.
struct Pusher {
    exporter: HttpExporter<PrometheusText>,
    timeout: Duration,
}

impl Pusher {
    async fn push(&self, handle: &PrometheusHandle) -> Result<(), ExportError> {
        handle.run_upkeep();
        match time::timeout(self.timeout, self.exporter.export(vec![handle.render()])).await {
            Ok(result) => result,
            Err(_) => Err(ExportError::Timeout(self.timeout)),
        }
    }
}

async fn push_loop(
    pusher: Arc<Pusher>,
    handle: PrometheusHandle,
    interval: Duration,
    errors: ErrorHandler,
    mut signal: ShutdownSignal,
) {
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = signal.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = pusher.push(&handle).await {
                    errors.handle(&e);
                }
            }
        }
    }
}

async fn scrape(State(handle): State<PrometheusHandle>) -> String {
    handle.run_upkeep();
    handle.render()
}

/// Router serving the registry at `/metrics`.
pub fn scrape_router(handle: PrometheusHandle) -> Router {
    Router::new()
        .route("/metrics", get(scrape))
        .with_state(handle)
}

fn bind(address: &str) -> Result<tokio::net::TcpListener, ProviderError> {
    let bind_error = |source| ProviderError::Bind {
        address: address.to_string(),
        source,
    };
    let addr: SocketAddr = address
        .parse()
        .map_err(|e| ProviderError::Config(format!("invalid scrape address '{}': {}", address, e)))?;
    let listener = std::net::TcpListener::bind(addr).map_err(bind_error)?;
    listener.set_nonblocking(true).map_err(bind_error)?;
    tokio::net::TcpListener::from_std(listener).map_err(bind_error)
}

/// Starts the meter provider.
#[derive(Debug, Clone)]
pub struct MetricsSubsystem {
    config: MetricsConfig,
    collector: CollectorConfig,
}

impl MetricsSubsystem {
    pub fn new(config: MetricsConfig, collector: CollectorConfig) -> Self {
        Self { config, collector }
    }
}

impl Subsystem for MetricsSubsystem {
    fn name(&self) -> &'static str {
        "meter"
    }

    fn start(&self, registry: &ProviderRegistry) -> Result<Arc<dyn TelemetryProvider>, ProviderError> {
        let recorder = SharedRecorder::new(PrometheusBuilder::new().build_recorder());
        let handle = recorder.handle();
        if self.config.install_recorder {
            ::metrics::set_global_recorder(recorder.clone())
                .map_err(|_| ProviderError::RecorderInstalled)?;
        }

        let stop = Shutdown::new();
        let errors = registry.error_handler();

        let provider = match self.config.mode {
            MetricsMode::Push => {
                let exporter = HttpExporter::new(
                    &HttpExporterConfig {
                        endpoint: self.config.push_endpoint.clone(),
                        timeout: Duration::from_millis(self.config.export_timeout_ms),
                        insecure: self.collector.insecure,
                        headers: Vec::new(),
                    },
                    PrometheusText,
                )?;
                let pusher = Arc::new(Pusher {
                    exporter,
                    timeout: Duration::from_millis(self.config.export_timeout_ms),
                });
                let provider = MeterProvider {
                    recorder: recorder.clone(),
                    handle: handle.clone(),
                    pusher: Some(pusher.clone()),
                    stop: stop.clone(),
                    tasks: Mutex::new(Vec::new()),
                };
                provider.track(tokio::spawn(push_loop(
                    pusher,
                    handle,
                    Duration::from_millis(self.config.export_interval_ms),
                    errors,
                    stop.subscribe(),
                )));
                provider.track(runtime::spawn_runtime_stats(
                    Duration::from_millis(self.config.runtime_stats_interval_ms),
                    recorder,
                    stop.subscribe(),
                ));
                provider
            }
            MetricsMode::Pull => {
                let listener = bind(&self.config.scrape_address)?;
                let provider = MeterProvider {
                    recorder,
                    handle: handle.clone(),
                    pusher: None,
                    stop: stop.clone(),
                    tasks: Mutex::new(Vec::new()),
                };
                let mut signal = stop.subscribe();
                let address = self.config.scrape_address.clone();
                provider.track(tokio::spawn(async move {
                    let served = axum::serve(listener, scrape_router(handle))
                        .with_graceful_shutdown(async move { signal.cancelled().await })
                        .await;
                    if let Err(e) = served {
                        errors.handle(&ProviderError::Bind { address, source: e });
                    }
                }));
                provider
            }
        };

        let provider = Arc::new(provider);
        registry.set_meter_provider(provider.clone());

        tracing::debug!(mode = ?self.config.mode, "Meter provider started");
        Ok(provider)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_config() -> MetricsConfig {
        MetricsConfig {
            mode: MetricsMode::Pull,
            scrape_address: "127.0.0.1:0".to_string(),
            install_recorder: false,
            ..MetricsConfig::default()
        }
    }

    #[test]
    fn test_prometheus_text_encoding() {
        let body = PrometheusText
            .encode(&["a 1\n".to_string(), "b 2\n".to_string()])
            .unwrap();
        assert_eq!(body, b"a 1\nb 2\n");
        assert!(PrometheusText.content_type().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn test_pull_mode_shutdown_stops_server() {
        let registry = ProviderRegistry::new();
        let subsystem = MetricsSubsystem::new(pull_config(), CollectorConfig::default());

        let provider = subsystem.start(&registry).unwrap();
        assert!(registry.meter_provider().is_some());

        provider.shutdown().await.unwrap();
        assert!(matches!(
            provider.shutdown().await,
            Err(ProviderError::AlreadyShutdown)
        ));
    }

    #[tokio::test]
    async fn test_invalid_scrape_address() {
        let config = MetricsConfig {
            scrape_address: "not-an-address".to_string(),
            ..pull_config()
        };
        let result = MetricsSubsystem::new(config, CollectorConfig::default())
            .start(&ProviderRegistry::new());
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }

    #[tokio::test]
    async fn test_requests_reach_local_recorder() {
        let registry = ProviderRegistry::new();
        let provider = MetricsSubsystem::new(pull_config(), CollectorConfig::default())
            .start(&registry)
            .unwrap();
        let meter = registry.meter_provider().unwrap();

        meter.record_request("/echo", 200, Duration::from_millis(3));
        meter.record_client_request("ok");

        let rendered = meter.render();
        assert!(rendered.contains(REQUESTS_TOTAL));
        assert!(rendered.contains(REQUEST_DURATION));
        assert!(rendered.contains(CLIENT_REQUESTS_TOTAL));
        provider.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_push_mode_publishes_runtime_stats_without_global_recorder() {
        let config = MetricsConfig {
            mode: MetricsMode::Push,
            push_endpoint: "http://127.0.0.1:1/metrics/job/echo".to_string(),
            export_interval_ms: 3_600_000,
            runtime_stats_interval_ms: 10,
            install_recorder: false,
            ..MetricsConfig::default()
        };
        let registry = ProviderRegistry::new();
        let provider = MetricsSubsystem::new(config, CollectorConfig::default())
            .start(&registry)
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let rendered = registry.meter_provider().unwrap().render();
        assert!(rendered.contains(runtime::PROCESS_RESIDENT_MEMORY), "{}", rendered);
        assert!(rendered.contains(runtime::RUNTIME_WORKERS));
        let _ = provider.shutdown().await;
    }

    #[tokio::test]
    async fn test_push_mode_reports_final_push_failure() {
        let config = MetricsConfig {
            mode: MetricsMode::Push,
            push_endpoint: "http://127.0.0.1:1/metrics/job/echo".to_string(),
            install_recorder: false,
            ..MetricsConfig::default()
        };
        let provider = MetricsSubsystem::new(config, CollectorConfig::default())
            .start(&ProviderRegistry::new())
            .unwrap();

        assert!(matches!(
            provider.shutdown().await,
            Err(ProviderError::Export(ExportError::Transport { .. }))
        ));
    }
}
