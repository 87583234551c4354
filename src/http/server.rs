//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the echo handler
//! - Wire up middleware (tracing, timeout, request ID)
//! - Serve until the shared shutdown signal fires, then drain in-flight
//!   requests within the shutdown bound

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServerConfig;
use crate::http::request::{make_request_span, record_response};
use crate::lifecycle::{ShutdownSignal, TaskGroup};
use crate::observability::MeterProvider;

pub const ECHO_ROUTE: &str = "/echo";

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),

    #[error("graceful shutdown exceeded {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Debug, Default, Deserialize)]
pub struct EchoQuery {
    #[serde(default)]
    pub message: String,
}

/// Echoes the `message` query parameter back as the body.
async fn echo_handler(
    State(meter): State<Option<Arc<MeterProvider>>>,
    Query(query): Query<EchoQuery>,
) -> String {
    let start = Instant::now();
    tracing::info!(request_body = %query.message, "got message");

    let body = query.message;

    tracing::info!(response_body = %body, "sent message");
    if let Some(meter) = &meter {
        meter.record_request(ECHO_ROUTE, 200, start.elapsed());
    }
    body
}

/// HTTP server for the echo service.
pub struct EchoServer {
    router: Router,
    config: ServerConfig,
}

impl EchoServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig) -> Self {
        let router = Self::build_router(&config, None);
        Self { router, config }
    }

    /// Record request metrics on `meter`.
    pub fn with_meter(mut self, meter: Option<Arc<MeterProvider>>) -> Self {
        self.router = Self::build_router(&self.config, meter);
        self
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ServerConfig, meter: Option<Arc<MeterProvider>>) -> Router {
        Router::new()
            .route(ECHO_ROUTE, get(echo_handler))
            .with_state(meter)
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(make_request_span)
                    .on_response(record_response),
            )
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.config.bind_address)
            .await
            .map_err(|source| ServerError::Bind {
                address: self.config.bind_address.clone(),
                source,
            })
    }

    /// Serve on `listener` until `signal` fires. In-flight requests then
    /// get `drain_timeout` to finish.
    pub async fn run(
        self,
        listener: TcpListener,
        signal: ShutdownSignal,
        drain_timeout: Duration,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let mut graceful = signal.clone();
        let mut serve = Box::pin(
            axum::serve(listener, self.router)
                .with_graceful_shutdown(async move { graceful.cancelled().await })
                .into_future(),
        );

        let mut deadline = signal;
        tokio::select! {
            result = &mut serve => result?,
            _ = async {
                deadline.cancelled().await;
                tracing::info!("Shutting down HTTP server");
                tokio::time::sleep(drain_timeout).await;
            } => {
                tracing::warn!(timeout = ?drain_timeout, "HTTP server did not drain in time");
                return Err(ServerError::ShutdownTimeout(drain_timeout));
            }
        }

        tracing::info!("HTTP server stopped gracefully");
        Ok(())
    }

    /// Run the server as a task of `group`.
    pub fn spawn(self, group: &TaskGroup, listener: TcpListener, signal: ShutdownSignal, drain_timeout: Duration) {
        group.spawn_task("http server", self.run(listener, signal, drain_timeout));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use crate::config::{CollectorConfig, MetricsConfig, MetricsMode};
    use crate::lifecycle::Subsystem;
    use crate::observability::{MetricsSubsystem, ProviderRegistry};

    async fn get(uri: &str) -> (StatusCode, Option<String>, String) {
        get_with(EchoServer::new(ServerConfig::default()).router(), uri).await
    }

    async fn get_with(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let request_id = response
            .headers()
            .get("x-request-id")
            .map(|v| v.to_str().unwrap().to_string());
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        (status, request_id, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_echo_returns_message() {
        let (status, request_id, body) = get("/echo?message=hello%20world").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "hello world");
        assert!(request_id.is_some());
    }

    #[tokio::test]
    async fn test_missing_message_echoes_empty() {
        let (status, _, body) = get("/echo").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "");
    }

    #[tokio::test]
    async fn test_handled_request_is_counted() {
        let config = MetricsConfig {
            mode: MetricsMode::Pull,
            scrape_address: "127.0.0.1:0".to_string(),
            install_recorder: false,
            ..MetricsConfig::default()
        };
        let registry = ProviderRegistry::new();
        let provider = MetricsSubsystem::new(config, CollectorConfig::default())
            .start(&registry)
            .unwrap();
        let meter = registry.meter_provider();

        let router = EchoServer::new(ServerConfig::default())
            .with_meter(meter.clone())
            .router();
        let (status, _, _) = get_with(router, "/echo?message=hi").await;
        assert_eq!(status, StatusCode::OK);

        let rendered = meter.unwrap().render();
        assert!(rendered.contains("route=\"/echo\""), "{}", rendered);
        provider.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let (status, _, _) = get("/other").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
