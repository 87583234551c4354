//! Echo HTTP client.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::Instrument;

use crate::http::request::inject_context;
use crate::observability::metrics::MeterProvider;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to create request: {0}")]
    Build(String),

    #[error("failed to send request: {0}")]
    Send(#[source] reqwest::Error),

    #[error("unexpected status code: {0}")]
    Status(u16),

    #[error("failed to read response: {0}")]
    Read(#[source] reqwest::Error),
}

/// Calls `GET {endpoint}/echo?message=...`, propagating the current trace.
#[derive(Debug, Clone)]
pub struct EchoClient {
    endpoint: String,
    client: reqwest::Client,
    meter: Option<Arc<MeterProvider>>,
}

impl EchoClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self::with_client(endpoint, client))
    }

    /// Use a pre-configured client.
    pub fn with_client(endpoint: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client,
            meter: None,
        }
    }

    /// Count calls on `meter`.
    pub fn with_meter(mut self, meter: Option<Arc<MeterProvider>>) -> Self {
        self.meter = meter;
        self
    }

    pub async fn echo(&self, message: &str) -> Result<String, ClientError> {
        let span = tracing::info_span!("echo request", otel.kind = "client", peer = %self.endpoint);
        let result = self.send(message, &span).instrument(span.clone()).await;
        if let Some(meter) = &self.meter {
            meter.record_client_request(if result.is_ok() { "ok" } else { "error" });
        }
        result
    }

    async fn send(&self, message: &str, span: &tracing::Span) -> Result<String, ClientError> {
        let url = reqwest::Url::parse(&format!("{}/echo", self.endpoint))
            .map_err(|e| ClientError::Build(e.to_string()))?;

        let mut headers = HeaderMap::new();
        inject_context(span, &mut headers);

        let response = self
            .client
            .get(url)
            .query(&[("message", message)])
            .headers(headers)
            .send()
            .await
            .map_err(ClientError::Send)?;
        if response.status() != StatusCode::OK {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        response.text().await.map_err(ClientError::Read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trailing_slash_is_trimmed() {
        let client = EchoClient::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.endpoint, "http://localhost:8080");
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let client = EchoClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        assert!(matches!(client.echo("hi").await, Err(ClientError::Send(_))));
    }

    #[tokio::test]
    async fn test_failed_call_is_counted() {
        use crate::config::{CollectorConfig, MetricsConfig, MetricsMode};
        use crate::lifecycle::Subsystem;
        use crate::observability::{MetricsSubsystem, ProviderRegistry};

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

        let client = EchoClient::new("http://127.0.0.1:1", Duration::from_secs(1))
            .unwrap()
            .with_meter(meter.clone());
        assert!(client.echo("hi").await.is_err());

        let rendered = meter.unwrap().render();
        assert!(rendered.contains("outcome=\"error\""), "{}", rendered);
        provider.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_endpoint() {
        let client = EchoClient::new("not a url", Duration::from_secs(1)).unwrap();
        assert!(matches!(client.echo("hi").await, Err(ClientError::Build(_))));
    }
}
