//! Transports to external telemetry backends.
//!
//! An exporter only knows how to ship one batch. Batching, retries of the
//! flush schedule, and shutdown ordering live in the batch processor.
//!
//! The collector's OTLP pipelines use the OpenTelemetry SDK exporters; they
//! share [`HttpExporterConfig`] so TLS, timeout and header settings are
//! applied the same way to every backend.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use thiserror::Error;

use crate::config::CollectorConfig;
use crate::lifecycle::ProviderError;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} responded with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("export timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Ships batches of `T` to a backend.
#[async_trait]
pub trait Exporter<T>: Send + Sync + 'static {
    async fn export(&self, batch: Vec<T>) -> Result<(), ExportError>;

    /// Release transport resources. Called once, after the final export.
    async fn shutdown(&self) -> Result<(), ExportError> {
        Ok(())
    }
}

/// Turns a batch into a request body.
pub trait Encoder<T>: Send + Sync + 'static {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, batch: &[T]) -> Result<Vec<u8>, ExportError>;
}

/// Connection settings shared by every HTTP exporter.
#[derive(Debug, Clone)]
pub struct HttpExporterConfig {
    pub endpoint: String,
    pub timeout: Duration,
    pub insecure: bool,
    pub headers: Vec<(String, String)>,
}

impl HttpExporterConfig {
    /// Settings for one signal path (`/v1/logs`, `/v1/traces`) on the
    /// shared collector.
    pub fn for_collector(collector: &CollectorConfig, path: &str) -> Self {
        Self {
            endpoint: signal_url(&collector.endpoint, path),
            timeout: Duration::from_millis(collector.timeout_ms),
            insecure: collector.insecure,
            headers: collector
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn url(&self) -> Result<Url, ProviderError> {
        Url::parse(&self.endpoint).map_err(|e| {
            ProviderError::Config(format!("invalid endpoint '{}': {}", self.endpoint, e))
        })
    }

    /// A client carrying the timeout, TLS policy and default headers.
    pub fn client(&self) -> Result<reqwest::Client, ProviderError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProviderError::Config(format!("invalid header name '{}': {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProviderError::Config(format!("invalid header value for '{}': {}", name, e)))?;
            headers.insert(name, value);
        }

        Ok(reqwest::Client::builder()
            .timeout(self.timeout)
            .default_headers(headers)
            .danger_accept_invalid_certs(self.insecure)
            .build()?)
    }
}

/// An exporter posting encoded batches to a fixed URL.
pub struct HttpExporter<C> {
    client: reqwest::Client,
    url: Url,
    encoder: C,
}

impl<C> HttpExporter<C> {
    pub fn new(config: &HttpExporterConfig, encoder: C) -> Result<Self, ProviderError> {
        Ok(Self {
            url: config.url()?,
            client: config.client()?,
            encoder,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl<T, C> Exporter<T> for HttpExporter<C>
where
    T: Send + Sync + 'static,
    C: Encoder<T>,
{
    async fn export(&self, batch: Vec<T>) -> Result<(), ExportError> {
        if batch.is_empty() {
            return Ok(());
        }
        let body = self.encoder.encode(&batch)?;

        let response = self
            .client
            .post(self.url.clone())
            .header(CONTENT_TYPE, self.encoder.content_type())
            .body(body)
            .send()
            .await
            .map_err(|source| ExportError::Transport {
                endpoint: self.url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExportError::Status {
                endpoint: self.url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Join a base endpoint and a signal path without doubling slashes.
pub fn signal_url(endpoint: &str, path: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Raw;

    impl Encoder<String> for Raw {
        fn encode(&self, batch: &[String]) -> Result<Vec<u8>, ExportError> {
            Ok(batch.join("\n").into_bytes())
        }
    }

    fn config(endpoint: &str) -> HttpExporterConfig {
        HttpExporterConfig {
            endpoint: endpoint.to_string(),
            timeout: Duration::from_secs(1),
            insecure: false,
            headers: vec![("x-scope-orgid".to_string(), "tenant".to_string())],
        }
    }

    #[test]
    fn test_signal_url() {
        assert_eq!(signal_url("http://c:4318/", "/v1/logs"), "http://c:4318/v1/logs");
        assert_eq!(signal_url("http://c:4318", "v1/traces"), "http://c:4318/v1/traces");
    }

    #[test]
    fn test_invalid_endpoint_is_a_setup_error() {
        let result = HttpExporter::new(&config("not a url"), Raw);
        assert!(matches!(result, Err(ProviderError::Config(_))));
    }

    #[test]
    fn test_invalid_header_is_a_setup_error() {
        let config = HttpExporterConfig {
            headers: vec![("bad header".to_string(), "x".to_string())],
            ..config("http://collector:4318/v1/logs")
        };
        assert!(matches!(config.client(), Err(ProviderError::Config(_))));
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_transport_error() {
        let exporter = HttpExporter::new(&config("http://127.0.0.1:1/v1/logs"), Raw).unwrap();
        let result = exporter.export(vec!["line".to_string()]).await;
        assert!(matches!(result, Err(ExportError::Transport { .. })));
    }
}
