//! OpenTelemetry SDK plumbing shared by the collector pipelines.

use opentelemetry::KeyValue;
use opentelemetry_otlp::Protocol;

use crate::config::OtlpProtocol;
use crate::lifecycle::ProviderError;
use crate::observability::resource::Resource;

/// Instrumentation scope name for tracers and loggers created here.
pub const INSTRUMENTATION_NAME: &str = "echo-telemetry";

pub fn protocol(protocol: OtlpProtocol) -> Protocol {
    match protocol {
        OtlpProtocol::HttpProtobuf => Protocol::HttpBinary,
        OtlpProtocol::HttpJson => Protocol::HttpJson,
    }
}

pub fn sdk_resource(resource: &Resource) -> opentelemetry_sdk::Resource {
    opentelemetry_sdk::Resource::new(
        resource
            .iter()
            .map(|(key, value)| KeyValue::new(key.to_string(), value.to_string())),
    )
}

/// Run a blocking SDK call (flush, shutdown) off the async workers.
///
/// The SDK waits on its own batch task synchronously; doing that on a
/// runtime thread would starve the task it is waiting for.
pub async fn run_blocking<F, T>(call: F) -> Result<T, ProviderError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| ProviderError::Other(format!("blocking telemetry call failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::Key;

    #[test]
    fn test_resource_keeps_every_attribute() {
        let mut resource = Resource::default();
        resource.set("service.name", "echo-server");
        resource.set("team", "obs");

        let sdk = sdk_resource(&resource);
        assert_eq!(sdk.len(), 2);
        assert_eq!(
            sdk.get(Key::from_static_str("service.name")).map(|v| v.to_string()),
            Some("echo-server".to_string())
        );
    }

    #[test]
    fn test_protocol_mapping() {
        assert_eq!(protocol(OtlpProtocol::HttpJson), Protocol::HttpJson);
        assert_eq!(protocol(OtlpProtocol::HttpProtobuf), Protocol::HttpBinary);
    }

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        assert_eq!(run_blocking(|| 7).await.unwrap(), 7);
    }
}
