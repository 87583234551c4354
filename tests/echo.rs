mod common;

use std::time::Duration;

use common::MockCollector;
use echo_telemetry::config::ServerConfig;
use echo_telemetry::http::{extract_context, ClientError, EchoClient, EchoServer, TRACEPARENT};
use echo_telemetry::lifecycle::{Shutdown, TaskGroup};
use echo_telemetry::observability::traces::span_trace_context;
use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use tokio::net::TcpListener;
use tracing::Instrument;
use tracing_subscriber::layer::SubscriberExt;

async fn start_server(shutdown: &Shutdown, group: &TaskGroup) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = format!("http://{}", listener.local_addr().unwrap());
    EchoServer::new(ServerConfig::default()).spawn(
        group,
        listener,
        shutdown.subscribe(),
        Duration::from_secs(5),
    );
    endpoint
}

#[tokio::test]
async fn test_client_server_round_trip() {
    let shutdown = Shutdown::new();
    let group = TaskGroup::new(shutdown.clone());
    let endpoint = start_server(&shutdown, &group).await;

    let client = EchoClient::new(endpoint, Duration::from_secs(5)).unwrap();
    for i in 1..=3 {
        let message = format!("sending {} message", i);
        assert_eq!(client.echo(&message).await.unwrap(), message);
    }

    shutdown.trigger();
    assert!(group.wait().await.is_empty());
}

#[tokio::test]
async fn test_non_ok_status_is_an_error() {
    let shutdown = Shutdown::new();
    let group = TaskGroup::new(shutdown.clone());
    let endpoint = start_server(&shutdown, &group).await;

    // No route at /wrong/echo.
    let client = EchoClient::new(format!("{}/wrong", endpoint), Duration::from_secs(5)).unwrap();
    assert!(matches!(client.echo("hi").await, Err(ClientError::Status(404))));

    shutdown.trigger();
    assert!(group.wait().await.is_empty());
}

#[tokio::test]
async fn test_client_propagates_trace_context() {
    let collector = MockCollector::start().await;
    let client = EchoClient::new(collector.endpoint(), Duration::from_secs(5)).unwrap();

    let provider = TracerProvider::builder()
        .with_simple_exporter(InMemorySpanExporter::default())
        .build();
    let subscriber = tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));
    let _guard = tracing::subscriber::set_default(subscriber);

    let parent = tracing::info_span!("client run");
    let parent_ctx = span_trace_context(&parent).unwrap();
    client.echo("hi").instrument(parent).await.unwrap();

    let requests = collector.requests_for("/echo");
    assert_eq!(requests.len(), 1);
    let header = requests[0].headers.get(TRACEPARENT).unwrap().to_str().unwrap();
    assert!(header.contains(&parent_ctx.trace_id().to_string()));

    let propagated = extract_context(&requests[0].headers);
    let propagated = propagated.span().span_context().clone();
    assert_eq!(propagated.trace_id(), parent_ctx.trace_id());
    assert_ne!(propagated.span_id(), parent_ctx.span_id());
}
