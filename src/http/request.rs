//! Request instrumentation.
//!
//! # Responsibilities
//! - Open one `tracing` span per request
//! - Make an incoming W3C `traceparent` the span's remote parent, so the
//!   request joins the caller's trace
//! - Write the current span into outgoing request headers
//! - Record the response status on the span
//!
//! # Design Decisions
//! - Request IDs come from tower-http's request-id layers; the span reads
//!   the header they set
//! - An absent or malformed `traceparent` starts a new trace
//! - A local propagator is used instead of the OpenTelemetry global one

use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Request, Response};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::TraceContextExt;
use opentelemetry_http::{HeaderExtractor, HeaderInjector};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const TRACEPARENT: HeaderName = HeaderName::from_static("traceparent");

/// Remote parent carried by `headers`; an empty context when there is none
/// or it does not parse.
pub fn extract_context(headers: &HeaderMap) -> opentelemetry::Context {
    TraceContextPropagator::new().extract(&HeaderExtractor(headers))
}

/// Write `span`'s context into `headers`. Nothing is written for a span
/// without a valid context.
pub fn inject_context(span: &Span, headers: &mut HeaderMap) {
    TraceContextPropagator::new().inject_context(&span.context(), &mut HeaderInjector(headers));
}

/// `make_span_with` hook for the trace layer.
pub fn make_request_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(&X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let span = tracing::info_span!(
        "request",
        otel.kind = "server",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
        status = tracing::field::Empty,
    );

    let parent = extract_context(request.headers());
    if parent.span().span_context().is_valid() {
        span.set_parent(parent);
    }
    span
}

/// `on_response` hook for the trace layer.
pub fn record_response(response: &Response<Body>, latency: Duration, span: &Span) {
    span.record("status", response.status().as_u16());
    tracing::debug!(
        status = response.status().as_u16(),
        latency_ms = latency.as_millis() as u64,
        "Request finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::traces::span_trace_context;
    use opentelemetry::trace::{TraceId, TracerProvider as _};
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
    use opentelemetry_sdk::trace::TracerProvider;
    use tracing_subscriber::layer::SubscriberExt;

    const REMOTE: &str = "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01";

    fn request(traceparent: &str) -> Request<Body> {
        Request::builder()
            .uri("/echo?message=hi")
            .header(TRACEPARENT, traceparent)
            .body(Body::empty())
            .unwrap()
    }

    fn with_tracing<T>(f: impl FnOnce() -> T) -> T {
        let provider = TracerProvider::builder()
            .with_simple_exporter(InMemorySpanExporter::default())
            .build();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(provider.tracer("test")));
        tracing::subscriber::with_default(subscriber, f)
    }

    #[test]
    fn test_span_joins_incoming_trace() {
        with_tracing(|| {
            let span = make_request_span(&request(REMOTE));
            let ctx = span_trace_context(&span).unwrap();
            assert_eq!(
                ctx.trace_id(),
                TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
            );
            assert!(ctx.is_sampled());
        });
    }

    #[test]
    fn test_malformed_traceparent_starts_new_trace() {
        with_tracing(|| {
            let span = make_request_span(&request("00-not-a-trace-01"));
            let ctx = span_trace_context(&span).unwrap();
            assert_ne!(
                ctx.trace_id(),
                TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap()
            );
        });
    }

    #[test]
    fn test_inject_writes_current_span() {
        with_tracing(|| {
            let span = tracing::info_span!("call");
            let ctx = span_trace_context(&span).unwrap();

            let mut headers = HeaderMap::new();
            inject_context(&span, &mut headers);
            let header = headers.get(TRACEPARENT).unwrap().to_str().unwrap();

            let extracted = extract_context(&headers);
            assert!(header.contains(&ctx.trace_id().to_string()));
            assert_eq!(extracted.span().span_context().span_id(), ctx.span_id());
        });
    }

    #[test]
    fn test_no_header_without_context() {
        let mut headers = HeaderMap::new();
        inject_context(&Span::none(), &mut headers);
        assert!(headers.get(TRACEPARENT).is_none());
    }
}
