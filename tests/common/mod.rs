//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use tokio::net::TcpListener;

use echo_telemetry::lifecycle::{ProviderError, Subsystem, TelemetryProvider};
use echo_telemetry::observability::{
    Attribute, Level, LogRecord, ProviderRegistry, Scope, SharedSink, Sink, SinkError,
};
use opentelemetry::trace::SpanContext;

/// One request seen by the mock collector.
#[derive(Debug, Clone)]
pub struct Captured {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Clone, Default)]
struct CollectorState {
    requests: Arc<Mutex<Vec<Captured>>>,
    fail_path: Arc<Mutex<Option<String>>>,
}

/// HTTP server recording every request. Answers 200, or 503 for the
/// configured failing path.
pub struct MockCollector {
    addr: SocketAddr,
    state: CollectorState,
}

impl MockCollector {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = CollectorState::default();

        let app = Router::new().fallback(capture).with_state(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn fail_path(&self, path: &str) {
        *self.state.fail_path.lock().unwrap() = Some(path.to_string());
    }

    pub fn requests(&self) -> Vec<Captured> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn requests_for(&self, path: &str) -> Vec<Captured> {
        self.requests().into_iter().filter(|r| r.path == path).collect()
    }
}

async fn capture(
    State(state): State<CollectorState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let path = uri.path().to_string();
    state.requests.lock().unwrap().push(Captured {
        method,
        path: path.clone(),
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    });

    if state.fail_path.lock().unwrap().as_deref() == Some(path.as_str()) {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else {
        (StatusCode::OK, "ok")
    }
}

/// Sink that records what it receives, with its scope applied.
#[derive(Debug, Clone)]
pub struct RecordingSink {
    pub name: &'static str,
    pub min_level: Level,
    pub fail: bool,
    pub scope: Scope,
    pub records: Arc<Mutex<Vec<LogRecord>>>,
}

impl RecordingSink {
    pub fn new(name: &'static str, min_level: Level) -> Self {
        Self {
            name,
            min_level,
            fail: false,
            scope: Scope::new(),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &'static str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, Level::Trace)
        }
    }

    pub fn shared(&self) -> SharedSink {
        Arc::new(self.clone())
    }

    pub fn received(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl Sink for RecordingSink {
    fn enabled(&self, level: Level, _context: Option<&SpanContext>) -> bool {
        level >= self.min_level
    }

    fn handle(&self, record: LogRecord) -> Result<(), SinkError> {
        if self.fail {
            return Err(SinkError::Rejected {
                sink: self.name.to_string(),
                reason: "backend down".to_string(),
            });
        }
        self.records.lock().unwrap().push(self.scope.apply(record));
        Ok(())
    }

    fn with_attributes(&self, attrs: Vec<Attribute>) -> SharedSink {
        let mut scoped = self.clone();
        scoped.scope = self.scope.with_attributes(attrs);
        Arc::new(scoped)
    }

    fn with_group(&self, name: &str) -> SharedSink {
        let mut scoped = self.clone();
        scoped.scope = self.scope.with_group(name);
        Arc::new(scoped)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Succeed,
    Fail,
    Hang,
}

/// Provider whose shutdown succeeds, fails, or never completes.
#[derive(Debug)]
pub struct MockProvider {
    behavior: Behavior,
    pub shutdowns: AtomicUsize,
}

impl MockProvider {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            shutdowns: AtomicUsize::new(0),
        })
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetryProvider for MockProvider {
    async fn shutdown(&self) -> Result<(), ProviderError> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(ProviderError::Other("flush failed".to_string())),
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Subsystem handing out a prepared [`MockProvider`].
pub struct MockSubsystem {
    pub name: &'static str,
    pub provider: Arc<MockProvider>,
    pub fail_start: bool,
}

impl MockSubsystem {
    pub fn boxed(name: &'static str, provider: &Arc<MockProvider>) -> Box<dyn Subsystem> {
        Box::new(Self {
            name,
            provider: provider.clone(),
            fail_start: false,
        })
    }
}

impl Subsystem for MockSubsystem {
    fn name(&self) -> &'static str {
        self.name
    }

    fn start(&self, _registry: &ProviderRegistry) -> Result<Arc<dyn TelemetryProvider>, ProviderError> {
        if self.fail_start {
            return Err(ProviderError::Config("bad endpoint".to_string()));
        }
        Ok(self.provider.clone())
    }
}
