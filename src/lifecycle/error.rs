//! Lifecycle error types.

use std::time::Duration;

use opentelemetry_sdk::logs::LogError;
use opentelemetry::trace::TraceError;
use thiserror::Error;

use crate::error::{BoxError, ErrorAggregate};
use crate::observability::batch::BatchError;
use crate::observability::exporter::ExportError;

/// Failure of a telemetry provider, at construction or at shutdown.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("a metrics recorder is already installed")]
    RecorderInstalled,

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Batch(ErrorAggregate<BatchError>),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("trace pipeline: {0}")]
    Trace(#[from] TraceError),

    #[error("log pipeline: {0}")]
    Logs(#[from] LogError),

    #[error("{0}")]
    Joined(ErrorAggregate<ProviderError>),

    #[error("provider already shut down")]
    AlreadyShutdown,

    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// `Ok` when `errors` is empty, the error itself when there is exactly
    /// one, and [`ProviderError::Joined`] otherwise.
    pub fn from_aggregate(errors: ErrorAggregate<ProviderError>) -> Result<(), ProviderError> {
        let mut errors = errors.into_vec();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ProviderError::Joined(errors.into_iter().collect())),
        }
    }
}

/// Fatal error while bringing telemetry up.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to start {subsystem}: {source}")]
    Subsystem {
        subsystem: &'static str,
        #[source]
        source: ProviderError,
    },

    #[error("{0} already started")]
    AlreadyStarted(String),

    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(String),

    #[error("invalid resource attributes: {0}")]
    Resource(String),
}

/// A task in the lifecycle group that did not finish cleanly.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("{unit} shutdown failed: {source}")]
    Shutdown {
        unit: String,
        #[source]
        source: ProviderError,
    },

    #[error("{unit} shutdown exceeded deadline of {timeout:?}")]
    DeadlineExceeded { unit: String, timeout: Duration },

    #[error("task {task} failed: {source}")]
    Task {
        task: String,
        #[source]
        source: BoxError,
    },

    #[error("task {task} panicked")]
    Panicked { task: String },
}

impl LifecycleError {
    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, LifecycleError::DeadlineExceeded { .. })
    }

    /// Unit or task the error belongs to.
    pub fn owner(&self) -> &str {
        match self {
            LifecycleError::Shutdown { unit, .. } | LifecycleError::DeadlineExceeded { unit, .. } => unit,
            LifecycleError::Task { task, .. } | LifecycleError::Panicked { task } => task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadline_classification() {
        let deadline = LifecycleError::DeadlineExceeded {
            unit: "tracer".to_string(),
            timeout: Duration::from_secs(5),
        };
        let failed = LifecycleError::Shutdown {
            unit: "meter".to_string(),
            source: ProviderError::AlreadyShutdown,
        };

        assert!(deadline.is_deadline_exceeded());
        assert!(!failed.is_deadline_exceeded());
        assert_eq!(deadline.owner(), "tracer");
        assert_eq!(failed.to_string(), "meter shutdown failed: provider already shut down");
    }

    #[test]
    fn test_from_aggregate_unwraps_single_error() {
        assert!(ProviderError::from_aggregate(ErrorAggregate::new()).is_ok());

        let single = ProviderError::from_aggregate(ProviderError::Other("loki down".to_string()).into());
        assert!(matches!(single, Err(ProviderError::Other(ref m)) if m == "loki down"));

        let joined = ProviderError::from_aggregate(
            vec![
                ProviderError::Other("a".to_string()),
                ProviderError::Other("b".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        match joined {
            Err(ProviderError::Joined(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
