//! One telemetry subsystem under lifecycle control.
//!
//! # Responsibilities
//! - Start a subsystem's provider (fallible, never retried)
//! - Register exactly one shutdown task, keyed to the shared signal
//! - Bound that shutdown by its own timeout
//!
//! # Design Decisions
//! - The shutdown timeout starts when the signal fires; it is not derived
//!   from the signal, so cancellation cannot cut a drain short
//! - State transitions are one-way: Unstarted → Started → ShuttingDown →
//!   Terminated

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::lifecycle::error::{LifecycleError, ProviderError, SetupError};
use crate::lifecycle::group::TaskGroup;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::registry::ProviderRegistry;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A running telemetry provider that must be drained before exit.
#[async_trait]
pub trait TelemetryProvider: Send + Sync + 'static {
    async fn force_flush(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Flush and release everything. Called at most once by the unit.
    async fn shutdown(&self) -> Result<(), ProviderError>;
}

/// Something that can build and install a telemetry provider.
pub trait Subsystem: Send + Sync {
    fn name(&self) -> &'static str;

    /// Construct the provider and install it in `registry`.
    fn start(&self, registry: &ProviderRegistry) -> Result<Arc<dyn TelemetryProvider>, ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitState {
    Unstarted = 0,
    Started = 1,
    ShuttingDown = 2,
    Terminated = 3,
}

impl UnitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => UnitState::Unstarted,
            1 => UnitState::Started,
            2 => UnitState::ShuttingDown,
            _ => UnitState::Terminated,
        }
    }
}

#[derive(Debug)]
pub struct SubsystemUnit {
    name: String,
    timeout: Duration,
    state: Arc<AtomicU8>,
}

impl SubsystemUnit {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            state: Arc::new(AtomicU8::new(UnitState::Unstarted as u8)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn state(&self) -> UnitState {
        UnitState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Hand the unit its provider and register the shutdown task.
    pub fn start(
        &self,
        provider: Arc<dyn TelemetryProvider>,
        group: &TaskGroup,
        mut signal: ShutdownSignal,
    ) -> Result<(), SetupError> {
        self.state
            .compare_exchange(
                UnitState::Unstarted as u8,
                UnitState::Started as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| SetupError::AlreadyStarted(self.name.clone()))?;

        let state = self.state.clone();
        let unit = self.name.clone();
        let timeout = self.timeout;

        group.spawn(self.name.clone(), async move {
            signal.cancelled().await;
            state.store(UnitState::ShuttingDown as u8, Ordering::Release);

            let result = tokio::time::timeout(timeout, provider.shutdown()).await;
            state.store(UnitState::Terminated as u8, Ordering::Release);

            match result {
                Ok(Ok(())) => {
                    tracing::debug!(unit = %unit, "Telemetry subsystem shut down");
                    Ok(())
                }
                Ok(Err(source)) => Err(LifecycleError::Shutdown { unit, source }),
                Err(_) => Err(LifecycleError::DeadlineExceeded { unit, timeout }),
            }
        });
        Ok(())
    }
}
