//! Lifecycle orchestration for the telemetry subsystems.
//!
//! The orchestrator owns one shutdown signal and one task group. Each
//! started subsystem registers its shutdown task in the group; the
//! application adds its own tasks (server, signal listener) to the same
//! group. Waiting on the orchestrator waits for all of them and returns
//! every error they produced.

use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorAggregate;
use crate::lifecycle::error::{LifecycleError, SetupError};
use crate::lifecycle::group::TaskGroup;
use crate::lifecycle::shutdown::{Shutdown, ShutdownSignal};
use crate::lifecycle::unit::{Subsystem, SubsystemUnit, UnitState, DEFAULT_SHUTDOWN_TIMEOUT};
use crate::observability::registry::{ErrorHandler, ProviderRegistry};

#[derive(Debug)]
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    shutdown: Shutdown,
    group: TaskGroup,
    timeout: Duration,
    units: Vec<SubsystemUnit>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        let shutdown = Shutdown::new();
        let group = TaskGroup::new(shutdown.clone());
        Self {
            registry,
            shutdown,
            group,
            timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            units: Vec::new(),
        }
    }

    /// Shutdown bound applied to each unit started after this call.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// The group application tasks should be spawned into.
    pub fn group(&self) -> &TaskGroup {
        &self.group
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.shutdown.subscribe()
    }

    /// Must run before [`setup`](Self::setup): background workers capture
    /// the handler when they start.
    pub fn install_error_handler(&self, handler: ErrorHandler) {
        self.registry.set_error_handler(handler);
    }

    /// Start `subsystems` in order. The first failure stops setup; units
    /// started before it keep their shutdown tasks, so the caller should
    /// still [`shutdown_and_wait`](Self::shutdown_and_wait).
    pub fn setup(&mut self, subsystems: Vec<Box<dyn Subsystem>>) -> Result<(), SetupError> {
        for subsystem in subsystems {
            let name = subsystem.name();
            let provider = subsystem
                .start(&self.registry)
                .map_err(|source| SetupError::Subsystem {
                    subsystem: name,
                    source,
                })?;

            let unit = SubsystemUnit::new(name, self.timeout);
            unit.start(provider, &self.group, self.shutdown.subscribe())?;
            self.units.push(unit);

            tracing::info!(unit = name, "Telemetry subsystem started");
        }
        Ok(())
    }

    pub fn units(&self) -> &[SubsystemUnit] {
        &self.units
    }

    /// Name and state of every started unit, in start order.
    pub fn unit_states(&self) -> Vec<(&str, UnitState)> {
        self.units.iter().map(|u| (u.name(), u.state())).collect()
    }

    /// Trigger shutdown and wait for every task in the group.
    pub async fn shutdown_and_wait(&self) -> Result<(), ErrorAggregate<LifecycleError>> {
        self.shutdown.trigger();
        self.wait().await
    }

    /// Wait for every task in the group without triggering shutdown.
    pub async fn wait(&self) -> Result<(), ErrorAggregate<LifecycleError>> {
        let result = self.group.wait().await.into_result();
        match &result {
            Ok(()) => tracing::debug!("All lifecycle tasks finished"),
            Err(errors) => tracing::debug!(errors = errors.len(), "Lifecycle tasks finished with errors"),
        }
        result
    }
}
