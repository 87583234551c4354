//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the error handler before anything can fail in the background
//! - Start logger, tracer and meter, in that order
//! - Install the process `tracing` subscriber
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - The subscriber goes in last, since its OpenTelemetry layer needs the
//!   tracer provider. It is installed even when setup fails, so the
//!   failure can still be logged

use crate::config::AppConfig;
use crate::lifecycle::error::SetupError;
use crate::lifecycle::orchestrator::Orchestrator;
use crate::lifecycle::unit::Subsystem;
use crate::observability::logging::LoggingSubsystem;
use crate::observability::metrics::MetricsSubsystem;
use crate::observability::registry::ErrorHandler;
use crate::observability::resource::Resource;
use crate::observability::subscriber::init_subscriber;
use crate::observability::traces::TracingSubsystem;

/// The enabled subsystems for `config`, in start order.
pub fn telemetry_subsystems(config: &AppConfig) -> Result<Vec<Box<dyn Subsystem>>, SetupError> {
    let resource = Resource::from_config(&config.service).map_err(SetupError::Resource)?;

    let mut subsystems: Vec<Box<dyn Subsystem>> = vec![Box::new(LoggingSubsystem::new(
        config.logging.clone(),
        config.collector.clone(),
        resource.clone(),
    ))];
    if config.tracing.enabled {
        subsystems.push(Box::new(TracingSubsystem::new(
            config.tracing.clone(),
            config.collector.clone(),
            resource,
        )));
    }
    if config.metrics.enabled {
        subsystems.push(Box::new(MetricsSubsystem::new(
            config.metrics.clone(),
            config.collector.clone(),
        )));
    }
    Ok(subsystems)
}

/// Bring telemetry up for `config`.
///
/// `install_subscriber` is false in tests, where a global subscriber may
/// already exist.
pub fn setup_telemetry(
    orchestrator: &mut Orchestrator,
    config: &AppConfig,
    install_subscriber: bool,
) -> Result<(), SetupError> {
    orchestrator.install_error_handler(ErrorHandler::default());
    let setup = telemetry_subsystems(config).and_then(|subsystems| orchestrator.setup(subsystems));
    if install_subscriber {
        init_subscriber(orchestrator.registry().clone(), &config.logging.filter)?;
    }
    setup
}
