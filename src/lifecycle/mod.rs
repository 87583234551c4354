//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Error handler → subscriber → logger → tracer → meter
//!
//! Each subsystem (unit.rs):
//!     start provider → register shutdown task in the group (group.rs)
//!
//! Shutdown (shutdown.rs, orchestrator.rs):
//!     Signal fires → every unit drains under its own timeout
//!     → orchestrator joins all task errors
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger the shared shutdown signal
//! ```
//!
//! # Design Decisions
//! - Ordered startup, unordered concurrent shutdown
//! - Shutdown has timeout: each unit gets its own bound
//! - No error is dropped; callers receive the joined aggregate

pub mod error;
pub mod group;
pub mod orchestrator;
pub mod shutdown;
pub mod signals;
pub mod startup;
pub mod unit;

pub use error::{LifecycleError, ProviderError, SetupError};
pub use group::TaskGroup;
pub use orchestrator::Orchestrator;
pub use shutdown::{Shutdown, ShutdownSignal};
pub use startup::setup_telemetry;
pub use unit::{Subsystem, SubsystemUnit, TelemetryProvider, UnitState, DEFAULT_SHUTDOWN_TIMEOUT};
