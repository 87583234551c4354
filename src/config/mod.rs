//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML), optional
//!     → loader.rs (parse & deserialize)
//!     → args.rs (CLI flags / environment overrides)
//!     → validation.rs (semantic checks)
//!     → AppConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod args;
pub mod loader;
pub mod schema;
pub mod validation;

pub use args::TelemetryArgs;
pub use loader::{load_config, ConfigError};
pub use schema::{
    AppConfig, BatchSettings, ClientConfig, CollectorConfig, LifecycleConfig, LoggingConfig,
    LokiConfig, MetricsConfig, MetricsMode, OtlpProtocol, ServerConfig, ServiceConfig, TracingConfig,
};
pub use validation::{validate_config, ValidationError};

/// Load the file named by `args` (or defaults), apply the overrides, then
/// validate the result.
pub fn resolve(args: &TelemetryArgs) -> Result<AppConfig, ConfigError> {
    let mut config = loader::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}
