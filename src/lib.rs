//! Telemetry bootstrap with an echo HTTP service to exercise it.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use config::AppConfig;
pub use error::ErrorAggregate;
pub use http::{EchoClient, EchoServer};
pub use lifecycle::{Orchestrator, Shutdown};
pub use observability::ProviderRegistry;
