//! Echo server.
//!
//! # Architecture Overview
//!
//! ```text
//!   config + flags ─▶ Orchestrator ─▶ logger ─▶ tracer ─▶ meter
//!                          │
//!                          ├── signal listener task (SIGINT/SIGTERM)
//!                          ├── HTTP server task (/echo)
//!                          └── one shutdown task per telemetry unit
//!
//!   signal fires ─▶ server drains, units flush concurrently ─▶ joined errors
//! ```

use std::sync::Arc;

use clap::Parser;

use echo_telemetry::config::{self, TelemetryArgs};
use echo_telemetry::http::EchoServer;
use echo_telemetry::lifecycle::{setup_telemetry, signals, Orchestrator};
use echo_telemetry::observability::ProviderRegistry;

#[derive(Debug, Parser)]
#[command(name = "echo-server")]
#[command(about = "Echo HTTP server with logs, traces and metrics", long_about = None)]
struct Cli {
    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(long, env = "ADDR")]
    addr: Option<String>,

    #[command(flatten)]
    telemetry: TelemetryArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut args = cli.telemetry;
    if args.service_name.is_none() {
        args.service_name = Some("echo-server".to_string());
    }
    let mut config = config::resolve(&args)?;
    if let Some(addr) = cli.addr {
        config.server.bind_address = addr;
        config::validate_config(&config).map_err(config::ConfigError::Validation)?;
    }

    let registry = Arc::new(ProviderRegistry::new());
    let mut orchestrator =
        Orchestrator::new(registry).with_shutdown_timeout(config.lifecycle.shutdown_timeout());

    if let Err(e) = setup_telemetry(&mut orchestrator, &config, true) {
        let _ = orchestrator.shutdown_and_wait().await;
        return Err(e.into());
    }

    tracing::info!(
        service = %config.service.name,
        bind_address = %config.server.bind_address,
        "Configuration loaded"
    );

    orchestrator.group().spawn_task(
        "signal listener",
        signals::listen(orchestrator.shutdown_handle(), orchestrator.signal()),
    );

    let server = EchoServer::new(config.server.clone())
        .with_meter(orchestrator.registry().meter_provider());
    match server.bind().await {
        Ok(listener) => server.spawn(
            orchestrator.group(),
            listener,
            orchestrator.signal(),
            config.lifecycle.shutdown_timeout(),
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to bind listener");
            orchestrator.shutdown_handle().trigger();
        }
    }

    match orchestrator.wait().await {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            Ok(())
        }
        Err(errors) => {
            eprintln!("shutdown finished with {} error(s):\n{}", errors.len(), errors);
            Err(errors.into())
        }
    }
}
