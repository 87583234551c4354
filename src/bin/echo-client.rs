use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use echo_telemetry::config::{self, TelemetryArgs};
use echo_telemetry::http::EchoClient;
use echo_telemetry::lifecycle::{setup_telemetry, Orchestrator};
use echo_telemetry::observability::ProviderRegistry;

#[derive(Debug, Parser)]
#[command(name = "echo-client")]
#[command(about = "Sends echo requests to the echo server", long_about = None)]
struct Cli {
    /// Base URL of the echo server
    #[arg(long, env = "ENDPOINT")]
    endpoint: Option<String>,

    /// Number of requests to send
    #[arg(short = 'n', long)]
    requests: Option<u32>,

    #[command(flatten)]
    telemetry: TelemetryArgs,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut args = cli.telemetry;
    if args.service_name.is_none() {
        args.service_name = Some("echo-client".to_string());
    }
    let mut config = config::resolve(&args)?;
    if let Some(endpoint) = cli.endpoint {
        config.client.endpoint = endpoint;
    }
    if let Some(requests) = cli.requests {
        config.client.requests = requests;
    }
    config::validate_config(&config).map_err(config::ConfigError::Validation)?;

    let registry = Arc::new(ProviderRegistry::new());
    let mut orchestrator =
        Orchestrator::new(registry).with_shutdown_timeout(config.lifecycle.shutdown_timeout());

    if let Err(e) = setup_telemetry(&mut orchestrator, &config, true) {
        let _ = orchestrator.shutdown_and_wait().await;
        return Err(e.into());
    }

    let client = EchoClient::new(
        config.client.endpoint.clone(),
        Duration::from_secs(config.client.timeout_secs),
    )?
    .with_meter(orchestrator.registry().meter_provider());
    for i in 1..=config.client.requests {
        tracing::info!("sending echo request");
        match client.echo(&format!("sending {} message", i)).await {
            Ok(response) => tracing::info!(response = %response, "got echo response"),
            Err(e) => tracing::error!(error = %e, "got bad echo response"),
        }
    }

    match orchestrator.shutdown_and_wait().await {
        Ok(()) => {
            tracing::info!("graceful shutdown success");
            Ok(())
        }
        Err(errors) => {
            eprintln!("shutdown finished with {} error(s):\n{}", errors.len(), errors);
            Err(errors.into())
        }
    }
}
