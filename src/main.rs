use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use tokio::signal;

use relay_gateway::config::{BasicConfigManager, ConfigManager};
use relay_gateway::middleware::logging::init_tracing;
use relay_gateway::{ApiGateway, Gateway, GatewayConfig, GatewayError};

/// Configuration-driven HTTP API gateway
#[derive(Debug, Parser)]
#[command(name = "relay-gateway", version, about)]
struct Args {
    /// Path to the gateway configuration file (YAML or JSON)
    #[arg(short, long, env = "GATEWAY_CONFIG", default_value = "config/gateway.yaml")]
    config: PathBuf,

    /// Environment overlay to merge, e.g. `production` loads `gateway.production.yaml`
    #[arg(short, long, env = "GATEWAY_ENVIRONMENT")]
    environment: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "API Gateway terminated");
        let _ = std::io::stdout().flush();
        let _ = std::io::stderr().flush();
        std::process::exit(1);
    }
}

/// Load configuration and install the subscriber before reporting the outcome.
///
/// A file that fails to load still gets tracing with default settings, so the
/// error reaches the log.
async fn load_config(args: &Args) -> Result<GatewayConfig, GatewayError> {
    let config_manager = BasicConfigManager::new();
    let loaded = config_manager
        .load_from_file(&args.config, args.environment.as_deref())
        .await;
    let config = config_manager.get_config().await;

    init_tracing(&config.logging);
    loaded?;

    tracing::info!(
        path = %args.config.display(),
        environment = args.environment.as_deref().unwrap_or("-"),
        routes = config.routes.len(),
        "Configuration loaded"
    );
    Ok(config)
}

async fn run(args: Args) -> Result<(), GatewayError> {
    let config = load_config(&args).await?;

    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "Unhandled panic");
    }));

    let gateway = ApiGateway::from_config(config)?;

    let addr = gateway.start().await?;
    tracing::info!(%addr, routes = gateway.routes().len(), "API Gateway started successfully");

    signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping API Gateway");

    gateway.stop().await?;
    tracing::info!("API Gateway stopped successfully");

    Ok(())
}
