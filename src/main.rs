use clap::{Parser, Subcommand};
use portico_gateway::config::GatewayConfig;
use tracing_subscriber::EnvFilter;

/// Portico Gateway: endpoint-routing API gateway
#[derive(Parser)]
#[command(name = "portico-gateway", version, about)]
struct Cli {
    /// Path to configuration file (.hcl)
    #[arg(short, long, default_value = "gateway.hcl")]
    config: String,

    /// Override listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file without starting the gateway
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long, default_value = "gateway.hcl")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> portico_gateway::Result<()> {
    let cli = Cli::parse();

    if let Some(Commands::Validate { config: config_path }) = &cli.command {
        return validate_config(config_path).await;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    tracing::info!("Portico Gateway v{}", env!("CARGO_PKG_VERSION"));

    let mut config = if std::path::Path::new(&cli.config).exists() {
        tracing::info!(config = cli.config, "Loading configuration");
        GatewayConfig::from_file(&cli.config).await?
    } else {
        tracing::warn!("Config file not found, using defaults");
        GatewayConfig::default()
    };

    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let gateway = portico_gateway::Gateway::new(config)?;
    gateway.start().await?;

    tracing::info!("Gateway ready, press Ctrl+C to stop");

    gateway.wait_for_shutdown().await;

    Ok(())
}

/// Validate a configuration file and print diagnostics
async fn validate_config(path: &str) -> portico_gateway::Result<()> {
    if !std::path::Path::new(path).exists() {
        eprintln!("✗ Config file not found: {}", path);
        std::process::exit(1);
    }

    let config = match GatewayConfig::from_file(path).await {
        Ok(c) => {
            println!("✓ Config parsed successfully ({})", path);
            c
        }
        Err(e) => {
            eprintln!("✗ Parse error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = config.validate() {
        eprintln!("✗ Validation error: {}", e);
        std::process::exit(1);
    }

    println!("✓ Configuration is valid");
    println!();
    println!("  Listen:      {}", config.listen);
    println!("  Origins:     {}", config.origins.len());
    for origin in &config.origins {
        println!(
            "    - {} → {} (probe {} {})",
            origin.id,
            origin.base_url(),
            origin.health_check_method.as_method(),
            origin.health_check_path
        );
    }
    println!("  Endpoints:   {}", config.endpoints.len());
    for endpoint in &config.endpoints {
        let routes: usize = endpoint
            .unauthenticated
            .0
            .values()
            .chain(endpoint.authenticated.0.values())
            .map(|patterns| patterns.len())
            .sum();
        println!(
            "    - {} ({} routes, {} origins, {:?})",
            endpoint.id,
            routes,
            endpoint.origins.len(),
            endpoint.load_balancing
        );
    }

    Ok(())
}
