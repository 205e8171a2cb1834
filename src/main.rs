//! Integration Tester - declarative REST catalog with an authenticated proxy

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use integration_tester::{
    Result,
    catalog::{Catalog, CatalogLoader, validate_catalog},
    cli::{CatalogCommand, Cli, Command, RequestArgs},
    config::Config,
    resolver::{FormState, RequestResolver, ResolvedRequest},
    server::Server,
    setup_tracing,
    transport::{HttpTransport, Transport},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Catalog(cmd)) => run_catalog_command(cmd, &config).await,
        Some(Command::Resolve(args)) => run_request(&args, &config, false).await,
        Some(Command::Execute(args)) => run_request(&args, &config, true).await,
        Some(Command::Serve { port, host }) => run_server(config, port, host).await,
        None => run_server(config, None, None).await,
    }
}

/// Run catalog subcommands
async fn run_catalog_command(cmd: CatalogCommand, config: &Config) -> ExitCode {
    match cmd {
        CatalogCommand::List { path } => {
            let paths = path.map_or_else(|| config.catalog_paths(), |p| vec![p]);
            let catalog = match Catalog::load_paths(&paths).await {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("❌ Failed to load catalog: {e}");
                    return ExitCode::FAILURE;
                }
            };

            if catalog.is_empty() {
                println!("No integrations found");
                return ExitCode::SUCCESS;
            }

            println!("Found {} integrations:\n", catalog.len());
            for integration in catalog.iter() {
                println!(
                    "  {} - {} [{}]",
                    integration.key,
                    integration.display_name(),
                    integration.auth.label()
                );
                for endpoint in &integration.endpoints {
                    println!("      {:<6} {:<28} {}", endpoint.method, endpoint.id, endpoint.path);
                }
            }
            ExitCode::SUCCESS
        }

        CatalogCommand::Validate { paths } => validate_paths(&paths).await,
    }
}

async fn validate_paths(paths: &[PathBuf]) -> ExitCode {
    let mut all = Vec::new();
    let mut failed = false;

    for path in paths {
        let loaded = CatalogLoader::load_path(path).await.and_then(|integrations| {
            validate_catalog(&integrations)?;
            Ok(integrations)
        });
        match loaded {
            Ok(integrations) => {
                println!("✅ {}: {} integration(s)", path.display(), integrations.len());
                all.extend(integrations);
            }
            Err(e) => {
                eprintln!("❌ {}: {e}", path.display());
                failed = true;
            }
        }
    }

    // Keys must also be unique across files
    if !failed {
        if let Err(e) = validate_catalog(&all) {
            eprintln!("❌ {e}");
            failed = true;
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Build (and optionally send) a single request
async fn run_request(args: &RequestArgs, config: &Config, execute: bool) -> ExitCode {
    let request = match build_request(args, config).await {
        Ok(r) => r,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    if !execute {
        println!(
            "{}",
            serde_json::to_string_pretty(&request).unwrap_or_default()
        );
        return ExitCode::SUCCESS;
    }

    let transport = match HttpTransport::new(config.transport.timeout) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match transport.send(&request).await {
        Ok(response) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&response).unwrap_or_default()
            );
            if response.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn build_request(args: &RequestArgs, config: &Config) -> Result<ResolvedRequest> {
    let catalog = Catalog::load_paths(&config.catalog_paths()).await?;
    let integration = catalog.get_integration(&args.integration)?;
    let endpoint = catalog.get_endpoint(&args.integration, &args.endpoint)?;
    let auth = args.auth_manager(&config.oauth)?;

    let mut form = FormState::new();
    form.select_endpoint(integration, &args.endpoint)?;
    let values = form.submission(integration, args.values());

    RequestResolver::new()
        .with_strict_validation(config.resolver.strict_validation)
        .resolve(integration, endpoint, &values, &auth)
}

/// Run the proxy server
async fn run_server(mut config: Config, port: Option<u16>, host: Option<String>) -> ExitCode {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(host) = host {
        config.server.host = host;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        catalog = ?config.catalog.paths,
        "Starting integration tester"
    );

    let server = match Server::new(config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create server: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Server error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Shutdown complete");
    ExitCode::SUCCESS
}
