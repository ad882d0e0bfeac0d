//! mcp-code-api - multi-provider AI code generation over MCP

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use mcp_code_api::{
    cli::{Cli, Command},
    config::AppConfig,
    server::Server,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if cli.verbose {
        config.logging.verbose = true;
    }
    if cli.debug {
        config.logging.debug = true;
    }

    if let Some(Command::Server(ref args)) = cli.command {
        if let Some(port) = args.metrics_port {
            config.metrics.enabled = true;
            config.metrics.port = port;
        }
    }

    if let Err(e) = setup_tracing(config.logging.effective_level(), config.logging.json) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command.unwrap_or(Command::Server(Default::default())) {
        Command::Config => {
            eprintln!("the config wizard is not implemented; edit ~/.cerebras-mcp.yaml directly");
            ExitCode::FAILURE
        }
        Command::Server(_) => {
            info!(
                version = env!("CARGO_PKG_VERSION"),
                providers = config.providers.len(),
                strategy = config.router.strategy,
                "starting mcp-code-api"
            );

            let server = Server::new(config);
            if let Err(e) = server.run().await {
                error!(error = %e, "server exited with an error");
                return ExitCode::FAILURE;
            }

            info!("shutdown complete");
            ExitCode::SUCCESS
        }
    }
}
