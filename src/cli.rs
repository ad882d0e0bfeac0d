//! Command-line interface
//!
//! The `config` subcommand (interactive setup wizard) is an external
//! collaborator per the project's scope; it is accepted here but not
//! implemented — the routing core never needs it to start serving `server`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Multi-provider AI code generation over MCP
#[derive(Parser, Debug)]
#[command(name = "mcp-code-api")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML), defaults to `~/.cerebras-mcp.yaml`
    #[arg(short, long, global = true, env = "MCP_CODE_API_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose logging (info-level even if config says otherwise)
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Debug logging (trace-level)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Top-level subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the MCP server on stdio
    Server(ServerArgs),
    /// Interactive configuration wizard (external collaborator, not implemented here)
    Config,
}

/// Flags specific to `server`
#[derive(Parser, Debug, Default)]
pub struct ServerArgs {
    /// Write logs to this file instead of stderr
    #[arg(long, env = "MCP_CODE_API_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Override the metrics HTTP endpoint port and enable it
    #[arg(long, env = "MCP_CODE_API_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}
