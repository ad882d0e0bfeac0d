//! mcp-code-api: a Model Context Protocol server exposing one code-generation
//! tool (`write`) backed by a multi-provider routing core.
//!
//! # Features
//!
//! - **Strategies**: failover, round-robin, random, and speculative racing across providers
//! - **Health**: consecutive-failure tracking, advisory (not absolute) to selection
//! - **Metrics**: per-process latency/token tracking plus a cross-process shared store
//! - **Atomic writes**: backup/restore and temp-file+rename output
//!
//! # Protocol Version
//!
//! Implements MCP protocol version 2024-11-05.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod provider;
pub mod random;
pub mod retry;
pub mod router;
pub mod rpc_loop;
pub mod server;
pub mod validator;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// MCP protocol version implemented by this server
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Initialize the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber has already been installed.
pub fn setup_tracing(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))
    } else {
        subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(e.to_string()))
    }
}
