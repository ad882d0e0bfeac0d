//! MCP Protocol types (version 2024-11-05)

mod messages;
mod types;

pub use messages::*;
pub use types::*;
