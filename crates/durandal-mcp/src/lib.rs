//! Durandal MCP server library
//!
//! Protocol, dispatcher, tools, logging, and maintenance for the memory
//! server. The binary in `main.rs` wires these together; the e2e test crate
//! drives them directly through [`server::McpServer`].

pub mod logging;
pub mod maintenance;
pub mod protocol;
pub mod server;
pub mod tools;
