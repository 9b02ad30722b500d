//! MCP Protocol Implementation
//!
//! JSON-RPC 2.0 over line-delimited stdio for the Model Context Protocol.

pub mod messages;
pub mod stdio;
pub mod types;
