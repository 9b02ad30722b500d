//! End-to-end test harness
//!
//! Builds a full MCP server over an isolated temporary home and drives it
//! through real JSON-RPC frames, the same way a client over stdio would.

use std::path::Path;
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;

use durandal_core::{run_startup_checks, Config, MemoryCache, Ramr, SqliteStore};
use durandal_mcp::logging::{LogConfig, LoggingHandle};
use durandal_mcp::protocol::types::{JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};
use durandal_mcp::server::McpServer;

/// What a tool call produced, extracted from the MCP content array.
#[derive(Debug, Clone)]
pub struct ToolReply {
    pub text: String,
    pub is_error: bool,
}

/// An isolated server instance rooted in a temp directory.
pub struct TestHarness {
    /// Kept alive so the databases survive the test body.
    pub dir: TempDir,
    pub server: Arc<McpServer>,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store =
            Arc::new(SqliteStore::open(&dir.path().join("durandal-mcp-memory.db")).unwrap());
        let startup = run_startup_checks(&store);
        let cache = Arc::new(MemoryCache::new(config.cache.clone()));
        let ramr = if config.ramr.enabled {
            Some(Arc::new(
                Ramr::open(&dir.path().join("ramr-cache.db"), config.ramr.clone()).unwrap(),
            ))
        } else {
            None
        };
        let logging = Arc::new(LoggingHandle::detached(log_config(dir.path())));
        let server = Arc::new(McpServer::new(store, cache, ramr, config, logging, startup));
        Self { dir, server }
    }

    /// Raw JSON-RPC round-trip.
    pub async fn rpc(&self, method: &str, params: Value) -> Option<JsonRpcResponse> {
        let request = JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(json!(1)),
            method: method.to_string(),
            params: Some(params),
        };
        self.server.handle_request(request).await
    }

    /// Perform the MCP initialize handshake.
    pub async fn initialize(&self) {
        let response = self
            .rpc("initialize", json!({"protocolVersion": "2025-03-26"}))
            .await
            .expect("initialize response");
        assert!(response.error.is_none(), "initialize failed: {:?}", response.error);
    }

    /// Call a tool and unwrap the text content.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolReply {
        let response = self
            .rpc("tools/call", json!({"name": name, "arguments": arguments}))
            .await
            .expect("tool response");
        let result = response
            .result
            .unwrap_or_else(|| panic!("tool call error: {:?}", response.error));
        ToolReply {
            text: result["content"][0]["text"]
                .as_str()
                .expect("text content")
                .to_string(),
            is_error: result["isError"].as_bool().unwrap_or(false),
        }
    }

    /// Pull the generated memory id out of a store_memory response.
    pub fn extract_id(reply: &ToolReply) -> String {
        reply
            .text
            .lines()
            .find_map(|l| l.strip_prefix("ID: "))
            .expect("ID line")
            .to_string()
    }

    /// Wait until the background store writes have landed.
    pub async fn wait_for_rows(&self, rows: i64) {
        let store = self.server.store_handle();
        for _ in 0..100 {
            if store.count_memories().unwrap_or(0) >= rows {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("store never reached {} rows", rows);
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn log_config(dir: &Path) -> LogConfig {
    LogConfig {
        console_level: "info".to_string(),
        file_level: "info".to_string(),
        logs_dir: dir.join("logs"),
        file_prefix: "durandal-mcp.log".to_string(),
        error_log: None,
        log_tool_calls: false,
        env_file: dir.join(".env"),
    }
}
