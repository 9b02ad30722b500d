//! MCP Server Core
//!
//! Owns the tool table and routes JSON-RPC requests. Every tool call gets a
//! process-unique request id and runs inside a trace span; validation
//! failures never reach a handler, and handler errors render as a
//! human-readable body with a recovery hint rather than a protocol error.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn, Instrument};

use durandal_core::{
    Config, MemoryCache, MemoryError, MemoryStore, Ramr, SqliteStore, StartupReport,
};

use crate::logging::LoggingHandle;
use crate::protocol::messages::{
    CallToolRequest, CallToolResult, InitializeRequest, InitializeResult, ListToolsResult,
    ServerCapabilities, ServerInfo,
};
use crate::protocol::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_VERSION};
use crate::tools;

/// Counters for fire-and-forget store writes, surfaced by `get_status`.
#[derive(Debug, Default)]
pub struct WriteCounters {
    pub scheduled: AtomicU64,
    pub failed: AtomicU64,
}

/// MCP server implementation.
pub struct McpServer {
    pub(crate) store: Arc<SqliteStore>,
    pub(crate) cache: Arc<MemoryCache>,
    pub(crate) ramr: Option<Arc<Ramr>>,
    pub(crate) config: Config,
    pub(crate) logging: Arc<LoggingHandle>,
    pub(crate) startup: StartupReport,
    pub(crate) started_at: Instant,
    pub(crate) write_counters: Arc<WriteCounters>,
    pub(crate) last_maintenance: Arc<Mutex<Option<DateTime<Utc>>>>,
    initialized: AtomicBool,
    request_counter: AtomicU64,
}

impl McpServer {
    pub fn new(
        store: Arc<SqliteStore>,
        cache: Arc<MemoryCache>,
        ramr: Option<Arc<Ramr>>,
        config: Config,
        logging: Arc<LoggingHandle>,
        startup: StartupReport,
    ) -> Self {
        Self {
            store,
            cache,
            ramr,
            config,
            logging,
            startup,
            started_at: Instant::now(),
            write_counters: Arc::new(WriteCounters::default()),
            last_maintenance: Arc::new(Mutex::new(None)),
            initialized: AtomicBool::new(false),
            request_counter: AtomicU64::new(0),
        }
    }

    /// Shared maintenance timestamp slot (written by the maintenance loop,
    /// read by `get_status`).
    pub fn last_maintenance_slot(&self) -> Arc<Mutex<Option<DateTime<Utc>>>> {
        Arc::clone(&self.last_maintenance)
    }

    /// Tier-1 cache handle (maintenance wiring and black-box tests).
    pub fn cache_handle(&self) -> Arc<MemoryCache> {
        Arc::clone(&self.cache)
    }

    /// Durable store handle (maintenance wiring and black-box tests).
    pub fn store_handle(&self) -> Arc<SqliteStore> {
        Arc::clone(&self.store)
    }

    /// The store behind the capability trait the tools use.
    pub(crate) fn memory_store(&self) -> &dyn MemoryStore {
        self.store.as_ref()
    }

    /// Handle an incoming JSON-RPC request. `None` means no response
    /// (notification).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("handling request: {}", request.method);

        if !self.initialized.load(Ordering::SeqCst)
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params),
            "notifications/initialized" => return None,
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(serde_json::json!({})),
            method => Err(JsonRpcError::method_not_found(method)),
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: InitializeRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => InitializeRequest::default(),
        };

        // Some clients reject servers that claim a newer protocol revision;
        // answer with the client's when it is older.
        let negotiated = if request.protocol_version.as_str() < MCP_VERSION {
            request.protocol_version.clone()
        } else {
            MCP_VERSION.to_string()
        };

        self.initialized.store(true, Ordering::SeqCst);
        info!(protocol = %negotiated, "MCP session initialized");

        let result = InitializeResult {
            protocol_version: negotiated,
            server_info: ServerInfo {
                name: "durandal-mcp".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            capabilities: ServerCapabilities {
                tools: Some({
                    let mut map = HashMap::new();
                    map.insert("listChanged".to_string(), serde_json::json!(false));
                    map
                }),
                resources: None,
                prompts: None,
            },
            instructions: Some(
                "Durandal is a persistent memory layer. Use store_memory to keep important \
                 context, search_memories to recall it, and get_context at session start for \
                 recent project state. Memories carry project/session metadata, so always pass \
                 the project you are working in."
                    .to_string(),
            ),
        };

        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    fn handle_tools_list(&self) -> Result<Value, JsonRpcError> {
        let result = ListToolsResult {
            tools: tools::descriptions(),
        };
        serde_json::to_value(result).map_err(|e| JsonRpcError::internal_error(&e.to_string()))
    }

    async fn handle_tools_call(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let request: CallToolRequest = match params {
            Some(p) => serde_json::from_value(p)
                .map_err(|e| JsonRpcError::invalid_params(&e.to_string()))?,
            None => return Err(JsonRpcError::invalid_params("missing tool call parameters")),
        };

        let request_id = self.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let span = tracing::info_span!("tool_call", tool = %request.name, request_id);

        let result = async {
            let started = Instant::now();
            debug!(args = %summarize_args(&request.arguments), "dispatching");
            if self.logging.log_tool_calls() {
                info!(
                    args = %request.arguments.clone().unwrap_or(serde_json::Value::Null),
                    "tool call arguments"
                );
            }

            let outcome = match tools::dispatch(self, &request.name, request.arguments).await {
                Some(outcome) => outcome,
                None => {
                    warn!("unknown tool requested");
                    return Err(JsonRpcError::method_not_found(&request.name));
                }
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            let rendered = match outcome {
                Ok(text) => {
                    info!(
                        duration_ms,
                        result = %first_line(&text),
                        "tool call succeeded"
                    );
                    CallToolResult::ok(text)
                }
                Err(error) => {
                    warn!(
                        duration_ms,
                        kind = error.kind().as_str(),
                        code = error.code(),
                        "tool call failed: {}",
                        error
                    );
                    CallToolResult::err(render_error(&error))
                }
            };

            serde_json::to_value(rendered)
                .map_err(|e| JsonRpcError::internal_error(&e.to_string()))
        }
        .instrument(span)
        .await;

        result
    }
}

/// Human-readable error body: marker line plus recovery hint.
pub(crate) fn render_error(error: &MemoryError) -> String {
    format!("❌ {}\nRecovery: {}", error, error.recovery())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}

/// Compact, redacted argument summary for trace logs. Long strings are
/// reported by length only, so memory content never lands in the console log.
fn summarize_args(args: &Option<Value>) -> String {
    let Some(Value::Object(map)) = args else {
        return "none".to_string();
    };
    let mut parts: Vec<String> = Vec::with_capacity(map.len());
    for (key, value) in map {
        let rendered = match value {
            Value::String(s) if s.chars().count() > 32 => {
                format!("<{} chars>", s.chars().count())
            }
            Value::String(s) => format!("{:?}", s),
            Value::Array(items) => format!("[{} items]", items.len()),
            Value::Object(_) => "{…}".to_string(),
            other => other.to_string(),
        };
        parts.push(format!("{}={}", key, rendered));
    }
    parts.join(" ")
}
