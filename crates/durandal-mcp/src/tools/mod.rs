//! MCP Tools
//!
//! One module per tool, each exposing `schema()` (a JSON-schema object for
//! tools/list) and `execute()` (the handler). The dispatcher knows tools only
//! through [`descriptions`] and [`dispatch`].

pub mod configure_logging;
pub mod get_context;
pub mod get_logs;
pub mod get_status;
pub mod list_projects_sessions;
pub mod optimize_memory;
pub mod search_memories;
pub mod store_memory;

use serde::de::DeserializeOwned;
use serde_json::Value;

use durandal_core::{MemoryError, Result};

use crate::protocol::messages::ToolDescription;
use crate::server::McpServer;

/// The tool table served by tools/list.
pub fn descriptions() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "store_memory".to_string(),
            description: Some(
                "Store a memory with optional metadata (project, session, importance, \
                 categories, keywords, relationships). Returns the new memory id."
                    .to_string(),
            ),
            input_schema: store_memory::schema(),
        },
        ToolDescription {
            name: "search_memories".to_string(),
            description: Some(
                "Substring search across stored memories with optional filters \
                 (project, session, categories, importance range, date range)."
                    .to_string(),
            ),
            input_schema: search_memories::schema(),
        },
        ToolDescription {
            name: "get_context".to_string(),
            description: Some(
                "Recent memories for a project/session plus the matching cache subset; \
                 optionally includes cache statistics and feature flags."
                    .to_string(),
            ),
            input_schema: get_context::schema(),
        },
        ToolDescription {
            name: "optimize_memory".to_string(),
            description: Some(
                "Run maintenance operations: cache_optimization, retention_review, \
                 pattern_analysis, relationship_update. Defaults to all four in order."
                    .to_string(),
            ),
            input_schema: optimize_memory::schema(),
        },
        ToolDescription {
            name: "get_status".to_string(),
            description: Some(
                "Server status: uptime, store path and size, cache fill and hit rate, \
                 feature flags, log levels, and startup check results."
                    .to_string(),
            ),
            input_schema: get_status::schema(),
        },
        ToolDescription {
            name: "configure_logging".to_string(),
            description: Some(
                "Change console and/or file log levels on the running server and persist \
                 them to the user env file. Levels: error, warn, info, debug."
                    .to_string(),
            ),
            input_schema: configure_logging::schema(),
        },
        ToolDescription {
            name: "get_logs".to_string(),
            description: Some(
                "Read recent entries from the JSON log file, filtered by minimum level \
                 and substring."
                    .to_string(),
            ),
            input_schema: get_logs::schema(),
        },
        ToolDescription {
            name: "list_projects_sessions".to_string(),
            description: Some(
                "Aggregate memory counts by project and/or session, with optional sample \
                 contents."
                    .to_string(),
            ),
            input_schema: list_projects_sessions::schema(),
        },
    ]
}

/// Route a tool call. `None` means the tool name is unknown.
pub async fn dispatch(
    server: &McpServer,
    name: &str,
    args: Option<Value>,
) -> Option<Result<String>> {
    Some(match name {
        "store_memory" => store_memory::execute(server, args).await,
        "search_memories" => search_memories::execute(server, args).await,
        "get_context" => get_context::execute(server, args).await,
        "optimize_memory" => optimize_memory::execute(server, args).await,
        "get_status" => get_status::execute(server, args).await,
        "configure_logging" => configure_logging::execute(server, args).await,
        "get_logs" => get_logs::execute(server, args).await,
        "list_projects_sessions" => list_projects_sessions::execute(server, args).await,
        _ => return None,
    })
}

/// Deserialize tool arguments, treating absent arguments as `{}`.
pub(crate) fn parse_args<T: DeserializeOwned>(args: Option<Value>) -> Result<T> {
    let value = args.unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    serde_json::from_value(value)
        .map_err(|e| MemoryError::validation("arguments", "<object>", e.to_string()))
}

/// Single-line content snippet for rendered results.
pub(crate) fn snippet(content: &str, max_chars: usize) -> String {
    let flat: String = content
        .chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let truncated: String = flat.chars().take(max_chars).collect();
    format!("{}…", truncated)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;

    use durandal_core::{
        run_startup_checks, Config, MemoryCache, Ramr, SqliteStore,
    };
    use tempfile::TempDir;

    use crate::logging::{LogConfig, LoggingHandle};
    use crate::server::McpServer;

    /// In-memory test server over a temp-dir store.
    pub fn test_server_with(config: Config) -> (TempDir, Arc<McpServer>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::open(&dir.path().join("test.db")).unwrap());
        let startup = run_startup_checks(&store);
        let cache = Arc::new(MemoryCache::new(config.cache.clone()));
        let ramr = if config.ramr.enabled {
            Some(Arc::new(
                Ramr::open(&dir.path().join("ramr.db"), config.ramr.clone()).unwrap(),
            ))
        } else {
            None
        };
        let logging = Arc::new(LoggingHandle::detached(test_log_config(dir.path())));
        let server = Arc::new(McpServer::new(store, cache, ramr, config, logging, startup));
        (dir, server)
    }

    pub fn test_server() -> (TempDir, Arc<McpServer>) {
        test_server_with(Config::default())
    }

    pub fn test_log_config(dir: &Path) -> LogConfig {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_tool_has_a_schema_and_description() {
        let descriptions = descriptions();
        assert_eq!(descriptions.len(), 8);
        for tool in &descriptions {
            assert!(tool.description.is_some(), "{} lacks description", tool.name);
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        }
    }

    #[test]
    fn test_snippet_truncates_and_flattens() {
        assert_eq!(snippet("short", 10), "short");
        assert_eq!(snippet("line\nbreak", 20), "line break");
        let long = snippet(&"x".repeat(200), 10);
        assert_eq!(long.chars().count(), 11);
        assert!(long.ends_with('…'));
    }
}
