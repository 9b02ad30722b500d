//! get_logs tool
//!
//! Tails the JSON-lines log file with level and substring filters.

use serde::Deserialize;
use serde_json::Value;

use durandal_core::{MemoryError, Result};

use super::parse_args;
use crate::logging::{parse_level, read_logs};
use crate::server::McpServer;

const DEFAULT_LINES: i64 = 50;
const MAX_LINES: i64 = 500;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "lines": {
                "type": "integer",
                "description": "Number of entries to return (default 50, capped at 500)",
                "default": 50,
                "minimum": 1,
                "maximum": 500
            },
            "level_filter": {
                "type": "string",
                "enum": ["error", "warn", "info", "debug"],
                "description": "Minimum severity to include"
            },
            "search": {
                "type": "string",
                "description": "Substring to match against log messages"
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct LogsArgs {
    lines: Option<i64>,
    level_filter: Option<String>,
    search: Option<String>,
}

pub async fn execute(server: &McpServer, args: Option<Value>) -> Result<String> {
    let args: LogsArgs = parse_args(args)?;

    let lines = args.lines.unwrap_or(DEFAULT_LINES).clamp(1, MAX_LINES) as usize;
    let level = args
        .level_filter
        .as_deref()
        .map(|raw| {
            parse_level(raw).ok_or_else(|| {
                MemoryError::validation(
                    "level_filter",
                    raw,
                    "must be one of error, warn, info, debug",
                )
            })
        })
        .transpose()?;

    let entries = read_logs(
        server.logging.config(),
        lines,
        level,
        args.search.as_deref(),
    )?;

    let mut output = vec![format!("📜 {} log entries", entries.len())];
    for entry in &entries {
        output.push(format!(
            "{} [{}] {}",
            entry.timestamp, entry.level, entry.message
        ));
    }
    Ok(output.join("\n"))
}
