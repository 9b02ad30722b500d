//! optimize_memory tool
//!
//! Executes maintenance operations in the order requested, one summary line
//! each. Unknown operation names are rejected before anything runs.

use serde::Deserialize;
use serde_json::Value;

use durandal_core::{MemoryError, Result};

use super::parse_args;
use crate::server::McpServer;

const OPERATIONS: &[&str] = &[
    "cache_optimization",
    "retention_review",
    "pattern_analysis",
    "relationship_update",
];

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "operations": {
                "type": "array",
                "description": "Operations to run, in order. Defaults to all of them.",
                "items": {
                    "type": "string",
                    "enum": OPERATIONS
                }
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OptimizeArgs {
    operations: Option<Vec<String>>,
}

pub async fn execute(server: &McpServer, args: Option<Value>) -> Result<String> {
    let args: OptimizeArgs = parse_args(args)?;
    let operations = args
        .operations
        .unwrap_or_else(|| OPERATIONS.iter().map(|s| s.to_string()).collect());

    for op in &operations {
        if !OPERATIONS.contains(&op.as_str()) {
            return Err(MemoryError::validation(
                "operations",
                op,
                format!("must be one of {:?}", OPERATIONS),
            ));
        }
    }

    let mut lines = vec!["🔧 Memory optimization".to_string()];
    for op in &operations {
        let line = match op.as_str() {
            "cache_optimization" => {
                let evicted = server.cache.optimize();
                format!(
                    "cache_optimization: evicted {} expired entries, {} remain",
                    evicted,
                    server.cache.len()
                )
            }
            "retention_review" => {
                if server.config.attention.enabled {
                    let marked = server.cache.mark_archive_candidates(
                        server.config.attention.archive_after_days,
                        server.config.attention.retention_threshold,
                    );
                    format!("retention_review: flagged {} archive candidates", marked)
                } else {
                    "retention_review: skipped (selective attention disabled)".to_string()
                }
            }
            "pattern_analysis" => {
                let min_support = server.config.cache.pattern_min_support;
                let mut patterns: Vec<(String, usize)> = server
                    .cache
                    .category_counts()
                    .into_iter()
                    .filter(|(_, count)| *count >= min_support)
                    .collect();
                patterns.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
                if patterns.is_empty() {
                    "pattern_analysis: no recurring categories".to_string()
                } else {
                    let rendered: Vec<String> = patterns
                        .iter()
                        .map(|(name, count)| format!("{}({})", name, count))
                        .collect();
                    format!("pattern_analysis: {}", rendered.join(", "))
                }
            }
            "relationship_update" => {
                format!(
                    "relationship_update: {} relationships across {} cached memories",
                    server.cache.relationship_total(),
                    server.cache.len()
                )
            }
            _ => unreachable!("validated above"),
        };
        lines.push(line);
    }

    Ok(lines.join("\n"))
}
