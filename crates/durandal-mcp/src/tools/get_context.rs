//! get_context tool
//!
//! One call for session startup: recent memories from the store, the cache
//! subset matching the project/session, tier-2 context when RAMR is enabled,
//! and optional statistics. Store failures render as a note instead of
//! failing the call.

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use durandal_core::{Memory, MemoryStore, Result};

use super::{parse_args, snippet};
use crate::server::McpServer;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "project": { "type": "string", "description": "Project to scope the context to" },
            "session": { "type": "string", "description": "Session to scope the context to" },
            "limit": {
                "type": "integer",
                "description": "Maximum recent memories (default 10, capped at 50)",
                "default": 10,
                "minimum": 0,
                "maximum": 50
            },
            "include_stats": {
                "type": "boolean",
                "description": "Append cache statistics and feature flags",
                "default": false
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ContextArgs {
    project: Option<String>,
    session: Option<String>,
    limit: Option<i64>,
    include_stats: Option<bool>,
}

pub async fn execute(server: &McpServer, args: Option<Value>) -> Result<String> {
    let args: ContextArgs = parse_args(args)?;
    let limit = args.limit.unwrap_or(10).clamp(0, 50) as usize;

    let scope = match (&args.project, &args.session) {
        (Some(p), Some(s)) => format!("project \"{}\", session \"{}\"", p, s),
        (Some(p), None) => format!("project \"{}\"", p),
        (None, Some(s)) => format!("session \"{}\"", s),
        (None, None) => "all projects".to_string(),
    };
    let mut lines = vec![format!("📋 Context for {}", scope)];

    // Recent memories from the durable store; degraded, not fatal.
    match server.memory_store().get_recent_memories(
        args.project.as_deref(),
        args.session.as_deref(),
        limit,
    ) {
        Ok(recent) => {
            lines.push(String::new());
            lines.push(format!("Recent memories ({}):", recent.len()));
            for (i, memory) in recent.iter().enumerate() {
                lines.push(format!(
                    "{}. [{}] {} - {}",
                    i + 1,
                    memory.id,
                    memory.created_at.format("%Y-%m-%d %H:%M"),
                    snippet(&memory.content, 100),
                ));
            }
        }
        Err(error) => {
            warn!(error = %error, "recent-memory query failed");
            lines.push(String::new());
            lines.push(format!("Recent memories unavailable: {}", error));
        }
    }

    // Cache subset matching both scopes.
    let mut cached: Vec<_> = server
        .cache
        .snapshot()
        .into_iter()
        .filter(|entry| {
            args.project
                .as_deref()
                .is_none_or(|p| entry.memory.metadata.project() == p)
                && args
                    .session
                    .as_deref()
                    .is_none_or(|s| entry.memory.metadata.session() == s)
        })
        .collect();
    cached.sort_by(|a, b| b.last_access.cmp(&a.last_access));
    lines.push(String::new());
    lines.push(format!("Cached entries in scope: {}", cached.len()));
    for entry in cached.iter().take(limit) {
        lines.push(format!(
            "- [{}] {}",
            entry.memory.id,
            snippet(&entry.memory.content, 80)
        ));
    }

    // Tier-2 context, promoting anything hot enough into tier-1.
    if let Some(ramr) = &server.ramr {
        let query = args
            .project
            .as_deref()
            .or(args.session.as_deref())
            .unwrap_or("");
        match ramr.get_relevant_context(query, limit.max(1)) {
            Ok(entries) => {
                lines.push(String::new());
                lines.push(format!("Rapid-access entries: {}", entries.len()));
                for entry in &entries {
                    if entry.priority_score > server.config.ramr.cache_threshold
                        && let Ok(memory) = serde_json::from_str::<Memory>(&entry.data)
                        && !server.cache.contains(&memory.id)
                    {
                        server.cache.insert(memory);
                    }
                    lines.push(format!(
                        "- [{}] priority {:.1} ({})",
                        entry.key, entry.priority_score, entry.cache_type
                    ));
                }
            }
            Err(error) => {
                warn!(error = %error, "tier-2 context query failed");
            }
        }
    }

    if args.include_stats.unwrap_or(false) {
        let stats = server.cache.stats();
        lines.push(String::new());
        lines.push("Stats:".to_string());
        lines.push(format!(
            "  Cache: {}/{} entries, hit rate {:.1}%",
            stats.size,
            stats.max_size,
            stats.hit_rate * 100.0
        ));
        lines.push(format!(
            "  Features: ramr={} prefetch={} selective_attention={}",
            if server.config.ramr.enabled { "on" } else { "off" },
            if server.config.ramr.prefetch { "on" } else { "off" },
            if server.config.attention.enabled { "on" } else { "off" },
        ));
        lines.push(format!(
            "  Store writes failed: {}",
            server
                .write_counters
                .failed
                .load(std::sync::atomic::Ordering::Relaxed)
        ));
    }

    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::store_memory;
    use crate::tools::test_support::{test_server, test_server_with};
    use durandal_core::Config;

    async fn store(server: &McpServer, content: &str, metadata: Value) {
        store_memory::execute(
            server,
            Some(serde_json::json!({"content": content, "metadata": metadata})),
        )
        .await
        .unwrap();
    }

    async fn wait_for_store(server: &McpServer, rows: i64) {
        for _ in 0..50 {
            if server.store.count_memories().unwrap() >= rows {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_context_scopes_by_project_and_session() {
        let (_dir, server) = test_server();
        store(&server, "in scope", serde_json::json!({"project": "p", "session": "s"})).await;
        store(&server, "other project", serde_json::json!({"project": "q", "session": "s"})).await;
        wait_for_store(&server, 2).await;

        let text = execute(
            &server,
            Some(serde_json::json!({"project": "p", "session": "s"})),
        )
        .await
        .unwrap();

        assert!(text.contains("Recent memories (1):"));
        assert!(text.contains("in scope"));
        assert!(!text.contains("other project"));
        assert!(text.contains("Cached entries in scope: 1"));
    }

    #[tokio::test]
    async fn test_include_stats_renders_flags_and_hit_rate() {
        let (_dir, server) = test_server();
        store(&server, "something", serde_json::json!({})).await;

        let text = execute(&server, Some(serde_json::json!({"include_stats": true})))
            .await
            .unwrap();
        assert!(text.contains("Stats:"));
        assert!(text.contains("Cache: 1/1000"));
        assert!(text.contains("ramr=off"));
        assert!(text.contains("Store writes failed: 0"));
    }

    #[tokio::test]
    async fn test_limit_is_clamped_to_fifty() {
        let (_dir, server) = test_server();
        // Does not fail; just clamps.
        let text = execute(&server, Some(serde_json::json!({"limit": 500})))
            .await
            .unwrap();
        assert!(text.contains("Recent memories (0):"));
    }

    #[tokio::test]
    async fn test_ramr_promotion_into_cache() {
        let mut config = Config::default();
        config.ramr.enabled = true;
        let (_dir, server) = test_server_with(config);

        store(&server, "promoted from tier-2", serde_json::json!({"project": "hot", "importance": 1.0, "categories": ["code"], "keywords": ["k"]})).await;
        // Drop it from tier-1 to prove the promotion path restores it.
        let id = {
            let snapshot = server.cache.snapshot();
            snapshot[0].memory.id.clone()
        };
        server.cache.remove(&id);
        assert!(!server.cache.contains(&id));

        let text = execute(&server, Some(serde_json::json!({"project": "hot"})))
            .await
            .unwrap();
        assert!(text.contains("Rapid-access entries: 1"));
        assert!(server.cache.contains(&id), "high-priority entry promoted");
    }
}
