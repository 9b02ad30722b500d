//! store_memory tool
//!
//! Validates and enriches the incoming memory, writes it to the cache
//! synchronously, and schedules the durable store write in the background.
//! A store failure never fails the call; it is logged and counted for
//! `get_status`.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use durandal_core::{
    enrich_metadata, validate_content, validate_importance, Memory, MemoryMetadata, MemoryStore,
    RamrSetOptions, Result,
};

use super::parse_args;
use crate::server::McpServer;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "content": {
                "type": "string",
                "description": "Memory content (1 to 50000 characters)",
                "minLength": 1,
                "maxLength": 50000
            },
            "metadata": {
                "type": "object",
                "description": "Optional metadata: project, session, type, importance (0-1), categories, keywords, relationships",
                "properties": {
                    "project": { "type": "string" },
                    "session": { "type": "string" },
                    "type": { "type": "string" },
                    "importance": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "categories": { "type": "array", "items": { "type": "string" } },
                    "keywords": { "type": "array", "items": { "type": "string" } },
                    "relationships": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "type": { "type": "string" },
                                "target": { "type": "string" },
                                "strength": { "type": "number" }
                            },
                            "required": ["type", "target"]
                        }
                    }
                }
            }
        },
        "required": ["content"]
    })
}

#[derive(Debug, Deserialize)]
struct StoreArgs {
    content: String,
    #[serde(default)]
    metadata: Option<MemoryMetadata>,
}

pub async fn execute(server: &McpServer, args: Option<Value>) -> Result<String> {
    let args: StoreArgs = parse_args(args)?;

    validate_content(&args.content)?;
    let metadata = args.metadata.unwrap_or_default();
    if let Some(importance) = metadata.importance {
        validate_importance(importance)?;
    }

    let now = Utc::now();
    let enriched = enrich_metadata(metadata, now);
    let id = enriched.id.clone().unwrap_or_default();
    let memory = Memory::new(id.clone(), args.content.clone(), enriched.clone());

    // Cache write is synchronous so the memory is immediately searchable.
    server.cache.record_access(&id, durandal_core::AccessKind::Store);
    server.cache.insert(memory.clone());

    // Durable write is fire-and-forget; failures are counted and logged.
    server.write_counters.scheduled.fetch_add(1, Ordering::Relaxed);
    {
        let store = Arc::clone(&server.store);
        let counters = Arc::clone(&server.write_counters);
        let content = args.content.clone();
        let enriched = enriched.clone();
        let id = id.clone();
        tokio::spawn(async move {
            if let Err(e) = store.store_memory(&content, &enriched) {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(memory_id = %id, error = %e, "background store write failed");
            } else {
                debug!(memory_id = %id, "store write complete");
            }
        });
    }

    // Mirror into tier-2 when enabled, sized by the derived priority.
    if let Some(ramr) = &server.ramr {
        let priority = (enriched.cache_priority() * 10.0).clamp(0.0, 10.0);
        let options = RamrSetOptions {
            priority,
            cache_type: ramr_cache_type(&enriched),
            tags: enriched.categories.clone(),
            metadata: None,
        };
        match serde_json::to_string(&memory) {
            Ok(payload) => {
                if let Err(e) = ramr.set(&format!("memory:{}", id), &payload, options) {
                    warn!(memory_id = %id, error = %e, "tier-2 write failed");
                }
            }
            Err(e) => warn!(memory_id = %id, error = %e, "tier-2 payload serialization failed"),
        }
    }

    let mut lines = vec![
        "✅ Memory stored".to_string(),
        format!("ID: {}", id),
        format!("Project: {}", enriched.project()),
        format!("Session: {}", enriched.session()),
        format!("Importance: {}", enriched.importance()),
    ];
    if !enriched.categories.is_empty() {
        lines.push(format!("Categories: {}", enriched.categories.join(", ")));
    }
    lines.push(format!("Cache priority: {:.2}", enriched.cache_priority()));
    Ok(lines.join("\n"))
}

/// Tier-2 category for TTL scaling, inferred from type/categories.
fn ramr_cache_type(metadata: &MemoryMetadata) -> String {
    const KNOWN: &[&str] = &["solution", "configuration", "knowledge", "temporary"];
    if metadata.kind.as_deref() == Some("conversation") {
        return "conversation_summary".to_string();
    }
    if let Some(kind) = metadata.kind.as_deref()
        && KNOWN.contains(&kind)
    {
        return kind.to_string();
    }
    metadata
        .categories
        .iter()
        .find(|c| KNOWN.contains(&c.as_str()))
        .cloned()
        .unwrap_or_else(|| "knowledge".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::test_server;
    use durandal_core::MAX_CONTENT_CHARS;

    #[tokio::test]
    async fn test_store_response_fields() {
        let (_dir, server) = test_server();
        let args = serde_json::json!({
            "content": "hello world",
            "metadata": {"project": "p1", "importance": 0.9}
        });

        let text = execute(&server, Some(args)).await.unwrap();
        assert!(text.contains("Project: p1"));
        assert!(text.contains("Importance: 0.9"));
        assert!(text.contains("ID: mem_"));
        assert_eq!(server.cache.len(), 1);
    }

    #[tokio::test]
    async fn test_cache_holds_exact_content_and_importance() {
        let (_dir, server) = test_server();
        let args = serde_json::json!({
            "content": "check invariants",
            "metadata": {"importance": 0.25}
        });

        let text = execute(&server, Some(args)).await.unwrap();
        let id = text
            .lines()
            .find_map(|l| l.strip_prefix("ID: "))
            .unwrap()
            .to_string();

        let cached = server.cache.get(&id).unwrap();
        assert_eq!(cached.content, "check invariants");
        assert_eq!(cached.metadata.importance, Some(0.25));
    }

    #[tokio::test]
    async fn test_default_importance_applied() {
        let (_dir, server) = test_server();
        let text = execute(&server, Some(serde_json::json!({"content": "no metadata"})))
            .await
            .unwrap();
        assert!(text.contains("Importance: 0.5"));
        assert!(text.contains("Project: default"));
    }

    #[tokio::test]
    async fn test_content_validation_boundaries() {
        let (_dir, server) = test_server();

        let empty = execute(&server, Some(serde_json::json!({"content": ""}))).await;
        assert!(empty.is_err());

        let exact = serde_json::json!({"content": "x".repeat(MAX_CONTENT_CHARS)});
        assert!(execute(&server, Some(exact)).await.is_ok());

        let over = serde_json::json!({"content": "x".repeat(MAX_CONTENT_CHARS + 1)});
        let err = execute(&server, Some(over)).await.unwrap_err();
        assert!(err.to_string().contains("content"));
    }

    #[tokio::test]
    async fn test_importance_out_of_range_adds_nothing() {
        let (_dir, server) = test_server();
        let args = serde_json::json!({
            "content": "x",
            "metadata": {"importance": 1.5}
        });

        let err = execute(&server, Some(args)).await.unwrap_err();
        assert!(err.to_string().contains("importance"));
        assert_eq!(server.cache.len(), 0);
        assert_eq!(server.store.count_memories().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_durable_write_lands() {
        let (_dir, server) = test_server();
        execute(
            &server,
            Some(serde_json::json!({"content": "durable", "metadata": {"project": "p"}})),
        )
        .await
        .unwrap();

        // The store write is async; give it a moment.
        for _ in 0..50 {
            if server.store.count_memories().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.store.count_memories().unwrap(), 1);

        let found = server
            .store
            .search_memories("durable", &Default::default(), 10)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.project(), "p");
    }

    #[test]
    fn test_ramr_cache_type_inference() {
        let conversation = MemoryMetadata {
            kind: Some("conversation".into()),
            ..Default::default()
        };
        assert_eq!(ramr_cache_type(&conversation), "conversation_summary");

        let solution = MemoryMetadata {
            kind: Some("solution".into()),
            ..Default::default()
        };
        assert_eq!(ramr_cache_type(&solution), "solution");

        let by_category = MemoryMetadata {
            categories: vec!["docs".into(), "configuration".into()],
            ..Default::default()
        };
        assert_eq!(ramr_cache_type(&by_category), "configuration");

        assert_eq!(ramr_cache_type(&MemoryMetadata::default()), "knowledge");
    }
}
