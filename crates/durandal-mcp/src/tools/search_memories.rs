//! search_memories tool
//!
//! Cache first, then store, merged deterministically: cache results keep
//! their order, store results append if their id is not already present, and
//! the merged list is truncated to the limit. A store failure degrades to
//! cache-only results rather than failing the call.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use durandal_core::{
    AccessKind, Memory, MemoryError, MemoryStore, Result, SearchFilters,
};

use super::{parse_args, snippet};
use crate::server::McpServer;

/// Outstanding prefetch loads per search.
const PREFETCH_CAP: usize = 10;
/// Results whose relationship edges are followed.
const PREFETCH_SOURCES: usize = 3;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "query": {
                "type": "string",
                "description": "Substring to match against memory content (case-insensitive)"
            },
            "filters": {
                "type": "object",
                "description": "Optional result filters",
                "properties": {
                    "project": { "type": "string" },
                    "session": { "type": "string" },
                    "categories": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Match memories carrying any of these categories"
                    },
                    "importance_min": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "importance_max": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "date_from": { "type": "string", "description": "ISO date or datetime" },
                    "date_to": { "type": "string", "description": "ISO date or datetime" }
                }
            },
            "limit": {
                "type": "integer",
                "description": "Maximum results (default 10, capped at 100)",
                "default": 10,
                "minimum": 0,
                "maximum": 100
            }
        },
        "required": ["query"]
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterArgs {
    project: Option<String>,
    session: Option<String>,
    categories: Vec<String>,
    importance_min: Option<f64>,
    importance_max: Option<f64>,
    date_from: Option<String>,
    date_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default)]
    filters: Option<FilterArgs>,
    #[serde(default)]
    limit: Option<i64>,
}

pub async fn execute(server: &McpServer, args: Option<Value>) -> Result<String> {
    let args: SearchArgs = parse_args(args)?;

    let query = args.query.trim().to_string();
    if query.is_empty() {
        return Err(MemoryError::validation(
            "query",
            args.query,
            "must not be empty",
        ));
    }
    let limit = args.limit.unwrap_or(10).clamp(0, 100) as usize;
    let filters = convert_filters(args.filters.unwrap_or_default())?;

    // Tier-1 first, in its own order.
    let cached = server.cache.search(&query, &filters, limit);

    // Then the store, with graceful degradation on database failures.
    let stored = match server.memory_store().search_memories(&query, &filters, limit) {
        Ok(results) => results,
        Err(error @ MemoryError::Database { .. }) => {
            warn!(error = %error, "store search failed; serving cache-only results");
            Vec::new()
        }
        Err(error) => return Err(error),
    };

    let mut seen: std::collections::HashSet<String> =
        cached.iter().map(|m| m.id.clone()).collect();
    let mut merged = cached;
    for memory in stored {
        if merged.len() >= limit {
            break;
        }
        if seen.insert(memory.id.clone()) {
            // A store hit above the promotion threshold earns a cache slot.
            if memory.metadata.cache_priority() > server.config.cache.promotion_threshold {
                server.cache.insert(memory.clone());
            }
            merged.push(memory);
        }
    }
    merged.truncate(limit);

    for memory in &merged {
        server.cache.record_access(&memory.id, AccessKind::Search);
    }

    if server.config.ramr.prefetch {
        schedule_prefetch(server, &merged);
    }

    let mut lines = vec![format!("Found {} memories for \"{}\"", merged.len(), query)];
    for (i, memory) in merged.iter().enumerate() {
        lines.push(format!(
            "{}. [{}] ({}) importance {}",
            i + 1,
            memory.id,
            memory.metadata.project(),
            memory.metadata.importance(),
        ));
        lines.push(format!("   {}", snippet(&memory.content, 120)));
    }
    Ok(lines.join("\n"))
}

/// Follow relationship edges one hop and warm the cache with the targets.
/// Best-effort: failures are silent and never touch the response.
fn schedule_prefetch(server: &McpServer, results: &[Memory]) {
    let mut targets: Vec<String> = Vec::new();
    for memory in results.iter().take(PREFETCH_SOURCES) {
        for relationship in &memory.metadata.relationships {
            if targets.len() >= PREFETCH_CAP {
                break;
            }
            if !server.cache.contains(&relationship.target)
                && !targets.contains(&relationship.target)
            {
                targets.push(relationship.target.clone());
            }
        }
    }
    if targets.is_empty() {
        return;
    }

    let store = Arc::clone(&server.store);
    let cache = Arc::clone(&server.cache);
    tokio::spawn(async move {
        for id in targets {
            match store.get_memory_by_id(&id) {
                Ok(Some(memory)) => {
                    debug!(memory_id = %id, "prefetched related memory");
                    cache.insert(memory);
                }
                Ok(None) => {}
                Err(e) => {
                    debug!(memory_id = %id, error = %e, "prefetch lookup failed");
                }
            }
        }
    });
}

fn convert_filters(args: FilterArgs) -> Result<SearchFilters> {
    Ok(SearchFilters {
        project: args.project,
        session: args.session,
        categories: args.categories,
        importance_min: args.importance_min,
        importance_max: args.importance_max,
        date_from: args
            .date_from
            .as_deref()
            .map(|raw| parse_date_bound("date_from", raw, false))
            .transpose()?,
        date_to: args
            .date_to
            .as_deref()
            .map(|raw| parse_date_bound("date_to", raw, true))
            .transpose()?,
    })
}

/// Accept a full timestamp or a bare date. Bare dates expand to the start or
/// end of the day depending on which bound they are.
fn parse_date_bound(field: &str, raw: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_opt(23, 59, 59).expect("valid time")
        } else {
            date.and_hms_opt(0, 0, 0).expect("valid time")
        };
        return Ok(time.and_utc());
    }
    Err(MemoryError::validation(
        field,
        raw,
        "must be an ISO-8601 date or datetime",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::test_server;
    use crate::tools::store_memory;

    async fn store(server: &McpServer, content: &str, metadata: Value) -> String {
        let text = store_memory::execute(
            server,
            Some(serde_json::json!({"content": content, "metadata": metadata})),
        )
        .await
        .unwrap();
        text.lines()
            .find_map(|l| l.strip_prefix("ID: "))
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_search_finds_stored_memory() {
        let (_dir, server) = test_server();
        store(&server, "hello world", serde_json::json!({"project": "p1"})).await;

        let text = execute(&server, Some(serde_json::json!({"query": "hello"})))
            .await
            .unwrap();
        assert!(text.starts_with("Found 1 memories"));
        assert!(text.contains("hello world"));
        assert!(text.contains("(p1)"));
    }

    #[tokio::test]
    async fn test_empty_query_is_validation_error() {
        let (_dir, server) = test_server();
        let err = execute(&server, Some(serde_json::json!({"query": "  "})))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn test_filter_by_project() {
        let (_dir, server) = test_server();
        store(&server, "alpha", serde_json::json!({"project": "A"})).await;
        store(&server, "bravo", serde_json::json!({"project": "B"})).await;

        let text = execute(
            &server,
            Some(serde_json::json!({
                "query": "a",
                "filters": {"project": "A"},
                "limit": 10
            })),
        )
        .await
        .unwrap();
        assert!(text.starts_with("Found 1 memories"));
        assert!(text.contains("alpha"));
        assert!(!text.contains("bravo"));
    }

    #[tokio::test]
    async fn test_limit_zero_returns_empty() {
        let (_dir, server) = test_server();
        store(&server, "anything", serde_json::json!({})).await;

        let text = execute(
            &server,
            Some(serde_json::json!({"query": "anything", "limit": 0})),
        )
        .await
        .unwrap();
        assert!(text.starts_with("Found 0 memories"));
    }

    #[tokio::test]
    async fn test_merge_dedupes_cache_and_store() {
        let (_dir, server) = test_server();
        let id = store(&server, "merged entry", serde_json::json!({})).await;

        // Wait for the durable write so both tiers hold the memory.
        for _ in 0..50 {
            if server.store.count_memories().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let text = execute(&server, Some(serde_json::json!({"query": "merged"})))
            .await
            .unwrap();
        assert!(text.starts_with("Found 1 memories"), "{}", text);
        assert_eq!(text.matches(&id).count(), 1);
    }

    #[tokio::test]
    async fn test_store_only_results_surface_after_cache_eviction() {
        let (_dir, server) = test_server();
        let id = store(&server, "evicted later", serde_json::json!({})).await;
        for _ in 0..50 {
            if server.store.count_memories().unwrap() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        server.cache.remove(&id);

        let text = execute(&server, Some(serde_json::json!({"query": "evicted"})))
            .await
            .unwrap();
        assert!(text.starts_with("Found 1 memories"));
    }

    #[tokio::test]
    async fn test_access_pattern_recorded_for_results() {
        let (_dir, server) = test_server();
        let id = store(&server, "tracked", serde_json::json!({})).await;
        let before = server.cache.access_frequency(&id);

        execute(&server, Some(serde_json::json!({"query": "tracked"})))
            .await
            .unwrap();
        assert_eq!(server.cache.access_frequency(&id), before + 1);
    }

    #[tokio::test]
    async fn test_bad_date_filter_is_validation_error() {
        let (_dir, server) = test_server();
        let err = execute(
            &server,
            Some(serde_json::json!({
                "query": "x",
                "filters": {"date_from": "soon"}
            })),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("date_from"));
    }

    #[test]
    fn test_parse_date_bound() {
        let start = parse_date_bound("date_from", "2026-08-01", false).unwrap();
        let end = parse_date_bound("date_to", "2026-08-01", true).unwrap();
        assert!(start < end);
        assert!(parse_date_bound("date_from", "2026-08-01T10:30:00Z", false).is_ok());
        assert!(parse_date_bound("date_from", "nope", false).is_err());
    }
}
