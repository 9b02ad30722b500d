//! End-to-end scenarios
//!
//! Black-box runs of the documented user journeys: store and retrieve,
//! project filtering, cache eviction bounds, validation, migration
//! deduplication, and non-destructive discovery.

use serde_json::json;

use durandal_core::{
    discover, verify_database, Config, DiscoveryOptions, MemoryMetadata, MemoryStore, Migrator,
    SqliteStore,
};
use durandal_e2e_tests::TestHarness;

#[tokio::test]
async fn store_and_retrieve() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let stored = harness
        .call_tool(
            "store_memory",
            json!({
                "content": "hello world",
                "metadata": {"project": "p1", "importance": 0.9}
            }),
        )
        .await;
    assert!(!stored.is_error, "{}", stored.text);
    assert!(stored.text.contains("Project: p1"));
    assert!(stored.text.contains("Importance: 0.9"));

    let found = harness
        .call_tool("search_memories", json!({"query": "hello"}))
        .await;
    assert!(!found.is_error);
    assert!(found.text.contains("Found 1 memories"));
    assert!(found.text.contains("hello world"));
    assert!(found.text.contains("(p1)"));
}

#[tokio::test]
async fn filter_by_project() {
    let harness = TestHarness::new();
    harness.initialize().await;

    for (content, project) in [("alpha", "A"), ("bravo", "B")] {
        let reply = harness
            .call_tool(
                "store_memory",
                json!({"content": content, "metadata": {"project": project}}),
            )
            .await;
        assert!(!reply.is_error);
    }

    let found = harness
        .call_tool(
            "search_memories",
            json!({"query": "a", "filters": {"project": "A"}, "limit": 10}),
        )
        .await;
    assert!(found.text.contains("Found 1 memories"));
    assert!(found.text.contains("alpha"));
    assert!(!found.text.contains("bravo"));
}

#[tokio::test]
async fn cache_eviction_bound() {
    let mut config = Config::default();
    config.cache.max_size = 3;
    let harness = TestHarness::with_config(config);
    harness.initialize().await;

    let mut last_id = String::new();
    for (i, importance) in [0.1, 0.2, 0.3, 0.9].iter().enumerate() {
        let reply = harness
            .call_tool(
                "store_memory",
                json!({
                    "content": format!("distinct content {}", i),
                    "metadata": {"importance": importance}
                }),
            )
            .await;
        assert!(!reply.is_error);
        last_id = TestHarness::extract_id(&reply);
    }

    let cache = harness.server.cache_handle();
    assert_eq!(cache.len(), 3);
    assert!(cache.contains(&last_id), "0.9-importance entry must survive");
}

#[tokio::test]
async fn validation_rejects_and_stores_nothing() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let reply = harness
        .call_tool(
            "store_memory",
            json!({"content": "x", "metadata": {"importance": 1.5}}),
        )
        .await;
    assert!(reply.is_error);
    assert!(reply.text.contains("importance"));
    assert!(reply.text.contains("Recovery:"));

    // Nothing reached either tier.
    assert_eq!(harness.server.cache_handle().len(), 0);
    assert_eq!(harness.server.store_handle().count_memories().unwrap(), 0);
}

#[tokio::test]
async fn migration_dedup() {
    let harness = TestHarness::new();
    let base = harness.dir.path();

    for name in ["source-a.db", "source-b.db"] {
        let store = SqliteStore::open(&base.join(name)).unwrap();
        store
            .store_memory("dup", &MemoryMetadata::default())
            .unwrap();
    }
    let sources = vec![
        verify_database(&base.join("source-a.db")),
        verify_database(&base.join("source-b.db")),
    ];

    let target = base.join("fresh-target.db");
    let mut migrator = Migrator::open(&target).unwrap();
    let report = migrator.migrate_all(&sources).unwrap();

    assert_eq!(report.stats.migrated, 1);
    assert_eq!(report.stats.duplicates, 1);
    assert_eq!(report.target_rows, 1);

    let opened = SqliteStore::open(&target).unwrap();
    let rows = opened
        .search_memories("dup", &Default::default(), 10)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].content, "dup");
}

#[tokio::test]
async fn discovery_is_non_destructive() {
    let harness = TestHarness::new();
    let base = harness.dir.path().join("scan-me");
    std::fs::create_dir_all(&base).unwrap();

    let paths = [
        base.join("durandal-mcp-memory.db"),
        base.join("durandal-memory.db"),
        base.join("memories.db"),
    ];
    for (i, path) in paths.iter().enumerate() {
        std::fs::write(path, vec![b'd'; 64 * (i + 1)]).unwrap();
    }
    let before: Vec<_> = paths
        .iter()
        .map(|p| {
            let meta = std::fs::metadata(p).unwrap();
            (meta.len(), meta.modified().unwrap(), std::fs::read(p).unwrap())
        })
        .collect();

    let records = discover(&DiscoveryOptions {
        max_depth: 3,
        extra_roots: vec![base.clone()],
        include_default_roots: false,
    });
    assert_eq!(records.len(), 3);

    for (path, (len, mtime, bytes)) in paths.iter().zip(before) {
        let meta = std::fs::metadata(path).unwrap();
        assert_eq!(meta.len(), len);
        assert_eq!(meta.modified().unwrap(), mtime);
        assert_eq!(std::fs::read(path).unwrap(), bytes);
    }
}

#[tokio::test]
async fn persist_and_reload_across_restart() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let reply = harness
        .call_tool(
            "store_memory",
            json!({
                "content": "survives restart",
                "metadata": {
                    "project": "p1",
                    "session": "s9",
                    "importance": 0.7,
                    "categories": ["code"],
                    "keywords": ["restart"]
                }
            }),
        )
        .await;
    let id = TestHarness::extract_id(&reply);
    harness.wait_for_rows(1).await;

    // "Restart": a fresh store over the same file.
    let reopened =
        SqliteStore::open(&harness.dir.path().join("durandal-mcp-memory.db")).unwrap();
    let memory = reopened.get_memory_by_id(&id).unwrap().unwrap();
    assert_eq!(memory.content, "survives restart");
    assert_eq!(memory.metadata.project.as_deref(), Some("p1"));
    assert_eq!(memory.metadata.session.as_deref(), Some("s9"));
    assert_eq!(memory.metadata.importance, Some(0.7));
    assert_eq!(memory.metadata.categories, vec!["code".to_string()]);
    assert_eq!(memory.metadata.keywords, vec!["restart".to_string()]);
}

#[tokio::test]
async fn configure_then_read_status() {
    let harness = TestHarness::new();
    harness.initialize().await;

    let configured = harness
        .call_tool(
            "configure_logging",
            json!({"console_level": "warn", "file_level": "debug"}),
        )
        .await;
    assert!(!configured.is_error);

    let status = harness.call_tool("get_status", json!({})).await;
    assert!(status.text.contains("console=warn"));
    assert!(status.text.contains("file=debug"));
}

#[tokio::test]
async fn optimize_memory_reports_each_operation() {
    let harness = TestHarness::new();
    harness.initialize().await;

    harness
        .call_tool(
            "store_memory",
            json!({"content": "note", "metadata": {"categories": ["code"]}}),
        )
        .await;

    let before = harness.server.cache_handle().len();
    let reply = harness.call_tool("optimize_memory", json!({})).await;
    assert!(!reply.is_error);
    for op in [
        "cache_optimization",
        "retention_review",
        "pattern_analysis",
        "relationship_update",
    ] {
        assert!(reply.text.contains(op), "missing {} in {}", op, reply.text);
    }
    assert!(harness.server.cache_handle().len() <= before);
}
