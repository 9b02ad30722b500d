//! RAMR - rapid-access memory register
//!
//! Optional persistent tier-2 cache. Entries live in their own SQLite file
//! with TTLs derived from priority and category; reads that surface a
//! high-priority entry hand it to tier-1 for promotion. An in-process LRU
//! fronts the table as a read accelerator; table deletions happen only inside
//! `run_maintenance`, which clears the LRU, so the two can never disagree.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use lru::LruCache;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::RamrConfig;
use crate::error::{MemoryError, Result};

/// Hot-key LRU capacity.
const HOT_CACHE_CAP: usize = 256;

/// Stat key for the persisted maintenance timestamp.
pub const STAT_LAST_MAINTENANCE: &str = "last_maintenance";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ramr_cache (
    key TEXT PRIMARY KEY,
    data TEXT NOT NULL,
    metadata TEXT,
    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count INTEGER DEFAULT 0,
    priority_score REAL DEFAULT 5.0,
    tags TEXT DEFAULT '[]',
    content_hash TEXT,
    expires_at TEXT NOT NULL,
    cache_type TEXT DEFAULT 'knowledge'
);

CREATE INDEX IF NOT EXISTS idx_ramr_expires ON ramr_cache(expires_at);
CREATE INDEX IF NOT EXISTS idx_ramr_priority ON ramr_cache(priority_score);

CREATE TABLE IF NOT EXISTS ramr_stats (
    stat_key TEXT PRIMARY KEY,
    stat_value TEXT,
    updated_at TEXT NOT NULL
);
"#;

/// A tier-2 cache entry.
#[derive(Debug, Clone)]
pub struct RamrEntry {
    pub key: String,
    /// Opaque payload (JSON in practice).
    pub data: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: i64,
    /// 0..=10; entries above the promotion threshold move to tier-1 on read.
    pub priority_score: f64,
    pub tags: Vec<String>,
    pub content_hash: String,
    pub expires_at: DateTime<Utc>,
    pub cache_type: String,
}

impl RamrEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Options for [`Ramr::set`].
#[derive(Debug, Clone)]
pub struct RamrSetOptions {
    pub priority: f64,
    pub cache_type: String,
    pub tags: Vec<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Default for RamrSetOptions {
    fn default() -> Self {
        Self {
            priority: 5.0,
            cache_type: "knowledge".to_string(),
            tags: Vec::new(),
            metadata: None,
        }
    }
}

/// Maintenance pass outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct RamrMaintenance {
    pub expired: usize,
    pub evicted: usize,
}

/// Category multiplier applied to TTLs.
pub fn category_factor(cache_type: &str) -> f64 {
    match cache_type {
        "solution" => 2.0,
        "configuration" => 1.5,
        "knowledge" => 2.5,
        "conversation_summary" => 1.0,
        "temporary" => 0.25,
        _ => 1.0,
    }
}

/// Persistent tier-2 cache.
pub struct Ramr {
    path: PathBuf,
    conn: Mutex<Connection>,
    hot: Mutex<LruCache<String, RamrEntry>>,
    config: RamrConfig,
}

impl Ramr {
    pub fn open(path: &Path, config: RamrConfig) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| MemoryError::FileSystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path).map_err(|e| MemoryError::db("ramr_open", e))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| MemoryError::db("ramr_open", e))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| MemoryError::db("ramr_open", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            hot: Mutex::new(LruCache::new(
                NonZeroUsize::new(HOT_CACHE_CAP).expect("nonzero capacity"),
            )),
            config,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &RamrConfig {
        &self.config
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MemoryError::Cache("ramr connection lock poisoned".to_string()))
    }

    /// `default_ttl · max(priority/5, 0.5) · category_factor`
    pub fn compute_ttl_ms(&self, priority: f64, cache_type: &str) -> u64 {
        let scale = (priority / 5.0).max(0.5) * category_factor(cache_type);
        (self.config.default_ttl_ms as f64 * scale) as u64
    }

    /// Insert or replace an entry.
    pub fn set(&self, key: &str, data: &str, options: RamrSetOptions) -> Result<()> {
        let now = Utc::now();
        let priority = options.priority.clamp(0.0, 10.0);
        let ttl_ms = self.compute_ttl_ms(priority, &options.cache_type);
        let expires_at = now + Duration::milliseconds(ttl_ms as i64);
        let content_hash = hash_content(data);
        let tags_json = serde_json::to_string(&options.tags).unwrap_or_else(|_| "[]".to_string());
        let metadata_json = options
            .metadata
            .as_ref()
            .map(|m| m.to_string());

        let entry = RamrEntry {
            key: key.to_string(),
            data: data.to_string(),
            metadata: options.metadata.clone(),
            created_at: now,
            last_accessed: now,
            access_count: 0,
            priority_score: priority,
            tags: options.tags.clone(),
            content_hash: content_hash.clone(),
            expires_at,
            cache_type: options.cache_type.clone(),
        };

        {
            let conn = self.lock_conn()?;
            conn.execute(
                "INSERT OR REPLACE INTO ramr_cache
                 (key, data, metadata, created_at, last_accessed, access_count,
                  priority_score, tags, content_hash, expires_at, cache_type)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?7, ?8, ?9, ?10)",
                params![
                    key,
                    data,
                    metadata_json,
                    now.to_rfc3339(),
                    now.to_rfc3339(),
                    priority,
                    tags_json,
                    content_hash,
                    expires_at.to_rfc3339(),
                    options.cache_type,
                ],
            )
            .map_err(|e| MemoryError::db("ramr_set", e))?;
        }

        if let Ok(mut hot) = self.hot.lock() {
            hot.put(key.to_string(), entry);
        }
        Ok(())
    }

    /// Fetch an entry, refreshing its access bookkeeping. Expired entries
    /// return `None` (removal is deferred to maintenance).
    pub fn get(&self, key: &str) -> Result<Option<RamrEntry>> {
        let now = Utc::now();

        let hot_entry = self
            .hot
            .lock()
            .ok()
            .and_then(|mut hot| hot.get(key).cloned());

        let mut entry = match hot_entry {
            Some(entry) => entry,
            None => {
                let conn = self.lock_conn()?;
                let found = conn
                    .query_row(
                        "SELECT key, data, metadata, created_at, last_accessed, access_count,
                                priority_score, tags, content_hash, expires_at, cache_type
                         FROM ramr_cache WHERE key = ?1",
                        params![key],
                        row_to_entry,
                    )
                    .optional()
                    .map_err(|e| MemoryError::db("ramr_get", e))?;
                match found {
                    Some(entry) => entry,
                    None => return Ok(None),
                }
            }
        };

        if entry.is_expired(now) {
            debug!(key, "tier-2 entry expired");
            if let Ok(mut hot) = self.hot.lock() {
                hot.pop(key);
            }
            return Ok(None);
        }

        entry.access_count += 1;
        entry.last_accessed = now;
        {
            let conn = self.lock_conn()?;
            conn.execute(
                "UPDATE ramr_cache SET access_count = access_count + 1, last_accessed = ?1
                 WHERE key = ?2",
                params![now.to_rfc3339(), key],
            )
            .map_err(|e| MemoryError::db("ramr_get", e))?;
        }
        if let Ok(mut hot) = self.hot.lock() {
            hot.put(key.to_string(), entry.clone());
        }
        Ok(Some(entry))
    }

    /// Live entries whose data or tags contain the query, highest priority
    /// first.
    pub fn get_relevant_context(&self, query: &str, limit: usize) -> Result<Vec<RamrEntry>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now = Utc::now().to_rfc3339();
        let pattern = format!("%{}%", query.to_lowercase());

        let conn = self.lock_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT key, data, metadata, created_at, last_accessed, access_count,
                        priority_score, tags, content_hash, expires_at, cache_type
                 FROM ramr_cache
                 WHERE expires_at > ?1
                   AND (LOWER(data) LIKE ?2 OR LOWER(tags) LIKE ?2)
                 ORDER BY priority_score DESC, last_accessed DESC
                 LIMIT ?3",
            )
            .map_err(|e| MemoryError::db("ramr_context", e))?;
        let rows = stmt
            .query_map(params![now, pattern, limit as i64], row_to_entry)
            .map_err(|e| MemoryError::db("ramr_context", e))?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| MemoryError::db("ramr_context", e))?);
        }
        Ok(entries)
    }

    /// Number of live (non-expired) entries.
    pub fn entry_count(&self) -> Result<i64> {
        let conn = self.lock_conn()?;
        conn.query_row(
            "SELECT COUNT(*) FROM ramr_cache WHERE expires_at > ?1",
            params![Utc::now().to_rfc3339()],
            |row| row.get(0),
        )
        .map_err(|e| MemoryError::db("ramr_count", e))
    }

    /// Expire TTL rows, relieve capacity pressure, and persist the
    /// maintenance timestamp.
    pub fn run_maintenance(&self) -> Result<RamrMaintenance> {
        let now = Utc::now();
        let mut outcome = RamrMaintenance::default();

        {
            let conn = self.lock_conn()?;
            outcome.expired = conn
                .execute(
                    "DELETE FROM ramr_cache WHERE expires_at <= ?1",
                    params![now.to_rfc3339()],
                )
                .map_err(|e| MemoryError::db("ramr_maintenance", e))?;

            let remaining: i64 = conn
                .query_row("SELECT COUNT(*) FROM ramr_cache", [], |row| row.get(0))
                .map_err(|e| MemoryError::db("ramr_maintenance", e))?;

            let capacity = self.config.max_entries as f64;
            if capacity > 0.0 && remaining as f64 > capacity * 0.8 {
                let evict = ((remaining as f64) * 0.1).ceil() as i64;
                outcome.evicted = conn
                    .execute(
                        "DELETE FROM ramr_cache WHERE key IN (
                             SELECT key FROM ramr_cache
                             ORDER BY priority_score ASC, last_accessed ASC
                             LIMIT ?1
                         )",
                        params![evict],
                    )
                    .map_err(|e| MemoryError::db("ramr_maintenance", e))?;
            }

            conn.execute(
                "INSERT OR REPLACE INTO ramr_stats (stat_key, stat_value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![STAT_LAST_MAINTENANCE, now.to_rfc3339(), now.to_rfc3339()],
            )
            .map_err(|e| MemoryError::db("ramr_maintenance", e))?;
        }

        // Rows may have vanished; drop the read accelerator wholesale.
        if let Ok(mut hot) = self.hot.lock() {
            hot.clear();
        }
        Ok(outcome)
    }

    /// Timestamp of the last completed maintenance pass, if any.
    pub fn last_maintenance(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.lock_conn()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT stat_value FROM ramr_stats WHERE stat_key = ?1",
                params![STAT_LAST_MAINTENANCE],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::db("ramr_stats", e))?;
        Ok(value
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RamrEntry> {
    let metadata: Option<String> = row.get(2)?;
    let tags: String = row.get(7)?;
    Ok(RamrEntry {
        key: row.get(0)?,
        data: row.get(1)?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: parse_rfc3339(&row.get::<_, String>(3)?),
        last_accessed: parse_rfc3339(&row.get::<_, String>(4)?),
        access_count: row.get(5)?,
        priority_score: row.get(6)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        content_hash: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
        expires_at: parse_rfc3339(&row.get::<_, String>(9)?),
        cache_type: row.get(10)?,
    })
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn hash_content(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    format!("{:x}", hasher.finalize())
}
