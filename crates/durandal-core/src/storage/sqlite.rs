//! SQLite Storage Implementation
//!
//! Owns the canonical database file for the lifetime of the process.
//!
//! Uses separate reader/writer connections for interior mutability. All
//! methods take `&self` (not `&mut self`), making the store `Send + Sync` so
//! callers can share it through an `Arc` without an outer mutex. Mutating
//! statements serialize on the writer lock; long reads hold only the reader
//! lock, so independent short reads are never blocked by a write.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::warn;

use super::migrations;
use super::MemoryStore;
use crate::error::{MemoryError, Result};
use crate::memory::{generate_memory_id, Memory, MemoryMetadata, SearchFilters};

/// Hard cap on search result counts.
pub const SEARCH_LIMIT_CAP: usize = 100;
/// Hard cap on recent-memory result counts.
pub const RECENT_LIMIT_CAP: usize = 50;

/// Aggregation row for `list_projects_sessions`.
#[derive(Debug, Clone)]
pub struct GroupCount {
    pub name: String,
    pub count: i64,
    pub latest: Option<DateTime<Utc>>,
    pub sample: Option<String>,
}

/// Which metadata field to aggregate by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Project,
    Session,
}

impl GroupKind {
    fn json_path(&self) -> &'static str {
        match self {
            GroupKind::Project => "$.project",
            GroupKind::Session => "$.session",
        }
    }
}

/// Canonical durable store.
pub struct SqliteStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl SqliteStore {
    /// Apply PRAGMAs to a connection.
    fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA temp_store = MEMORY;",
        )
    }

    /// Open (or create) the database at `path` and apply pending migrations.
    ///
    /// Creation policy is the caller's responsibility: the path resolver only
    /// hands over a fresh path once every existing candidate has been ruled
    /// out.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| MemoryError::FileSystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let writer = Connection::open(path).map_err(|e| MemoryError::db("open", e))?;
        Self::configure_connection(&writer).map_err(|e| MemoryError::db("open", e))?;
        migrations::apply_migrations(&writer).map_err(|e| MemoryError::db("migrate", e))?;

        let reader = Connection::open(path).map_err(|e| MemoryError::db("open", e))?;
        Self::configure_connection(&reader).map_err(|e| MemoryError::db("open", e))?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the database file in bytes (best-effort).
    pub fn db_file_size(&self) -> u64 {
        std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
    }

    fn lock_writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::Unknown("writer lock poisoned".to_string()))
    }

    fn lock_reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| MemoryError::Unknown("reader lock poisoned".to_string()))
    }

    /// Total rows in `memories`.
    pub fn count_memories(&self) -> Result<i64> {
        let reader = self.lock_reader()?;
        reader
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(|e| MemoryError::db("count_memories", e))
    }

    /// Aggregate memory counts by project or session.
    pub fn list_groups(&self, kind: GroupKind, include_samples: bool) -> Result<Vec<GroupCount>> {
        let sql = format!(
            "SELECT COALESCE(json_extract(metadata, '{path}'), 'default') AS grp,
                    COUNT(*) AS n,
                    MAX(created_at) AS latest
             FROM memories
             GROUP BY grp
             ORDER BY n DESC, grp ASC",
            path = kind.json_path()
        );

        let mut groups = {
            let reader = self.lock_reader()?;
            let mut stmt = reader
                .prepare(&sql)
                .map_err(|e| MemoryError::db("list_groups", e))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(GroupCount {
                        name: row.get(0)?,
                        count: row.get(1)?,
                        latest: row
                            .get::<_, Option<String>>(2)?
                            .and_then(|s| parse_stored_datetime(&s)),
                        sample: None,
                    })
                })
                .map_err(|e| MemoryError::db("list_groups", e))?;

            let mut groups = Vec::new();
            for row in rows {
                groups.push(row.map_err(|e| MemoryError::db("list_groups", e))?);
            }
            groups
        };

        if include_samples {
            let sample_sql = format!(
                "SELECT content FROM memories
                 WHERE COALESCE(json_extract(metadata, '{path}'), 'default') = ?1
                 ORDER BY created_at DESC LIMIT 1",
                path = kind.json_path()
            );
            let reader = self.lock_reader()?;
            for group in &mut groups {
                group.sample = reader
                    .query_row(&sample_sql, params![group.name], |row| row.get(0))
                    .optional()
                    .map_err(|e| MemoryError::db("list_groups", e))?;
            }
        }

        Ok(groups)
    }

    // ========================================================================
    // Probes used by the startup checks
    // ========================================================================

    /// Trivial connectivity probe.
    pub fn connectivity_probe(&self) -> Result<()> {
        let reader = self.lock_reader()?;
        reader
            .query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| MemoryError::db("connectivity", e))
    }

    /// Whether a table exists.
    pub fn has_table(&self, name: &str) -> Result<bool> {
        let reader = self.lock_reader()?;
        let count: i64 = reader
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::db("schema_check", e))?;
        Ok(count > 0)
    }

    /// Column names of a table, empty if the table is missing.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader
            .prepare(&format!("PRAGMA table_info({})", table))
            .map_err(|e| MemoryError::db("schema_check", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(1))
            .map_err(|e| MemoryError::db("schema_check", e))?;
        let mut columns = Vec::new();
        for row in rows {
            columns.push(row.map_err(|e| MemoryError::db("schema_check", e))?);
        }
        Ok(columns)
    }

    /// Insert a sentinel row, read it back, and delete it.
    pub fn read_write_probe(&self, marker: &str) -> Result<()> {
        let writer = self.lock_writer()?;
        writer
            .execute(
                "INSERT INTO memories (content, metadata, created_at) VALUES (?1, ?2, ?3)",
                params![
                    marker,
                    format!("{{\"probe\":\"{}\"}}", marker),
                    Utc::now().to_rfc3339()
                ],
            )
            .map_err(|e| MemoryError::db("rw_probe_insert", e))?;

        let found: Option<i64> = writer
            .query_row(
                "SELECT id FROM memories WHERE content = ?1",
                params![marker],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| MemoryError::db("rw_probe_read", e))?;

        let id = found.ok_or_else(|| {
            MemoryError::Unknown("read/write probe row not visible after insert".to_string())
        })?;

        writer
            .execute("DELETE FROM memories WHERE id = ?1", params![id])
            .map_err(|e| MemoryError::db("rw_probe_delete", e))?;
        Ok(())
    }

    /// Run `PRAGMA integrity_check` and return the reported lines.
    pub fn integrity_check(&self) -> Result<Vec<String>> {
        let reader = self.lock_reader()?;
        let mut stmt = reader
            .prepare("PRAGMA integrity_check")
            .map_err(|e| MemoryError::db("integrity_check", e))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| MemoryError::db("integrity_check", e))?;
        let mut lines = Vec::new();
        for row in rows {
            lines.push(row.map_err(|e| MemoryError::db("integrity_check", e))?);
        }
        Ok(lines)
    }

    fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
        let rowid: i64 = row.get(0)?;
        let content: String = row.get(1)?;
        let metadata_raw: Option<String> = row.get(2)?;
        let created_raw: Option<String> = row.get(3)?;

        let metadata: MemoryMetadata = match metadata_raw.as_deref() {
            Some(raw) if !raw.is_empty() => serde_json::from_str(raw).unwrap_or_else(|e| {
                warn!(rowid, error = %e, "unreadable metadata JSON; using defaults");
                MemoryMetadata::default()
            }),
            _ => MemoryMetadata::default(),
        };

        let id = metadata
            .id
            .clone()
            .unwrap_or_else(|| rowid.to_string());

        let created_at = created_raw
            .as_deref()
            .and_then(parse_stored_datetime)
            .or(metadata.created_at)
            .unwrap_or_else(Utc::now);

        Ok(Memory {
            id,
            content,
            metadata,
            created_at,
        })
    }
}

impl MemoryStore for SqliteStore {
    fn store_memory(&self, content: &str, metadata: &MemoryMetadata) -> Result<String> {
        let now = Utc::now();
        let mut metadata = metadata.clone();
        let id = match metadata.id.clone() {
            Some(id) => id,
            None => {
                let id = generate_memory_id(now);
                metadata.id = Some(id.clone());
                id
            }
        };
        let created_at = metadata.created_at.unwrap_or(now);

        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| MemoryError::Unknown(format!("metadata serialization failed: {}", e)))?;

        let writer = self.lock_writer()?;
        writer
            .execute(
                "INSERT INTO memories (content, metadata, created_at) VALUES (?1, ?2, ?3)",
                params![content, metadata_json, created_at.to_rfc3339()],
            )
            .map_err(|e| MemoryError::db("store_memory", e))?;

        Ok(id)
    }

    fn search_memories(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let limit = limit.min(SEARCH_LIMIT_CAP);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", escape_like(query));
        let reader = self.lock_reader()?;
        let mut stmt = reader
            .prepare(
                "SELECT id, content, metadata, created_at FROM memories
                 WHERE content LIKE ?1 ESCAPE '\\'
                 ORDER BY created_at DESC, id DESC",
            )
            .map_err(|e| MemoryError::db("search_memories", e))?;

        let rows = stmt
            .query_map(params![pattern], Self::row_to_memory)
            .map_err(|e| MemoryError::db("search_memories", e))?;

        let mut results = Vec::new();
        for row in rows {
            let memory = row.map_err(|e| MemoryError::db("search_memories", e))?;
            // SQL LIKE is ASCII-case-insensitive only; re-check in full.
            if !crate::memory::content_matches(&memory.content, query) {
                continue;
            }
            if !filters.matches(&memory) {
                continue;
            }
            results.push(memory);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    fn get_recent_memories(
        &self,
        project: Option<&str>,
        session: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let limit = limit.min(RECENT_LIMIT_CAP);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            "SELECT id, content, metadata, created_at FROM memories WHERE 1 = 1",
        );
        let mut bindings: Vec<String> = Vec::new();
        if let Some(project) = project {
            sql.push_str(
                " AND COALESCE(json_extract(metadata, '$.project'), 'default') = ?",
            );
            bindings.push(project.to_string());
        }
        if let Some(session) = session {
            sql.push_str(" AND json_extract(metadata, '$.session') = ?");
            bindings.push(session.to_string());
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        bindings.push(limit.to_string());

        let reader = self.lock_reader()?;
        let mut stmt = reader
            .prepare(&sql)
            .map_err(|e| MemoryError::db("get_recent_memories", e))?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bindings.iter()), Self::row_to_memory)
            .map_err(|e| MemoryError::db("get_recent_memories", e))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row.map_err(|e| MemoryError::db("get_recent_memories", e))?);
        }
        Ok(results)
    }

    fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>> {
        let reader = self.lock_reader()?;
        reader
            .query_row(
                "SELECT id, content, metadata, created_at FROM memories
                 WHERE json_extract(metadata, '$.id') = ?1 OR CAST(id AS TEXT) = ?1
                 LIMIT 1",
                params![id],
                Self::row_to_memory,
            )
            .optional()
            .map_err(|e| MemoryError::db("get_memory_by_id", e))
    }
}

/// Escape `%`, `_`, and `\` for a LIKE pattern with `ESCAPE '\'`.
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Parse a stored timestamp: RFC-3339 from this code, or SQLite's
/// `CURRENT_TIMESTAMP` format from legacy writers.
pub(crate) fn parse_stored_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Count the rows in a database's `memories` table without taking ownership.
///
/// Opens read-only; returns `None` when the file is not a database or has no
/// `memories` table. Used by the path resolver and discovery, which must
/// never modify (or create) candidate files.
pub fn quick_record_count(path: &Path) -> Option<i64> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .ok()?;
    conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
        .ok()
}
