//! Database migration (consolidation)
//!
//! Merges every discovered database into one canonical store. Built around
//! two hard rules: source databases are never modified, and no row is ever
//! lost silently - a row either migrates, is reported as a duplicate, or is
//! counted as an error.
//!
//! Callers must obtain explicit user confirmation before invoking
//! [`Migrator::migrate_all`]; the CLI prompts, tests confirm implicitly.

use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OpenFlags};
use tracing::{info, warn};

use crate::discovery::{DiscoveryRecord, SchemaStatus};
use crate::error::{MemoryError, Result};
use crate::storage::apply_migrations;

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationStats {
    /// Source rows seen.
    pub total: u64,
    /// Rows copied into the target.
    pub migrated: u64,
    /// Rows skipped because identical content already exists in the target.
    pub duplicates: u64,
    /// Rows (or whole sources) that failed and were skipped.
    pub errors: u64,
}

/// Post-run verification snapshot.
#[derive(Debug, Clone)]
pub struct MigrationReport {
    pub stats: MigrationStats,
    /// Total rows in the target after the run.
    pub target_rows: i64,
    /// Distinct `source_db` values in the target after the run.
    pub distinct_sources: i64,
}

/// Writes discovered memories into a canonical target database.
pub struct Migrator {
    target_path: PathBuf,
    target: Connection,
}

impl Migrator {
    /// Open (or create) the target. A target that cannot be opened is fatal
    /// for the whole run. Adds the provenance columns if they are missing -
    /// a non-destructive, additive change.
    pub fn open(target_path: &Path) -> Result<Self> {
        if let Some(parent) = target_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| MemoryError::FileSystem {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let target =
            Connection::open(target_path).map_err(|e| MemoryError::db("migrate_open_target", e))?;
        apply_migrations(&target).map_err(|e| MemoryError::db("migrate_open_target", e))?;
        ensure_provenance_columns(&target)?;

        Ok(Self {
            target_path: target_path.to_path_buf(),
            target,
        })
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    /// Merge all usable sources into the target, deduplicating on exact
    /// content. Sources are opened read-only and never modified.
    pub fn migrate_all(&mut self, sources: &[DiscoveryRecord]) -> Result<MigrationReport> {
        let mut stats = MigrationStats::default();
        let target_canonical = self
            .target_path
            .canonicalize()
            .unwrap_or_else(|_| self.target_path.clone());

        for source in sources {
            let source_canonical = source
                .path
                .canonicalize()
                .unwrap_or_else(|_| source.path.clone());
            if source_canonical == target_canonical {
                continue;
            }
            if source.schema != SchemaStatus::Modern {
                info!(
                    path = %source.path.display(),
                    schema = source.schema.as_str(),
                    "skipping source without a memories table"
                );
                continue;
            }
            match self.migrate_source(&source.path, &mut stats) {
                Ok(()) => {}
                Err(e) => {
                    warn!(path = %source.path.display(), error = %e, "source skipped");
                    stats.errors += 1;
                }
            }
        }

        let target_rows: i64 = self
            .target
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .map_err(|e| MemoryError::db("migrate_verify", e))?;
        let distinct_sources: i64 = self
            .target
            .query_row(
                "SELECT COUNT(DISTINCT source_db) FROM memories WHERE source_db IS NOT NULL",
                [],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::db("migrate_verify", e))?;

        info!(
            total = stats.total,
            migrated = stats.migrated,
            duplicates = stats.duplicates,
            errors = stats.errors,
            target_rows,
            distinct_sources,
            "migration complete"
        );

        Ok(MigrationReport {
            stats,
            target_rows,
            distinct_sources,
        })
    }

    fn migrate_source(&mut self, path: &Path, stats: &mut MigrationStats) -> Result<()> {
        let source = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| MemoryError::db("migrate_open_source", e))?;

        let source_label = path.to_string_lossy().to_string();
        let mut stmt = source
            .prepare(
                "SELECT id, content, metadata, created_at FROM memories ORDER BY created_at ASC, id ASC",
            )
            .map_err(|e| MemoryError::db("migrate_read_source", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            })
            .map_err(|e| MemoryError::db("migrate_read_source", e))?;

        for row in rows {
            let (original_id, content, metadata, created_at) = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!(source = %source_label, error = %e, "unreadable source row skipped");
                    stats.errors += 1;
                    continue;
                }
            };
            stats.total += 1;

            match self.insert_unless_duplicate(
                &source_label,
                original_id,
                &content,
                metadata.as_deref(),
                created_at.as_deref(),
            ) {
                Ok(true) => stats.migrated += 1,
                Ok(false) => stats.duplicates += 1,
                Err(e) => {
                    warn!(source = %source_label, original_id, error = %e, "row skipped");
                    stats.errors += 1;
                }
            }
        }
        Ok(())
    }

    /// Returns `Ok(true)` when the row was inserted, `Ok(false)` for an exact
    /// content duplicate.
    fn insert_unless_duplicate(
        &mut self,
        source_db: &str,
        original_id: i64,
        content: &str,
        metadata: Option<&str>,
        created_at: Option<&str>,
    ) -> Result<bool> {
        let exists: bool = self
            .target
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM memories WHERE content = ?1)",
                params![content],
                |row| row.get(0),
            )
            .map_err(|e| MemoryError::db("migrate_dedup_check", e))?;
        if exists {
            return Ok(false);
        }

        self.target
            .execute(
                "INSERT INTO memories (content, metadata, created_at, source_db, original_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    content,
                    metadata,
                    created_at,
                    source_db,
                    original_id.to_string()
                ],
            )
            .map_err(|e| MemoryError::db("migrate_insert", e))?;
        Ok(true)
    }
}

/// Add `source_db` / `original_id` to the target if absent.
fn ensure_provenance_columns(conn: &Connection) -> Result<()> {
    let mut stmt = conn
        .prepare("PRAGMA table_info(memories)")
        .map_err(|e| MemoryError::db("migrate_schema", e))?;
    let columns: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| MemoryError::db("migrate_schema", e))?
        .filter_map(|r| r.ok())
        .collect();
    drop(stmt);

    if !columns.iter().any(|c| c == "source_db") {
        conn.execute("ALTER TABLE memories ADD COLUMN source_db TEXT", [])
            .map_err(|e| MemoryError::db("migrate_schema", e))?;
    }
    if !columns.iter().any(|c| c == "original_id") {
        conn.execute("ALTER TABLE memories ADD COLUMN original_id TEXT", [])
            .map_err(|e| MemoryError::db("migrate_schema", e))?;
    }
    Ok(())
}
