//! Database path resolution
//!
//! Selects the canonical database file at startup. The one rule that must
//! never break: if any existing database can be found, it is used - a new
//! empty file is only ever created once every candidate location *and* a full
//! discovery scan have come up empty. Shadowing user data with a fresh
//! database is the single worst failure mode this server can have.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::sqlite::quick_record_count;
use crate::discovery::{self, DiscoveryOptions, SchemaStatus};
use crate::error::{MemoryError, Result};

/// Canonical database filename.
pub const CANONICAL_FILENAME: &str = "durandal-mcp-memory.db";

/// Alternative filenames used by earlier releases.
pub const HISTORICAL_FILENAMES: &[&str] = &["durandal-memory.db", "memories.db"];

/// An existing database found during resolution.
#[derive(Debug, Clone)]
pub struct CandidateDb {
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Rows in `memories`, 0 when unreadable or schema-less.
    pub records: i64,
}

/// Outcome of path resolution.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    pub path: PathBuf,
    /// True when no existing database was found anywhere and the path points
    /// at a file that does not exist yet.
    pub created: bool,
    /// Every candidate that was considered, best first.
    pub candidates: Vec<CandidateDb>,
}

/// Inputs to resolution, injectable for tests.
#[derive(Debug, Clone, Default)]
pub struct ResolveContext {
    /// `DATABASE_PATH` override; used verbatim when set.
    pub override_path: Option<PathBuf>,
    pub cwd: Option<PathBuf>,
    /// `<home>/.durandal-mcp`
    pub config_dir: Option<PathBuf>,
    /// Directory containing the server binary.
    pub exe_dir: Option<PathBuf>,
    /// Whether to fall back to a full discovery scan when the fixed
    /// candidate set is empty.
    pub run_discovery: bool,
    pub discovery: DiscoveryOptions,
}

impl ResolveContext {
    /// Build the production context from the process environment.
    pub fn from_env(override_path: Option<PathBuf>, home: Option<&Path>) -> Self {
        Self {
            override_path,
            cwd: std::env::current_dir().ok(),
            config_dir: home.map(|h| h.join(".durandal-mcp")),
            exe_dir: std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(Path::to_path_buf)),
            run_discovery: true,
            discovery: DiscoveryOptions::default(),
        }
    }
}

/// Select the canonical database path.
///
/// Never creates or modifies any file; `created` in the result tells the
/// caller that opening the path will create a brand-new database.
pub fn resolve_database_path(ctx: &ResolveContext) -> Result<ResolvedPath> {
    if let Some(explicit) = &ctx.override_path {
        info!(path = %explicit.display(), "using explicit database path override");
        return Ok(ResolvedPath {
            path: explicit.clone(),
            created: !explicit.exists(),
            candidates: Vec::new(),
        });
    }

    let mut candidates = fixed_candidates(ctx);

    if candidates.is_empty() && ctx.run_discovery {
        info!("no database in the standard locations; scanning the host");
        for record in discovery::discover(&ctx.discovery) {
            if matches!(record.schema, SchemaStatus::Modern | SchemaStatus::Legacy) {
                candidates.push(CandidateDb {
                    path: record.path,
                    size_bytes: record.size_bytes,
                    records: record.record_count,
                });
            }
        }
        dedupe_candidates(&mut candidates);
    }

    if candidates.is_empty() {
        let config_dir = ctx.config_dir.as_ref().ok_or_else(|| {
            MemoryError::Configuration {
                key: "DATABASE_PATH".to_string(),
                reason: "no existing database found and no home directory to create one in"
                    .to_string(),
            }
        })?;
        let path = config_dir.join(CANONICAL_FILENAME);
        info!(path = %path.display(), "no existing database found anywhere; a new one will be created");
        return Ok(ResolvedPath {
            path,
            created: true,
            candidates,
        });
    }

    // Best candidate: most records, then largest file.
    candidates.sort_by(|a, b| {
        b.records
            .cmp(&a.records)
            .then(b.size_bytes.cmp(&a.size_bytes))
    });

    if candidates.len() > 1 {
        let listing: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} ({} records, {} bytes)", c.path.display(), c.records, c.size_bytes))
            .collect();
        warn!(
            selected = %candidates[0].path.display(),
            "multiple databases found: [{}] - selected the one with the most records; \
             run --migrate to consolidate them",
            listing.join(", ")
        );
    }

    Ok(ResolvedPath {
        path: candidates[0].path.clone(),
        created: false,
        candidates,
    })
}

/// The fixed candidate set: each known directory crossed with each known
/// filename, keeping only existing, regular, non-empty files.
fn fixed_candidates(ctx: &ResolveContext) -> Vec<CandidateDb> {
    let mut filenames = vec![CANONICAL_FILENAME];
    filenames.extend_from_slice(HISTORICAL_FILENAMES);

    let dirs = [&ctx.cwd, &ctx.config_dir, &ctx.exe_dir];
    let mut candidates = Vec::new();
    for dir in dirs.into_iter().flatten() {
        for name in &filenames {
            let path = dir.join(name);
            if let Some(candidate) = inspect_candidate(&path) {
                candidates.push(candidate);
            }
        }
    }
    dedupe_candidates(&mut candidates);
    candidates
}

fn inspect_candidate(path: &Path) -> Option<CandidateDb> {
    let meta = std::fs::metadata(path).ok()?;
    if !meta.is_file() || meta.len() == 0 {
        return None;
    }
    Some(CandidateDb {
        path: path.to_path_buf(),
        size_bytes: meta.len(),
        records: quick_record_count(path).unwrap_or(0),
    })
}

/// Drop duplicate paths after resolving symlinks and relative segments.
fn dedupe_candidates(candidates: &mut Vec<CandidateDb>) {
    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| {
        let resolved = c
            .path
            .canonicalize()
            .unwrap_or_else(|_| c.path.clone());
        let key = if cfg!(windows) {
            resolved.to_string_lossy().to_lowercase()
        } else {
            resolved.to_string_lossy().to_string()
        };
        seen.insert(key)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMetadata;
    use crate::storage::{MemoryStore, SqliteStore};
    use tempfile::tempdir;

    fn seed_db(path: &Path, rows: usize) {
        let store = SqliteStore::open(path).unwrap();
        for i in 0..rows {
            store
                .store_memory(&format!("seed {}", i), &MemoryMetadata::default())
                .unwrap();
        }
    }

    fn test_ctx() -> (tempfile::TempDir, ResolveContext) {
        let dir = tempdir().unwrap();
        let ctx = ResolveContext {
            override_path: None,
            cwd: Some(dir.path().join("cwd")),
            config_dir: Some(dir.path().join("config")),
            exe_dir: Some(dir.path().join("bin")),
            run_discovery: false,
            discovery: DiscoveryOptions::default(),
        };
        std::fs::create_dir_all(ctx.cwd.as_ref().unwrap()).unwrap();
        std::fs::create_dir_all(ctx.config_dir.as_ref().unwrap()).unwrap();
        std::fs::create_dir_all(ctx.exe_dir.as_ref().unwrap()).unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_override_wins() {
        let (dir, mut ctx) = test_ctx();
        let override_path = dir.path().join("explicit.db");
        ctx.override_path = Some(override_path.clone());

        // Even with an existing candidate elsewhere, the override is used.
        seed_db(
            &ctx.cwd.as_ref().unwrap().join(CANONICAL_FILENAME),
            3,
        );

        let resolved = resolve_database_path(&ctx).unwrap();
        assert_eq!(resolved.path, override_path);
        assert!(resolved.created);
    }

    #[test]
    fn test_single_candidate_selected() {
        let (_dir, ctx) = test_ctx();
        let db = ctx.config_dir.as_ref().unwrap().join(CANONICAL_FILENAME);
        seed_db(&db, 2);

        let resolved = resolve_database_path(&ctx).unwrap();
        assert_eq!(resolved.path, db);
        assert!(!resolved.created);
        assert_eq!(resolved.candidates.len(), 1);
    }

    #[test]
    fn test_multiple_candidates_pick_most_records() {
        let (_dir, ctx) = test_ctx();
        let small = ctx.cwd.as_ref().unwrap().join(CANONICAL_FILENAME);
        let large = ctx
            .config_dir
            .as_ref()
            .unwrap()
            .join("durandal-memory.db");
        seed_db(&small, 1);
        seed_db(&large, 5);

        let resolved = resolve_database_path(&ctx).unwrap();
        assert_eq!(resolved.path, large);
        assert_eq!(resolved.candidates.len(), 2);
        assert_eq!(resolved.candidates[0].records, 5);
    }

    #[test]
    fn test_historical_filenames_are_considered() {
        let (_dir, ctx) = test_ctx();
        let legacy = ctx.cwd.as_ref().unwrap().join("memories.db");
        seed_db(&legacy, 1);

        let resolved = resolve_database_path(&ctx).unwrap();
        assert_eq!(resolved.path, legacy);
        assert!(!resolved.created);
    }

    #[test]
    fn test_creates_only_when_nothing_exists() {
        let (_dir, ctx) = test_ctx();
        let resolved = resolve_database_path(&ctx).unwrap();
        assert!(resolved.created);
        assert_eq!(
            resolved.path,
            ctx.config_dir.as_ref().unwrap().join(CANONICAL_FILENAME)
        );
        // Resolution itself must not have touched the filesystem.
        assert!(!resolved.path.exists());
    }

    #[test]
    fn test_empty_files_are_ignored() {
        let (_dir, ctx) = test_ctx();
        let empty = ctx.cwd.as_ref().unwrap().join(CANONICAL_FILENAME);
        std::fs::write(&empty, b"").unwrap();

        let resolved = resolve_database_path(&ctx).unwrap();
        assert!(resolved.created);
        assert_ne!(resolved.path, empty);
    }
}
