//! Database discovery
//!
//! Enumerates every candidate database file on the host so resolution and
//! migration can account for all of them. Strictly read-only: candidates are
//! opened with SQLite's read-only flag, symlinks are never followed, and no
//! file is touched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use tracing::debug;
use walkdir::WalkDir;

/// Verification outcome for a candidate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    /// Has a `memories` table.
    Modern,
    /// Has only the legacy conversation tables.
    Legacy,
    /// Not a database, or not one of ours.
    Invalid,
}

impl SchemaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaStatus::Modern => "modern",
            SchemaStatus::Legacy => "legacy",
            SchemaStatus::Invalid => "invalid",
        }
    }
}

/// A verified candidate database.
#[derive(Debug, Clone)]
pub struct DiscoveryRecord {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    pub schema: SchemaStatus,
    pub record_count: i64,
}

/// Scan options.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Recursion depth per search root.
    pub max_depth: usize,
    /// Extra roots to scan (tests, `--discover` with a hint).
    pub extra_roots: Vec<PathBuf>,
    /// Include the standard host roots (home, cwd and parents, platform
    /// directories). Tests disable this to stay hermetic.
    pub include_default_roots: bool,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            max_depth: 3,
            extra_roots: Vec::new(),
            include_default_roots: true,
        }
    }
}

/// Directories that are never worth descending into.
const SKIP_DIRS: &[&str] = &[
    "node_modules",
    ".git",
    ".svn",
    ".hg",
    "target",
    "dist",
    "build",
    "out",
    ".cache",
    ".npm",
    "__pycache__",
    ".venv",
    "venv",
    ".cargo",
    ".rustup",
    "System",
    "Windows",
    "Program Files",
    "Program Files (x86)",
];

/// Exact filenames known from current and historical releases.
const KNOWN_FILENAMES: &[&str] = &[
    "durandal-mcp-memory.db",
    "durandal-memory.db",
    "memories.db",
];

/// Whether a filename looks like one of our databases.
pub fn is_candidate_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    if KNOWN_FILENAMES.contains(&lower.as_str()) {
        return true;
    }
    lower.ends_with(".db") && (lower.contains("durandal") || lower.contains("memory"))
}

/// Run a full discovery scan. Results are deduplicated by resolved path and
/// sorted by record count, then file size, descending.
pub fn discover(options: &DiscoveryOptions) -> Vec<DiscoveryRecord> {
    let mut roots = Vec::new();
    if options.include_default_roots {
        roots.extend(default_roots());
    }
    roots.extend(options.extra_roots.iter().cloned());

    let mut seen = HashSet::new();
    let mut records = Vec::new();

    for root in roots {
        if !root.is_dir() {
            continue;
        }
        debug!(root = %root.display(), "scanning for candidate databases");
        let walker = WalkDir::new(&root)
            .max_depth(options.max_depth)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                if entry.file_type().is_dir() {
                    let name = entry.file_name().to_string_lossy();
                    return !SKIP_DIRS.iter().any(|skip| name.eq_ignore_ascii_case(skip));
                }
                true
            });

        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !is_candidate_name(&name) {
                continue;
            }
            let path = entry.path();
            let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
            let key = if cfg!(windows) {
                resolved.to_string_lossy().to_lowercase()
            } else {
                resolved.to_string_lossy().to_string()
            };
            if !seen.insert(key) {
                continue;
            }
            records.push(verify_database(path));
        }
    }

    records.sort_by(|a, b| {
        b.record_count
            .cmp(&a.record_count)
            .then(b.size_bytes.cmp(&a.size_bytes))
    });
    records
}

/// Open a candidate read-only and classify its schema.
pub fn verify_database(path: &Path) -> DiscoveryRecord {
    let meta = std::fs::metadata(path).ok();
    let size_bytes = meta.as_ref().map(|m| m.len()).unwrap_or(0);
    let modified = meta
        .and_then(|m| m.modified().ok())
        .map(DateTime::<Utc>::from);

    let mut record = DiscoveryRecord {
        path: path.to_path_buf(),
        size_bytes,
        modified,
        schema: SchemaStatus::Invalid,
        record_count: 0,
    };

    let conn = match Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    ) {
        Ok(conn) => conn,
        Err(_) => return record,
    };

    let has_table = |name: &str| -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n > 0)
        .unwrap_or(false)
    };

    if has_table("memories") {
        record.schema = SchemaStatus::Modern;
        record.record_count = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .unwrap_or(0);
    } else if has_table("conversation_messages") || has_table("conversation_sessions") {
        record.schema = SchemaStatus::Legacy;
        record.record_count = conn
            .query_row("SELECT COUNT(*) FROM conversation_messages", [], |row| {
                row.get(0)
            })
            .unwrap_or(0);
    }

    record
}

/// Standard host search roots.
fn default_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Some(dirs) = directories::UserDirs::new() {
        let home = dirs.home_dir().to_path_buf();
        roots.push(home.join(".durandal-mcp"));
        roots.push(home.join(".durandal"));
        roots.push(home.join("Documents"));
        roots.push(home.join("Projects"));
        roots.push(home.clone());
    }

    if let Ok(cwd) = std::env::current_dir() {
        roots.push(cwd.clone());
        let mut dir = cwd;
        for _ in 0..5 {
            match dir.parent() {
                Some(parent) => {
                    roots.push(parent.to_path_buf());
                    dir = parent.to_path_buf();
                }
                None => break,
            }
        }
    }

    #[cfg(unix)]
    {
        roots.push(PathBuf::from("/usr/local"));
        roots.push(PathBuf::from("/opt"));
        roots.push(PathBuf::from("/var/lib"));
    }

    #[cfg(windows)]
    {
        if let Some(base) = directories::BaseDirs::new() {
            roots.push(base.config_dir().to_path_buf()); // AppData/Roaming
            roots.push(base.config_local_dir().to_path_buf()); // AppData/Local
        }
        roots.push(PathBuf::from("C:\\Projects"));
    }

    roots
}
