//! Storage Module
//!
//! Durable SQLite-backed memory store plus the safety-critical pieces around
//! it: database path resolution, versioned migrations, and boot-time checks.

mod checks;
mod migrations;
mod resolve;
mod sqlite;

pub use checks::{run_startup_checks, CheckResult, CheckStatus, StartupReport};
pub use migrations::{apply_migrations, get_current_version, MIGRATIONS};
pub use resolve::{
    resolve_database_path, CandidateDb, ResolveContext, ResolvedPath, CANONICAL_FILENAME,
    HISTORICAL_FILENAMES,
};
pub use sqlite::{quick_record_count, GroupCount, GroupKind, SqliteStore};

use crate::error::Result;
use crate::memory::{Memory, MemoryMetadata, SearchFilters};

/// Capability set the dispatcher depends on.
///
/// The concrete store in this repository is the embedded SQLite one, but the
/// tool handlers only ever see this trait.
pub trait MemoryStore: Send + Sync {
    /// Insert a memory and return its id.
    fn store_memory(&self, content: &str, metadata: &MemoryMetadata) -> Result<String>;

    /// Case-insensitive substring search over content with filter predicates,
    /// newest first. `limit` is capped at 100.
    fn search_memories(
        &self,
        query: &str,
        filters: &SearchFilters,
        limit: usize,
    ) -> Result<Vec<Memory>>;

    /// Most recent memories for a project/session, newest first. `limit` is
    /// capped at 50.
    fn get_recent_memories(
        &self,
        project: Option<&str>,
        session: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Memory>>;

    /// Look up a single memory by id.
    fn get_memory_by_id(&self, id: &str) -> Result<Option<Memory>>;
}
