//! # Durandal Core
//!
//! Memory engine for the Durandal MCP server:
//!
//! - **Durable store**: single embedded SQLite database with a stable,
//!   four-operation query surface and backward-compatible legacy tables
//! - **Safe path resolution**: finds the right database among historical
//!   locations and never shadows existing user data with a fresh file
//! - **Tiered cache**: bounded in-process tier-1 with deterministic
//!   priority/LRU eviction, plus an optional persistent tier-2 (RAMR) with
//!   TTL- and priority-based retention
//! - **Enrichment**: pure derivation of cache priority, retention scores,
//!   and knowledge-graph placement at store time
//! - **Discovery and migration**: read-only host-wide database discovery and
//!   loss-free consolidation with content-level deduplication
//!
//! The MCP protocol layer, tool dispatch, logging, and CLI live in the
//! `durandal-mcp` crate; this crate has no I/O surface beyond the database
//! files it owns.

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod memory;
pub mod migrate;
pub mod storage;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Errors
pub use error::{ErrorKind, MemoryError, Result};

// Memory types
pub use memory::{
    content_matches, enrich_metadata, generate_memory_id, validate_content, validate_importance,
    AccessPatternMeta, KnowledgeGraphMeta, Memory, MemoryMetadata, RamrMeta, Relationship,
    SearchFilters, SelectiveAttention, DEFAULT_IMPORTANCE, MAX_CONTENT_CHARS,
};

// Configuration
pub use config::{AttentionConfig, CacheConfig, Config, RamrConfig, UpdateConfig};

// Storage layer
pub use storage::{
    resolve_database_path, run_startup_checks, CandidateDb, CheckResult, CheckStatus, GroupCount,
    GroupKind, MemoryStore, ResolveContext, ResolvedPath, SqliteStore, StartupReport,
    CANONICAL_FILENAME,
};

// Cache tiers
pub use cache::ramr::{Ramr, RamrEntry, RamrMaintenance, RamrSetOptions};
pub use cache::{AccessEvent, AccessKind, CacheEntry, CacheStats, MemoryCache};

// Discovery and migration
pub use discovery::{discover, verify_database, DiscoveryOptions, DiscoveryRecord, SchemaStatus};
pub use migrate::{MigrationReport, MigrationStats, Migrator};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
