//! Runtime configuration assembled from the environment.
//!
//! The server reads a fixed set of environment variables (optionally seeded
//! from `<home>/.durandal-mcp/.env` by the binary before this runs). Parsing
//! is forgiving: a malformed value falls back to the default and is logged,
//! because a bad `CACHE_TTL` should never keep the server from starting.

use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

/// Tier-1 cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries (`CACHE_MAX_SIZE`).
    pub max_size: usize,
    /// Logical TTL per entry in milliseconds (`CACHE_TTL`).
    pub default_ttl_ms: u64,
    /// Entries scoring at or above this are protected from capacity eviction
    /// (`CACHE_IMPORTANCE_THRESHOLD`).
    pub importance_threshold: f64,
    /// Effective priority above which a read re-inserts the entry.
    pub promotion_threshold: f64,
    /// Minimum category count reported by pattern analysis.
    pub pattern_min_support: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            default_ttl_ms: 3_600_000,
            importance_threshold: 0.5,
            promotion_threshold: 0.7,
            pattern_min_support: 2,
        }
    }
}

/// Tier-2 (RAMR) settings.
#[derive(Debug, Clone)]
pub struct RamrConfig {
    /// Master switch (`RAMR_ENABLED`).
    pub enabled: bool,
    /// Schedule related-memory prefetch after searches (`RAMR_PREFETCH`).
    pub prefetch: bool,
    /// Priority score above which a tier-2 read promotes into tier-1
    /// (`RAMR_CACHE_THRESHOLD`).
    pub cache_threshold: f64,
    /// Database file for the persistent tier; defaults next to the canonical
    /// store when unset.
    pub path: Option<PathBuf>,
    /// Base TTL in milliseconds before priority/category scaling.
    pub default_ttl_ms: u64,
    /// Bound on persistent entries before maintenance starts evicting.
    pub max_entries: usize,
}

impl Default for RamrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefetch: true,
            cache_threshold: 7.0,
            path: None,
            default_ttl_ms: 3_600_000,
            max_entries: 5000,
        }
    }
}

/// Retention review settings.
#[derive(Debug, Clone)]
pub struct AttentionConfig {
    /// Master switch (`SELECTIVE_ATTENTION_ENABLED`).
    pub enabled: bool,
    /// Attention score below which an old entry becomes an archive candidate
    /// (`RETENTION_THRESHOLD`).
    pub retention_threshold: f64,
    /// Age in days before an entry is eligible for review
    /// (`ARCHIVE_AFTER_DAYS`).
    pub archive_after_days: i64,
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_threshold: 0.3,
            archive_after_days: 30,
        }
    }
}

/// Update-check settings. The HTTP client itself lives outside the core;
/// these are parsed for compatibility and surfaced in status output.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub check_enabled: bool,
    pub notification: bool,
    pub interval_hours: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            check_enabled: true,
            notification: true,
            interval_hours: 24,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Explicit database override (`DATABASE_PATH`). Used verbatim when set.
    pub database_path: Option<PathBuf>,
    pub cache: CacheConfig,
    pub ramr: RamrConfig,
    pub attention: AttentionConfig,
    pub update: UpdateConfig,
}

impl Config {
    /// Build configuration from the process environment.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        cfg.database_path = std::env::var("DATABASE_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        cfg.cache.max_size = env_parse("CACHE_MAX_SIZE", cfg.cache.max_size);
        cfg.cache.default_ttl_ms = env_parse("CACHE_TTL", cfg.cache.default_ttl_ms);
        cfg.cache.importance_threshold = env_parse(
            "CACHE_IMPORTANCE_THRESHOLD",
            cfg.cache.importance_threshold,
        )
        .clamp(0.0, 1.0);

        cfg.ramr.enabled = env_bool("RAMR_ENABLED", cfg.ramr.enabled);
        cfg.ramr.prefetch = env_bool("RAMR_PREFETCH", cfg.ramr.prefetch);
        cfg.ramr.cache_threshold = env_parse("RAMR_CACHE_THRESHOLD", cfg.ramr.cache_threshold);
        cfg.ramr.path = std::env::var("RAMR_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        cfg.attention.enabled =
            env_bool("SELECTIVE_ATTENTION_ENABLED", cfg.attention.enabled);
        cfg.attention.retention_threshold =
            env_parse("RETENTION_THRESHOLD", cfg.attention.retention_threshold).clamp(0.0, 1.0);
        cfg.attention.archive_after_days =
            env_parse("ARCHIVE_AFTER_DAYS", cfg.attention.archive_after_days).max(0);

        // NO_UPDATE_CHECK wins over UPDATE_CHECK_ENABLED when both are set.
        cfg.update.check_enabled =
            env_bool("UPDATE_CHECK_ENABLED", cfg.update.check_enabled);
        if env_bool("NO_UPDATE_CHECK", false) {
            cfg.update.check_enabled = false;
        }
        cfg.update.notification = env_bool("UPDATE_NOTIFICATION", cfg.update.notification);
        cfg.update.interval_hours =
            env_parse("UPDATE_CHECK_INTERVAL", cfg.update.interval_hours);

        cfg
    }
}

/// Parse an env var, keeping the default (and logging) on bad input.
fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!(key, value = %raw, "ignoring unparsable environment value");
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a boolean env var. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            "" => default,
            other => {
                warn!(key, value = other, "ignoring unparsable boolean");
                default
            }
        },
        Err(_) => default,
    }
}
