//! Logging subsystem
//!
//! Two independent layers: a console layer on stderr (stdout belongs to
//! JSON-RPC) and a JSON-lines file layer under `<home>/.durandal-mcp/logs/`,
//! rotated daily by `tracing-appender`. Both layers sit behind reloadable
//! filters so `configure_logging` can change levels on the live process;
//! changes are persisted to the user env file so they survive restarts.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use durandal_core::MemoryError;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, Layer};

/// Accepted level names, least to most severe.
pub const VALID_LEVELS: &[&str] = &["debug", "info", "warn", "error"];

/// Log files older than this are removed at startup and at maintenance time.
pub const LOG_RETENTION_DAYS: u64 = 7;

type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Normalize and validate a level name.
pub fn parse_level(raw: &str) -> Option<&'static str> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

fn level_rank(level: &str) -> u8 {
    match level.to_ascii_lowercase().as_str() {
        "error" => 3,
        "warn" => 2,
        "info" => 1,
        _ => 0,
    }
}

// ============================================================================
// CONFIG
// ============================================================================

/// Logging configuration resolved from the environment and CLI flags.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub console_level: String,
    pub file_level: String,
    pub logs_dir: PathBuf,
    /// Rolling file prefix; the appender adds a `.YYYY-MM-DD` suffix.
    pub file_prefix: String,
    /// Optional dedicated error-only log file (`ERROR_LOG_FILE`).
    pub error_log: Option<PathBuf>,
    /// Log every tool invocation with its full arguments (`LOG_MCP_TOOLS`).
    pub log_tool_calls: bool,
    /// User env file where level changes are persisted.
    pub env_file: PathBuf,
}

impl LogConfig {
    pub fn from_env(home: Option<&Path>) -> Self {
        let base_dir = home
            .map(|h| h.join(".durandal-mcp"))
            .unwrap_or_else(|| PathBuf::from(".durandal-mcp"));

        let base_level = env_level("LOG_LEVEL").unwrap_or("info");
        let mut console_level = env_level("CONSOLE_LOG_LEVEL").unwrap_or(base_level);
        let mut file_level = env_level("FILE_LOG_LEVEL").unwrap_or(base_level);

        if env_flag("VERBOSE") {
            console_level = "debug";
        }
        if env_flag("DEBUG") {
            console_level = "debug";
            file_level = "debug";
        }

        // LOG_FILE overrides the whole rolling location with an explicit file.
        let (logs_dir, file_prefix) = match std::env::var("LOG_FILE").ok().filter(|s| !s.is_empty())
        {
            Some(raw) => {
                let path = PathBuf::from(raw);
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| base_dir.join("logs"));
                let prefix = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "durandal-mcp.log".to_string());
                (dir, prefix)
            }
            None => (base_dir.join("logs"), "durandal-mcp.log".to_string()),
        };

        Self {
            console_level: console_level.to_string(),
            file_level: file_level.to_string(),
            logs_dir,
            file_prefix,
            error_log: std::env::var("ERROR_LOG_FILE")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            log_tool_calls: env_flag("LOG_MCP_TOOLS"),
            env_file: base_dir.join(".env"),
        }
    }
}

fn env_level(key: &str) -> Option<&'static str> {
    std::env::var(key).ok().as_deref().and_then(parse_level)
}

fn env_flag(key: &str) -> bool {
    matches!(
        std::env::var(key).ok().as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes") | Some("on")
    )
}

// ============================================================================
// HANDLE
// ============================================================================

struct ReloadHandles {
    console: ReloadHandle,
    file: ReloadHandle,
}

/// Live handle over the installed logger.
///
/// `detached` builds one without a global subscriber; level state and env
/// persistence still work, which is what the tests and one-shot subcommands
/// need.
pub struct LoggingHandle {
    levels: Mutex<(String, String)>,
    reload: Option<ReloadHandles>,
    config: LogConfig,
    _guard: Option<WorkerGuard>,
}

impl LoggingHandle {
    /// Install the global subscriber and return the handle.
    pub fn init(config: LogConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.logs_dir)?;
        let removed = cleanup_old_logs(&config.logs_dir, LOG_RETENTION_DAYS);
        if removed > 0 {
            eprintln!("removed {} expired log files", removed);
        }

        let (console_filter, console_handle) =
            reload::Layer::new(EnvFilter::new(&config.console_level));
        let (file_filter, file_handle) = reload::Layer::new(EnvFilter::new(&config.file_level));

        let appender = tracing_appender::rolling::daily(&config.logs_dir, &config.file_prefix);
        let (file_writer, guard) = tracing_appender::non_blocking(appender);

        let console_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
            .with_filter(console_filter);
        let file_layer = fmt::layer()
            .json()
            .with_writer(file_writer)
            .with_filter(file_filter);

        let error_layer = match &config.error_log {
            Some(path) => {
                let dir = path
                    .parent()
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(Path::new("."));
                std::fs::create_dir_all(dir)?;
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "durandal-error.log".to_string());
                let appender = tracing_appender::rolling::never(dir, name);
                Some(
                    fmt::layer()
                        .json()
                        .with_writer(appender)
                        .with_filter(LevelFilter::ERROR),
                )
            }
            None => None,
        };

        tracing_subscriber::registry()
            .with(console_layer.and_then(file_layer))
            .with(error_layer)
            .try_init()?;

        Ok(Self {
            levels: Mutex::new((config.console_level.clone(), config.file_level.clone())),
            reload: Some(ReloadHandles {
                console: console_handle,
                file: file_handle,
            }),
            config,
            _guard: Some(guard),
        })
    }

    /// Handle without a global subscriber (tests, one-shot subcommands).
    pub fn detached(config: LogConfig) -> Self {
        Self {
            levels: Mutex::new((config.console_level.clone(), config.file_level.clone())),
            reload: None,
            config,
            _guard: None,
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn log_tool_calls(&self) -> bool {
        self.config.log_tool_calls
    }

    /// Current `(console, file)` levels.
    pub fn current_levels(&self) -> (String, String) {
        self.levels
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }

    /// Update the live filters and persist the new levels to the env file.
    ///
    /// At least one level must be provided; invalid names are a validation
    /// error, and env-file write failures surface to the caller.
    pub fn set_levels(
        &self,
        console: Option<&str>,
        file: Option<&str>,
    ) -> Result<(String, String), MemoryError> {
        if console.is_none() && file.is_none() {
            return Err(MemoryError::validation(
                "console_level",
                "null",
                "at least one of console_level or file_level is required",
            ));
        }

        let console = console
            .map(|raw| {
                parse_level(raw).ok_or_else(|| {
                    MemoryError::validation(
                        "console_level",
                        raw,
                        "must be one of error, warn, info, debug",
                    )
                })
            })
            .transpose()?;
        let file = file
            .map(|raw| {
                parse_level(raw).ok_or_else(|| {
                    MemoryError::validation(
                        "file_level",
                        raw,
                        "must be one of error, warn, info, debug",
                    )
                })
            })
            .transpose()?;

        let mut levels = self
            .levels
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        if let Some(level) = console {
            if let Some(handles) = &self.reload {
                handles
                    .console
                    .reload(EnvFilter::new(level))
                    .map_err(|e| MemoryError::Unknown(format!("filter reload failed: {}", e)))?;
            }
            levels.0 = level.to_string();
        }
        if let Some(level) = file {
            if let Some(handles) = &self.reload {
                handles
                    .file
                    .reload(EnvFilter::new(level))
                    .map_err(|e| MemoryError::Unknown(format!("filter reload failed: {}", e)))?;
            }
            levels.1 = level.to_string();
        }
        let result = levels.clone();
        drop(levels);

        persist_levels(&self.config.env_file, &result.0, &result.1)?;
        Ok(result)
    }
}

// ============================================================================
// ENV FILE PERSISTENCE
// ============================================================================

/// Upsert `KEY=VALUE` pairs into env-file content, preserving comments and
/// unrelated lines.
fn upsert_env_lines(content: &str, pairs: &[(&str, &str)]) -> String {
    let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
    for (key, value) in pairs {
        let prefix = format!("{}=", key);
        match lines
            .iter_mut()
            .find(|l| l.trim_start().starts_with(&prefix))
        {
            Some(line) => *line = format!("{}={}", key, value),
            None => lines.push(format!("{}={}", key, value)),
        }
    }
    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

fn persist_levels(env_file: &Path, console: &str, file: &str) -> Result<(), MemoryError> {
    if let Some(parent) = env_file.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|source| MemoryError::FileSystem {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let existing = std::fs::read_to_string(env_file).unwrap_or_default();
    let updated = upsert_env_lines(
        &existing,
        &[("CONSOLE_LOG_LEVEL", console), ("FILE_LOG_LEVEL", file)],
    );
    std::fs::write(env_file, updated).map_err(|source| MemoryError::FileSystem {
        path: env_file.to_path_buf(),
        source,
    })
}

// ============================================================================
// LOG FILE READING
// ============================================================================

/// A parsed JSON log line.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: String,
    pub message: String,
}

/// Read the last `lines` entries from the rolling log, filtered by minimum
/// level and substring. Reads at most the two newest files.
pub fn read_logs(
    config: &LogConfig,
    lines: usize,
    min_level: Option<&str>,
    search: Option<&str>,
) -> Result<Vec<LogEntry>, MemoryError> {
    let mut files = log_files(&config.logs_dir, &config.file_prefix).map_err(|source| {
        MemoryError::FileSystem {
            path: config.logs_dir.clone(),
            source,
        }
    })?;
    // Date suffixes sort lexicographically; newest last.
    files.sort();

    let min_rank = min_level.map(level_rank);
    let needle = search.map(str::to_lowercase);

    let mut collected: Vec<LogEntry> = Vec::new();
    for file in files.iter().rev().take(2) {
        let content = std::fs::read_to_string(file).map_err(|source| MemoryError::FileSystem {
            path: file.clone(),
            source,
        })?;
        let mut entries: Vec<LogEntry> = content.lines().filter_map(parse_log_line).collect();

        if let Some(min) = min_rank {
            entries.retain(|e| level_rank(&e.level) >= min);
        }
        if let Some(needle) = &needle {
            entries.retain(|e| e.message.to_lowercase().contains(needle));
        }

        // Prepend older entries in front of what newer files contributed.
        entries.extend(collected);
        collected = entries;
        if collected.len() >= lines {
            break;
        }
    }

    let skip = collected.len().saturating_sub(lines);
    Ok(collected.split_off(skip))
}

fn log_files(dir: &Path, prefix: &str) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file()
            && entry.file_name().to_string_lossy().starts_with(prefix)
        {
            files.push(entry.path());
        }
    }
    Ok(files)
}

fn parse_log_line(line: &str) -> Option<LogEntry> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;
    let message = value
        .pointer("/fields/message")
        .or_else(|| value.get("message"))
        .and_then(|m| m.as_str())
        .unwrap_or_default()
        .to_string();
    Some(LogEntry {
        timestamp: value
            .get("timestamp")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string(),
        level: value
            .get("level")
            .and_then(|l| l.as_str())
            .unwrap_or("INFO")
            .to_string(),
        message,
    })
}

/// Remove log files older than `max_age_days`. Best-effort; returns the
/// number removed.
pub fn cleanup_old_logs(dir: &Path, max_age_days: u64) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let cutoff = std::time::SystemTime::now()
        - std::time::Duration::from_secs(max_age_days * 24 * 3600);
    let mut removed = 0;
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        if let Ok(modified) = meta.modified()
            && modified < cutoff
            && std::fs::remove_file(entry.path()).is_ok()
        {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(dir: &Path) -> LogConfig {
        LogConfig {
            console_level: "info".to_string(),
            file_level: "info".to_string(),
            logs_dir: dir.join("logs"),
            file_prefix: "durandal-mcp.log".to_string(),
            error_log: None,
            log_tool_calls: false,
            env_file: dir.join(".env"),
        }
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("INFO"), Some("info"));
        assert_eq!(parse_level(" warn "), Some("warn"));
        assert_eq!(parse_level("warning"), Some("warn"));
        assert_eq!(parse_level("trace"), None);
        assert_eq!(parse_level(""), None);
    }

    #[test]
    fn test_set_levels_validates() {
        let dir = tempdir().unwrap();
        let handle = LoggingHandle::detached(test_config(dir.path()));

        assert!(handle.set_levels(None, None).is_err());
        assert!(handle.set_levels(Some("nope"), None).is_err());

        let (console, file) = handle.set_levels(Some("debug"), Some("error")).unwrap();
        assert_eq!(console, "debug");
        assert_eq!(file, "error");
        assert_eq!(handle.current_levels(), ("debug".into(), "error".into()));
    }

    #[test]
    fn test_set_levels_persists_to_env_file() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::write(
            &config.env_file,
            "# durandal settings\nDATABASE_PATH=/tmp/x.db\nCONSOLE_LOG_LEVEL=info\n",
        )
        .unwrap();

        let handle = LoggingHandle::detached(config.clone());
        handle.set_levels(Some("warn"), Some("debug")).unwrap();

        let written = std::fs::read_to_string(&config.env_file).unwrap();
        assert!(written.contains("# durandal settings"));
        assert!(written.contains("DATABASE_PATH=/tmp/x.db"));
        assert!(written.contains("CONSOLE_LOG_LEVEL=warn"));
        assert!(written.contains("FILE_LOG_LEVEL=debug"));
    }

    #[test]
    fn test_upsert_env_lines() {
        let updated = upsert_env_lines("A=1\n# comment\n", &[("A", "2"), ("B", "3")]);
        assert_eq!(updated, "A=2\n# comment\nB=3\n");

        let fresh = upsert_env_lines("", &[("KEY", "value")]);
        assert_eq!(fresh, "KEY=value\n");
    }

    #[test]
    fn test_read_logs_filters_and_tails() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.logs_dir).unwrap();
        let file = config.logs_dir.join("durandal-mcp.log.2026-08-01");
        let lines = [
            r#"{"timestamp":"t1","level":"DEBUG","fields":{"message":"noise"}}"#,
            r#"{"timestamp":"t2","level":"INFO","fields":{"message":"stored memory"}}"#,
            r#"{"timestamp":"t3","level":"WARN","fields":{"message":"store write failed"}}"#,
            r#"{"timestamp":"t4","level":"ERROR","fields":{"message":"database busy"}}"#,
        ];
        std::fs::write(&file, lines.join("\n")).unwrap();

        let all = read_logs(&config, 10, None, None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.last().unwrap().timestamp, "t4");

        let warnings = read_logs(&config, 10, Some("warn"), None).unwrap();
        assert_eq!(warnings.len(), 2);

        let searched = read_logs(&config, 10, None, Some("store")).unwrap();
        assert_eq!(searched.len(), 2);

        let tail = read_logs(&config, 1, None, None).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].level, "ERROR");
    }

    #[test]
    fn test_read_logs_spans_two_newest_files() {
        let dir = tempdir().unwrap();
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.logs_dir).unwrap();
        std::fs::write(
            config.logs_dir.join("durandal-mcp.log.2026-07-31"),
            r#"{"timestamp":"old","level":"INFO","fields":{"message":"yesterday"}}"#,
        )
        .unwrap();
        std::fs::write(
            config.logs_dir.join("durandal-mcp.log.2026-08-01"),
            r#"{"timestamp":"new","level":"INFO","fields":{"message":"today"}}"#,
        )
        .unwrap();

        let entries = read_logs(&config, 10, None, None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, "old");
        assert_eq!(entries[1].timestamp, "new");
    }

    #[test]
    fn test_cleanup_old_logs_ignores_fresh_files() {
        let dir = tempdir().unwrap();
        let logs = dir.path().join("logs");
        std::fs::create_dir_all(&logs).unwrap();
        std::fs::write(logs.join("durandal-mcp.log.2026-08-01"), "x").unwrap();

        assert_eq!(cleanup_old_logs(&logs, LOG_RETENTION_DAYS), 0);
        assert!(logs.join("durandal-mcp.log.2026-08-01").exists());
    }
}
