//! Durandal MCP Server - persistent memory for AI coding assistants
//!
//! A Model Context Protocol server speaking JSON-RPC 2.0 over stdio. Memories
//! live in a single SQLite database behind a bounded in-process cache, with
//! an optional persistent rapid-access tier, background maintenance, and a
//! safety-first discovery/migration path for legacy databases.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use tracing::{error, info, warn};

use durandal_core::{
    discover, resolve_database_path, run_startup_checks, CheckStatus, Config, DiscoveryOptions,
    MemoryCache, Migrator, Ramr, ResolveContext, SchemaStatus, SqliteStore,
};
use durandal_mcp::logging::{parse_level, LogConfig, LoggingHandle};
use durandal_mcp::maintenance::MaintenanceLoop;
use durandal_mcp::protocol::stdio::StdioTransport;
use durandal_mcp::server::McpServer;

/// Durandal memory MCP server
#[derive(Parser)]
#[command(name = "durandal-mcp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Persistent memory MCP server with tiered caching")]
#[command(
    long_about = "Durandal exposes memory tools over the Model Context Protocol (stdio).\n\
                  Without flags it runs the server; the flags below run one-shot commands."
)]
struct Cli {
    /// Run startup self-checks against the database and exit
    #[arg(long)]
    test: bool,

    /// Print store and configuration status and exit
    #[arg(long)]
    status: bool,

    /// Scan this machine for candidate memory databases and exit
    #[arg(long)]
    discover: bool,

    /// Discover databases and merge them into the canonical store
    #[arg(long)]
    migrate: bool,

    /// Persist current logging settings to the user env file and exit
    #[arg(long)]
    configure: bool,

    /// Check for updates (not available in this build)
    #[arg(long)]
    update: bool,

    /// Debug logging on console and file
    #[arg(long)]
    debug: bool,

    /// Debug logging on the console only
    #[arg(long)]
    verbose: bool,

    /// Write logs to this file instead of the default location
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log level for both console and file (error|warn|info|debug)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let home = directories::UserDirs::new().map(|d| d.home_dir().to_path_buf());

    // Seed the environment from the user env file; real environment wins.
    if let Some(home) = &home {
        let env_file = home.join(".durandal-mcp").join(".env");
        if env_file.exists() {
            let _ = dotenvy::from_path(&env_file);
        }
    }

    let mut log_config = LogConfig::from_env(home.as_deref());
    apply_log_flags(&cli, &mut log_config);

    let code = if cli.test {
        cmd_test(home.as_deref())
    } else if cli.status {
        cmd_status(home.as_deref())
    } else if cli.discover {
        cmd_discover()
    } else if cli.migrate {
        cmd_migrate(home.as_deref())
    } else if cli.configure {
        cmd_configure(log_config)
    } else if cli.update {
        println!("Update checks are not available in this build.");
        0
    } else {
        run_server(home, log_config).await
    };
    std::process::exit(code);
}

fn apply_log_flags(cli: &Cli, config: &mut LogConfig) {
    if let Some(raw) = &cli.log_level {
        if let Some(level) = parse_level(raw) {
            config.console_level = level.to_string();
            config.file_level = level.to_string();
        } else {
            eprintln!("warning: ignoring invalid --log-level '{}'", raw);
        }
    }
    if cli.verbose {
        config.console_level = "debug".to_string();
    }
    if cli.debug {
        config.console_level = "debug".to_string();
        config.file_level = "debug".to_string();
    }
    if let Some(path) = &cli.log_file {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            config.logs_dir = parent.to_path_buf();
        }
        if let Some(name) = path.file_name() {
            config.file_prefix = name.to_string_lossy().to_string();
        }
    }
}

// ============================================================================
// SERVER RUN
// ============================================================================

async fn run_server(home: Option<PathBuf>, log_config: LogConfig) -> i32 {
    let logging = match LoggingHandle::init(log_config.clone()) {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            // Logging must never keep the server down; degrade to stderr only.
            eprintln!("warning: file logging unavailable: {}", e);
            Arc::new(LoggingHandle::detached(log_config))
        }
    };

    info!("Durandal MCP Server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();

    // Select the database without ever shadowing existing data.
    let ctx = ResolveContext::from_env(config.database_path.clone(), home.as_deref());
    let resolved = match resolve_database_path(&ctx) {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("database path resolution failed: {}", e);
            return 1;
        }
    };
    info!(
        path = %resolved.path.display(),
        created = resolved.created,
        candidates = resolved.candidates.len(),
        "database selected"
    );

    let store = match SqliteStore::open(&resolved.path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            // Selection found this path; opening it elsewhere instead would
            // risk shadowing user data, so fail loudly.
            error!(path = %resolved.path.display(), "cannot open database: {}", e);
            return 1;
        }
    };

    let startup = run_startup_checks(&store);
    if startup.fatal() {
        error!("startup checks failed: {}", startup.summary());
        return 1;
    }
    info!("startup checks: {}", startup.summary());

    let cache = Arc::new(MemoryCache::new(config.cache.clone()));

    let ramr = if config.ramr.enabled {
        let path = config.ramr.path.clone().unwrap_or_else(|| {
            home.as_deref()
                .map(|h| h.join(".durandal-mcp").join("ramr-cache.db"))
                .unwrap_or_else(|| PathBuf::from("ramr-cache.db"))
        });
        match Ramr::open(&path, config.ramr.clone()) {
            Ok(ramr) => {
                info!(path = %path.display(), "rapid-access tier enabled");
                Some(Arc::new(ramr))
            }
            Err(e) => {
                warn!("rapid-access tier unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    let server = Arc::new(McpServer::new(
        store,
        Arc::clone(&cache),
        ramr.clone(),
        config,
        Arc::clone(&logging),
        startup,
    ));

    // Shutdown: SIGINT/SIGTERM flip the watch channel; the transport stops
    // accepting frames and drains, then background tasks stop.
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_signal_listener(shutdown_tx.clone());

    let stamp_dir = home
        .as_deref()
        .map(|h| h.join(".durandal-mcp"))
        .unwrap_or_else(|| PathBuf::from(".durandal-mcp"));
    let maintenance = MaintenanceLoop {
        cache,
        ramr,
        logs_dir: logging.config().logs_dir.clone(),
        stamp_file: stamp_dir.join("maintenance.stamp"),
        last_maintenance: server.last_maintenance_slot(),
    }
    .spawn(shutdown_rx.clone());

    info!("MCP server listening on stdio");
    let transport = StdioTransport::new(shutdown_rx);
    let result = transport.run(Arc::clone(&server)).await;

    // Transport is done (EOF or signal); stop background work and flush.
    let _ = shutdown_tx.send(true);
    let _ = maintenance.await;

    match result {
        Ok(()) => {
            info!("Durandal MCP server shut down cleanly");
            0
        }
        Err(e) => {
            error!("transport error: {}", e);
            1
        }
    }
}

fn spawn_signal_listener(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(
                tokio::signal::unix::SignalKind::terminate(),
            ) {
                Ok(s) => s,
                Err(e) => {
                    warn!("cannot install SIGTERM handler: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    let _ = shutdown_tx.send(true);
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });
}

// ============================================================================
// ONE-SHOT COMMANDS
// ============================================================================

fn cmd_test(home: Option<&std::path::Path>) -> i32 {
    let config = Config::from_env();
    let ctx = ResolveContext::from_env(config.database_path.clone(), home);
    let resolved = match resolve_database_path(&ctx) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return 1;
        }
    };

    // Never create the canonical database from a self-check; probe a
    // scratch file instead.
    let scratch = if resolved.created {
        println!(
            "{}",
            "No existing database found; checking against a scratch database.".yellow()
        );
        Some(
            std::env::temp_dir().join(format!("durandal-selfcheck-{}.db", uuid::Uuid::new_v4())),
        )
    } else {
        None
    };
    let path = scratch.clone().unwrap_or_else(|| resolved.path.clone());

    println!("Checking {}", path.display().to_string().cyan());
    let store = match SqliteStore::open(&path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return 1;
        }
    };

    let report = run_startup_checks(&store);
    drop(store);
    if let Some(scratch) = &scratch {
        let _ = std::fs::remove_file(scratch);
    }
    for result in &report.results {
        let status = match result.status {
            CheckStatus::Pass => "PASS".green(),
            CheckStatus::Warn => "WARN".yellow(),
            CheckStatus::Fail => "FAIL".red().bold(),
        };
        println!("  [{}] {}: {}", status, result.name, result.detail);
    }
    println!("{}", report.summary());
    if report.fatal() { 1 } else { 0 }
}

fn cmd_status(home: Option<&std::path::Path>) -> i32 {
    let config = Config::from_env();
    let ctx = ResolveContext::from_env(config.database_path.clone(), home);
    match resolve_database_path(&ctx) {
        Ok(resolved) if !resolved.created => {
            let size = std::fs::metadata(&resolved.path).map(|m| m.len()).unwrap_or(0);
            let records = durandal_core::storage::quick_record_count(&resolved.path);
            println!("{}", "Durandal status".bold());
            println!("  Database: {}", resolved.path.display());
            println!("  Size: {} bytes", size);
            match records {
                Some(n) => println!("  Memories: {}", n),
                None => println!("  Memories: {}", "unreadable".yellow()),
            }
            if resolved.candidates.len() > 1 {
                println!(
                    "  {} {} other candidate database(s) found; run --migrate to consolidate",
                    "note:".yellow(),
                    resolved.candidates.len() - 1
                );
            }
            println!("  Cache max size: {}", config.cache.max_size);
            println!(
                "  RAMR: {}",
                if config.ramr.enabled { "enabled" } else { "disabled" }
            );
            0
        }
        Ok(_) => {
            println!("No memory database found yet; one will be created on first run.");
            0
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            1
        }
    }
}

fn cmd_discover() -> i32 {
    println!("{}", "Scanning for candidate memory databases…".bold());
    let records = discover(&DiscoveryOptions::default());
    if records.is_empty() {
        println!("No candidate databases found.");
        return 0;
    }
    for record in &records {
        let schema = match record.schema {
            SchemaStatus::Modern => "modern".green(),
            SchemaStatus::Legacy => "legacy".yellow(),
            SchemaStatus::Invalid => "invalid".red(),
        };
        println!(
            "  [{}] {} ({} records, {} bytes)",
            schema,
            record.path.display(),
            record.record_count,
            record.size_bytes,
        );
    }
    println!("{} candidate(s). Sources are never modified.", records.len());
    0
}

fn cmd_migrate(home: Option<&std::path::Path>) -> i32 {
    let config = Config::from_env();
    let ctx = ResolveContext::from_env(config.database_path.clone(), home);
    let resolved = match resolve_database_path(&ctx) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return 1;
        }
    };

    let records = discover(&DiscoveryOptions::default());
    let sources: Vec<_> = records
        .into_iter()
        .filter(|r| r.schema == SchemaStatus::Modern)
        .filter(|r| {
            r.path.canonicalize().ok() != resolved.path.canonicalize().ok()
        })
        .collect();

    if sources.is_empty() {
        println!("Nothing to migrate: no other modern databases found.");
        return 0;
    }

    println!("{}", "Migration plan".bold());
    println!("  Target: {}", resolved.path.display().to_string().cyan());
    for source in &sources {
        println!(
            "  Source: {} ({} records)",
            source.path.display(),
            source.record_count
        );
    }
    println!("Sources are read-only and will not be modified or deleted.");
    print!("Proceed with migration? [y/N] ");
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err()
        || !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    {
        println!("Migration cancelled.");
        return 0;
    }

    let mut migrator = match Migrator::open(&resolved.path) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            return 1;
        }
    };
    match migrator.migrate_all(&sources) {
        Ok(report) => {
            println!("{}", "Migration complete".green().bold());
            println!(
                "  total={} migrated={} duplicates={} errors={}",
                report.stats.total,
                report.stats.migrated,
                report.stats.duplicates,
                report.stats.errors
            );
            println!(
                "  target now holds {} rows from {} source database(s)",
                report.target_rows, report.distinct_sources
            );
            0
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            1
        }
    }
}

fn cmd_configure(log_config: LogConfig) -> i32 {
    let handle = LoggingHandle::detached(log_config);
    let (console, file) = handle.current_levels();
    match handle.set_levels(Some(console.as_str()), Some(file.as_str())) {
        Ok(_) => {
            println!(
                "Wrote CONSOLE_LOG_LEVEL={} and FILE_LOG_LEVEL={} to {}",
                console,
                file,
                handle.config().env_file.display()
            );
            0
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            1
        }
    }
}
