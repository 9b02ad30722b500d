//! get_status tool
//!
//! Human-readable status assembled from process uptime, store path and size,
//! cache fill and hit rate, tier-2 state, log levels, and the startup check
//! report. Store failures degrade individual lines, never the call.

use std::sync::atomic::Ordering;

use serde_json::Value;

use durandal_core::Result;

use crate::server::McpServer;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {}
    })
}

pub async fn execute(server: &McpServer, _args: Option<Value>) -> Result<String> {
    let mut lines = vec![format!(
        "🗡️ Durandal MCP Server v{}",
        env!("CARGO_PKG_VERSION")
    )];
    lines.push(format!(
        "Uptime: {}",
        humanize_duration(server.started_at.elapsed().as_secs())
    ));

    let record_count = server
        .store
        .count_memories()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "unavailable".to_string());
    lines.push(format!(
        "Store: {} ({}, {} memories)",
        server.store.path().display(),
        humanize_bytes(server.store.db_file_size()),
        record_count,
    ));

    let stats = server.cache.stats();
    lines.push(format!(
        "Cache: {}/{} entries ({:.1}% full), hit rate {:.1}%",
        stats.size,
        stats.max_size,
        server.cache.utilization() * 100.0,
        stats.hit_rate * 100.0,
    ));

    match &server.ramr {
        Some(ramr) => {
            let live = ramr
                .entry_count()
                .map(|n| n.to_string())
                .unwrap_or_else(|_| "?".to_string());
            lines.push(format!(
                "RAMR: enabled ({} live entries, threshold {:.1})",
                live, server.config.ramr.cache_threshold
            ));
        }
        None => lines.push("RAMR: disabled".to_string()),
    }

    lines.push(format!(
        "Selective attention: {} (retention threshold {}, archive after {} days)",
        if server.config.attention.enabled { "enabled" } else { "disabled" },
        server.config.attention.retention_threshold,
        server.config.attention.archive_after_days,
    ));

    let (console_level, file_level) = server.logging.current_levels();
    lines.push(format!(
        "Log levels: console={} file={}",
        console_level, file_level
    ));

    lines.push(format!(
        "Store writes: {} scheduled, {} failed",
        server.write_counters.scheduled.load(Ordering::Relaxed),
        server.write_counters.failed.load(Ordering::Relaxed),
    ));

    lines.push(format!("Startup checks: {}", server.startup.summary()));
    for result in &server.startup.results {
        if result.status != durandal_core::CheckStatus::Pass {
            lines.push(format!(
                "  {} {}: {}",
                result.status.as_str(),
                result.name,
                result.detail
            ));
        }
    }

    let last_maintenance = server
        .last_maintenance
        .lock()
        .ok()
        .and_then(|slot| *slot);
    lines.push(format!(
        "Last maintenance: {}",
        last_maintenance
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    ));

    lines.push(format!(
        "Update checks: {}",
        if server.config.update.check_enabled { "enabled" } else { "disabled" }
    ));

    Ok(lines.join("\n"))
}

fn humanize_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

fn humanize_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[unit])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
