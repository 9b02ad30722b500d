//! Startup checks
//!
//! Boot-time verification of the opened store: connectivity, schema shape,
//! a real read/write probe, and the database's own integrity check. The
//! server refuses to start only on fatal results; warnings are kept around
//! so `get_status` can report them.

use tracing::{error, info, warn};
use uuid::Uuid;

use super::sqlite::SqliteStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckStatus::Pass => "pass",
            CheckStatus::Warn => "warn",
            CheckStatus::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub detail: String,
}

/// Aggregated startup check results.
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub results: Vec<CheckResult>,
}

impl StartupReport {
    /// True when any fatal check failed; the server must not start.
    pub fn fatal(&self) -> bool {
        self.results.iter().any(|r| r.status == CheckStatus::Fail)
    }

    pub fn warnings(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == CheckStatus::Warn)
            .count()
    }

    /// One-line summary for status output.
    pub fn summary(&self) -> String {
        let passed = self
            .results
            .iter()
            .filter(|r| r.status == CheckStatus::Pass)
            .count();
        format!(
            "{}/{} passed, {} warnings{}",
            passed,
            self.results.len(),
            self.warnings(),
            if self.fatal() { ", FATAL" } else { "" }
        )
    }

    fn record(&mut self, name: &'static str, status: CheckStatus, detail: String) {
        match status {
            CheckStatus::Pass => info!(check = name, %detail, "startup check passed"),
            CheckStatus::Warn => warn!(check = name, %detail, "startup check warning"),
            CheckStatus::Fail => error!(check = name, %detail, "startup check FAILED"),
        }
        self.results.push(CheckResult {
            name,
            status,
            detail,
        });
    }
}

/// Run the boot-time check sequence against an opened store.
pub fn run_startup_checks(store: &SqliteStore) -> StartupReport {
    let mut report = StartupReport::default();

    // 1. Connectivity
    match store.connectivity_probe() {
        Ok(()) => report.record("connectivity", CheckStatus::Pass, "SELECT 1 ok".into()),
        Err(e) => {
            report.record("connectivity", CheckStatus::Fail, e.to_string());
            // Nothing else is meaningful without a connection.
            return report;
        }
    }

    // 2. Schema
    check_schema(store, &mut report);

    // 3. Read/write probe
    let marker = format!("__durandal_probe_{}", Uuid::new_v4().simple());
    match store.read_write_probe(&marker) {
        Ok(()) => report.record(
            "read_write_probe",
            CheckStatus::Pass,
            "sentinel row inserted, read back, and deleted".into(),
        ),
        Err(e) => report.record("read_write_probe", CheckStatus::Fail, e.to_string()),
    }

    // 4. Integrity (warning only)
    match store.integrity_check() {
        Ok(lines) if lines.len() == 1 && lines[0] == "ok" => {
            report.record("integrity", CheckStatus::Pass, "ok".into())
        }
        Ok(lines) => report.record("integrity", CheckStatus::Warn, lines.join("; ")),
        Err(e) => report.record("integrity", CheckStatus::Warn, e.to_string()),
    }

    report
}

fn check_schema(store: &SqliteStore, report: &mut StartupReport) {
    let columns = match store.table_columns("memories") {
        Ok(cols) => cols,
        Err(e) => {
            report.record("schema", CheckStatus::Fail, e.to_string());
            return;
        }
    };

    if columns.is_empty() {
        report.record(
            "schema",
            CheckStatus::Fail,
            "memories table does not exist".into(),
        );
        return;
    }

    let missing_essential: Vec<&str> = ["id", "content"]
        .into_iter()
        .filter(|c| !columns.iter().any(|col| col == c))
        .collect();
    if !missing_essential.is_empty() {
        report.record(
            "schema",
            CheckStatus::Fail,
            format!("memories table missing essential columns: {:?}", missing_essential),
        );
        return;
    }

    let missing_optional: Vec<&str> = ["metadata", "created_at"]
        .into_iter()
        .filter(|c| !columns.iter().any(|col| col == c))
        .collect();
    if missing_optional.is_empty() {
        report.record("schema", CheckStatus::Pass, "all columns present".into());
    } else {
        report.record(
            "schema",
            CheckStatus::Warn,
            format!("missing optional columns: {:?}", missing_optional),
        );
    }

    // Legacy table presence is purely informational.
    let legacy: Vec<&str> = ["projects", "conversation_sessions", "conversation_messages"]
        .into_iter()
        .filter(|t| store.has_table(t).unwrap_or(false))
        .collect();
    report.record(
        "legacy_tables",
        CheckStatus::Pass,
        if legacy.is_empty() {
            "none present".into()
        } else {
            format!("present: {:?}", legacy)
        },
    );
}
