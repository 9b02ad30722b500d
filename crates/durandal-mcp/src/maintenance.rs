//! Background maintenance loop
//!
//! Single task started at boot. Wakes on a short tick and runs a full pass
//! only when the configured interval has elapsed since the previous one, so
//! a pass can never overlap itself. Each pass expires tier-1 and tier-2
//! entries, relieves capacity pressure, trims old log files, and persists a
//! `last_maintenance` stamp.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use durandal_core::{MemoryCache, Ramr};

use crate::logging::{cleanup_old_logs, LOG_RETENTION_DAYS};

/// Wake-up cadence.
pub const TICK_INTERVAL: Duration = Duration::from_secs(450);
/// Minimum time between full passes.
pub const PASS_INTERVAL_SECS: i64 = 30 * 60;
/// Cache utilization above which the lowest-priority slice is evicted.
const PRESSURE_THRESHOLD: f64 = 0.8;
const PRESSURE_EVICT_FRACTION: f64 = 0.10;

/// Everything a maintenance pass touches.
pub struct MaintenanceLoop {
    pub cache: Arc<MemoryCache>,
    pub ramr: Option<Arc<Ramr>>,
    pub logs_dir: PathBuf,
    /// File the pass timestamp is persisted to.
    pub stamp_file: PathBuf,
    /// Shared slot read by `get_status`.
    pub last_maintenance: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl MaintenanceLoop {
    /// Run the loop until shutdown is signalled.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            // Pick up the stamp from a previous run so a restart does not
            // immediately re-run maintenance.
            if let Some(stamp) = read_stamp(&self.stamp_file) {
                if let Ok(mut slot) = self.last_maintenance.lock() {
                    *slot = Some(stamp);
                }
            }

            loop {
                tokio::select! {
                    _ = tokio::time::sleep(TICK_INTERVAL) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("maintenance loop stopping");
                            return;
                        }
                        continue;
                    }
                }

                let due = self
                    .last_maintenance
                    .lock()
                    .ok()
                    .and_then(|slot| *slot)
                    .map(|last| (Utc::now() - last).num_seconds() >= PASS_INTERVAL_SECS)
                    .unwrap_or(true);
                if due {
                    self.run_pass();
                } else {
                    debug!("maintenance not due yet");
                }
            }
        })
    }

    /// One full maintenance pass. Never propagates errors; a bad entry or a
    /// failed tier must not take the loop down.
    pub fn run_pass(&self) {
        let now = Utc::now();

        let expired = self.cache.optimize();
        let mut evicted = 0;
        if self.cache.utilization() > PRESSURE_THRESHOLD {
            evicted = self.cache.evict_fraction(PRESSURE_EVICT_FRACTION);
        }

        let mut tier2_expired = 0;
        let mut tier2_evicted = 0;
        if let Some(ramr) = &self.ramr {
            match ramr.run_maintenance() {
                Ok(outcome) => {
                    tier2_expired = outcome.expired;
                    tier2_evicted = outcome.evicted;
                }
                Err(e) => warn!(error = %e, "tier-2 maintenance failed"),
            }
        }

        let logs_removed = cleanup_old_logs(&self.logs_dir, LOG_RETENTION_DAYS);

        if let Ok(mut slot) = self.last_maintenance.lock() {
            *slot = Some(now);
        }
        write_stamp(&self.stamp_file, now);

        info!(
            expired,
            evicted,
            tier2_expired,
            tier2_evicted,
            logs_removed,
            cache_size = self.cache.len(),
            "maintenance pass complete"
        );
    }
}

fn read_stamp(path: &PathBuf) -> Option<DateTime<Utc>> {
    let raw = std::fs::read_to_string(path).ok()?;
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn write_stamp(path: &PathBuf, at: DateTime<Utc>) {
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(path, at.to_rfc3339()) {
        warn!(path = %path.display(), error = %e, "could not persist maintenance stamp");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use durandal_core::{
        enrich_metadata, CacheConfig, Memory, MemoryMetadata, RamrConfig, RamrSetOptions,
    };
    use tempfile::tempdir;

    fn seeded_cache(count: usize, max_size: usize) -> Arc<MemoryCache> {
        let cache = Arc::new(MemoryCache::new(CacheConfig {
            max_size,
            ..Default::default()
        }));
        for i in 0..count {
            let metadata = enrich_metadata(MemoryMetadata::default(), Utc::now());
            let id = metadata.id.clone().unwrap();
            cache.insert(Memory::new(id, format!("m{}", i), metadata));
        }
        cache
    }

    #[test]
    fn test_pass_relieves_pressure_and_stamps() {
        let dir = tempdir().unwrap();
        let cache = seeded_cache(9, 10); // 90% full
        let slot = Arc::new(Mutex::new(None));
        let maintenance = MaintenanceLoop {
            cache: Arc::clone(&cache),
            ramr: None,
            logs_dir: dir.path().join("logs"),
            stamp_file: dir.path().join("maintenance.stamp"),
            last_maintenance: Arc::clone(&slot),
        };

        maintenance.run_pass();

        assert_eq!(cache.len(), 8, "lowest-priority 10% evicted");
        assert!(slot.lock().unwrap().is_some());
        assert!(maintenance.stamp_file.exists());
    }

    #[test]
    fn test_pass_skips_pressure_relief_below_threshold() {
        let dir = tempdir().unwrap();
        let cache = seeded_cache(3, 10);
        let maintenance = MaintenanceLoop {
            cache: Arc::clone(&cache),
            ramr: None,
            logs_dir: dir.path().join("logs"),
            stamp_file: dir.path().join("maintenance.stamp"),
            last_maintenance: Arc::new(Mutex::new(None)),
        };

        maintenance.run_pass();
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_pass_runs_tier2_maintenance() {
        let dir = tempdir().unwrap();
        let ramr = Arc::new(
            Ramr::open(
                &dir.path().join("ramr.db"),
                RamrConfig {
                    default_ttl_ms: 0,
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        ramr.set("stale", "x", RamrSetOptions::default()).unwrap();

        let maintenance = MaintenanceLoop {
            cache: seeded_cache(0, 10),
            ramr: Some(Arc::clone(&ramr)),
            logs_dir: dir.path().join("logs"),
            stamp_file: dir.path().join("maintenance.stamp"),
            last_maintenance: Arc::new(Mutex::new(None)),
        };
        maintenance.run_pass();

        assert_eq!(ramr.entry_count().unwrap(), 0);
        assert!(ramr.last_maintenance().unwrap().is_some());
    }

    #[test]
    fn test_stamp_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("maintenance.stamp");
        let at = Utc::now();
        write_stamp(&path, at);
        let read = read_stamp(&path).unwrap();
        assert!((read - at).num_seconds().abs() <= 1);
    }
}
