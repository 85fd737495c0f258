//! Cross-process status cache.
//!
//! Many short-lived invocations of the status command share one recently
//! computed result through a per-session JSON record in the temp directory.
//! Coordination is deliberately lock-free: read, decide, write. Two
//! processes may both decide to recompute; last writer wins, and duplicate
//! recomputation is the accepted failure mode. The `is_updating` flag plus a
//! signal-0 liveness probe keeps a crashed leader from blocking followers,
//! while a live leader makes followers serve the stale output instead of
//! piling on.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use nix::sys::signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Output served when no cached output exists and computation failed.
pub const UNAVAILABLE: &str = "unavailable";

/// Persisted cross-process cache entry, one file per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusCacheRecord {
    #[serde(rename = "lastOutput")]
    pub last_output: String,
    #[serde(rename = "lastUpdateTime")]
    pub last_update: DateTime<Utc>,
    /// Modification time (epoch millis) of the log file that produced
    /// `last_output`. Any change invalidates the cache immediately,
    /// regardless of elapsed time.
    #[serde(rename = "sourceFileModTime")]
    pub source_mtime_ms: i64,
    #[serde(rename = "isUpdating")]
    pub is_updating: bool,
    #[serde(rename = "updatingPid")]
    pub updating_pid: Option<u32>,
}

/// What a status request should do with an existing record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    /// Fresh enough and the source file has not changed.
    Reuse,
    /// Stale or invalidated; this process should recompute.
    Recompute,
    /// Another live process is already recomputing; serve the stale output.
    ServeStale,
}

/// Advisory liveness probe: signal 0 reports process existence without side
/// effects. Not kernel-enforced mutual exclusion, and that is intentional.
fn pid_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

pub struct StatusCache {
    dir: PathBuf,
    refresh_interval_secs: i64,
}

impl StatusCache {
    pub fn new(dir: PathBuf, refresh_interval_secs: u64) -> Self {
        Self {
            dir,
            refresh_interval_secs: refresh_interval_secs as i64,
        }
    }

    /// Cache backed by the configured directory.
    pub fn from_config() -> Self {
        let config = crate::config::get_config();
        Self::new(
            config.status.cache_dir.clone(),
            config.status.refresh_interval_secs,
        )
    }

    fn record_path(&self, session_id: &str) -> PathBuf {
        // Session ids come from directory names; keep the filename tame.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// Read the record for a session. Missing or corrupt records read as
    /// "no cache" rather than failing the request.
    pub fn read_record(&self, session_id: &str) -> Option<StatusCacheRecord> {
        let content = fs::read_to_string(self.record_path(session_id)).ok()?;
        serde_json::from_str(&content).ok()
    }

    fn write_record(&self, session_id: &str, record: &StatusCacheRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir {}", self.dir.display()))?;
        let path = self.record_path(session_id);
        let json = serde_json::to_string(record)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write cache record {}", path.display()))?;
        Ok(())
    }

    /// Decide whether an existing record can be reused for a request whose
    /// source log file currently has mtime `source_mtime_ms`.
    ///
    /// The file-modification check takes precedence: a changed source forces
    /// recompute even inside the refresh interval.
    pub fn decide(
        &self,
        record: &StatusCacheRecord,
        source_mtime_ms: i64,
        now: DateTime<Utc>,
    ) -> CacheDecision {
        let unchanged = record.source_mtime_ms == source_mtime_ms;
        let age_secs = (now - record.last_update).num_seconds();
        if unchanged && age_secs >= 0 && age_secs < self.refresh_interval_secs {
            return CacheDecision::Reuse;
        }

        if record.is_updating {
            if let Some(pid) = record.updating_pid {
                if pid_alive(pid) {
                    // Bounded staleness beats duplicate work.
                    return CacheDecision::ServeStale;
                }
            }
            // Leader died mid-update; take over.
        }

        CacheDecision::Recompute
    }

    /// Mark this process as the updater before starting expensive work.
    pub fn begin_update(&self, session_id: &str, pid: u32) -> Result<()> {
        let mut record = self.read_record(session_id).unwrap_or(StatusCacheRecord {
            last_output: String::new(),
            last_update: DateTime::<Utc>::MIN_UTC,
            source_mtime_ms: 0,
            is_updating: false,
            updating_pid: None,
        });
        record.is_updating = true;
        record.updating_pid = Some(pid);
        self.write_record(session_id, &record)
    }

    /// Publish a finished computation.
    pub fn commit_update(
        &self,
        session_id: &str,
        output: &str,
        source_mtime_ms: i64,
    ) -> Result<()> {
        let record = StatusCacheRecord {
            last_output: output.to_string(),
            last_update: Utc::now(),
            source_mtime_ms,
            is_updating: false,
            updating_pid: None,
        };
        self.write_record(session_id, &record)
    }

    /// Best-effort clear of the updating flag after a failed computation,
    /// so a crashed or erroring leader never blocks later processes.
    fn abandon_update(&self, session_id: &str) {
        if let Some(mut record) = self.read_record(session_id) {
            record.is_updating = false;
            record.updating_pid = None;
            let _ = self.write_record(session_id, &record);
        }
    }

    /// The one public entry point for the status path: serve a cached
    /// output when fresh, defer to a live updater when one exists, and
    /// otherwise recompute and publish. Never panics: on internal error the
    /// last good output is served, or the explicit unavailable indicator.
    pub fn resolve_status_output<F>(
        &self,
        session_id: &str,
        source_mtime_ms: i64,
        compute: F,
    ) -> String
    where
        F: FnOnce() -> Result<String>,
    {
        let now = Utc::now();
        let record = self.read_record(session_id);

        if let Some(record) = &record {
            match self.decide(record, source_mtime_ms, now) {
                CacheDecision::Reuse | CacheDecision::ServeStale => {
                    return record.last_output.clone();
                }
                CacheDecision::Recompute => {}
            }
        }

        if let Err(e) = self.begin_update(session_id, std::process::id()) {
            tracing::warn!(error = %e, "Failed to mark update in progress");
        }

        match compute() {
            Ok(output) => {
                if let Err(e) = self.commit_update(session_id, &output, source_mtime_ms) {
                    tracing::warn!(error = %e, "Failed to persist status cache record");
                }
                output
            }
            Err(e) => {
                tracing::warn!(error = %e, "Status computation failed");
                self.abandon_update(session_id);
                record
                    .map(|r| r.last_output)
                    .filter(|o| !o.is_empty())
                    .unwrap_or_else(|| UNAVAILABLE.to_string())
            }
        }
    }
}
