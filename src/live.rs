//! Incremental live-monitoring cache.
//!
//! Feeds the session-block segmenter only new or changed data on each
//! refresh tick. Per-file modification times decide what changed, and a
//! per-file byte offset limits each re-read to the appended tail, so an
//! already-retained entry is never parsed twice. A bounded retention window
//! caps memory; file reads within one tick run with a fixed concurrency cap
//! and are gathered back in sorted order. Ticks are strictly sequential.

use crate::blocks::{segment_into_blocks, SessionBlock};
use crate::config::get_config;
use crate::dedup::DedupIndex;
use crate::discovery::{discover_roots_in, find_log_files};
use crate::models::UsageEvent;
use crate::parser::{earliest_timestamp, read_events_from_offset};
use crate::pricing::{CostMode, PricingCache};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration as StdDuration, SystemTime};

/// Tunables for one monitoring session, resolved once at startup.
#[derive(Debug, Clone)]
pub struct LiveSettings {
    pub roots: Vec<PathBuf>,
    pub block_duration: Duration,
    pub retention: Duration,
    pub read_concurrency: usize,
    /// Evicting at least this fraction of the buffer in one pass clears the
    /// dedup set.
    pub dedup_clear_ratio: f64,
    pub refresh_interval: StdDuration,
}

impl LiveSettings {
    pub fn from_config() -> Self {
        let config = get_config();
        Self {
            roots: config.paths.roots.clone(),
            block_duration: Duration::hours(config.blocks.duration_hours.max(1)),
            retention: Duration::hours(config.live.retention_hours.max(1)),
            read_concurrency: config.processing.read_concurrency.max(1),
            dedup_clear_ratio: config.live.dedup_clear_ratio,
            refresh_interval: StdDuration::from_secs(config.live.refresh_interval_secs.max(1)),
        }
    }
}

/// Per-process cache state for the continuous-refresh use case.
///
/// Owns its dedup set and retained entry buffer; nothing else mutates them.
/// Created once per monitoring session and dropped (releasing the pricing
/// handle) when monitoring stops.
pub struct LiveMonitor {
    settings: LiveSettings,
    /// Earliest embedded event time per file, fixing the read and
    /// accumulation order without re-scanning tracked file heads.
    file_timestamps: HashMap<PathBuf, DateTime<Utc>>,
    /// Filesystem mtime last seen per file. A tracked file is re-read only
    /// when this advances.
    file_mtimes: HashMap<PathBuf, SystemTime>,
    /// Byte offset just past the last fully consumed line per file. A
    /// re-read starts here, so only appended lines enter the pipeline.
    file_offsets: HashMap<PathBuf, u64>,
    dedup: DedupIndex,
    /// Retention-bounded entry buffer shared across ticks.
    entries: Vec<UsageEvent>,
    /// Allocated only when the cost mode requires token-based computation.
    pricing: Option<PricingCache>,
    cost_mode: CostMode,
}

impl LiveMonitor {
    pub async fn new(cost_mode: CostMode) -> Self {
        let pricing = if cost_mode.needs_pricing() {
            Some(load_pricing().await)
        } else {
            None
        };
        Self::with_settings(LiveSettings::from_config(), pricing, cost_mode)
    }

    pub fn with_settings(
        settings: LiveSettings,
        pricing: Option<PricingCache>,
        cost_mode: CostMode,
    ) -> Self {
        Self {
            settings,
            file_timestamps: HashMap::new(),
            file_mtimes: HashMap::new(),
            file_offsets: HashMap::new(),
            dedup: DedupIndex::new(),
            entries: Vec::new(),
            pricing,
            cost_mode,
        }
    }

    /// Entries currently retained. Diagnostics and test hook.
    pub fn retained_entries(&self) -> &[UsageEvent] {
        &self.entries
    }

    /// Reset all cached state without releasing the pricing handle. Forces
    /// the next refresh to re-read everything from disk.
    pub fn clear_cache(&mut self) {
        self.file_timestamps.clear();
        self.file_mtimes.clear();
        self.file_offsets.clear();
        self.entries.clear();
        self.dedup.clear();
    }

    /// One refresh tick: pull in fresh data, enforce retention, re-segment,
    /// and return the currently active billing block, if any.
    pub async fn refresh(&mut self) -> Result<Option<SessionBlock>> {
        let now = Utc::now();
        self.refresh_at(now).await
    }

    /// Refresh against an explicit evaluation instant. The retention bound
    /// and active-window rule both key off this instant.
    pub async fn refresh_at(&mut self, now: DateTime<Utc>) -> Result<Option<SessionBlock>> {
        self.ingest_changed_files(now).await?;
        self.evict_expired(now);
        Ok(self.active_block(now))
    }

    async fn ingest_changed_files(&mut self, now: DateTime<Utc>) -> Result<()> {
        let roots = discover_roots_in(&self.settings.roots)?;
        let candidates = find_log_files(&roots);
        let cutoff = now - self.settings.retention;

        // Cheap filter first: a file whose mtime predates the retention
        // cutoff cannot contain fresh data, so it is never opened. The
        // mtime also decides whether a tracked file changed at all.
        let mut recent: Vec<(PathBuf, String)> = Vec::new();
        let mut mtimes: HashMap<PathBuf, SystemTime> = HashMap::new();
        for (path, project) in candidates {
            let Ok(mtime) = std::fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            if DateTime::<Utc>::from(mtime) < cutoff {
                continue;
            }
            // Unchanged since the last tick: skip without opening the file.
            if let Some(seen) = self.file_mtimes.get(&path) {
                if mtime <= *seen {
                    continue;
                }
            }
            mtimes.insert(path.clone(), mtime);
            recent.push((path, project));
        }

        // Sorted order fixes both the read schedule and the accumulation
        // order, keeping the dedup tie-break deterministic across ticks.
        // Tracked files reuse their recorded earliest timestamp; only new
        // files pay the head scan. Files with no parseable timestamp carry
        // no events worth reading.
        let mut to_read: Vec<(PathBuf, String, DateTime<Utc>, u64)> = Vec::new();
        for (path, project) in recent {
            let earliest = match self.file_timestamps.get(&path) {
                Some(ts) => Some(*ts),
                None => earliest_timestamp(&path),
            };
            let Some(earliest) = earliest else { continue };
            let offset = self.file_offsets.get(&path).copied().unwrap_or(0);
            to_read.push((path, project, earliest, offset));
        }
        to_read.sort_by(|a, b| a.2.cmp(&b.2).then_with(|| a.0.cmp(&b.0)));

        if to_read.is_empty() {
            return Ok(());
        }

        // Bounded fan-out; `buffered` (not `buffer_unordered`) yields
        // results in submission order, so accumulation below stays in the
        // pre-sorted order regardless of read completion order. Each read
        // starts at the file's recorded offset: only appended lines reach
        // the dedup set, so keyless (never-deduplicable) entries cannot be
        // retained twice.
        let results: Vec<(PathBuf, Result<(Vec<UsageEvent>, u64)>)> =
            stream::iter(to_read.into_iter().map(|(path, project, _, offset)| async move {
                let parsed = tokio::task::spawn_blocking({
                    let path = path.clone();
                    move || read_events_from_offset(&path, &project, offset)
                })
                .await
                .map_err(anyhow::Error::from)
                .and_then(|r| r);
                (path, parsed)
            }))
            .buffered(self.settings.read_concurrency)
            .collect()
            .await;

        for (path, parsed) in results {
            let (events, end_offset) = match parsed {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Skipping unreadable file this tick");
                    continue;
                }
            };

            // State is mutated per fully-read file only; a failed or
            // cancelled tick never leaves a file half-applied.
            if let Some(earliest) = events.first().map(|e| e.timestamp) {
                self.file_timestamps.entry(path.clone()).or_insert(earliest);
            }
            self.file_offsets.insert(path.clone(), end_offset);
            if let Some(mtime) = mtimes.get(&path) {
                self.file_mtimes.insert(path, *mtime);
            }
            for event in events {
                if self.dedup.check_and_mark(&event) {
                    self.entries.push(event);
                }
            }
        }

        self.entries.sort_by_key(|e| e.timestamp);
        Ok(())
    }

    /// Enforce the retention bound. Clearing a large fraction of the buffer
    /// also clears the dedup set: stale keys referencing evicted entries
    /// would otherwise accumulate without bound.
    fn evict_expired(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.settings.retention;
        let before = self.entries.len();
        self.entries.retain(|e| e.timestamp >= cutoff);
        let removed = before - self.entries.len();

        if before > 0 && removed as f64 / before as f64 >= self.settings.dedup_clear_ratio {
            tracing::debug!(
                removed,
                retained = self.entries.len(),
                "Large eviction, clearing dedup set"
            );
            self.dedup.clear();
        }
    }

    fn active_block(&self, now: DateTime<Utc>) -> Option<SessionBlock> {
        let offline = PricingCache::offline();
        let pricing = self.pricing.as_ref().unwrap_or(&offline);
        segment_into_blocks(
            &self.entries,
            self.settings.block_duration,
            now,
            pricing,
            self.cost_mode,
        )
        .into_iter()
        .find(|b| b.is_active)
    }

    /// Continuous monitoring loop. Emits one JSON line per tick with the
    /// active block (or `null`) and exits cleanly on ctrl-c; cancellation
    /// mid-sleep or mid-read abandons the tick and leaves the cache in its
    /// last consistent state.
    pub async fn run(&mut self) -> Result<()> {
        let mut interval = tokio::time::interval(self.settings.refresh_interval);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    tracing::info!("Monitoring stopped");
                    break;
                }
                _ = interval.tick() => {
                    match self.refresh().await {
                        Ok(block) => print_tick(&block),
                        Err(e) => {
                            // A bad tick must never take the monitor down.
                            tracing::warn!(error = %e, "Refresh tick failed, keeping last state");
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

async fn load_pricing() -> PricingCache {
    #[cfg(feature = "pricing")]
    {
        if get_config().live.offline {
            PricingCache::offline()
        } else {
            PricingCache::fetch().await
        }
    }
    #[cfg(not(feature = "pricing"))]
    {
        PricingCache::offline()
    }
}

fn print_tick(block: &Option<SessionBlock>) {
    match serde_json::to_string(block) {
        Ok(json) => println!("{}", json),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize tick output"),
    }
}
