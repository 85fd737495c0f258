//! Aggregation of usage events into report buckets.
//!
//! [`aggregate`] is a pure fold: it groups events by a caller-supplied key
//! function and sums token counts and costs per bucket, with a
//! cost-descending per-model breakdown. [`run_batch`] is the batch pipeline
//! around it: files ordered by earliest embedded timestamp, parallel parse,
//! sequential in-order deduplication.

use crate::config::get_config;
use crate::dedup::DedupIndex;
use crate::models::{BucketTotals, ModelBreakdown, TokenCounts, UsageEvent};
use crate::parser::{read_events, sort_files_by_earliest_timestamp};
use crate::pricing::{CostMode, PricingCache};
use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Report granularity exposed by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Daily,
    Weekly,
    Monthly,
    Session,
    DailyByProject,
}

impl ReportKind {
    /// Bucket key for one event.
    pub fn key(&self, event: &UsageEvent) -> String {
        match self {
            ReportKind::Daily => event.timestamp.format("%Y-%m-%d").to_string(),
            ReportKind::Weekly => format!(
                "{}-W{:02}",
                event.timestamp.iso_week().year(),
                event.timestamp.iso_week().week()
            ),
            ReportKind::Monthly => event.timestamp.format("%Y-%m").to_string(),
            ReportKind::Session => format!(
                "{}/{}",
                event.source_project,
                event.session_id.as_deref().unwrap_or("unknown")
            ),
            ReportKind::DailyByProject => format!(
                "{} {}",
                event.timestamp.format("%Y-%m-%d"),
                event.source_project
            ),
        }
    }
}

/// Fold events into per-key totals with per-model cost breakdowns.
///
/// Pure, no I/O. The synthetic model sentinel is excluded from the model
/// list but its tokens and cost still count toward the bucket totals.
pub fn aggregate<F>(
    events: &[UsageEvent],
    key_fn: F,
    pricing: &PricingCache,
    mode: CostMode,
) -> BTreeMap<String, BucketTotals>
where
    F: Fn(&UsageEvent) -> String,
{
    let mut buckets: BTreeMap<String, BucketTotals> = BTreeMap::new();
    let mut model_slices: HashMap<(String, String), (TokenCounts, f64)> = HashMap::new();

    for event in events {
        let key = key_fn(event);
        let cost = pricing.event_cost(mode, event.cost, &event.tokens, event.model.as_deref());

        let bucket = buckets.entry(key.clone()).or_default();
        bucket.tokens.add(&event.tokens);
        bucket.cost += cost;
        bucket.events += 1;

        if event.has_reportable_model() {
            let model = event.model.clone().unwrap_or_default();
            let slice = model_slices.entry((key, model)).or_default();
            slice.0.add(&event.tokens);
            slice.1 += cost;
        }
    }

    for ((key, model), (tokens, cost)) in model_slices {
        if let Some(bucket) = buckets.get_mut(&key) {
            bucket.models.push(ModelBreakdown { model, tokens, cost });
        }
    }
    for bucket in buckets.values_mut() {
        bucket
            .models
            .sort_by(|a, b| b.cost.partial_cmp(&a.cost).unwrap_or(std::cmp::Ordering::Equal));
    }

    buckets
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub kind: ReportKind,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub cost_mode: CostMode,
}

/// Read, deduplicate and cost a file set in deterministic order.
///
/// Files are ordered by earliest embedded event timestamp before any event
/// is accumulated, so when two files carry the same identity key the
/// chronologically earlier file's copy wins. Reads run in parallel chunks;
/// accumulation is sequential in the sorted order.
pub fn collect_events(
    files: Vec<(PathBuf, String)>,
    dedup: &DedupIndex,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> Result<Vec<UsageEvent>> {
    let sorted = sort_files_by_earliest_timestamp(files);
    let chunk_size = get_config().processing.batch_size.max(1);

    let mut events = Vec::new();
    let mut skipped = 0usize;

    for chunk in sorted.chunks(chunk_size) {
        // Parallel parse; collect preserves chunk order for the fold below.
        let parsed: Vec<Vec<UsageEvent>> = chunk
            .par_iter()
            .map(|(path, project, _)| {
                read_events(path, project).unwrap_or_else(|e| {
                    tracing::warn!(file = %path.display(), error = %e, "Unreadable log file skipped");
                    Vec::new()
                })
            })
            .collect();

        for file_events in parsed {
            for event in file_events {
                if let Some(since) = since {
                    if event.timestamp < since {
                        continue;
                    }
                }
                if let Some(until) = until {
                    if event.timestamp > until {
                        continue;
                    }
                }
                if dedup.check_and_mark(&event) {
                    events.push(event);
                } else {
                    skipped += 1;
                }
            }
        }
    }

    tracing::debug!(
        events = events.len(),
        duplicates_skipped = skipped,
        "Collected events"
    );
    Ok(events)
}

/// Batch reporting entry point: the full pipeline from a file set to
/// aggregated buckets.
pub fn run_batch(
    files: Vec<(PathBuf, String)>,
    options: &BatchOptions,
    pricing: &PricingCache,
) -> Result<BTreeMap<String, BucketTotals>> {
    let dedup = DedupIndex::new();
    let events = collect_events(files, &dedup, options.since, options.until)?;
    Ok(aggregate(
        &events,
        |e| options.kind.key(e),
        pricing,
        options.cost_mode,
    ))
}
