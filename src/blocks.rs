//! Session-block segmentation.
//!
//! Groups a chronologically sorted event stream into fixed-duration billing
//! windows (default five hours) with gap detection, active-window detection,
//! and linear usage projection for the open window.

use crate::config::get_config;
use crate::models::{TokenCounts, UsageEvent, SYNTHETIC_MODEL};
use crate::pricing::{CostMode, PricingCache};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

/// Default billing window length in hours.
pub const DEFAULT_BLOCK_HOURS: i64 = 5;

/// A contiguous billing window, or a synthetic gap marker between windows.
#[derive(Debug, Clone, Serialize)]
pub struct SessionBlock {
    /// ISO start time doubling as the block id.
    pub id: String,
    #[serde(rename = "startTime")]
    pub start_time: DateTime<Utc>,
    /// `start_time + duration` for real blocks; the gap end for gap blocks.
    #[serde(rename = "endTime")]
    pub end_time: DateTime<Utc>,
    /// Timestamp of the last event in the block.
    #[serde(rename = "actualEndTime")]
    pub actual_end_time: Option<DateTime<Utc>>,
    #[serde(rename = "isActive")]
    pub is_active: bool,
    #[serde(rename = "isGap")]
    pub is_gap: bool,
    #[serde(skip)]
    pub entries: Vec<UsageEvent>,
    #[serde(rename = "entryCount")]
    pub entry_count: usize,
    #[serde(rename = "tokenCounts")]
    pub token_counts: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost: f64,
    /// Models seen in the block, synthetic sentinel excluded.
    pub models: BTreeSet<String>,
    /// Provider-issued quota reset time, when any member event carried one.
    #[serde(rename = "usageLimitReset")]
    pub usage_limit_reset: Option<DateTime<Utc>>,
}

/// Tokens-per-minute consumption of an active block.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct BurnRate {
    #[serde(rename = "tokensPerMinute")]
    pub tokens_per_minute: f64,
    #[serde(rename = "costPerHour")]
    pub cost_per_hour: f64,
}

/// Linear extrapolation of an active block's totals to its end time.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProjectedUsage {
    #[serde(rename = "totalTokens")]
    pub total_tokens: u64,
    #[serde(rename = "totalCost")]
    pub total_cost: f64,
    #[serde(rename = "remainingMinutes")]
    pub remaining_minutes: i64,
}

/// Floor a timestamp to the top of its hour (UTC).
fn floor_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(ts.year(), ts.month(), ts.day(), ts.hour(), 0, 0)
        .single()
        .unwrap_or(ts)
}

/// Configured block duration.
pub fn block_duration() -> Duration {
    Duration::hours(get_config().blocks.duration_hours.max(1))
}

/// Segment a chronologically sorted event stream into billing windows.
///
/// The first event of a block anchors the start at the top of the hour at or
/// before its timestamp. An event joins the open block only while it falls
/// strictly inside the window *and* arrives strictly less than `duration`
/// after the previous event; otherwise the block closes, a gap block is
/// emitted when the idle span reaches `duration`, and a new hour-floored
/// block opens. An empty stream yields an empty list, never an error.
pub fn segment_into_blocks(
    events: &[UsageEvent],
    duration: Duration,
    now: DateTime<Utc>,
    pricing: &PricingCache,
    cost_mode: CostMode,
) -> Vec<SessionBlock> {
    let mut blocks = Vec::new();
    if events.is_empty() {
        return blocks;
    }

    let mut block_start: Option<DateTime<Utc>> = None;
    let mut block_entries: Vec<UsageEvent> = Vec::new();

    for event in events {
        match block_start {
            None => {
                block_start = Some(floor_to_hour(event.timestamp));
                block_entries.push(event.clone());
            }
            Some(start) => {
                let last_ts = block_entries
                    .last()
                    .map(|e| e.timestamp)
                    .unwrap_or(start);
                let since_start = event.timestamp - start;
                let since_last = event.timestamp - last_ts;

                if since_start < duration && since_last < duration {
                    block_entries.push(event.clone());
                } else {
                    blocks.push(build_block(start, &block_entries, duration, now, pricing, cost_mode));
                    if since_last >= duration {
                        if let Some(gap) = build_gap_block(last_ts, event.timestamp, duration) {
                            blocks.push(gap);
                        }
                    }
                    block_start = Some(floor_to_hour(event.timestamp));
                    block_entries = vec![event.clone()];
                }
            }
        }
    }

    if let Some(start) = block_start {
        blocks.push(build_block(start, &block_entries, duration, now, pricing, cost_mode));
    }

    blocks
}

fn build_block(
    start_time: DateTime<Utc>,
    entries: &[UsageEvent],
    duration: Duration,
    now: DateTime<Utc>,
    pricing: &PricingCache,
    cost_mode: CostMode,
) -> SessionBlock {
    let end_time = start_time + duration;
    let actual_end_time = entries.last().map(|e| e.timestamp);
    let is_active = match actual_end_time {
        Some(last) => now >= start_time && now < end_time && now - last < duration,
        None => false,
    };

    let mut token_counts = TokenCounts::default();
    let mut cost = 0.0;
    let mut models = BTreeSet::new();
    let mut usage_limit_reset: Option<DateTime<Utc>> = None;

    for entry in entries {
        token_counts.add(&entry.tokens);
        cost += pricing.event_cost(cost_mode, entry.cost, &entry.tokens, entry.model.as_deref());
        if let Some(model) = &entry.model {
            if model != SYNTHETIC_MODEL {
                models.insert(model.clone());
            }
        }
        if let Some(reset) = entry.usage_limit_reset {
            usage_limit_reset = Some(usage_limit_reset.map_or(reset, |r| r.max(reset)));
        }
    }

    SessionBlock {
        id: start_time.to_rfc3339(),
        start_time,
        end_time,
        actual_end_time,
        is_active,
        is_gap: false,
        entry_count: entries.len(),
        entries: entries.to_vec(),
        token_counts,
        cost,
        models,
        usage_limit_reset,
    }
}

/// Synthetic marker block for an idle span longer than one window length.
/// An idle span of exactly `duration` still splits blocks but leaves no
/// room between `last + duration` and the next event, so no marker is made.
fn build_gap_block(
    last_activity: DateTime<Utc>,
    next_activity: DateTime<Utc>,
    duration: Duration,
) -> Option<SessionBlock> {
    if next_activity - last_activity <= duration {
        return None;
    }
    let gap_start = last_activity + duration;
    Some(SessionBlock {
        id: format!("gap-{}", gap_start.to_rfc3339()),
        start_time: gap_start,
        end_time: next_activity,
        actual_end_time: None,
        is_active: false,
        is_gap: true,
        entries: Vec::new(),
        entry_count: 0,
        token_counts: TokenCounts::default(),
        cost: 0.0,
        models: BTreeSet::new(),
        usage_limit_reset: None,
    })
}

/// Burn rate of an active block. `None` when less than a minute has elapsed
/// since the block started; extrapolating from a near-zero window produces
/// noise, not a rate.
pub fn burn_rate(block: &SessionBlock, now: DateTime<Utc>) -> Option<BurnRate> {
    if block.is_gap || !block.is_active {
        return None;
    }
    let elapsed_minutes = (now - block.start_time).num_seconds() as f64 / 60.0;
    if elapsed_minutes < 1.0 {
        return None;
    }
    let tokens_per_minute = block.token_counts.non_cache() as f64 / elapsed_minutes;
    let cost_per_hour = block.cost / elapsed_minutes * 60.0;
    Some(BurnRate {
        tokens_per_minute,
        cost_per_hour,
    })
}

/// Project an active block's totals linearly to its end time.
pub fn project_usage(block: &SessionBlock, now: DateTime<Utc>) -> Option<ProjectedUsage> {
    let rate = burn_rate(block, now)?;
    let remaining_minutes = (block.end_time - now).num_minutes().max(0);
    let projected_tokens =
        block.token_counts.total() + (rate.tokens_per_minute * remaining_minutes as f64) as u64;
    let projected_cost = block.cost + rate.cost_per_hour / 60.0 * remaining_minutes as f64;
    Some(ProjectedUsage {
        total_tokens: projected_tokens,
        total_cost: projected_cost,
        remaining_minutes,
    })
}
