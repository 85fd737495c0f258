//! Core Data Models
//!
//! Defines the data pipeline types, from the raw JSONL record shape written
//! by Claude Code through the normalized [`UsageEvent`] consumed by the
//! aggregator and the session-block segmenter.
//!
//! ## Data Flow
//!
//! 1. **Raw Data**: [`RawRecord`] - one line of a JSONL log file
//! 2. **Normalized**: [`UsageEvent`] - validated, typed, source-annotated
//! 3. **Reports**: [`BucketTotals`] / [`ModelBreakdown`] - aggregated views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sentinel model name emitted for synthetic (non-billable-model) records.
/// Its tokens and cost still count toward totals, but it never appears in a
/// "models used" list or per-model breakdown.
pub const SYNTHETIC_MODEL: &str = "<synthetic>";

/// Raw on-disk record, mirroring the JSONL schema written by Claude Code.
/// Almost every field is optional; validation happens in the parser.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    pub timestamp: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    pub message: Option<RawMessage>,
    #[serde(rename = "costUSD")]
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    pub id: Option<String>,
    pub model: Option<String>,
    pub usage: Option<RawUsage>,
    /// Message content; only consulted for usage-limit markers.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

/// Token counters shared by events, blocks, and aggregates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(rename = "inputTokens")]
    pub input: u64,
    #[serde(rename = "outputTokens")]
    pub output: u64,
    #[serde(rename = "cacheCreationTokens")]
    pub cache_creation: u64,
    #[serde(rename = "cacheReadTokens")]
    pub cache_read: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read
    }

    /// Tokens that count toward burn rate (cache reads are nearly free).
    pub fn non_cache(&self) -> u64 {
        self.input + self.output
    }

    pub fn add(&mut self, other: &TokenCounts) {
        self.input += other.input;
        self.output += other.output;
        self.cache_creation += other.cache_creation;
        self.cache_read += other.cache_read;
    }
}

/// One billable unit of work, normalized from a single log line.
///
/// Immutable after parsing; `source_file` and `source_project` come from the
/// file path, never from record content.
#[derive(Debug, Clone, Serialize)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(rename = "requestId")]
    pub request_id: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: Option<String>,
    pub model: Option<String>,
    pub tokens: TokenCounts,
    /// Pre-computed cost carried in the record, if any.
    #[serde(rename = "costUSD")]
    pub cost: Option<f64>,
    /// Provider-issued quota reset time parsed from an embedded
    /// usage-limit error, if present.
    #[serde(rename = "usageLimitReset")]
    pub usage_limit_reset: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub source_file: PathBuf,
    #[serde(rename = "project")]
    pub source_project: String,
}

impl UsageEvent {
    /// True when the model should appear in per-model breakdowns.
    pub fn has_reportable_model(&self) -> bool {
        matches!(&self.model, Some(m) if m != SYNTHETIC_MODEL)
    }
}

/// Per-model slice of a bucket's totals, sorted by cost descending in
/// report output.
#[derive(Debug, Clone, Serialize)]
pub struct ModelBreakdown {
    pub model: String,
    pub tokens: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost: f64,
}

/// Aggregated totals for one report bucket (a day, a month, a session...).
#[derive(Debug, Clone, Default, Serialize)]
pub struct BucketTotals {
    pub tokens: TokenCounts,
    #[serde(rename = "costUSD")]
    pub cost: f64,
    #[serde(rename = "eventCount")]
    pub events: u64,
    /// Cost-descending per-model breakdown; the synthetic sentinel is
    /// excluded here but still counted in `tokens` and `cost`.
    pub models: Vec<ModelBreakdown>,
}
