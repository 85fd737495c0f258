//! Claude Scope
//!
//! Ingests the append-only JSONL usage logs written by Claude Code,
//! deduplicates and aggregates them, and answers two access patterns:
//! batch reporting over arbitrarily large historical log sets, and
//! low-latency monitoring of the currently open billing window without
//! re-reading the whole corpus on every tick.
//!
//! ## Architecture
//!
//! - [`models`] - raw record shape and the normalized [`UsageEvent`]
//! - [`parser`] - line validation, identity keys, earliest-timestamp file
//!   ordering (the dedup tie-break)
//! - [`discovery`] - log root and JSONL file discovery
//! - [`dedup`] - process-lifetime deduplication index
//! - [`aggregate`] - pure aggregation plus the batch pipeline
//! - [`blocks`] - session-block segmentation, burn rate, projection
//! - [`live`] - incremental live-monitor cache
//! - [`status_cache`] - lock-free cross-process status cache
//! - [`pricing`] - cost lookup collaborator (offline/online)
//! - [`config`] / [`logging`] / [`error`] - ambient plumbing
//!
//! ## Public surface
//!
//! The engine exposes four operations; tables, JSON shaping, and any HTTP
//! re-exposure are external consumers:
//!
//! - [`aggregate::run_batch`] - batch reports
//! - [`blocks::segment_into_blocks`] - billing-window segmentation
//! - [`live::LiveMonitor::refresh`] - one incremental refresh tick
//! - [`status_cache::StatusCache::resolve_status_output`] - cross-process
//!   cached status

pub mod aggregate;
pub mod blocks;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod live;
pub mod logging;
pub mod models;
pub mod parser;
pub mod pricing;
pub mod status_cache;

pub use blocks::SessionBlock;
pub use error::{ParseError, ScopeError};
pub use live::LiveMonitor;
pub use models::{BucketTotals, TokenCounts, UsageEvent};
pub use status_cache::{StatusCache, StatusCacheRecord};
