//! Error taxonomy for the core engine.
//!
//! Per-line and per-file failures are recoverable and absorbed close to
//! where they occur; only whole-run failures propagate to the caller.

use std::path::PathBuf;
use thiserror::Error;

/// One malformed log line. Never fatal: the caller skips the line and
/// continues with the rest of the file.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing or unparseable timestamp: {0:?}")]
    Timestamp(Option<String>),

    #[error("record carries no token usage")]
    NoUsage,
}

/// Whole-run failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("no Claude log directories found under {searched:?}")]
    NoLogDirectories { searched: Vec<PathBuf> },

    #[error("failed to access {path}: {source}")]
    ResourceAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("pricing data unavailable: {0}")]
    PricingUnavailable(String),
}
