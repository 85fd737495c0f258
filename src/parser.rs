//! JSONL record parsing and file ordering.
//!
//! Turns one raw log line into a validated [`UsageEvent`], computes the
//! composite identity key used for cross-file deduplication, and orders
//! files by their earliest embedded event timestamp so that the dedup
//! tie-break ("earlier file wins") is deterministic.

use crate::error::ParseError;
use crate::models::{RawRecord, TokenCounts, UsageEvent};
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Marker text embedded in provider error messages when a usage quota is
/// exhausted. The reset time follows as `|<epoch-seconds>`.
const USAGE_LIMIT_MARKER: &str = "usage limit reached";

/// Parse a timestamp string into `DateTime<Utc>`.
/// Handles both Z suffix and explicit timezone offsets, plus naive
/// datetimes assumed to be UTC.
pub fn parse_timestamp(timestamp_str: &str) -> Result<DateTime<Utc>> {
    let timestamp = if timestamp_str.ends_with('Z') {
        timestamp_str.replace('Z', "+00:00")
    } else {
        timestamp_str.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&timestamp) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
    }

    anyhow::bail!("Failed to parse timestamp: {}", timestamp_str)
}

/// Composite deduplication key. Absent unless both components are present:
/// an event without the full pair is never deduplicable.
pub fn identity_key(event: &UsageEvent) -> Option<String> {
    match (&event.message_id, &event.request_id) {
        (Some(m), Some(r)) if !m.is_empty() && !r.is_empty() => Some(format!("{}:{}", m, r)),
        _ => None,
    }
}

/// Scan message content for a provider usage-limit marker and extract the
/// embedded epoch-seconds reset time.
fn extract_usage_limit_reset(content: &serde_json::Value) -> Option<DateTime<Utc>> {
    let parts = content.as_array()?;
    for part in parts {
        let Some(text) = part.get("text").and_then(|t| t.as_str()) else {
            continue;
        };
        if !text.contains(USAGE_LIMIT_MARKER) {
            continue;
        }
        if let Some(idx) = text.rfind('|') {
            if let Ok(epoch) = text[idx + 1..].trim().parse::<i64>() {
                if epoch > 0 {
                    return DateTime::<Utc>::from_timestamp(epoch, 0);
                }
            }
        }
    }
    None
}

/// Validate and normalize one raw log line.
///
/// Malformed JSON, a missing timestamp, or a record with no token usage are
/// all recoverable [`ParseError`]s; the caller skips the line and continues.
pub fn parse_line(
    line: &str,
    source_file: &Path,
    source_project: &str,
) -> std::result::Result<UsageEvent, ParseError> {
    let raw: RawRecord = serde_json::from_str(line)?;

    let timestamp = match &raw.timestamp {
        Some(ts) => parse_timestamp(ts).map_err(|_| ParseError::Timestamp(raw.timestamp.clone()))?,
        None => return Err(ParseError::Timestamp(None)),
    };

    let message = raw.message.as_ref();
    let usage = message.and_then(|m| m.usage.as_ref()).ok_or(ParseError::NoUsage)?;

    let tokens = TokenCounts {
        input: usage.input_tokens,
        output: usage.output_tokens,
        cache_creation: usage.cache_creation_input_tokens,
        cache_read: usage.cache_read_input_tokens,
    };
    if tokens.total() == 0 {
        return Err(ParseError::NoUsage);
    }

    let usage_limit_reset = message
        .and_then(|m| m.content.as_ref())
        .and_then(extract_usage_limit_reset);

    Ok(UsageEvent {
        timestamp,
        session_id: raw.session_id,
        request_id: raw.request_id,
        message_id: message.and_then(|m| m.id.clone()),
        model: message.and_then(|m| m.model.clone()),
        tokens,
        cost: raw.cost_usd,
        usage_limit_reset,
        source_file: source_file.to_path_buf(),
        source_project: source_project.to_string(),
    })
}

/// Read every parseable event from one JSONL file. Schema violations are
/// skipped, not fatal; an unreadable file is an error for that file only.
pub fn read_events(path: &Path, project: &str) -> Result<Vec<UsageEvent>> {
    Ok(read_events_from_offset(path, project, 0)?.0)
}

/// Read events starting at a byte offset, returning the offset just past
/// the last fully consumed line. An incremental reader stores that offset
/// and passes it back so an appended file costs only its new tail.
///
/// A file shorter than the offset was truncated or rotated; reading
/// restarts from the beginning. A final line without a trailing newline
/// that fails to parse is treated as half-written and left for the next
/// read rather than skipped.
pub fn read_events_from_offset(
    path: &Path,
    project: &str,
    offset: u64,
) -> Result<(Vec<UsageEvent>, u64)> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    let start = if offset <= len { offset } else { 0 };
    file.seek(SeekFrom::Start(start))?;

    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut pos = start;
    let mut line = String::new();

    loop {
        line.clear();
        let read = reader.read_line(&mut line)?;
        if read == 0 {
            break;
        }
        let complete = line.ends_with('\n');
        let trimmed = line.trim();

        if trimmed.is_empty() {
            pos += read as u64;
        } else {
            match parse_line(trimmed, path, project) {
                Ok(event) => {
                    events.push(event);
                    pos += read as u64;
                }
                Err(ParseError::NoUsage) => {
                    pos += read as u64;
                }
                Err(e) => {
                    if !complete {
                        // Half-written tail; the writer will finish it.
                        break;
                    }
                    tracing::debug!(file = %path.display(), error = %e, "Skipping malformed line");
                    pos += read as u64;
                }
            }
        }

        if !complete {
            break;
        }
    }

    Ok((events, pos))
}

/// Earliest embedded event timestamp in a file, scanning until the first
/// parseable record.
pub fn earliest_timestamp(path: &Path) -> Option<DateTime<Utc>> {
    let file = File::open(path).ok()?;
    let reader = BufReader::new(file);

    for line in reader.lines() {
        let line = line.ok()?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok(raw) = serde_json::from_str::<RawRecord>(line) {
            if let Some(ts) = raw.timestamp.as_deref() {
                if let Ok(parsed) = parse_timestamp(ts) {
                    return Some(parsed);
                }
            }
        }
    }

    None
}

/// Order files ascending by earliest embedded event timestamp. Files with no
/// parseable timestamp sort last. This ordering is what makes the dedup
/// tie-break deterministic: when two files carry the same identity key, the
/// chronologically earlier file's copy wins.
pub fn sort_files_by_earliest_timestamp(
    mut files: Vec<(PathBuf, String)>,
) -> Vec<(PathBuf, String, Option<DateTime<Utc>>)> {
    let mut keyed: Vec<(PathBuf, String, Option<DateTime<Utc>>)> = files
        .drain(..)
        .map(|(path, project)| {
            let ts = earliest_timestamp(&path);
            (path, project, ts)
        })
        .collect();

    keyed.sort_by(|a, b| match (a.2, b.2) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.0.cmp(&b.0),
    });

    keyed
}
