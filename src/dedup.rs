//! Deduplication Index
//!
//! A process-lifetime set of composite identity hashes that suppresses
//! duplicate events re-seen across files and roots. Events without an
//! identity key (no message/request id pair) are never deduplicable and
//! always pass through.

use crate::models::UsageEvent;
use crate::parser::identity_key;
use dashmap::DashSet;

#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: DashSet<String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the event's identity key. Returns `true` when the event is
    /// first-seen and should be counted, `false` for a duplicate.
    pub fn check_and_mark(&self, event: &UsageEvent) -> bool {
        match identity_key(event) {
            Some(key) => self.seen.insert(key),
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop all recorded keys. Used by the live monitor after a large
    /// retention eviction, trading a possible recount of ancient events for
    /// a bounded set.
    pub fn clear(&self) {
        self.seen.clear();
    }
}
