//! Volatile tool cache with per-entry expiry.

use crate::types::{ToolCategory, ToolSpec};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    spec: ToolSpec,
    stored_at: Instant,
    /// First-insertion sequence; overwrites keep it.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    next_seq: u64,
}

/// In-process TTL map keyed by tool name.
pub struct ToolCache {
    ttl: Duration,
    inner: RwLock<Inner>,
}

impl ToolCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(Inner::default()),
        }
    }

    pub fn put(&self, spec: ToolSpec) {
        let mut inner = self.inner.write();
        let existing = inner.entries.get(&spec.name).map(|e| e.seq);
        let seq = match existing {
            Some(seq) => seq,
            None => {
                inner.next_seq += 1;
                inner.next_seq
            }
        };
        inner.entries.insert(
            spec.name.clone(),
            Entry {
                spec,
                stored_at: Instant::now(),
                seq,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<ToolSpec> {
        let inner = self.inner.read();
        inner
            .entries
            .get(name)
            .filter(|e| self.is_fresh(e))
            .map(|e| e.spec.clone())
    }

    /// Fresh entries in a category, oldest registration first.
    pub fn by_category(&self, category: ToolCategory) -> Vec<ToolSpec> {
        let inner = self.inner.read();
        let mut hits: Vec<&Entry> = inner
            .entries
            .values()
            .filter(|e| e.spec.category == category && self.is_fresh(e))
            .collect();
        hits.sort_by_key(|e| e.seq);
        hits.into_iter().map(|e| e.spec.clone()).collect()
    }

    /// Fresh names, oldest registration first.
    pub fn names(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut fresh: Vec<&Entry> = inner.entries.values().filter(|e| self.is_fresh(e)).collect();
        fresh.sort_by_key(|e| e.seq);
        fresh.into_iter().map(|e| e.spec.name.clone()).collect()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.inner.write();
        let before = inner.entries.len();
        let ttl = self.ttl;
        inner.entries.retain(|_, e| e.stored_at.elapsed() < ttl);
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_fresh(&self, entry: &Entry) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }
}
