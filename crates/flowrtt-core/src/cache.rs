//! Sequence cache used for round-trip sampling.
//!
//! Entries map `(flow, sequence)` to the time a segment expecting that
//! acknowledgment was observed. They are kept in recency order in a
//! slab-backed doubly linked list so promotion and removal are O(1); the
//! head is the least recently touched entry, the tail the most recent one.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;
use time::Duration;

use crate::flow::FlowIdentity;
use crate::segment::Timestamp;
use crate::seq::Sequence;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("sequence cache is closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub flow: FlowIdentity,
    pub seq: Sequence,
}

impl CacheKey {
    pub fn new(flow: FlowIdentity, seq: Sequence) -> Self {
        Self { flow, seq }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.flow, self.seq)
    }
}

#[derive(Debug)]
struct Node {
    key: CacheKey,
    seen: Timestamp,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct Entries {
    closed: bool,
    index: HashMap<CacheKey, usize>,
    nodes: Vec<Node>,
    vacant: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl Entries {
    fn link_back(&mut self, idx: usize) {
        self.nodes[idx].prev = self.tail;
        self.nodes[idx].next = None;
        match self.tail {
            Some(tail) => self.nodes[tail].next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.nodes[idx].prev, self.nodes[idx].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[idx].prev = None;
        self.nodes[idx].next = None;
    }

    fn insert(&mut self, key: CacheKey, seen: Timestamp) {
        let node = Node {
            key,
            seen,
            prev: None,
            next: None,
        };
        let idx = match self.vacant.pop() {
            Some(idx) => {
                self.nodes[idx] = node;
                idx
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, idx);
        self.link_back(idx);
    }

    fn remove(&mut self, idx: usize) {
        self.unlink(idx);
        let key = self.nodes[idx].key;
        self.index.remove(&key);
        self.vacant.push(idx);
    }

    fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.vacant.clear();
        self.head = None;
        self.tail = None;
    }

    fn purge_expired(&mut self, now: Timestamp, max_age: Duration) -> usize {
        let mut evicted = 0;
        while let Some(idx) = self.head {
            if now - self.nodes[idx].seen <= max_age {
                break;
            }
            self.remove(idx);
            evicted += 1;
        }
        evicted
    }
}

/// Time-bounded, recency-ordered map from `(flow, seq)` to observation time.
///
/// The cache is owned by one session. It is torn down with
/// [`SequenceCache::remove_all`] when the session closes and made usable
/// again with [`SequenceCache::reset`] when the session slot is reused.
#[derive(Debug)]
pub struct SequenceCache {
    max_age: Option<Duration>,
    entries: Mutex<Entries>,
}

impl SequenceCache {
    /// `max_age` of `None` disables expiry.
    pub fn new(max_age: Option<Duration>) -> Self {
        Self {
            max_age,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Record `key` as observed at `seen`.
    ///
    /// Returns `true` when the key already existed; its timestamp is refreshed
    /// and it becomes the most recent entry. Expired entries are purged
    /// relative to `seen` before the write.
    pub fn push(&self, key: CacheKey, seen: Timestamp) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock();
        if entries.closed {
            return Err(CacheError::Closed);
        }
        if let Some(max_age) = self.max_age {
            entries.purge_expired(seen, max_age);
        }

        if let Some(&idx) = entries.index.get(&key) {
            entries.unlink(idx);
            entries.link_back(idx);
            entries.nodes[idx].seen = seen;
            return Ok(true);
        }
        entries.insert(key, seen);
        Ok(false)
    }

    /// Resolve an acknowledgment to the send it most likely answers.
    ///
    /// An exact hit removes the entry together with every older entry of the
    /// same flow. Otherwise the flow's entries are scanned from the oldest:
    /// each one at or below `key.seq + 1` is removed and becomes the
    /// candidate, and the scan stops at the first one above it. The last
    /// candidate only counts when it sits at `key.seq + 1` or `key.seq - 1`.
    pub fn pull(&self, key: CacheKey) -> Result<Option<Timestamp>, CacheError> {
        let mut entries = self.entries.lock();
        if entries.closed {
            return Err(CacheError::Closed);
        }

        if let Some(&hit) = entries.index.get(&key) {
            let seen = entries.nodes[hit].seen;
            let mut cursor = Some(hit);
            while let Some(idx) = cursor {
                cursor = entries.nodes[idx].prev;
                if entries.nodes[idx].key.flow == key.flow {
                    entries.remove(idx);
                }
            }
            return Ok(Some(seen));
        }

        let upper = key.seq.add(1);
        let mut candidate: Option<(Sequence, Timestamp)> = None;
        let mut cursor = entries.head;
        while let Some(idx) = cursor {
            cursor = entries.nodes[idx].next;
            let node = &entries.nodes[idx];
            if node.key.flow != key.flow {
                continue;
            }
            if !node.key.seq.precedes_or_eq(upper) {
                break;
            }
            candidate = Some((node.key.seq, node.seen));
            entries.remove(idx);
        }

        Ok(candidate
            .filter(|(seq, _)| *seq == upper || *seq == key.seq.sub(1))
            .map(|(_, seen)| seen))
    }

    /// Evict entries older than the maximum age, oldest first.
    ///
    /// Returns the number of evicted entries.
    pub fn purge(&self, now: Timestamp) -> usize {
        let Some(max_age) = self.max_age else {
            return 0;
        };
        self.entries.lock().purge_expired(now, max_age)
    }

    /// Drop every entry and refuse further reads and writes.
    pub fn remove_all(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        entries.closed = true;
    }

    /// Re-open a torn-down cache, keeping its allocations.
    pub fn reset(&self) {
        self.entries.lock().closed = false;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.entries.lock().closed
    }
}
