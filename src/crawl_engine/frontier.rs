//! Shared frontier, visited, and in-flight state.
//!
//! The store is the single serialization point of the crawl: enqueue, claim,
//! and completion are all short critical sections under one mutex, and a URL
//! is in at most one of frontier / in-flight / visited at any point
//! observable outside those sections. Ordering is plain FIFO.

use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};

use super::crawl_types::{Disposition, FrontierEntry};
use crate::urlkit::CanonicalUrl;

/// Result of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// Already pending, in flight, or visited.
    Duplicate,
}

#[derive(Debug, Default)]
struct StoreInner {
    queue: VecDeque<FrontierEntry>,
    /// Membership index for `queue`; kept in lockstep with it.
    pending: HashSet<CanonicalUrl>,
    in_flight: HashMap<CanonicalUrl, FrontierEntry>,
    visited: HashSet<CanonicalUrl>,
}

/// Thread-safe frontier/visited/in-flight store.
pub struct CrawlStore {
    inner: Mutex<StoreInner>,
    max_attempts: u32,
}

impl CrawlStore {
    /// Create an empty store. `max_attempts` bounds retries per URL
    /// (attempts at or beyond the bound turn a retryable failure terminal).
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            max_attempts: max_attempts.max(1),
        }
    }

    /// Insert a URL into the frontier iff it is not pending, in flight, or
    /// visited. Admission must have been checked by the caller.
    pub fn try_enqueue(&self, url: CanonicalUrl) -> EnqueueOutcome {
        let mut inner = self.inner.lock();
        if inner.pending.contains(&url)
            || inner.in_flight.contains_key(&url)
            || inner.visited.contains(&url)
        {
            return EnqueueOutcome::Duplicate;
        }
        inner.pending.insert(url.clone());
        inner.queue.push_back(FrontierEntry::new(url));
        EnqueueOutcome::Enqueued
    }

    /// Re-insert an entry that already carries an attempt count (retry path
    /// and checkpoint restore). Duplicate rules are the same as
    /// [`Self::try_enqueue`].
    pub fn enqueue_entry(&self, entry: FrontierEntry) -> EnqueueOutcome {
        let mut inner = self.inner.lock();
        if inner.pending.contains(&entry.url)
            || inner.in_flight.contains_key(&entry.url)
            || inner.visited.contains(&entry.url)
        {
            return EnqueueOutcome::Duplicate;
        }
        inner.pending.insert(entry.url.clone());
        inner.queue.push_back(entry);
        EnqueueOutcome::Enqueued
    }

    /// Atomically move the oldest frontier entry into the in-flight set.
    pub fn claim(&self) -> Option<FrontierEntry> {
        let mut inner = self.inner.lock();
        let entry = inner.queue.pop_front()?;
        inner.pending.remove(&entry.url);
        inner.in_flight.insert(entry.url.clone(), entry.clone());
        Some(entry)
    }

    /// Finish a claimed URL.
    ///
    /// `Success` and `Terminal` move the URL to visited; `Retry` re-enqueues
    /// with attempts+1 unless the attempt budget is exhausted, in which case
    /// the URL is treated as terminal. Completing a URL that is not in
    /// flight is a no-op.
    pub fn complete(&self, url: &CanonicalUrl, disposition: Disposition) {
        let mut inner = self.inner.lock();
        let Some(mut entry) = inner.in_flight.remove(url) else {
            debug!("complete() for URL not in flight: {url}");
            return;
        };
        match disposition {
            Disposition::Success | Disposition::Terminal => {
                inner.visited.insert(entry.url);
            }
            Disposition::Retry => {
                entry.attempts += 1;
                if entry.attempts >= self.max_attempts {
                    debug!(
                        "retry budget exhausted after {} attempts: {}",
                        entry.attempts, entry.url
                    );
                    inner.visited.insert(entry.url);
                } else {
                    inner.pending.insert(entry.url.clone());
                    inner.queue.push_back(entry);
                }
            }
        }
    }

    /// Return a claimed entry to the head of the frontier unchanged.
    /// Used on cooperative cancellation so the URL keeps its attempt count
    /// and its place near the front.
    pub fn restore(&self, url: &CanonicalUrl) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.in_flight.remove(url) {
            inner.pending.insert(entry.url.clone());
            inner.queue.push_front(entry);
        }
    }

    /// True when a URL has already been visited.
    #[must_use]
    pub fn is_visited(&self, url: &CanonicalUrl) -> bool {
        self.inner.lock().visited.contains(url)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    #[must_use]
    pub fn in_flight_len(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    #[must_use]
    pub fn visited_len(&self) -> usize {
        self.inner.lock().visited.len()
    }

    /// Frontier empty and nothing in flight: the crawl is done.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        let inner = self.inner.lock();
        inner.queue.is_empty() && inner.in_flight.is_empty()
    }

    /// Consistent snapshot of (visited, pending) for checkpointing.
    ///
    /// In-flight URLs are folded back into pending with their current
    /// attempt counts: a checkpoint taken mid-fetch must re-schedule those
    /// URLs, not lose them.
    #[must_use]
    pub fn snapshot(&self) -> (Vec<CanonicalUrl>, Vec<FrontierEntry>) {
        let inner = self.inner.lock();
        let visited = inner.visited.iter().cloned().collect();
        let mut pending: Vec<FrontierEntry> = inner.queue.iter().cloned().collect();
        pending.extend(inner.in_flight.values().cloned());
        (visited, pending)
    }

    /// Replace store contents from a loaded checkpoint. Pending entries
    /// whose URL is already visited are dropped to uphold the load
    /// invariant.
    pub fn load_state(&self, visited: Vec<CanonicalUrl>, pending: Vec<FrontierEntry>) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.pending.clear();
        inner.in_flight.clear();
        inner.visited = visited.into_iter().collect();
        for entry in pending {
            if inner.visited.contains(&entry.url) || inner.pending.contains(&entry.url) {
                continue;
            }
            inner.pending.insert(entry.url.clone());
            inner.queue.push_back(entry);
        }
    }
}
