//! Recent-access history driving neighbour prefetch.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::domain::entities::{AvailableSet, ImageId};

/// Default number of ids kept in the history.
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Default number of neighbours considered on each side of an accessed id.
pub const DEFAULT_PREFETCH_RANGE: usize = 3;

/// Most-recent-first, de-duplicated access history.
///
/// Guarded by its own lock so recording never contends with cache reads.
/// Never consulted for eviction.
#[derive(Debug)]
pub struct AccessTracker {
    history: Mutex<VecDeque<ImageId>>,
    limit: usize,
}

impl AccessTracker {
    /// Creates an empty history holding at most `limit` ids.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(limit.min(DEFAULT_HISTORY_LIMIT))),
            limit: limit.max(1),
        }
    }

    /// Moves `id` to the front of the history and returns the new length.
    pub fn record(&self, id: &ImageId) -> usize {
        let mut history = self.history.lock();
        if let Some(pos) = history.iter().position(|existing| existing == id) {
            history.remove(pos);
        }
        history.push_front(id.clone());
        history.truncate(self.limit);
        history.len()
    }

    /// Number of ids in the history.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the history, most recent first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ImageId> {
        self.history.lock().iter().cloned().collect()
    }
}

impl Default for AccessTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

/// Neighbours of `id` in `available` that are worth loading ahead of time.
///
/// Assumes alphabetical locality (numbered avatar sets) stands in for
/// similarity. Ids for which `is_cached` is true are skipped.
pub fn prefetch_candidates(
    available: &AvailableSet,
    id: &ImageId,
    range: usize,
    is_cached: impl Fn(&ImageId) -> bool,
) -> Vec<ImageId> {
    available
        .neighbours(id, range)
        .into_iter()
        .filter(|candidate| !is_cached(candidate))
        .collect()
}
