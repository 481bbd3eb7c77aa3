//! Watermarks and the invalidation journal.
//!
//! Every invalidation bumps a process-wide sequence and records it against the
//! invalidated key. A reader takes a [`Watermark`] before fetching from the
//! store and stores it with the cached value; a cached value whose key was
//! invalidated after its watermark is treated as stale. This keeps a slow
//! read that raced with a write from resurrecting the pre-write value.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A point in the invalidation history.
///
/// Watermarks are monotonically increasing and can be compared to determine
/// whether invalidations happened between two points in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Watermark {
    pub sequence: u64,
}

impl Watermark {
    pub fn new(sequence: u64) -> Self {
        Self { sequence }
    }
}

/// Tracked keys below which `record` never sweeps.
const MIN_SWEEP_THRESHOLD: usize = 1024;

#[derive(Debug, Default)]
struct JournalState {
    sequence: u64,
    /// Last invalidation sequence per key, with the time it was recorded.
    keys: HashMap<String, (u64, Instant)>,
    /// Sweep once `keys` reaches this size.
    sweep_at: usize,
}

/// Journal of key invalidations.
///
/// Records older than `retention` are dropped by a sweep that runs when the
/// number of tracked keys reaches twice what survived the previous sweep.
/// `retention` must be at least the cache TTL; an expired record that has
/// not been swept yet only marks values that have expired anyway.
#[derive(Debug)]
pub struct InvalidationJournal {
    state: Mutex<JournalState>,
    retention: Duration,
}

impl InvalidationJournal {
    pub fn new(retention: Duration) -> Self {
        Self {
            state: Mutex::new(JournalState {
                sweep_at: MIN_SWEEP_THRESHOLD,
                ..JournalState::default()
            }),
            retention,
        }
    }

    /// Current watermark.
    pub fn watermark(&self) -> Watermark {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Watermark::new(state.sequence)
    }

    /// Record an invalidation of `key` and return the new watermark.
    pub fn record(&self, key: &str) -> Watermark {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.sequence += 1;
        let sequence = state.sequence;
        let now = Instant::now();
        state.keys.insert(key.to_string(), (sequence, now));

        if state.keys.len() >= state.sweep_at {
            let retention = self.retention;
            state
                .keys
                .retain(|_, (_, at)| now.saturating_duration_since(*at) <= retention);
            state.sweep_at = (state.keys.len() * 2).max(MIN_SWEEP_THRESHOLD);
        }
        Watermark::new(sequence)
    }

    /// True when `key` was invalidated after `mark`.
    pub fn is_stale(&self, key: &str, mark: Watermark) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state
            .keys
            .get(key)
            .is_some_and(|(sequence, _)| *sequence > mark.sequence)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watermark_is_monotonic() {
        let journal = InvalidationJournal::new(Duration::from_secs(600));
        let before = journal.watermark();
        let after = journal.record("workspace:a");
        assert!(after > before);
        assert_eq!(journal.watermark(), after);
    }

    #[test]
    fn test_value_read_before_invalidation_is_stale() {
        let journal = InvalidationJournal::new(Duration::from_secs(600));
        let mark = journal.watermark();
        journal.record("project:p");
        assert!(journal.is_stale("project:p", mark));
        assert!(!journal.is_stale("project:q", mark));
        assert!(!journal.is_stale("project:p", journal.watermark()));
    }

    #[test]
    fn test_old_records_are_swept_at_threshold() {
        let journal = InvalidationJournal::new(Duration::ZERO);
        for n in 0..MIN_SWEEP_THRESHOLD - 1 {
            journal.record(&format!("k{n}"));
        }
        // Below the threshold nothing is swept, however old.
        assert_eq!(journal.len(), MIN_SWEEP_THRESHOLD - 1);

        std::thread::sleep(Duration::from_millis(5));
        journal.record("last");
        assert_eq!(journal.len(), 1);
        assert!(journal.is_stale("last", Watermark::default()));
    }

    #[test]
    fn test_live_records_survive_a_sweep() {
        let journal = InvalidationJournal::new(Duration::from_secs(600));
        let mark = journal.watermark();
        for n in 0..MIN_SWEEP_THRESHOLD + 10 {
            journal.record(&format!("k{n}"));
        }
        assert_eq!(journal.len(), MIN_SWEEP_THRESHOLD + 10);
        assert!(journal.is_stale("k0", mark));
    }
}
