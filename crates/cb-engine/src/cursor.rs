//! Shared cycle cursor
//!
//! Workers claim contiguous segments of `stride` cycles with a single
//! compare-and-swap. Each cycle of the range is handed out exactly once
//! per pass; claims across workers are unordered.
//!
//! A worker that stops partway through a segment gives the unrun cycles
//! back. Returned cycles are claimed again before the cursor advances,
//! so a stop and resume neither skips nor repeats a cycle.

use crate::cycles::CycleRange;
use crossbeam::utils::Backoff;
use parking_lot::{Mutex, RwLock};
use std::ops::Range;
use std::sync::atomic::{AtomicI64, Ordering};

/// Next-cycle source shared by every worker of an activity
#[derive(Debug)]
pub struct CycleCursor {
    next: AtomicI64,
    range: RwLock<CycleRange>,
    returned: Mutex<Vec<Range<i64>>>,
}

impl CycleCursor {
    /// Cursor positioned at the start of `range`
    #[must_use]
    pub fn new(range: CycleRange) -> Self {
        Self {
            next: AtomicI64::new(range.start()),
            range: RwLock::new(range),
            returned: Mutex::new(Vec::new()),
        }
    }

    /// Claim up to `stride` cycles
    ///
    /// Returned cycles are handed out first. Returns `None` once the
    /// range is exhausted.
    pub fn claim(&self, stride: usize) -> Option<Range<i64>> {
        let stride = i64::try_from(stride.max(1)).unwrap_or(i64::MAX);
        let end = self.range.read().end().unwrap_or(i64::MAX);
        if let Some(segment) = self.reclaim(stride, end) {
            return Some(segment);
        }
        let backoff = Backoff::new();
        let mut current = self.next.load(Ordering::Acquire);
        loop {
            if current >= end {
                return None;
            }
            let upto = current.saturating_add(stride).min(end);
            match self
                .next
                .compare_exchange_weak(current, upto, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(current..upto),
                Err(actual) => {
                    current = actual;
                    backoff.spin();
                }
            }
        }
    }

    fn reclaim(&self, stride: i64, end: i64) -> Option<Range<i64>> {
        let mut returned = self.returned.lock();
        let index = returned.iter().position(|segment| segment.start < end)?;
        let segment = returned.swap_remove(index);
        let upto = segment.start.saturating_add(stride).min(segment.end).min(end);
        if upto < segment.end {
            returned.push(upto..segment.end);
        }
        Some(segment.start..upto)
    }

    /// Hand back claimed cycles that were never run
    pub fn give_back(&self, unrun: Range<i64>) {
        if !unrun.is_empty() {
            self.returned.lock().push(unrun);
        }
    }

    /// Replace the range; `rewind` moves the cursor back to its start
    ///
    /// Without `rewind` the cursor resumes where it stopped, clamped into
    /// the new range, and keeps the cycles given back. A rewind drops them.
    pub fn reset(&self, range: CycleRange, rewind: bool) {
        *self.range.write() = range;
        let mut returned = self.returned.lock();
        if rewind {
            returned.clear();
            self.next.store(range.start(), Ordering::Release);
        } else {
            returned.retain_mut(|segment| {
                segment.start = segment.start.max(range.start());
                !segment.is_empty()
            });
            let _ = self
                .next
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.max(range.start())));
        }
    }

    /// Next unclaimed cycle
    #[inline]
    #[must_use]
    pub fn position(&self) -> i64 {
        self.next.load(Ordering::Acquire)
    }

    /// Current range
    #[must_use]
    pub fn range(&self) -> CycleRange {
        *self.range.read()
    }

    /// Whether every cycle has been claimed and none was given back
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        let Some(end) = self.range.read().end() else {
            return false;
        };
        self.position() >= end && !self.returned.lock().iter().any(|segment| segment.start < end)
    }
}
