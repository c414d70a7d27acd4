//! Sliding-window event counter.
//!
//! Reports the approximate event rate over the last `W` nanoseconds.
//! Time is partitioned into buckets of width `W`; the counter keeps the
//! current bucket and the previous one, and weights the previous bucket
//! by how far the window has slid past it:
//!
//! `get() = (1 − (t − cur)/W) · prev + cur`, truncated to integer.
//!
//! Bucket rotation happens lazily on access via compare-and-set, so
//! concurrent rotations reset a stale bucket exactly once.

use crate::clock::{Clock, MonotonicClock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Bucket {
    start: AtomicU64,
    count: AtomicU64,
}

/// Smoothed event counter over a fixed window.
#[derive(Debug)]
pub struct SlidingWindowCounter {
    window_nanos: u64,
    // Index alternates with the bucket epoch: (t / W) % 2.
    buckets: [Bucket; 2],
    clock: Arc<dyn Clock>,
}

impl SlidingWindowCounter {
    /// Create a counter over `window`, which must be non-zero.
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, Arc::new(MonotonicClock::default()))
    }

    pub fn with_clock(window: Duration, clock: Arc<dyn Clock>) -> Self {
        let window_nanos = (window.as_nanos() as u64).max(1);
        Self { window_nanos, buckets: [Bucket::default(), Bucket::default()], clock }
    }

    /// Add `n` events to the current bucket.
    pub fn count(&self, n: u64) {
        let now = self.clock.now_nanos();
        let idx = self.rotate(now);
        self.buckets[idx].count.fetch_add(n, Ordering::AcqRel);
    }

    /// Smoothed count over the trailing window.
    pub fn get(&self) -> u64 {
        let now = self.clock.now_nanos();
        let cur_key = now - now % self.window_nanos;
        let cur_idx = ((now / self.window_nanos) % 2) as usize;

        let cur = self.read(cur_idx, cur_key);
        let prev = match cur_key.checked_sub(self.window_nanos) {
            Some(prev_key) => self.read(1 - cur_idx, prev_key),
            None => 0,
        };

        let weight = 1.0 - (now - cur_key) as f64 / self.window_nanos as f64;
        (weight * prev as f64 + cur as f64) as u64
    }

    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_nanos)
    }

    /// Move the bucket at the epoch index forward to `now`'s key if it is
    /// stale. The CAS guarantees a single winner resets the count.
    fn rotate(&self, now: u64) -> usize {
        let idx = ((now / self.window_nanos) % 2) as usize;
        let key = now - now % self.window_nanos;
        let bucket = &self.buckets[idx];
        let start = bucket.start.load(Ordering::Acquire);
        if start != key
            && bucket
                .start
                .compare_exchange(start, key, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            bucket.count.store(0, Ordering::Release);
        }
        idx
    }

    fn read(&self, idx: usize, key: u64) -> u64 {
        let bucket = &self.buckets[idx];
        if bucket.start.load(Ordering::Acquire) == key {
            bucket.count.load(Ordering::Acquire)
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn counter(window_ms: u64) -> (SlidingWindowCounter, ManualClock) {
        let clock = ManualClock::new();
        // Keep t=0 away from the first bucket boundary.
        clock.advance(Duration::from_millis(window_ms * 10));
        let counter =
            SlidingWindowCounter::with_clock(Duration::from_millis(window_ms), Arc::new(clock.clone()));
        (counter, clock)
    }

    #[test]
    fn counts_within_current_bucket() {
        let (counter, _clock) = counter(1_000);
        counter.count(3);
        counter.count(2);
        assert_eq!(counter.get(), 5);
    }

    #[test]
    fn previous_bucket_decays_linearly() {
        let window = Duration::from_millis(1_000);
        let clock = ManualClock::new();
        let counter = SlidingWindowCounter::with_clock(window, Arc::new(clock.clone()));

        // Fill bucket 0 entirely, then move to the start of bucket 1.
        counter.count(10);
        clock.set(window.as_nanos() as u64);
        assert_eq!(counter.get(), 10);

        // Half way through bucket 1, half of the previous bucket counts.
        clock.advance(window / 2);
        assert_eq!(counter.get(), 5);

        // Current-bucket events are not discounted.
        counter.count(4);
        assert_eq!(counter.get(), 9);
    }

    #[test]
    fn goes_to_zero_after_a_full_window_of_inactivity() {
        let (counter, clock) = counter(1_000);
        counter.count(100);
        // Two bucket widths from the bucket start leaves the count neither
        // current nor previous.
        clock.advance(Duration::from_millis(2_000));
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn stale_bucket_is_reset_on_reuse() {
        let (counter, clock) = counter(100);
        counter.count(7);
        // Advance an even number of buckets so the same slot is reused.
        clock.advance(Duration::from_millis(400));
        counter.count(1);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn concurrent_counts_are_not_lost() {
        let counter = Arc::new(SlidingWindowCounter::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = counter.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1_000 {
                    counter.count(1);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(counter.get(), 8_000);
    }
}
