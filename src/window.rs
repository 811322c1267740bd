//! Sync window: bounds which event timestamps are current enough to apply.
//!
//! The window is `[now - window_ms, now + tolerance_ms]`, inclusive. Accepted
//! timestamps are kept as a bucketed histogram covering exactly the trailing
//! `window_ms`, so memory stays at `O(window / bucket)` regardless of traffic.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
pub struct SyncWindow {
    window_ms: i64,
    tolerance_ms: i64,
    bucket_ms: i64,
    /// bucket start (ms) -> accepted events in that bucket
    history: BTreeMap<i64, u32>,
}

impl SyncWindow {
    pub fn new(window_ms: u64, tolerance_ms: u64, bucket_ms: u64) -> Self {
        SyncWindow {
            window_ms: window_ms as i64,
            tolerance_ms: tolerance_ms as i64,
            bucket_ms: bucket_ms.max(1) as i64,
            history: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.sync_window_ms,
            config.sync_tolerance_ms,
            config.sync_bucket_ms,
        )
    }

    pub fn bounds(&self, now_ms: i64) -> (i64, i64) {
        (now_ms - self.window_ms, now_ms + self.tolerance_ms)
    }

    pub fn is_stale(&self, timestamp_ms: i64, now_ms: i64) -> bool {
        let (start, end) = self.bounds(now_ms);
        timestamp_ms < start || timestamp_ms > end
    }

    pub fn check(&self, timestamp_ms: i64, now_ms: i64) -> Result<()> {
        if self.is_stale(timestamp_ms, now_ms) {
            let (window_start, window_end) = self.bounds(now_ms);
            return Err(SyncError::Stale {
                timestamp_ms,
                window_start,
                window_end,
            });
        }
        Ok(())
    }

    /// Record an accepted event timestamp and drop buckets that have slid out.
    pub fn record(&mut self, timestamp_ms: i64, now_ms: i64) {
        self.purge(now_ms);
        let bucket = timestamp_ms.div_euclid(self.bucket_ms) * self.bucket_ms;
        if bucket + self.bucket_ms <= now_ms - self.window_ms {
            return;
        }
        *self.history.entry(bucket).or_insert(0) += 1;
    }

    /// Remove every bucket that lies entirely before `now - window`.
    pub fn purge(&mut self, now_ms: i64) {
        let cutoff = now_ms - self.window_ms - self.bucket_ms + 1;
        self.history = self.history.split_off(&cutoff);
    }

    pub fn bucket_count(&self) -> usize {
        self.history.len()
    }

    pub fn accepted_in_window(&self) -> u64 {
        self.history.values().map(|&c| c as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> SyncWindow {
        SyncWindow::new(5000, 1000, 250)
    }

    #[test]
    fn test_window_edges_are_inclusive() {
        let w = window();
        let now = 100_000;
        assert!(!w.is_stale(now - 5000, now));
        assert!(w.is_stale(now - 5001, now));
        assert!(!w.is_stale(now + 1000, now));
        assert!(w.is_stale(now + 1001, now));
    }

    #[test]
    fn test_stale_property_over_range() {
        let w = window();
        let now = 50_000;
        for ts in (now - 7000..now + 3000).step_by(37) {
            let expected = ts < now - 5000 || ts > now + 1000;
            assert_eq!(w.is_stale(ts, now), expected, "ts={}", ts);
        }
    }

    #[test]
    fn test_check_reports_bounds() {
        let w = window();
        let err = w.check(0, 10_000).unwrap_err();
        assert_eq!(
            err,
            SyncError::Stale {
                timestamp_ms: 0,
                window_start: 5000,
                window_end: 11_000
            }
        );
    }

    #[test]
    fn test_history_is_bounded_by_window() {
        let mut w = window();
        let mut now = 0;
        for _ in 0..1000 {
            now += 50;
            w.record(now, now);
        }
        // 5000ms of history at 250ms resolution, plus the partially covered edge bucket
        assert!(w.bucket_count() <= 21, "buckets={}", w.bucket_count());
        assert!(w.accepted_in_window() >= 100);
    }

    #[test]
    fn test_purge_drops_old_buckets() {
        let mut w = window();
        w.record(1000, 1000);
        w.record(1100, 1100);
        assert_eq!(w.accepted_in_window(), 2);
        w.purge(20_000);
        assert_eq!(w.bucket_count(), 0);
    }
}
