use std::sync::atomic::{AtomicI64, Ordering};

/// Source of wall-clock milliseconds. Everything that judges event age reads
/// time through this, so tests can drive it by hand.
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Settable clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(start_ms: i64) -> Self {
        ManualTimeSource {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) -> i64 {
        self.now.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
    }
}

impl TimeSource for ManualTimeSource {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_advances() {
        let t = ManualTimeSource::new(1_000);
        assert_eq!(t.now_ms(), 1_000);
        assert_eq!(t.advance(250), 1_250);
        t.set(5);
        assert_eq!(t.now_ms(), 5);
    }

    #[test]
    fn test_system_time_is_recent() {
        // 2020-01-01 in ms
        assert!(SystemTimeSource.now_ms() > 1_577_836_800_000);
    }
}
