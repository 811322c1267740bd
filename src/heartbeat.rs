use crate::config::SyncConfig;

/// Liveness tracking. A peer is considered lost once nothing has been heard
/// from it for more than twice the heartbeat interval.
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    interval_ms: u64,
    last_received_ms: i64,
    last_sent_ms: Option<i64>,
}

impl HeartbeatMonitor {
    pub fn new(interval_ms: u64, now_ms: i64) -> Self {
        HeartbeatMonitor {
            interval_ms: interval_ms.max(1),
            last_received_ms: now_ms,
            last_sent_ms: None,
        }
    }

    pub fn from_config(config: &SyncConfig, now_ms: i64) -> Self {
        Self::new(config.heartbeat_interval_ms, now_ms)
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn timeout_ms(&self) -> u64 {
        self.interval_ms.saturating_mul(2)
    }

    pub fn record_received(&mut self, now_ms: i64) {
        if now_ms > self.last_received_ms {
            self.last_received_ms = now_ms;
        }
    }

    pub fn record_sent(&mut self, now_ms: i64) {
        self.last_sent_ms = Some(now_ms);
    }

    pub fn last_received_ms(&self) -> i64 {
        self.last_received_ms
    }

    pub fn last_sent_ms(&self) -> Option<i64> {
        self.last_sent_ms
    }

    /// Whether a heartbeat is due at `now_ms`.
    pub fn due(&self, now_ms: i64) -> bool {
        match self.last_sent_ms {
            None => true,
            Some(sent) => now_ms - sent >= self.interval_ms as i64,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms - self.last_received_ms > self.timeout_ms() as i64
    }

    /// Restart the silence timer, e.g. after a reconnect.
    pub fn reset(&mut self, now_ms: i64) {
        self.last_received_ms = now_ms;
    }
}
