use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning knobs for the synchronization engine, loaded from environment
/// variables or deserialized from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Trailing width of the sync window (ms).
    pub sync_window_ms: u64,
    /// How far into the future an event may be stamped and still count (ms).
    pub sync_tolerance_ms: u64,
    /// Bucket resolution of the accepted-timestamp history (ms).
    pub sync_bucket_ms: u64,
    pub max_reconnect_attempts: u32,
    pub initial_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    pub reconnect_backoff_factor: u32,
    pub heartbeat_interval_ms: u64,
    /// Minimum spacing between two recovery cycles (ms).
    pub recovery_cooldown_ms: u64,
    /// Recovery-request rounds before the remote snapshot is force-applied.
    pub max_recovery_rounds: u32,
    pub audit_log_capacity: usize,
    pub queue_capacity: usize,
    pub total_rounds: u32,
    pub work_duration_ms: u64,
    pub action_duration_ms: u64,
    pub tick_interval_ms: u64,
    /// How many recently applied event fingerprints to remember for duplicate detection.
    pub duplicate_memory: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            sync_window_ms: 5_000,
            sync_tolerance_ms: 1_000,
            sync_bucket_ms: 250,
            max_reconnect_attempts: 5,
            initial_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            reconnect_backoff_factor: 2,
            heartbeat_interval_ms: 5_000,
            recovery_cooldown_ms: 30_000,
            max_recovery_rounds: 3,
            audit_log_capacity: 500,
            queue_capacity: 1024,
            total_rounds: 4,
            work_duration_ms: 600_000,
            action_duration_ms: 300_000,
            tick_interval_ms: 1_000,
            duplicate_memory: 256,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl SyncConfig {
    /// Load config from `ROUNDSYNC_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = SyncConfig::default();
        Self {
            sync_window_ms: env_or("ROUNDSYNC_SYNC_WINDOW_MS", d.sync_window_ms),
            sync_tolerance_ms: env_or("ROUNDSYNC_SYNC_TOLERANCE_MS", d.sync_tolerance_ms),
            sync_bucket_ms: env_or("ROUNDSYNC_SYNC_BUCKET_MS", d.sync_bucket_ms),
            max_reconnect_attempts: env_or(
                "ROUNDSYNC_MAX_RECONNECT_ATTEMPTS",
                d.max_reconnect_attempts,
            ),
            initial_reconnect_delay_ms: env_or(
                "ROUNDSYNC_INITIAL_RECONNECT_DELAY_MS",
                d.initial_reconnect_delay_ms,
            ),
            max_reconnect_delay_ms: env_or(
                "ROUNDSYNC_MAX_RECONNECT_DELAY_MS",
                d.max_reconnect_delay_ms,
            ),
            reconnect_backoff_factor: env_or(
                "ROUNDSYNC_RECONNECT_BACKOFF_FACTOR",
                d.reconnect_backoff_factor,
            ),
            heartbeat_interval_ms: env_or("ROUNDSYNC_HEARTBEAT_INTERVAL_MS", d.heartbeat_interval_ms),
            recovery_cooldown_ms: env_or("ROUNDSYNC_RECOVERY_COOLDOWN_MS", d.recovery_cooldown_ms),
            max_recovery_rounds: env_or("ROUNDSYNC_MAX_RECOVERY_ROUNDS", d.max_recovery_rounds),
            audit_log_capacity: env_or("ROUNDSYNC_AUDIT_LOG_CAPACITY", d.audit_log_capacity),
            queue_capacity: env_or("ROUNDSYNC_QUEUE_CAPACITY", d.queue_capacity),
            total_rounds: env_or("ROUNDSYNC_TOTAL_ROUNDS", d.total_rounds),
            work_duration_ms: env_or("ROUNDSYNC_WORK_DURATION_MS", d.work_duration_ms),
            action_duration_ms: env_or("ROUNDSYNC_ACTION_DURATION_MS", d.action_duration_ms),
            tick_interval_ms: env_or("ROUNDSYNC_TICK_INTERVAL_MS", d.tick_interval_ms),
            duplicate_memory: env_or("ROUNDSYNC_DUPLICATE_MEMORY", d.duplicate_memory),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_rounds == 0 {
            return Err(SyncError::Config("total_rounds must be at least 1".into()));
        }
        if self.sync_bucket_ms == 0 || self.sync_bucket_ms > self.sync_window_ms {
            return Err(SyncError::Config(format!(
                "sync_bucket_ms must be in 1..={}, got {}",
                self.sync_window_ms, self.sync_bucket_ms
            )));
        }
        if self.initial_reconnect_delay_ms > self.max_reconnect_delay_ms {
            return Err(SyncError::Config(format!(
                "initial_reconnect_delay_ms ({}) exceeds max_reconnect_delay_ms ({})",
                self.initial_reconnect_delay_ms, self.max_reconnect_delay_ms
            )));
        }
        if self.reconnect_backoff_factor == 0 {
            return Err(SyncError::Config(
                "reconnect_backoff_factor must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_ms == 0 || self.tick_interval_ms == 0 {
            return Err(SyncError::Config(
                "heartbeat_interval_ms and tick_interval_ms must be non-zero".into(),
            ));
        }
        if self.queue_capacity == 0 || self.audit_log_capacity == 0 {
            return Err(SyncError::Config(
                "queue_capacity and audit_log_capacity must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
