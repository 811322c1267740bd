//! Reconnection backoff and the post-reconnect recovery cycle.
//!
//! Reconnect delays grow as `initial * factor^(attempt - 1)` capped at the max
//! delay, for 1-based attempts. Once attempts exceed the ceiling the manager
//! reports [`SyncError::RecoveryExhausted`] and schedules nothing further
//! until an operator resets it.
//!
//! A recovery cycle is: send `sync-request`, compare the `sync-response`
//! against the last known-good snapshot, escalate with `recovery-request`
//! while they conflict, and force the remote snapshot once the round ceiling
//! is hit.

use crate::config::SyncConfig;
use crate::detector::has_conflict;
use crate::error::{Result, SyncError};
use crate::intake::{EventPayload, RecoveryRequest};
use crate::types::GameSnapshot;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub factor: u32,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        BackoffPolicy {
            initial_delay_ms: config.initial_reconnect_delay_ms,
            max_delay_ms: config.max_reconnect_delay_ms,
            factor: config.reconnect_backoff_factor,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let multiplier = (self.factor as u64).checked_pow(exponent).unwrap_or(u64::MAX);
        self.initial_delay_ms
            .saturating_mul(multiplier)
            .min(self.max_delay_ms)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum CycleState {
    Idle,
    AwaitingSync { started_at_ms: i64 },
    AwaitingRecovery { started_at_ms: i64, round: u32 },
}

impl CycleState {
    pub fn started_at_ms(&self) -> Option<i64> {
        match self {
            CycleState::Idle => None,
            CycleState::AwaitingSync { started_at_ms }
            | CycleState::AwaitingRecovery { started_at_ms, .. } => Some(*started_at_ms),
        }
    }

    pub fn in_flight(&self) -> bool {
        !matches!(self, CycleState::Idle)
    }
}

/// What the engine should do with a recovery-cycle response.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// No cycle was waiting for this response.
    Ignored,
    /// Remote agrees with the known-good snapshot; fold it into the current one.
    Converged(GameSnapshot),
    /// Still conflicting; send this to the peers.
    Escalate(EventPayload),
    /// Round ceiling reached; adopt the remote snapshot outright.
    Force(GameSnapshot),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatus {
    pub attempts: u32,
    pub max_attempts: u32,
    pub next_delay_ms: Option<u64>,
    pub exhausted: bool,
    pub cycle: CycleState,
    pub last_recovery_at_ms: Option<i64>,
}

pub struct RecoveryManager {
    policy: BackoffPolicy,
    cooldown_ms: i64,
    max_rounds: u32,
    attempts: u32,
    next_delay_ms: Option<u64>,
    exhausted: bool,
    last_good: Option<GameSnapshot>,
    cycle: CycleState,
    last_recovery_at_ms: Option<i64>,
}

impl RecoveryManager {
    pub fn new(policy: BackoffPolicy, cooldown_ms: u64, max_rounds: u32) -> Self {
        RecoveryManager {
            policy,
            cooldown_ms: cooldown_ms as i64,
            max_rounds: max_rounds.max(1),
            attempts: 0,
            next_delay_ms: None,
            exhausted: false,
            last_good: None,
            cycle: CycleState::Idle,
            last_recovery_at_ms: None,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            BackoffPolicy::from_config(config),
            config.recovery_cooldown_ms,
            config.max_recovery_rounds,
        )
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn cycle(&self) -> CycleState {
        self.cycle
    }

    pub fn status(&self) -> RecoveryStatus {
        RecoveryStatus {
            attempts: self.attempts,
            max_attempts: self.policy.max_attempts,
            next_delay_ms: self.next_delay_ms,
            exhausted: self.exhausted,
            cycle: self.cycle,
            last_recovery_at_ms: self.last_recovery_at_ms,
        }
    }

    /// Connection lost. Captures `current` as the known-good baseline on the
    /// first loss of a streak, abandons any in-flight cycle, and returns the
    /// delay before the next reconnect attempt.
    pub fn on_disconnect(&mut self, current: &GameSnapshot) -> Result<Duration> {
        if self.exhausted {
            return Err(SyncError::RecoveryExhausted {
                attempts: self.attempts,
            });
        }
        if self.last_good.is_none() {
            self.last_good = Some(current.clone());
        }
        self.cycle = CycleState::Idle;
        self.attempts += 1;

        if self.attempts > self.policy.max_attempts {
            self.exhausted = true;
            self.next_delay_ms = None;
            tracing::error!(
                "[RECOVERY] giving up after {} reconnect attempts",
                self.policy.max_attempts
            );
            return Err(SyncError::RecoveryExhausted {
                attempts: self.policy.max_attempts,
            });
        }

        let delay = self.policy.delay_ms(self.attempts);
        self.next_delay_ms = Some(delay);
        tracing::info!(
            "[RECOVERY] reconnect attempt {}/{} in {}ms",
            self.attempts,
            self.policy.max_attempts,
            delay
        );
        Ok(Duration::from_millis(delay))
    }

    /// Reconnected. Returns the `sync-request` to send, or `None` while another
    /// cycle started less than one cooldown ago is still in flight.
    pub fn begin_cycle(&mut self, now_ms: i64) -> Option<EventPayload> {
        if let Some(started) = self.cycle.started_at_ms() {
            if now_ms - started < self.cooldown_ms {
                tracing::debug!("[RECOVERY] cycle already in flight since {}", started);
                return None;
            }
            tracing::warn!("[RECOVERY] abandoning cycle started at {}", started);
        }
        self.next_delay_ms = None;
        self.cycle = CycleState::AwaitingSync {
            started_at_ms: now_ms,
        };
        tracing::info!("[RECOVERY] sending sync-request");
        Some(EventPayload::SyncRequest)
    }

    /// An in-flight cycle has outlived the cooldown without completing.
    pub fn cycle_timed_out(&self, now_ms: i64) -> bool {
        self.cycle
            .started_at_ms()
            .map(|started| now_ms - started >= self.cooldown_ms)
            .unwrap_or(false)
    }

    fn baseline<'a>(&'a self, current: &'a GameSnapshot) -> &'a GameSnapshot {
        self.last_good.as_ref().unwrap_or(current)
    }

    pub fn on_sync_response(
        &mut self,
        remote: GameSnapshot,
        current: &GameSnapshot,
        now_ms: i64,
    ) -> RecoveryOutcome {
        let CycleState::AwaitingSync { started_at_ms } = self.cycle else {
            return RecoveryOutcome::Ignored;
        };
        let baseline = self.baseline(current);
        if !has_conflict(baseline, &remote) {
            self.finish(now_ms);
            return RecoveryOutcome::Converged(remote);
        }
        let request = EventPayload::RecoveryRequest(RecoveryRequest {
            local: baseline.clone(),
            remote,
        });
        self.cycle = CycleState::AwaitingRecovery {
            started_at_ms,
            round: 1,
        };
        tracing::info!("[RECOVERY] sync-response conflicts; sending recovery-request");
        RecoveryOutcome::Escalate(request)
    }

    pub fn on_recovery_response(
        &mut self,
        remote: GameSnapshot,
        current: &GameSnapshot,
        now_ms: i64,
    ) -> RecoveryOutcome {
        let CycleState::AwaitingRecovery {
            started_at_ms,
            round,
        } = self.cycle
        else {
            return RecoveryOutcome::Ignored;
        };
        let baseline = self.baseline(current);
        if !has_conflict(baseline, &remote) {
            self.finish(now_ms);
            return RecoveryOutcome::Converged(remote);
        }
        if round >= self.max_rounds {
            tracing::warn!(
                "[RECOVERY] still conflicting after {} rounds; forcing remote snapshot",
                round
            );
            self.finish(now_ms);
            return RecoveryOutcome::Force(remote);
        }
        let request = EventPayload::RecoveryRequest(RecoveryRequest {
            local: baseline.clone(),
            remote,
        });
        self.cycle = CycleState::AwaitingRecovery {
            started_at_ms,
            round: round + 1,
        };
        RecoveryOutcome::Escalate(request)
    }

    fn finish(&mut self, now_ms: i64) {
        self.cycle = CycleState::Idle;
        self.attempts = 0;
        self.next_delay_ms = None;
        self.last_good = None;
        self.last_recovery_at_ms = Some(now_ms);
        tracing::info!("[RECOVERY] cycle complete");
    }

    /// Clears an exhausted state so reconnection can be retried.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay_ms = None;
        self.exhausted = false;
        self.cycle = CycleState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Phase, PlayerRecord, SessionState};

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            factor: 2,
            max_attempts: 5,
        }
    }

    fn snapshot(score: u32) -> GameSnapshot {
        GameSnapshot::new(SessionState {
            round: 1,
            phase: Phase::Work,
            remaining_ms: 10_000,
            resume_phase: None,
        })
        .with_player(PlayerRecord::new("p", "P").with_score(score))
    }

    #[test]
    fn test_backoff_sequence() {
        let delays: Vec<u64> = (1..=5).map(|a| policy().delay_ms(a)).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(policy().delay_ms(6), 30_000);
        assert_eq!(policy().delay_ms(64), 30_000);
    }

    #[test]
    fn test_sixth_disconnect_exhausts() {
        let mut manager = RecoveryManager::new(policy(), 30_000, 3);
        let current = snapshot(0);
        for attempt in 1..=5 {
            let delay = manager.on_disconnect(&current).unwrap();
            assert_eq!(delay, policy().delay(attempt));
        }
        let err = manager.on_disconnect(&current).unwrap_err();
        assert_eq!(err, SyncError::RecoveryExhausted { attempts: 5 });
        assert!(manager.is_exhausted());
        assert!(manager.on_disconnect(&current).is_err());

        manager.reset();
        assert!(manager.on_disconnect(&current).is_ok());
    }

    #[test]
    fn test_cycle_converges_and_resets_attempts() {
        let mut manager = RecoveryManager::new(policy(), 30_000, 3);
        let current = snapshot(5);
        manager.on_disconnect(&current).unwrap();
        manager.on_disconnect(&current).unwrap();
        assert_eq!(manager.begin_cycle(100), Some(EventPayload::SyncRequest));

        let outcome = manager.on_sync_response(snapshot(5), &current, 200);
        assert_eq!(outcome, RecoveryOutcome::Converged(snapshot(5)));
        assert_eq!(manager.attempts(), 0);
        assert_eq!(manager.status().last_recovery_at_ms, Some(200));
        assert!(!manager.cycle().in_flight());
    }

    #[test]
    fn test_cycle_escalates_then_forces() {
        let mut manager = RecoveryManager::new(policy(), 30_000, 2);
        let current = snapshot(5);
        manager.on_disconnect(&current).unwrap();
        manager.begin_cycle(0);

        match manager.on_sync_response(snapshot(50), &current, 1) {
            RecoveryOutcome::Escalate(EventPayload::RecoveryRequest(req)) => {
                assert_eq!(req.local, current);
                assert_eq!(req.remote, snapshot(50));
            }
            other => panic!("expected escalation, got {:?}", other),
        }
        assert!(matches!(
            manager.on_recovery_response(snapshot(50), &current, 2),
            RecoveryOutcome::Escalate(_)
        ));
        assert_eq!(
            manager.on_recovery_response(snapshot(50), &current, 3),
            RecoveryOutcome::Force(snapshot(50))
        );
        assert_eq!(manager.cycle(), CycleState::Idle);
    }

    #[test]
    fn test_responses_without_cycle_are_ignored() {
        let mut manager = RecoveryManager::new(policy(), 30_000, 3);
        let current = snapshot(0);
        assert_eq!(
            manager.on_sync_response(snapshot(9), &current, 0),
            RecoveryOutcome::Ignored
        );
        assert_eq!(
            manager.on_recovery_response(snapshot(9), &current, 0),
            RecoveryOutcome::Ignored
        );
    }

    #[test]
    fn test_one_cycle_per_cooldown() {
        let mut manager = RecoveryManager::new(policy(), 30_000, 3);
        assert!(manager.begin_cycle(0).is_some());
        assert!(manager.begin_cycle(10_000).is_none());
        assert!(!manager.cycle_timed_out(29_999));
        assert!(manager.cycle_timed_out(30_000));
        assert!(manager.begin_cycle(30_000).is_some());
    }

    #[test]
    fn test_baseline_is_captured_at_first_disconnect() {
        let mut manager = RecoveryManager::new(policy(), 30_000, 3);
        manager.on_disconnect(&snapshot(1)).unwrap();
        manager.on_disconnect(&snapshot(7)).unwrap();
        manager.begin_cycle(0);
        // snapshot(1) is the baseline, so a remote at score 1 converges
        // even though the live snapshot has moved on.
        assert!(matches!(
            manager.on_sync_response(snapshot(1), &snapshot(7), 1),
            RecoveryOutcome::Converged(_)
        ));
    }
}
