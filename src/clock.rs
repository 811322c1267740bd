//! Authoritative round/phase countdown.
//!
//! `Setup → Work → Action → Work → … → Ended`, with pause as an overlay that
//! freezes the countdown on `Work`/`Action` without changing the phase.
//! [`PhaseClock::tick`] is the only thing that moves time forward.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::types::{Phase, SessionState};

/// Emitted once per phase boundary crossed by a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: Phase,
    pub to: Phase,
    pub round: u32,
}

/// Where a countdown that just hit zero goes next. `None` for phases that have
/// no countdown.
fn next_phase(phase: Phase, round: u32, total_rounds: u32) -> Option<(Phase, u32)> {
    match phase {
        Phase::Setup => None,
        Phase::Work => Some((Phase::Action, round)),
        Phase::Action => {
            if round + 1 > total_rounds {
                Some((Phase::Ended, round))
            } else {
                Some((Phase::Work, round + 1))
            }
        }
        Phase::Paused => None,
        Phase::Ended => None,
    }
}

#[derive(Debug, Clone)]
pub struct PhaseClock {
    total_rounds: u32,
    work_duration_ms: u64,
    action_duration_ms: u64,
    round: u32,
    /// Underlying phase; never `Paused`.
    phase: Phase,
    remaining_ms: u64,
    paused: bool,
}

impl PhaseClock {
    pub fn new(total_rounds: u32, work_duration_ms: u64, action_duration_ms: u64) -> Self {
        PhaseClock {
            total_rounds: total_rounds.max(1),
            work_duration_ms,
            action_duration_ms,
            round: 1,
            phase: Phase::Setup,
            remaining_ms: 0,
            paused: false,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.total_rounds,
            config.work_duration_ms,
            config.action_duration_ms,
        )
    }

    pub fn total_rounds(&self) -> u32 {
        self.total_rounds
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_ended(&self) -> bool {
        self.phase == Phase::Ended
    }

    fn duration_of(&self, phase: Phase) -> u64 {
        match phase {
            Phase::Work => self.work_duration_ms,
            Phase::Action => self.action_duration_ms,
            Phase::Setup | Phase::Paused | Phase::Ended => 0,
        }
    }

    fn invalid(&self, action: &str) -> SyncError {
        SyncError::InvalidTransition {
            action: action.to_string(),
            phase: self.state().phase.to_string(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.paused {
            SessionState {
                round: self.round,
                phase: Phase::Paused,
                remaining_ms: self.remaining_ms,
                resume_phase: Some(self.phase),
            }
        } else {
            SessionState {
                round: self.round,
                phase: self.phase,
                remaining_ms: self.remaining_ms,
                resume_phase: None,
            }
        }
    }

    /// Setup → Work, round 1, full work countdown.
    pub fn start(&mut self) -> Result<PhaseChange> {
        if self.phase != Phase::Setup {
            return Err(self.invalid("start"));
        }
        self.round = 1;
        self.phase = Phase::Work;
        self.remaining_ms = self.work_duration_ms;
        tracing::info!("[CLOCK] session started, round 1 work");
        Ok(PhaseChange {
            from: Phase::Setup,
            to: Phase::Work,
            round: 1,
        })
    }

    /// Decrement the countdown by exactly `elapsed_ms`, carrying any overflow
    /// across as many boundaries as it covers.
    pub fn tick(&mut self, elapsed_ms: u64) -> Result<Vec<PhaseChange>> {
        if self.phase == Phase::Ended {
            return Err(SyncError::SessionEnded);
        }
        let mut changes = Vec::new();
        if self.paused || self.phase == Phase::Setup {
            return Ok(changes);
        }

        let mut left = elapsed_ms;
        loop {
            if left < self.remaining_ms {
                self.remaining_ms -= left;
                break;
            }
            left -= self.remaining_ms;
            self.remaining_ms = 0;

            let Some((to, round)) = next_phase(self.phase, self.round, self.total_rounds) else {
                break;
            };
            changes.push(PhaseChange {
                from: self.phase,
                to,
                round,
            });
            tracing::info!("[CLOCK] {} -> {} (round {})", self.phase, to, round);
            self.phase = to;
            self.round = round;
            self.remaining_ms = self.duration_of(to);
            if to == Phase::Ended {
                break;
            }
        }
        Ok(changes)
    }

    /// Freeze the countdown. The remaining time is kept exactly as is.
    pub fn pause(&mut self) -> Result<SessionState> {
        if self.paused || !matches!(self.phase, Phase::Work | Phase::Action) {
            return Err(self.invalid("pause"));
        }
        self.paused = true;
        tracing::info!(
            "[CLOCK] paused in {} with {}ms remaining",
            self.phase,
            self.remaining_ms
        );
        Ok(self.state())
    }

    /// Continue from the exact snapshotted remaining time.
    pub fn resume(&mut self) -> Result<SessionState> {
        if !self.paused {
            return Err(self.invalid("resume"));
        }
        self.paused = false;
        tracing::info!(
            "[CLOCK] resumed {} with {}ms remaining",
            self.phase,
            self.remaining_ms
        );
        Ok(self.state())
    }

    /// Explicit session reset back to Setup.
    pub fn reset(&mut self) {
        self.round = 1;
        self.phase = Phase::Setup;
        self.remaining_ms = 0;
        self.paused = false;
    }

    /// Adopt a resolved session state.
    pub fn restore(&mut self, state: &SessionState) {
        self.round = state.round.clamp(1, self.total_rounds);
        self.remaining_ms = state.remaining_ms;
        match state.phase {
            Phase::Paused => {
                self.paused = true;
                self.phase = match state.resume_phase {
                    Some(Phase::Action) => Phase::Action,
                    _ => Phase::Work,
                };
            }
            phase => {
                self.paused = false;
                self.phase = phase;
            }
        }
    }
}
