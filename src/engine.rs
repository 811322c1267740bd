//! The single-writer synchronization core.
//!
//! `SyncEngine` owns the canonical snapshot. Every mutation (inbound events,
//! clock ticks, liveness checks, local commands) goes through `&mut self`, so
//! one engine value is one serialized apply path. Side effects that need the
//! network or a timer are returned as [`Effect`]s for the runner to carry out.

use crate::clock::PhaseClock;
use crate::config::SyncConfig;
use crate::deps::DependencyGraph;
use crate::detector::ConflictRecord;
use crate::error::{Result, SyncError};
use crate::heartbeat::HeartbeatMonitor;
use crate::intake::{EventEnvelope, EventIntake, EventPayload, EventType, SyncEvent, TaskCompletion};
use crate::persistence::{MemoryStore, SnapshotStore};
use crate::recovery::{RecoveryManager, RecoveryOutcome, RecoveryStatus};
use crate::resolver::{merge_snapshots, ConflictResolver, Resolution, ResolutionStrategy};
use crate::scoring::{CompletionScorer, ScoreCalculator};
use crate::time::{SystemTimeSource, TimeSource};
use crate::types::{GameSnapshot, PlayerId, PlayerRecord, SessionState};
use crate::window::SyncWindow;
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// Work the engine wants done outside the apply path.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Broadcast(EventEnvelope),
    ScheduleReconnect(Duration),
    ProbeConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    Connected,
    Reconnecting,
    /// Reconnect attempts ran out; needs an operator reset.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub node_id: String,
    pub connection: ConnectionState,
    pub session: SessionState,
    pub player_count: usize,
    pub queue_len: usize,
    pub applied_events: u64,
    pub rejected_events: u64,
    pub stale_events: u64,
    pub duplicate_events: u64,
    pub conflicts_recorded: u64,
    pub last_heartbeat_ms: i64,
    pub recovery: RecoveryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Origin, type, timestamp and a digest of the payload. Distinct events a
/// peer emits in the same millisecond stay distinct.
type Fingerprint = (String, EventType, i64, u64);

fn fingerprint_of(event: &SyncEvent) -> Fingerprint {
    let mut hasher = DefaultHasher::new();
    event.payload.data().to_string().hash(&mut hasher);
    (
        event.origin_id.clone(),
        event.event_type(),
        event.timestamp_ms,
        hasher.finish(),
    )
}

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    applied: u64,
    stale: u64,
    duplicates: u64,
}

pub struct SyncEngine {
    node_id: String,
    config: SyncConfig,
    time: Arc<dyn TimeSource>,
    store: Arc<dyn SnapshotStore>,
    scorer: Arc<dyn ScoreCalculator>,
    clock: PhaseClock,
    players: BTreeMap<PlayerId, PlayerRecord>,
    intake: EventIntake,
    window: SyncWindow,
    resolver: ConflictResolver,
    recovery: RecoveryManager,
    heartbeat: HeartbeatMonitor,
    connection: ConnectionState,
    seen: VecDeque<Fingerprint>,
    seen_set: HashSet<Fingerprint>,
    counters: Counters,
    last_error: Option<SyncError>,
}

impl SyncEngine {
    pub fn new(node_id: impl Into<String>, config: SyncConfig) -> Self {
        let time: Arc<dyn TimeSource> = Arc::new(SystemTimeSource);
        let now = time.now_ms();
        SyncEngine {
            node_id: node_id.into(),
            clock: PhaseClock::from_config(&config),
            intake: EventIntake::new(config.queue_capacity),
            window: SyncWindow::from_config(&config),
            resolver: ConflictResolver::new(config.audit_log_capacity),
            recovery: RecoveryManager::from_config(&config),
            heartbeat: HeartbeatMonitor::from_config(&config, now),
            time,
            store: Arc::new(MemoryStore::new()),
            scorer: Arc::new(CompletionScorer::default()),
            players: BTreeMap::new(),
            connection: ConnectionState::Connected,
            seen: VecDeque::new(),
            seen_set: HashSet::new(),
            counters: Counters::default(),
            last_error: None,
            config,
        }
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.heartbeat.reset(time.now_ms());
        self.time = time;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ScoreCalculator>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Attach a persistence collaborator, restoring from it when it already
    /// holds a snapshot.
    pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
        match store.load() {
            Ok(snapshot) => {
                tracing::info!(
                    "[ENGINE] restored snapshot: round {} {} with {} players",
                    snapshot.session.round,
                    snapshot.session.phase,
                    snapshot.players.len()
                );
                self.clock.restore(&snapshot.session);
                self.players = snapshot.players;
            }
            Err(SyncError::SnapshotNotFound) => {}
            Err(e) => tracing::warn!("[ENGINE] could not restore snapshot: {}", e),
        }
        self.store = store;
        self
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn now_ms(&self) -> i64 {
        self.time.now_ms()
    }

    /// An immutable copy of the canonical state.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            session: self.clock.state(),
            players: self.players.clone(),
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn conflicts(&self, limit: usize) -> Vec<ConflictRecord> {
        self.resolver.audit().recent(limit)
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            node_id: self.node_id.clone(),
            connection: self.connection,
            session: self.clock.state(),
            player_count: self.players.len(),
            queue_len: self.intake.len(),
            applied_events: self.counters.applied,
            rejected_events: self.intake.rejected_count(),
            stale_events: self.counters.stale,
            duplicate_events: self.counters.duplicates,
            conflicts_recorded: self.resolver.audit().total_recorded(),
            last_heartbeat_ms: self.heartbeat.last_received_ms(),
            recovery: self.recovery.status(),
            error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    // ── Intake ──

    /// Validate and enqueue a raw wire envelope.
    pub fn submit(&mut self, raw: &Value) -> Result<()> {
        self.intake.submit(raw)
    }

    pub fn enqueue(&mut self, event: SyncEvent) -> Result<()> {
        self.intake.enqueue(event)
    }

    /// Drain the queue in priority order, applying one event at a time.
    pub fn process_pending(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        while let Some(event) = self.intake.dequeue_next() {
            effects.extend(self.apply_event(event));
        }
        effects
    }

    fn outbound(&self, payload: EventPayload) -> Effect {
        Effect::Broadcast(EventEnvelope::outbound(
            payload,
            self.time.now_ms(),
            &self.node_id,
        ))
    }

    fn remember(&mut self, fingerprint: Fingerprint) {
        if self.config.duplicate_memory == 0 {
            return;
        }
        if self.seen.len() == self.config.duplicate_memory {
            if let Some(old) = self.seen.pop_front() {
                self.seen_set.remove(&old);
            }
        }
        self.seen_set.insert(fingerprint.clone());
        self.seen.push_back(fingerprint);
    }

    fn apply_event(&mut self, event: SyncEvent) -> Vec<Effect> {
        let now = self.time.now_ms();
        let event_type = event.event_type();

        if !event_type.exempt_from_window() {
            if let Err(e) = self.window.check(event.timestamp_ms, now) {
                self.counters.stale += 1;
                tracing::debug!("[WINDOW] dropping {} from {}: {}", event_type, event.origin_id, e);
                return Vec::new();
            }
            self.window.record(event.timestamp_ms, now);
        }

        let fingerprint = fingerprint_of(&event);
        let duplicate = self.seen_set.contains(&fingerprint);
        let echo = event.origin_id == self.node_id;
        if duplicate {
            self.counters.duplicates += 1;
            tracing::debug!(
                "[INTAKE] duplicate {} from {} at {}",
                event_type,
                event.origin_id,
                event.timestamp_ms
            );
        }
        let strategy = if duplicate || echo {
            ResolutionStrategy::Preserve
        } else {
            ResolutionStrategy::for_event(event_type)
        };

        let effects = match event.payload {
            EventPayload::Heartbeat => {
                self.heartbeat.record_received(now);
                if self.connection == ConnectionState::Reconnecting {
                    self.on_reconnected(now)
                } else {
                    Vec::new()
                }
            }
            EventPayload::Error { message } => {
                tracing::warn!("[ENGINE] peer {} reported error: {}", event.origin_id, message);
                Vec::new()
            }
            EventPayload::SyncRequest => {
                if echo {
                    Vec::new()
                } else {
                    vec![self.outbound(EventPayload::SyncResponse(self.snapshot()))]
                }
            }
            EventPayload::RecoveryRequest(_) => {
                if echo {
                    Vec::new()
                } else {
                    self.answer_recovery_request()
                }
            }
            EventPayload::SyncResponse(remote) => {
                let outcome = self.recovery.on_sync_response(remote, &self.snapshot(), now);
                self.handle_recovery_outcome(outcome, now)
            }
            EventPayload::RecoveryResponse(remote) => {
                let outcome = self
                    .recovery
                    .on_recovery_response(remote, &self.snapshot(), now);
                self.handle_recovery_outcome(outcome, now)
            }
            EventPayload::GameState(session) => {
                let mut proposed = self.snapshot();
                proposed.session = session;
                self.apply_proposal(proposed, strategy, now)
            }
            EventPayload::PlayerUpdate(player) => {
                let mut proposed = self.snapshot();
                proposed.players.insert(player.id.clone(), player);
                self.apply_proposal(proposed, strategy, now)
            }
            EventPayload::TaskCompletion(completion) => {
                match self.completion_proposal(&completion, event.timestamp_ms) {
                    Ok(proposed) => self.apply_proposal(proposed, strategy, now),
                    Err(e) => {
                        tracing::warn!("[ENGINE] ignoring task-completion: {}", e);
                        Vec::new()
                    }
                }
            }
        };

        if event_type != EventType::Heartbeat {
            self.remember(fingerprint);
        }
        self.counters.applied += 1;
        effects
    }

    // ── Apply path ──

    fn commit(&mut self, snapshot: GameSnapshot) {
        if snapshot.session != self.clock.state() {
            self.clock.restore(&snapshot.session);
        }
        self.players = snapshot.players;
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.snapshot()) {
            tracing::warn!("[ENGINE] failed to persist snapshot: {}", e);
        }
    }

    /// Broadcasts for every slice of `current` that differs from `reference`.
    fn announce(&self, reference: &GameSnapshot, current: &GameSnapshot) -> Vec<Effect> {
        let mut effects = Vec::new();
        if current.session != reference.session {
            effects.push(self.outbound(EventPayload::GameState(current.session.clone())));
        }
        for (id, player) in &current.players {
            if !reference.players.get(id).is_some_and(|r| r.same_state(player)) {
                effects.push(self.outbound(EventPayload::PlayerUpdate(player.clone())));
            }
        }
        effects
    }

    /// Resolve a remote proposal against the canonical snapshot and commit
    /// the result. Peers whose proposal is behind the result are told about it,
    /// even when the local snapshot itself did not move.
    fn apply_proposal(
        &mut self,
        proposed: GameSnapshot,
        strategy: ResolutionStrategy,
        now: i64,
    ) -> Vec<Effect> {
        let local = self.snapshot();
        let resolution = self.resolver.resolve(&local, &proposed, strategy, now);
        let effects = self.commit_resolution(&local, &proposed, resolution);
        // duplicates and echoes never trigger announcements
        if strategy == ResolutionStrategy::Preserve {
            return Vec::new();
        }
        effects
    }

    fn commit_resolution(
        &mut self,
        local: &GameSnapshot,
        reference: &GameSnapshot,
        resolution: Resolution,
    ) -> Vec<Effect> {
        if resolution.changed(local) {
            self.commit(resolution.snapshot);
        }
        self.announce(reference, &self.snapshot())
    }

    fn answer_recovery_request(&self) -> Vec<Effect> {
        match self.store.load() {
            Ok(persisted) => vec![self.outbound(EventPayload::RecoveryResponse(persisted))],
            Err(SyncError::SnapshotNotFound) => {
                tracing::debug!("[RECOVERY] no persisted snapshot to offer");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("[RECOVERY] could not load persisted snapshot: {}", e);
                Vec::new()
            }
        }
    }

    fn handle_recovery_outcome(&mut self, outcome: RecoveryOutcome, now: i64) -> Vec<Effect> {
        match outcome {
            RecoveryOutcome::Ignored => {
                tracing::debug!("[RECOVERY] no cycle in flight; response ignored");
                Vec::new()
            }
            RecoveryOutcome::Escalate(request) => vec![self.outbound(request)],
            RecoveryOutcome::Converged(remote) => {
                self.connection = ConnectionState::Connected;
                let local = self.snapshot();
                let resolution = self
                    .resolver
                    .resolve(&local, &remote, ResolutionStrategy::Merge, now);
                self.commit_resolution(&local, &remote, resolution)
            }
            RecoveryOutcome::Force(remote) => {
                self.connection = ConnectionState::Connected;
                let local = self.snapshot();
                let resolution = self.resolver.force(&local, &remote, now);
                self.commit_resolution(&local, &remote, resolution)
            }
        }
    }

    fn completion_proposal(
        &self,
        completion: &TaskCompletion,
        timestamp_ms: i64,
    ) -> Result<GameSnapshot> {
        let mut proposed = self.snapshot();
        let player = proposed
            .players
            .get_mut(&completion.player_id)
            .ok_or_else(|| SyncError::UnknownPlayer(completion.player_id.clone()))?;
        let task = player
            .task_mut(&completion.task_id)
            .ok_or_else(|| SyncError::UnknownTask(completion.task_id.clone()))?;

        match &completion.subtask_id {
            Some(subtask_id) => {
                let subtask = task
                    .subtasks
                    .iter_mut()
                    .find(|s| &s.id == subtask_id)
                    .ok_or_else(|| {
                        SyncError::UnknownTask(format!("{}/{}", completion.task_id, subtask_id))
                    })?;
                subtask.completed = true;
                subtask.updated_at_ms = subtask.updated_at_ms.max(timestamp_ms);
                task.normalize_completion();
            }
            None => task.completed = true,
        }
        task.updated_at_ms = task.updated_at_ms.max(timestamp_ms);
        player.updated_at_ms = player.updated_at_ms.max(timestamp_ms);
        // the calculator can only raise the score
        player.score = player.score.max(self.scorer.score(player));
        Ok(proposed)
    }

    // ── Timers ──

    /// Advance the phase clock by exactly `elapsed_ms`.
    pub fn tick(&mut self, elapsed_ms: u64) -> Vec<Effect> {
        match self.clock.tick(elapsed_ms) {
            Ok(changes) if changes.is_empty() => Vec::new(),
            Ok(changes) => {
                tracing::debug!("[CLOCK] {} phase change(s) this tick", changes.len());
                self.persist();
                vec![self.outbound(EventPayload::GameState(self.clock.state()))]
            }
            Err(SyncError::SessionEnded) => Vec::new(),
            Err(e) => {
                tracing::warn!("[CLOCK] tick failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Periodic liveness work: emit our heartbeat, and treat prolonged
    /// silence or a stuck recovery cycle as a lost connection. Skipped when
    /// there is nobody to hear from.
    pub fn heartbeat_check(&mut self, peer_count: usize) -> Vec<Effect> {
        let now = self.time.now_ms();
        if self.connection != ConnectionState::Connected {
            return Vec::new();
        }
        if peer_count == 0 {
            self.heartbeat.reset(now);
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.heartbeat.due(now) {
            self.heartbeat.record_sent(now);
            effects.push(self.outbound(EventPayload::Heartbeat));
        }
        if self.heartbeat.is_expired(now) {
            tracing::warn!(
                "[HEARTBEAT] nothing heard for {}ms (limit {}ms)",
                now - self.heartbeat.last_received_ms(),
                self.heartbeat.timeout_ms()
            );
            effects.extend(self.connection_lost());
        } else if self.recovery.cycle_timed_out(now) {
            tracing::warn!("[RECOVERY] cycle did not complete within cooldown");
            effects.extend(self.connection_lost());
        }
        effects
    }

    /// Report a lost connection (heartbeat silence, transport failure).
    pub fn report_disconnect(&mut self) -> Vec<Effect> {
        self.connection_lost()
    }

    fn connection_lost(&mut self) -> Vec<Effect> {
        if self.connection == ConnectionState::Exhausted {
            return Vec::new();
        }
        match self.recovery.on_disconnect(&self.snapshot()) {
            Ok(delay) => {
                self.connection = ConnectionState::Reconnecting;
                vec![Effect::ScheduleReconnect(delay)]
            }
            Err(e) => {
                tracing::error!("[ENGINE] {}; manual intervention required", e);
                self.connection = ConnectionState::Exhausted;
                self.last_error = Some(e);
                Vec::new()
            }
        }
    }

    /// The backoff timer fired.
    pub fn reconnect_due(&mut self) -> Vec<Effect> {
        if self.connection == ConnectionState::Reconnecting {
            vec![Effect::ProbeConnection]
        } else {
            Vec::new()
        }
    }

    pub fn probe_result(&mut self, reachable: bool) -> Vec<Effect> {
        if self.connection != ConnectionState::Reconnecting {
            return Vec::new();
        }
        let now = self.time.now_ms();
        if reachable {
            self.on_reconnected(now)
        } else {
            tracing::info!("[RECOVERY] probe failed");
            self.connection_lost()
        }
    }

    fn on_reconnected(&mut self, now: i64) -> Vec<Effect> {
        tracing::info!("[RECOVERY] reconnected");
        self.connection = ConnectionState::Connected;
        self.heartbeat.reset(now);
        match self.recovery.begin_cycle(now) {
            Some(request) => vec![self.outbound(request)],
            None => Vec::new(),
        }
    }

    /// Operator reset after `RecoveryExhausted`: start reconnecting again.
    pub fn reset_recovery(&mut self) -> Vec<Effect> {
        self.recovery.reset();
        self.last_error = None;
        self.connection = ConnectionState::Reconnecting;
        tracing::info!("[RECOVERY] reset by operator");
        vec![Effect::ProbeConnection]
    }

    // ── Local commands ──

    fn session_changed(&mut self) -> Vec<Effect> {
        self.persist();
        vec![self.outbound(EventPayload::GameState(self.clock.state()))]
    }

    pub fn start_session(&mut self) -> Result<Vec<Effect>> {
        self.clock.start()?;
        Ok(self.session_changed())
    }

    pub fn pause(&mut self) -> Result<Vec<Effect>> {
        self.clock.pause()?;
        Ok(self.session_changed())
    }

    pub fn resume(&mut self) -> Result<Vec<Effect>> {
        self.clock.resume()?;
        Ok(self.session_changed())
    }

    /// Back to Setup; player records are kept.
    pub fn reset_session(&mut self) -> Result<Vec<Effect>> {
        self.clock.reset();
        tracing::info!("[CLOCK] session reset");
        Ok(self.session_changed())
    }

    /// Add or update a player. Score and completion still only move forward.
    pub fn upsert_player(&mut self, mut player: PlayerRecord) -> Result<Vec<Effect>> {
        if player.id.is_empty() {
            return Err(SyncError::Validation("player id must not be empty".into()));
        }
        DependencyGraph::from_tasks(&player.tasks)?;
        let now = self.time.now_ms();
        player.updated_at_ms = player.updated_at_ms.max(now);

        let before = self.snapshot();
        let mut proposed = GameSnapshot::new(before.session.clone());
        proposed.players.insert(player.id.clone(), player);
        let merged = merge_snapshots(&before, &proposed);
        if merged == before {
            return Ok(Vec::new());
        }
        self.commit(merged);
        Ok(self.announce(&before, &self.snapshot()))
    }

    pub fn complete_task(
        &mut self,
        player_id: &str,
        task_id: &str,
        subtask_id: Option<&str>,
    ) -> Result<Vec<Effect>> {
        let now = self.time.now_ms();
        let completion = TaskCompletion {
            player_id: player_id.to_string(),
            task_id: task_id.to_string(),
            subtask_id: subtask_id.map(str::to_string),
        };
        let proposed = self.completion_proposal(&completion, now)?;
        let before = self.snapshot();
        let merged = merge_snapshots(&before, &proposed);
        if merged == before {
            return Ok(Vec::new());
        }
        self.commit(merged);
        let mut effects = vec![self.outbound(EventPayload::TaskCompletion(completion))];
        if let Some(player) = self.players.get(player_id) {
            effects.push(self.outbound(EventPayload::PlayerUpdate(player.clone())));
        }
        Ok(effects)
    }
}
