//! Conflict resolution.
//!
//! `latest` adopts the remote snapshot, `preserve` keeps the local one, and
//! `merge` unions the two field by field:
//! - score: `max(local, remote)`
//! - task/subtask `completed`: `local || remote`
//! - task/subtask lists: union by id, local order first, remote-only ids
//!   appended; duplicates fold together with the newer `updated_at_ms`
//!   winning plain fields. Equal stamps fall back to comparing the fields
//!   themselves so both peers pick the same winner.
//! - task dependencies: taken from the winning side, unless the merged list
//!   would contain a cycle; offending tasks then keep their local edges.
//!
//! Every rule is idempotent, so resolving an already-resolved snapshot
//! against itself detects nothing and returns it unchanged.

use crate::audit::AuditLog;
use crate::deps::DependencyGraph;
use crate::detector::{detect_conflicts, ConflictRecord};
use crate::intake::EventType;
use crate::types::{GameSnapshot, PlayerRecord, SessionState, SubtaskRecord, TaskRecord};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    Latest,
    Merge,
    Preserve,
}

impl ResolutionStrategy {
    /// Strategy table keyed by event type. Duplicates and echoes are handled
    /// by the caller, which passes `Preserve` directly.
    pub fn for_event(event_type: EventType) -> Self {
        match event_type {
            EventType::GameState => ResolutionStrategy::Latest,
            EventType::PlayerUpdate
            | EventType::TaskCompletion
            | EventType::SyncResponse
            | EventType::RecoveryResponse => ResolutionStrategy::Merge,
            EventType::SyncRequest
            | EventType::RecoveryRequest
            | EventType::Heartbeat
            | EventType::Error => ResolutionStrategy::Preserve,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::Latest => "latest",
            ResolutionStrategy::Merge => "merge",
            ResolutionStrategy::Preserve => "preserve",
        }
    }
}

/// The side with the greater key wins plain fields. Keys lead with the
/// update stamp; on a full tie local is kept, which is the same value.
fn newer<'a, T, K: Ord>(local: &'a T, remote: &'a T, key: impl Fn(&'a T) -> K) -> &'a T {
    if key(remote) > key(local) {
        remote
    } else {
        local
    }
}

pub fn merge_subtask(local: &SubtaskRecord, remote: &SubtaskRecord) -> SubtaskRecord {
    let winner = newer(local, remote, |s| (s.updated_at_ms, &s.title));
    SubtaskRecord {
        id: local.id.clone(),
        title: winner.title.clone(),
        completed: local.completed || remote.completed,
        updated_at_ms: local.updated_at_ms.max(remote.updated_at_ms),
    }
}

fn union_by_id<T: Clone>(
    local: &[T],
    remote: &[T],
    id: impl Fn(&T) -> &str,
    merge: impl Fn(&T, &T) -> T,
) -> Vec<T> {
    let mut merged: IndexMap<String, T> = IndexMap::with_capacity(local.len() + remote.len());
    for item in local.iter().chain(remote.iter()) {
        match merged.get_mut(id(item)) {
            Some(existing) => *existing = merge(existing, item),
            None => {
                merged.insert(id(item).to_string(), item.clone());
            }
        }
    }
    merged.into_values().collect()
}

pub fn merge_subtasks(local: &[SubtaskRecord], remote: &[SubtaskRecord]) -> Vec<SubtaskRecord> {
    union_by_id(local, remote, |s| s.id.as_str(), merge_subtask)
}

pub fn merge_task(local: &TaskRecord, remote: &TaskRecord) -> TaskRecord {
    let winner = newer(local, remote, |t| (t.updated_at_ms, &t.title, &t.depends_on));
    let mut task = TaskRecord {
        id: local.id.clone(),
        title: winner.title.clone(),
        completed: local.completed || remote.completed,
        subtasks: merge_subtasks(&local.subtasks, &remote.subtasks),
        depends_on: winner.depends_on.clone(),
        updated_at_ms: local.updated_at_ms.max(remote.updated_at_ms),
    };
    task.normalize_completion();
    task
}

pub fn merge_tasks(local: &[TaskRecord], remote: &[TaskRecord]) -> Vec<TaskRecord> {
    union_by_id(local, remote, |t| t.id.as_str(), merge_task)
}

/// Restore local dependency edges, task by task, until the merged list is
/// acyclic again.
fn break_merged_cycles(local: &[TaskRecord], merged: &mut [TaskRecord]) {
    for i in 0..merged.len() {
        let Err(e) = DependencyGraph::from_tasks(merged) else {
            return;
        };
        let local_edges = local
            .iter()
            .find(|t| t.id == merged[i].id)
            .map(|t| t.depends_on.clone())
            .unwrap_or_default();
        if merged[i].depends_on != local_edges {
            tracing::warn!(
                "[RESOLVE] {}; keeping local dependencies of {}",
                e,
                merged[i].id
            );
            merged[i].depends_on = local_edges;
        }
    }
}

pub fn merge_player(local: &PlayerRecord, remote: &PlayerRecord) -> PlayerRecord {
    let winner = newer(local, remote, |p| (p.updated_at_ms, &p.name));
    let mut tasks = merge_tasks(&local.tasks, &remote.tasks);
    break_merged_cycles(&local.tasks, &mut tasks);
    PlayerRecord {
        id: local.id.clone(),
        name: winner.name.clone(),
        score: local.score.max(remote.score),
        tasks,
        updated_at_ms: local.updated_at_ms.max(remote.updated_at_ms),
    }
}

/// The session state that is further along wins: later round, then later
/// phase, then less time remaining. Ties keep local.
pub fn merge_session(local: &SessionState, remote: &SessionState) -> SessionState {
    let progress = |s: &SessionState| {
        (
            s.round,
            s.effective_phase().progress_rank(),
            Reverse(s.remaining_ms),
        )
    };
    if progress(remote) > progress(local) {
        remote.clone()
    } else {
        local.clone()
    }
}

pub fn merge_snapshots(local: &GameSnapshot, remote: &GameSnapshot) -> GameSnapshot {
    let mut players = local.players.clone();
    for (id, r) in &remote.players {
        let merged = match players.get(id) {
            Some(l) => merge_player(l, r),
            None => r.clone(),
        };
        players.insert(id.clone(), merged);
    }
    GameSnapshot {
        session: merge_session(&local.session, &remote.session),
        players,
    }
}

fn normalized(mut snapshot: GameSnapshot) -> GameSnapshot {
    for player in snapshot.players.values_mut() {
        for task in &mut player.tasks {
            task.normalize_completion();
        }
    }
    snapshot
}

pub fn apply_strategy(
    strategy: ResolutionStrategy,
    local: &GameSnapshot,
    remote: &GameSnapshot,
) -> GameSnapshot {
    match strategy {
        ResolutionStrategy::Latest => normalized(remote.clone()),
        ResolutionStrategy::Merge => merge_snapshots(local, remote),
        ResolutionStrategy::Preserve => local.clone(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub snapshot: GameSnapshot,
    pub strategy: ResolutionStrategy,
    /// The audit entry written for this resolution; `None` when nothing conflicted.
    pub record: Option<ConflictRecord>,
    pub conflicts: usize,
}

impl Resolution {
    pub fn changed(&self, before: &GameSnapshot) -> bool {
        &self.snapshot != before
    }
}

/// Applies strategies and owns the conflict audit log.
pub struct ConflictResolver {
    audit: AuditLog,
}

impl ConflictResolver {
    pub fn new(audit_capacity: usize) -> Self {
        ConflictResolver {
            audit: AuditLog::new(audit_capacity),
        }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn resolve(
        &mut self,
        local: &GameSnapshot,
        remote: &GameSnapshot,
        strategy: ResolutionStrategy,
        now_ms: i64,
    ) -> Resolution {
        self.resolve_inner(local, remote, strategy, false, now_ms)
    }

    /// `latest`-wins fallback when recovery cannot converge.
    pub fn force(&mut self, local: &GameSnapshot, remote: &GameSnapshot, now_ms: i64) -> Resolution {
        self.resolve_inner(local, remote, ResolutionStrategy::Latest, true, now_ms)
    }

    fn resolve_inner(
        &mut self,
        local: &GameSnapshot,
        remote: &GameSnapshot,
        strategy: ResolutionStrategy,
        forced: bool,
        now_ms: i64,
    ) -> Resolution {
        let conflicts = detect_conflicts(local, remote);
        let count = conflicts.len();
        // differences under the detector's tolerances still take the
        // strategy, they just leave no audit entry
        let Some(mut record) = conflicts.into_iter().next() else {
            return Resolution {
                snapshot: apply_strategy(strategy, local, remote),
                strategy,
                record: None,
                conflicts: 0,
            };
        };
        record.strategy = Some(strategy);
        record.forced = forced;
        record.related_conflicts = count - 1;
        record.resolved_at_ms = now_ms;

        if forced {
            tracing::warn!(
                "[RESOLVE] forced {} resolution over {} conflicts (first: {:?} {:?})",
                strategy.as_str(),
                count,
                record.level,
                record.entity_ids
            );
        } else {
            tracing::info!(
                "[RESOLVE] {} resolution over {} conflicts (first: {:?} {:?})",
                strategy.as_str(),
                count,
                record.level,
                record.entity_ids
            );
        }
        self.audit.append(record.clone());

        Resolution {
            snapshot: apply_strategy(strategy, local, remote),
            strategy,
            record: Some(record),
            conflicts: count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{first_conflict, ConflictKind, ConflictLevel};
    use crate::types::Phase;

    fn sample(name: &str, score: u32, updated_at_ms: i64) -> PlayerRecord {
        let mut player = PlayerRecord::new("p", name).with_score(score);
        player.updated_at_ms = updated_at_ms;
        player
    }

    fn session(round: u32, phase: Phase, remaining_ms: u64) -> SessionState {
        SessionState {
            round,
            phase,
            remaining_ms,
            resume_phase: None,
        }
    }

    #[test]
    fn test_subtask_union_by_id() {
        let a = vec![SubtaskRecord::new("1", false), SubtaskRecord::new("2", true)];
        let b = vec![SubtaskRecord::new("2", false), SubtaskRecord::new("3", true)];
        let merged = merge_subtasks(&a, &b);
        let flat: Vec<(&str, bool)> = merged.iter().map(|s| (s.id.as_str(), s.completed)).collect();
        assert_eq!(flat, vec![("1", false), ("2", true), ("3", true)]);
    }

    #[test]
    fn test_duplicate_ids_fold_with_newer_fields() {
        let mut old = SubtaskRecord::new("1", true);
        old.title = "old".into();
        old.updated_at_ms = 10;
        let mut new = SubtaskRecord::new("1", false);
        new.title = "new".into();
        new.updated_at_ms = 20;

        let merged = merge_subtasks(&[old.clone(), new.clone()], &[]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].title, "new");
        assert!(merged[0].completed);
        assert_eq!(merged[0].updated_at_ms, 20);
    }

    #[test]
    fn test_merge_completion_is_or() {
        for (l, r) in [(false, false), (false, true), (true, false), (true, true)] {
            let merged = merge_task(&TaskRecord::new("t", l), &TaskRecord::new("t", r));
            assert_eq!(merged.completed, l || r);
            let merged = merge_subtask(&SubtaskRecord::new("s", l), &SubtaskRecord::new("s", r));
            assert_eq!(merged.completed, l || r);
        }
    }

    #[test]
    fn test_merge_score_is_max() {
        for (l, r) in [(0, 0), (3, 9), (9, 3), (7, 7)] {
            let merged = merge_player(
                &PlayerRecord::new("p", "P").with_score(l),
                &PlayerRecord::new("p", "P").with_score(r),
            );
            assert_eq!(merged.score, l.max(r));
        }
    }

    #[test]
    fn test_merge_marks_task_done_when_all_subtasks_done() {
        let local = TaskRecord::new("t", false).with_subtasks(vec![
            SubtaskRecord::new("a", true),
            SubtaskRecord::new("b", false),
        ]);
        let remote = TaskRecord::new("t", false).with_subtasks(vec![SubtaskRecord::new("b", true)]);
        assert!(merge_task(&local, &remote).completed);
    }

    #[test]
    fn test_equal_stamps_pick_the_same_winner_on_both_sides() {
        let mut a = PlayerRecord::new("p", "Ada");
        a.updated_at_ms = 50;
        let mut b = PlayerRecord::new("p", "Ada Lovelace");
        b.updated_at_ms = 50;
        assert_eq!(merge_player(&a, &b), merge_player(&b, &a));

        let mut x = TaskRecord::new("t", false);
        x.depends_on = vec!["u".into()];
        let y = TaskRecord::new("t", false);
        assert_eq!(merge_task(&x, &y).depends_on, merge_task(&y, &x).depends_on);
    }

    #[test]
    fn test_merged_dependencies_stay_acyclic() {
        // local: a -> b, newer on a; remote: b -> a, newer on b
        let mut la = TaskRecord::new("a", false);
        la.depends_on = vec!["b".into()];
        la.updated_at_ms = 20;
        let mut lb = TaskRecord::new("b", false);
        lb.updated_at_ms = 10;
        let mut ra = TaskRecord::new("a", false);
        ra.updated_at_ms = 10;
        let mut rb = TaskRecord::new("b", false);
        rb.depends_on = vec!["a".into()];
        rb.updated_at_ms = 20;

        let local = PlayerRecord::new("p", "P").with_tasks(vec![la, lb]);
        let remote = PlayerRecord::new("p", "P").with_tasks(vec![ra, rb]);
        let merged = merge_player(&local, &remote);

        assert!(DependencyGraph::from_tasks(&merged.tasks).is_ok());
        assert_eq!(merged.task("a").unwrap().depends_on, vec!["b".to_string()]);
        assert!(merged.task("b").unwrap().depends_on.is_empty());
    }

    #[test]
    fn test_difference_under_tolerance_still_takes_strategy() {
        let base = GameSnapshot::new(session(1, Phase::Work, 0));
        let local = base.clone().with_player(sample("Ada", 2, 10));
        let remote = base.with_player(sample("Ada Lovelace", 3, 20));
        assert!(first_conflict(&local, &remote).is_none());

        let mut resolver = ConflictResolver::new(10);
        let resolution = resolver.resolve(&local, &remote, ResolutionStrategy::Merge, 1);
        let player = &resolution.snapshot.players["p"];
        assert_eq!(player.name, "Ada Lovelace");
        assert_eq!(player.score, 3);
        assert!(resolution.record.is_none());
        assert_eq!(resolution.conflicts, 0);
        assert!(resolver.audit().is_empty());

        let kept = resolver.resolve(&local, &remote, ResolutionStrategy::Preserve, 2);
        assert_eq!(kept.snapshot, local);
    }

    #[test]
    fn test_merge_session_prefers_further_along() {
        let local = session(2, Phase::Work, 5000);
        assert_eq!(merge_session(&local, &session(3, Phase::Work, 9000)).round, 3);
        assert_eq!(
            merge_session(&local, &session(2, Phase::Action, 9000)).phase,
            Phase::Action
        );
        assert_eq!(
            merge_session(&local, &session(2, Phase::Work, 3000)).remaining_ms,
            3000
        );
        assert_eq!(merge_session(&local, &session(1, Phase::Action, 0)), local);
    }

    #[test]
    fn test_latest_adopts_remote_session_on_drift() {
        let local = GameSnapshot::new(session(3, Phase::Work, 600_000));
        let remote = GameSnapshot::new(session(3, Phase::Work, 598_500));
        let mut resolver = ConflictResolver::new(10);
        let resolution = resolver.resolve(&local, &remote, ResolutionStrategy::Latest, 1);
        assert_eq!(resolution.snapshot.session.remaining_ms, 598_500);
        let record = resolution.record.unwrap();
        assert_eq!(record.level, ConflictLevel::Session);
        assert_eq!(record.strategy, Some(ResolutionStrategy::Latest));
        assert_eq!(resolver.audit().len(), 1);
    }

    #[test]
    fn test_merge_restores_completed_task() {
        let base = GameSnapshot::new(session(1, Phase::Work, 0));
        let local = base
            .clone()
            .with_player(PlayerRecord::new("P", "P").with_tasks(vec![TaskRecord::new("T1", true)]));
        let remote = base.with_player(PlayerRecord::new("P", "P"));

        assert_eq!(
            first_conflict(&local, &remote).unwrap().kind,
            ConflictKind::MissingRemote
        );
        let mut resolver = ConflictResolver::new(10);
        let resolution = resolver.resolve(&local, &remote, ResolutionStrategy::Merge, 1);
        let task = resolution.snapshot.players["P"].task("T1").unwrap();
        assert!(task.completed);
    }

    #[test]
    fn test_preserve_keeps_local() {
        let local = GameSnapshot::new(session(2, Phase::Work, 100));
        let remote = GameSnapshot::new(session(4, Phase::Action, 100));
        let mut resolver = ConflictResolver::new(10);
        let resolution = resolver.resolve(&local, &remote, ResolutionStrategy::Preserve, 1);
        assert_eq!(resolution.snapshot, local);
        assert_eq!(resolution.conflicts, 1);
        assert_eq!(resolver.audit().len(), 1);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let base = GameSnapshot::new(session(1, Phase::Work, 0));
        let local = base.clone().with_player(
            PlayerRecord::new("P", "P")
                .with_score(4)
                .with_tasks(vec![TaskRecord::new("a", true), TaskRecord::new("b", false)]),
        );
        let remote = base.with_player(
            PlayerRecord::new("P", "P")
                .with_score(9)
                .with_tasks(vec![TaskRecord::new("b", true), TaskRecord::new("c", false)]),
        );

        for strategy in [
            ResolutionStrategy::Latest,
            ResolutionStrategy::Merge,
            ResolutionStrategy::Preserve,
        ] {
            let mut resolver = ConflictResolver::new(10);
            let once = resolver.resolve(&local, &remote, strategy, 1).snapshot;
            let twice = resolver.resolve(&once, &once, strategy, 2);
            assert!(twice.record.is_none());
            assert_eq!(twice.snapshot, once);
            assert_eq!(resolver.audit().len(), 1);
        }

        let merged = merge_snapshots(&local, &remote);
        assert_eq!(merge_snapshots(&merged, &remote), merged);
        assert_eq!(merge_snapshots(&merged, &local), merged);
    }

    #[test]
    fn test_force_marks_record() {
        let local = GameSnapshot::new(session(1, Phase::Work, 0));
        let remote = GameSnapshot::new(session(2, Phase::Work, 0));
        let mut resolver = ConflictResolver::new(10);
        let resolution = resolver.force(&local, &remote, 5);
        assert_eq!(resolution.snapshot, remote);
        assert!(resolver.audit().last().unwrap().forced);
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(
            ResolutionStrategy::for_event(EventType::GameState),
            ResolutionStrategy::Latest
        );
        assert_eq!(
            ResolutionStrategy::for_event(EventType::TaskCompletion),
            ResolutionStrategy::Merge
        );
        assert_eq!(
            ResolutionStrategy::for_event(EventType::Heartbeat),
            ResolutionStrategy::Preserve
        );
    }
}
