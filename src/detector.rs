//! Conflict detection between the local authoritative snapshot and a proposed
//! remote one.
//!
//! Pure and deterministic: checks run session → player → task → subtask, and
//! players/tasks/subtasks are visited in a fixed order (player id order, then
//! local list order followed by remote-only entries). Running detection on a
//! resolver's output is how resolution idempotence is verified.

use crate::resolver::ResolutionStrategy;
use crate::types::{
    GameSnapshot, PlayerId, PlayerRecord, SessionState, SubtaskRecord, TaskId, TaskRecord,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Remaining-time drift tolerated before two session states conflict.
pub const SESSION_DRIFT_TOLERANCE_MS: u64 = 1000;
/// Score difference tolerated before two player records conflict.
pub const SCORE_TOLERANCE: u32 = 1;

/// Ordered coarsest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictLevel {
    Session,
    Player,
    Task,
    Subtask,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ConflictKind {
    RoundMismatch,
    PhaseMismatch,
    TimeDrift { drift_ms: u64 },
    /// Entity exists remotely but not locally.
    MissingLocal,
    /// Entity exists locally but not remotely.
    MissingRemote,
    ScoreDrift { delta: u32 },
    CompletionMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub id: PlayerId,
    pub name: String,
    pub score: u32,
    pub task_count: usize,
}

impl From<&PlayerRecord> for PlayerSummary {
    fn from(p: &PlayerRecord) -> Self {
        PlayerSummary {
            id: p.id.clone(),
            name: p.name.clone(),
            score: p.score,
            task_count: p.tasks.len(),
        }
    }
}

/// The conflicting entity as each side saw it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", content = "state", rename_all = "lowercase")]
pub enum EntityState {
    Session(SessionState),
    Player(PlayerSummary),
    Task(TaskRecord),
    Subtask(SubtaskRecord),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRecord {
    pub level: ConflictLevel,
    pub kind: ConflictKind,
    /// Path to the entity: `[]`, `[player]`, `[player, task]` or `[player, task, subtask]`.
    pub entity_ids: Vec<String>,
    pub local: Option<EntityState>,
    pub remote: Option<EntityState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<ResolutionStrategy>,
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub related_conflicts: usize,
    #[serde(default)]
    pub resolved_at_ms: i64,
}

impl ConflictRecord {
    fn new(
        level: ConflictLevel,
        kind: ConflictKind,
        entity_ids: Vec<String>,
        local: Option<EntityState>,
        remote: Option<EntityState>,
    ) -> Self {
        ConflictRecord {
            level,
            kind,
            entity_ids,
            local,
            remote,
            strategy: None,
            forced: false,
            related_conflicts: 0,
            resolved_at_ms: 0,
        }
    }
}

/// Every conflict between `local` and `remote`, coarsest level first.
pub fn detect_conflicts(local: &GameSnapshot, remote: &GameSnapshot) -> Vec<ConflictRecord> {
    let mut out = Vec::new();
    session_conflicts(&local.session, &remote.session, &mut out);
    player_conflicts(local, remote, &mut out);
    // one pass per level; the sort is stable so visiting order survives
    out.sort_by_key(|c| c.level);
    out
}

pub fn first_conflict(local: &GameSnapshot, remote: &GameSnapshot) -> Option<ConflictRecord> {
    detect_conflicts(local, remote).into_iter().next()
}

pub fn has_conflict(local: &GameSnapshot, remote: &GameSnapshot) -> bool {
    !detect_conflicts(local, remote).is_empty()
}

pub fn session_conflict(local: &SessionState, remote: &SessionState) -> Option<ConflictKind> {
    if local.round != remote.round {
        return Some(ConflictKind::RoundMismatch);
    }
    if local.phase != remote.phase || local.effective_phase() != remote.effective_phase() {
        return Some(ConflictKind::PhaseMismatch);
    }
    let drift_ms = local.remaining_ms.abs_diff(remote.remaining_ms);
    if drift_ms > SESSION_DRIFT_TOLERANCE_MS {
        return Some(ConflictKind::TimeDrift { drift_ms });
    }
    None
}

fn session_conflicts(local: &SessionState, remote: &SessionState, out: &mut Vec<ConflictRecord>) {
    if let Some(kind) = session_conflict(local, remote) {
        out.push(ConflictRecord::new(
            ConflictLevel::Session,
            kind,
            Vec::new(),
            Some(EntityState::Session(local.clone())),
            Some(EntityState::Session(remote.clone())),
        ));
    }
}

fn player_conflicts(local: &GameSnapshot, remote: &GameSnapshot, out: &mut Vec<ConflictRecord>) {
    let ids: BTreeSet<&PlayerId> = local.players.keys().chain(remote.players.keys()).collect();
    for id in ids {
        let path = vec![id.clone()];
        match (local.players.get(id), remote.players.get(id)) {
            (Some(l), None) => out.push(ConflictRecord::new(
                ConflictLevel::Player,
                ConflictKind::MissingRemote,
                path,
                Some(EntityState::Player(l.into())),
                None,
            )),
            (None, Some(r)) => out.push(ConflictRecord::new(
                ConflictLevel::Player,
                ConflictKind::MissingLocal,
                path,
                None,
                Some(EntityState::Player(r.into())),
            )),
            (Some(l), Some(r)) => {
                let delta = l.score.abs_diff(r.score);
                if delta > SCORE_TOLERANCE {
                    out.push(ConflictRecord::new(
                        ConflictLevel::Player,
                        ConflictKind::ScoreDrift { delta },
                        path,
                        Some(EntityState::Player(l.into())),
                        Some(EntityState::Player(r.into())),
                    ));
                }
                task_conflicts(id, &l.tasks, &r.tasks, out);
            }
            (None, None) => {}
        }
    }
}

/// First occurrence wins; keeps list order.
fn index_by_id<T, F>(items: &[T], id: F) -> IndexMap<&str, &T>
where
    F: Fn(&T) -> &str,
{
    let mut map = IndexMap::with_capacity(items.len());
    for item in items {
        map.entry(id(item)).or_insert(item);
    }
    map
}

fn task_conflicts(
    player_id: &str,
    local: &[TaskRecord],
    remote: &[TaskRecord],
    out: &mut Vec<ConflictRecord>,
) {
    let local_by_id = index_by_id(local, |t| t.id.as_str());
    let remote_by_id = index_by_id(remote, |t| t.id.as_str());

    for (id, l) in &local_by_id {
        let path = vec![player_id.to_string(), id.to_string()];
        match remote_by_id.get(id) {
            None => out.push(ConflictRecord::new(
                ConflictLevel::Task,
                ConflictKind::MissingRemote,
                path,
                Some(EntityState::Task((*l).clone())),
                None,
            )),
            Some(r) => {
                if l.completed != r.completed {
                    out.push(ConflictRecord::new(
                        ConflictLevel::Task,
                        ConflictKind::CompletionMismatch,
                        path,
                        Some(EntityState::Task((*l).clone())),
                        Some(EntityState::Task((*r).clone())),
                    ));
                }
                subtask_conflicts(player_id, &l.id, &l.subtasks, &r.subtasks, out);
            }
        }
    }
    for (id, r) in &remote_by_id {
        if !local_by_id.contains_key(id) {
            out.push(ConflictRecord::new(
                ConflictLevel::Task,
                ConflictKind::MissingLocal,
                vec![player_id.to_string(), id.to_string()],
                None,
                Some(EntityState::Task((*r).clone())),
            ));
        }
    }
}

fn subtask_conflicts(
    player_id: &str,
    task_id: &TaskId,
    local: &[SubtaskRecord],
    remote: &[SubtaskRecord],
    out: &mut Vec<ConflictRecord>,
) {
    let local_by_id = index_by_id(local, |s| s.id.as_str());
    let remote_by_id = index_by_id(remote, |s| s.id.as_str());
    let path = |id: &str| vec![player_id.to_string(), task_id.clone(), id.to_string()];

    for (id, l) in &local_by_id {
        match remote_by_id.get(id) {
            None => out.push(ConflictRecord::new(
                ConflictLevel::Subtask,
                ConflictKind::MissingRemote,
                path(*id),
                Some(EntityState::Subtask((*l).clone())),
                None,
            )),
            Some(r) if l.completed != r.completed => out.push(ConflictRecord::new(
                ConflictLevel::Subtask,
                ConflictKind::CompletionMismatch,
                path(*id),
                Some(EntityState::Subtask((*l).clone())),
                Some(EntityState::Subtask((*r).clone())),
            )),
            Some(_) => {}
        }
    }
    for (id, r) in &remote_by_id {
        if !local_by_id.contains_key(id) {
            out.push(ConflictRecord::new(
                ConflictLevel::Subtask,
                ConflictKind::MissingLocal,
                path(*id),
                None,
                Some(EntityState::Subtask((*r).clone())),
            ));
        }
    }
}
