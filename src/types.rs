use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type PlayerId = String;
pub type TaskId = String;
pub type SubtaskId = String;

/// What the session is currently doing.
///
/// `Paused` is an overlay: while paused, [`SessionState::resume_phase`] holds
/// the underlying `Work`/`Action` phase the countdown will continue in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Setup,
    Work,
    Action,
    Paused,
    Ended,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Work => "work",
            Phase::Action => "action",
            Phase::Paused => "paused",
            Phase::Ended => "ended",
        }
    }

    /// Position along a round; used to decide which of two session states is
    /// further along. Callers rank a paused session by its `effective_phase()`;
    /// a bare `Paused` ranks with Work.
    pub(crate) fn progress_rank(&self) -> u8 {
        match self {
            Phase::Setup => 0,
            Phase::Work => 1,
            Phase::Action => 2,
            Phase::Paused => 1,
            Phase::Ended => 3,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub round: u32,
    pub phase: Phase,
    pub remaining_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_phase: Option<Phase>,
}

impl SessionState {
    pub fn setup() -> Self {
        SessionState {
            round: 1,
            phase: Phase::Setup,
            remaining_ms: 0,
            resume_phase: None,
        }
    }

    /// The phase the countdown belongs to, looking through a pause.
    pub fn effective_phase(&self) -> Phase {
        match (self.phase, self.resume_phase) {
            (Phase::Paused, Some(underlying)) => underlying,
            (phase, _) => phase,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.phase == Phase::Paused
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::setup()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskRecord {
    pub id: SubtaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub updated_at_ms: i64,
}

impl SubtaskRecord {
    pub fn new(id: impl Into<String>, completed: bool) -> Self {
        SubtaskRecord {
            id: id.into(),
            title: String::new(),
            completed,
            updated_at_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: TaskId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub subtasks: Vec<SubtaskRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub updated_at_ms: i64,
}

impl TaskRecord {
    pub fn new(id: impl Into<String>, completed: bool) -> Self {
        TaskRecord {
            id: id.into(),
            title: String::new(),
            completed,
            subtasks: Vec::new(),
            depends_on: Vec::new(),
            updated_at_ms: 0,
        }
    }

    pub fn with_subtasks(mut self, subtasks: Vec<SubtaskRecord>) -> Self {
        self.subtasks = subtasks;
        self
    }

    pub fn subtask(&self, id: &str) -> Option<&SubtaskRecord> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    /// True when the task has subtasks and every one of them is complete.
    pub fn all_subtasks_completed(&self) -> bool {
        !self.subtasks.is_empty() && self.subtasks.iter().all(|s| s.completed)
    }

    /// Mark the task complete if every subtask is. Returns true if it changed.
    pub fn normalize_completion(&mut self) -> bool {
        if !self.completed && self.all_subtasks_completed() {
            self.completed = true;
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: PlayerId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
    #[serde(default)]
    pub updated_at_ms: i64,
}

impl PlayerRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        PlayerRecord {
            id: id.into(),
            name: name.into(),
            score: 0,
            tasks: Vec::new(),
            updated_at_ms: 0,
        }
    }

    pub fn with_score(mut self, score: u32) -> Self {
        self.score = score;
        self
    }

    pub fn with_tasks(mut self, tasks: Vec<TaskRecord>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn task(&self, id: &str) -> Option<&TaskRecord> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut TaskRecord> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Equality that ignores the order of tasks and subtasks. Two peers that
    /// merged the same records from opposite sides hold the same state.
    pub fn same_state(&self, other: &PlayerRecord) -> bool {
        self == other || self.sorted_by_id() == other.sorted_by_id()
    }

    fn sorted_by_id(&self) -> PlayerRecord {
        let mut player = self.clone();
        player.tasks.sort_by(|a, b| a.id.cmp(&b.id));
        for task in &mut player.tasks {
            task.subtasks.sort_by(|a, b| a.id.cmp(&b.id));
        }
        player
    }
}

/// Immutable copy of the whole session graph. Everything outside the engine
/// only ever sees one of these.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub session: SessionState,
    #[serde(default)]
    pub players: BTreeMap<PlayerId, PlayerRecord>,
}

impl GameSnapshot {
    pub fn new(session: SessionState) -> Self {
        GameSnapshot {
            session,
            players: BTreeMap::new(),
        }
    }

    pub fn with_player(mut self, player: PlayerRecord) -> Self {
        self.players.insert(player.id.clone(), player);
        self
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.players.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_serializes_lowercase() {
        let json = serde_json::to_string(&Phase::Work).unwrap();
        assert_eq!(json, "\"work\"");
        let phase: Phase = serde_json::from_str("\"action\"").unwrap();
        assert_eq!(phase, Phase::Action);
    }

    #[test]
    fn test_session_wire_shape() {
        let session: SessionState = serde_json::from_value(serde_json::json!({
            "round": 3,
            "phase": "work",
            "remainingMs": 600000
        }))
        .unwrap();
        assert_eq!(session.round, 3);
        assert_eq!(session.remaining_ms, 600_000);
        assert_eq!(session.resume_phase, None);
    }

    #[test]
    fn test_effective_phase_looks_through_pause() {
        let session = SessionState {
            round: 2,
            phase: Phase::Paused,
            remaining_ms: 1000,
            resume_phase: Some(Phase::Action),
        };
        assert_eq!(session.effective_phase(), Phase::Action);
        assert!(session.is_paused());
    }

    #[test]
    fn test_paused_session_ranks_by_underlying_phase() {
        let paused_action = SessionState {
            round: 1,
            phase: Phase::Paused,
            remaining_ms: 100,
            resume_phase: Some(Phase::Action),
        };
        assert_eq!(
            paused_action.effective_phase().progress_rank(),
            Phase::Action.progress_rank()
        );
        assert_eq!(Phase::Paused.progress_rank(), Phase::Work.progress_rank());
        assert!(Phase::Setup.progress_rank() < Phase::Work.progress_rank());
        assert!(Phase::Action.progress_rank() < Phase::Ended.progress_rank());
    }

    #[test]
    fn test_same_state_ignores_list_order() {
        let forward = PlayerRecord::new("p", "P").with_tasks(vec![
            TaskRecord::new("a", false),
            TaskRecord::new("b", true),
        ]);
        let mut backward = forward.clone();
        backward.tasks.reverse();
        assert_ne!(forward, backward);
        assert!(forward.same_state(&backward));
        assert!(!forward.same_state(&backward.clone().with_score(1)));
    }

    #[test]
    fn test_normalize_completion() {
        let mut task = TaskRecord::new("t1", false).with_subtasks(vec![
            SubtaskRecord::new("a", true),
            SubtaskRecord::new("b", true),
        ]);
        assert!(task.normalize_completion());
        assert!(task.completed);

        let mut empty = TaskRecord::new("t2", false);
        assert!(!empty.normalize_completion());
        assert!(!empty.completed);
    }
}
