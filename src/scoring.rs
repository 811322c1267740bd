use crate::types::PlayerRecord;

/// Computes a player's score from their task state. The engine never lets
/// a computed score lower the stored one.
pub trait ScoreCalculator: Send + Sync {
    fn score(&self, player: &PlayerRecord) -> u32;
}

/// Flat points per completed task and per completed subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionScorer {
    pub points_per_task: u32,
    pub points_per_subtask: u32,
}

impl Default for CompletionScorer {
    fn default() -> Self {
        CompletionScorer {
            points_per_task: 10,
            points_per_subtask: 2,
        }
    }
}

impl ScoreCalculator for CompletionScorer {
    fn score(&self, player: &PlayerRecord) -> u32 {
        player.tasks.iter().fold(0u32, |acc, task| {
            let subtasks = task.subtasks.iter().filter(|s| s.completed).count() as u32;
            let task_points = if task.completed {
                self.points_per_task
            } else {
                0
            };
            acc.saturating_add(task_points)
                .saturating_add(subtasks.saturating_mul(self.points_per_subtask))
        })
    }
}
