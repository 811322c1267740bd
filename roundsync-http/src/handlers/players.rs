use axum::{
    extract::{Path, State},
    Json,
};
use roundsync::{GameSnapshot, PlayerRecord, SyncError};
use std::sync::Arc;

use super::AppState;
use crate::dto::{CompleteTaskRequest, UpsertPlayerRequest};

/// PUT /players/:id
pub async fn upsert_player(
    State(state): State<Arc<AppState>>,
    Path(player_id): Path<String>,
    Json(req): Json<UpsertPlayerRequest>,
) -> Result<Json<GameSnapshot>, SyncError> {
    let player = PlayerRecord::new(player_id, req.name)
        .with_score(req.score)
        .with_tasks(req.tasks);
    Ok(Json(state.engine.upsert_player(player).await?))
}

/// POST /players/:id/tasks/:task_id/complete
///
/// The body is optional; `{"subtaskId": "..."}` completes a single subtask.
pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path((player_id, task_id)): Path<(String, String)>,
    body: Option<Json<CompleteTaskRequest>>,
) -> Result<Json<GameSnapshot>, SyncError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let snapshot = state
        .engine
        .complete_task(&player_id, &task_id, req.subtask_id.as_deref())
        .await?;
    Ok(Json(snapshot))
}
