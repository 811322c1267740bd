use axum::{
    extract::{Query, State},
    Json,
};
use roundsync::{ConflictRecord, GameSnapshot, LocalCommand, SyncError};
use std::sync::Arc;

use super::AppState;
use crate::dto::{ConflictsQuery, StatusResponse};

pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GameSnapshot>, SyncError> {
    Ok(Json(state.engine.snapshot().await?))
}

/// Most recent audit records first.
pub async fn get_conflicts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConflictsQuery>,
) -> Result<Json<Vec<ConflictRecord>>, SyncError> {
    Ok(Json(state.engine.conflicts(params.limit()).await?))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, SyncError> {
    let engine = state.engine.status().await?;
    let replication = state.replication_manager.as_ref().map(|r| r.status());
    Ok(Json(StatusResponse {
        engine,
        replication,
    }))
}

pub async fn start_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GameSnapshot>, SyncError> {
    Ok(Json(state.engine.start_session().await?))
}

pub async fn pause_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GameSnapshot>, SyncError> {
    Ok(Json(state.engine.pause().await?))
}

pub async fn resume_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GameSnapshot>, SyncError> {
    Ok(Json(state.engine.resume().await?))
}

pub async fn reset_session(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GameSnapshot>, SyncError> {
    tracing::info!("[HTTP] session reset requested");
    Ok(Json(state.engine.reset_session().await?))
}

/// Operator escape hatch once reconnect attempts are exhausted.
pub async fn reset_recovery(
    State(state): State<Arc<AppState>>,
) -> Result<Json<GameSnapshot>, SyncError> {
    tracing::warn!("[HTTP] recovery reset requested");
    Ok(Json(state.engine.command(LocalCommand::ResetRecovery).await?))
}
