use crate::handlers::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use roundsync::SyncError;
use roundsync_replication::types::{EventAck, ReplicationStatus};
use std::sync::Arc;

/// POST /internal/events
/// Raw envelope from a peer. Only intake validation is reported back;
/// stale or conflicting events are still accepted and settled by the engine.
pub async fn receive_event(
    State(state): State<Arc<AppState>>,
    Json(raw): Json<serde_json::Value>,
) -> Result<impl IntoResponse, SyncError> {
    state.engine.submit(raw).await.map_err(|e| {
        tracing::debug!("[INTAKE] rejected inbound envelope: {}", e);
        e
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAck {
            accepted: true,
            node_id: state.node_id.clone(),
        }),
    ))
}

/// GET /internal/status
pub async fn replication_status(State(state): State<Arc<AppState>>) -> Json<ReplicationStatus> {
    let status = match &state.replication_manager {
        Some(repl) => repl.status(),
        None => ReplicationStatus {
            node_id: state.node_id.clone(),
            replication_enabled: false,
            peer_count: 0,
            peers: vec![],
        },
    };
    Json(status)
}
