use axum::{extract::State, Json};
use std::sync::Arc;

use super::AppState;

/// Answers without a round trip through the engine so peers can probe us
/// even while the command queue is busy.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let connection = *state.engine.connection().borrow();
    let peers = state
        .replication_manager
        .as_ref()
        .map(|r| r.peer_count())
        .unwrap_or(0);

    Json(serde_json::json!({
        "status": "ok",
        "node_id": state.node_id,
        "connection": connection,
        "peers": peers,
        "build_profile": if cfg!(debug_assertions) { "debug" } else { "release" },
    }))
}
