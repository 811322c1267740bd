use roundsync::{EngineStatus, TaskRecord};
use roundsync_replication::types::ReplicationStatus;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFLICT_LIMIT: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ConflictsQuery {
    pub limit: Option<usize>,
}

impl ConflictsQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_CONFLICT_LIMIT)
    }
}

/// Body of `PUT /players/:id`. The id comes from the path.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertPlayerRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub score: u32,
    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    #[serde(default)]
    pub subtask_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub engine: EngineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication: Option<ReplicationStatus>,
}
