use serde::{Deserialize, Serialize};

/// Reply body of `POST /internal/events`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAck {
    pub accepted: bool,
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub peer_id: String,
    pub addr: String,
    /// Unix millis of the last successful exchange; 0 if never.
    pub last_success_ms: i64,
    pub consecutive_failures: u32,
}

/// Replication view for monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub node_id: String,
    pub replication_enabled: bool,
    pub peer_count: usize,
    pub peers: Vec<PeerStatus>,
}
