use roundsync::EngineHandle;
use roundsync_replication::ReplicationManager;
use std::sync::Arc;

pub mod health;
pub mod internal;
pub mod players;
pub mod session;

pub struct AppState {
    pub node_id: String,
    pub engine: EngineHandle,
    pub replication_manager: Option<Arc<ReplicationManager>>,
}

pub use health::health;
pub use internal::{receive_event, replication_status};
pub use players::{complete_task, upsert_player};
pub use session::{
    get_conflicts, get_snapshot, get_status, pause_session, reset_recovery, reset_session,
    resume_session, start_session,
};
