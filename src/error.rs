use http::StatusCode;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Invalid event: {0}")]
    Validation(String),

    #[error("Stale event: timestamp {timestamp_ms} outside window [{window_start}, {window_end}]")]
    Stale {
        timestamp_ms: i64,
        window_start: i64,
        window_end: i64,
    },

    #[error("Unresolved conflict: {0}")]
    Conflict(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Recovery exhausted after {attempts} reconnect attempts")]
    RecoveryExhausted { attempts: u32 },

    #[error("Session has ended")]
    SessionEnded,

    #[error("Invalid phase transition: cannot {action} while {phase}")]
    InvalidTransition { action: String, phase: String },

    #[error("No persisted snapshot found")]
    SnapshotNotFound,

    #[error("Task dependency cycle: {0}")]
    DependencyCycle(String),

    #[error("Player not found: {0}")]
    UnknownPlayer(String),

    #[error("Task not found: {0}")]
    UnknownTask(String),

    #[error("Event queue full ({0} events pending)")]
    QueueFull(usize),

    #[error("Sync engine stopped")]
    EngineStopped,

    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(e: std::io::Error) -> Self {
        SyncError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Json(e.to_string())
    }
}

impl SyncError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::Validation(_) => StatusCode::BAD_REQUEST,
            SyncError::Stale { .. } => StatusCode::GONE,
            SyncError::Conflict(_) => StatusCode::CONFLICT,
            SyncError::Connection(_) => StatusCode::BAD_GATEWAY,
            SyncError::RecoveryExhausted { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::SessionEnded => StatusCode::CONFLICT,
            SyncError::InvalidTransition { .. } => StatusCode::CONFLICT,
            SyncError::SnapshotNotFound => StatusCode::NOT_FOUND,
            SyncError::DependencyCycle(_) => StatusCode::BAD_REQUEST,
            SyncError::UnknownPlayer(_) => StatusCode::NOT_FOUND,
            SyncError::UnknownTask(_) => StatusCode::NOT_FOUND,
            SyncError::QueueFull(_) => StatusCode::TOO_MANY_REQUESTS,
            SyncError::EngineStopped => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            SyncError::Json(_) => StatusCode::BAD_REQUEST,
            SyncError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            SyncError::Validation(_) => "invalid_event",
            SyncError::Stale { .. } => "stale_event",
            SyncError::Conflict(_) => "conflict",
            SyncError::Connection(_) => "connection_error",
            SyncError::RecoveryExhausted { .. } => "recovery_exhausted",
            SyncError::SessionEnded => "session_ended",
            SyncError::InvalidTransition { .. } => "invalid_transition",
            SyncError::SnapshotNotFound => "snapshot_not_found",
            SyncError::DependencyCycle(_) => "dependency_cycle",
            SyncError::UnknownPlayer(_) => "player_not_found",
            SyncError::UnknownTask(_) => "task_not_found",
            SyncError::QueueFull(_) => "queue_full",
            SyncError::EngineStopped => "engine_stopped",
            SyncError::Io(_) => "io_error",
            SyncError::Json(_) => "json_error",
            SyncError::Config(_) => "config_error",
        }
    }
}

// Axum IntoResponse implementation (feature-gated)
#[cfg(feature = "axum-support")]
use axum::response::{IntoResponse, Json, Response};
#[cfg(feature = "axum-support")]
use serde::Serialize;

#[cfg(feature = "axum-support")]
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

#[cfg(feature = "axum-support")]
impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let suggestion = match &self {
            SyncError::QueueFull(_) => Some("Retry after a short delay".to_string()),
            SyncError::RecoveryExhausted { .. } => {
                Some("Check peer connectivity and restart the session node".to_string())
            }
            SyncError::Stale { .. } => Some("Check clock skew between peers".to_string()),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.error_code().to_string(),
            message: self.to_string(),
            request_id: format!("req_rs_{}", uuid::Uuid::new_v4()),
            suggestion,
        };

        let mut response = (self.status_code(), Json(body)).into_response();
        if matches!(&self, SyncError::QueueFull(_)) {
            response
                .headers_mut()
                .insert("Retry-After", http::HeaderValue::from_static("1"));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        let err: SyncError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, SyncError::Io(ref m) if m.contains("gone")));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_only_exhaustion_is_service_unavailable_for_recovery() {
        assert_eq!(
            SyncError::RecoveryExhausted { attempts: 6 }.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            SyncError::Validation("missing type".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_display_messages() {
        let err = SyncError::Stale {
            timestamp_ms: 10,
            window_start: 100,
            window_end: 200,
        };
        assert_eq!(
            err.to_string(),
            "Stale event: timestamp 10 outside window [100, 200]"
        );
        assert_eq!(
            SyncError::RecoveryExhausted { attempts: 6 }.to_string(),
            "Recovery exhausted after 6 reconnect attempts"
        );
    }
}
