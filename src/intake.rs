//! Event intake: validates raw envelopes into typed events and orders them in
//! a priority queue.
//!
//! Queue order is `(priority desc, timestamp asc, arrival asc)`, which gives a
//! single deterministic processing schedule even for simultaneous events.

use crate::deps::DependencyGraph;
use crate::error::{Result, SyncError};
use crate::types::{GameSnapshot, PlayerId, PlayerRecord, SessionState, SubtaskId, TaskId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    GameState,
    PlayerUpdate,
    TaskCompletion,
    SyncRequest,
    SyncResponse,
    RecoveryRequest,
    RecoveryResponse,
    Heartbeat,
    Error,
}

pub const PRIORITY_STATE: u8 = 3;
pub const PRIORITY_UPDATE: u8 = 2;
pub const PRIORITY_LIVENESS: u8 = 1;

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::GameState => "game-state",
            EventType::PlayerUpdate => "player-update",
            EventType::TaskCompletion => "task-completion",
            EventType::SyncRequest => "sync-request",
            EventType::SyncResponse => "sync-response",
            EventType::RecoveryRequest => "recovery-request",
            EventType::RecoveryResponse => "recovery-response",
            EventType::Heartbeat => "heartbeat",
            EventType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "game-state" => Some(EventType::GameState),
            "player-update" => Some(EventType::PlayerUpdate),
            "task-completion" => Some(EventType::TaskCompletion),
            "sync-request" => Some(EventType::SyncRequest),
            "sync-response" => Some(EventType::SyncResponse),
            "recovery-request" => Some(EventType::RecoveryRequest),
            "recovery-response" => Some(EventType::RecoveryResponse),
            "heartbeat" => Some(EventType::Heartbeat),
            "error" => Some(EventType::Error),
            _ => None,
        }
    }

    /// Static priority table: state-defining types first, liveness last.
    pub fn priority(&self) -> u8 {
        match self {
            EventType::GameState
            | EventType::SyncRequest
            | EventType::SyncResponse
            | EventType::RecoveryRequest
            | EventType::RecoveryResponse => PRIORITY_STATE,
            EventType::PlayerUpdate | EventType::TaskCompletion => PRIORITY_UPDATE,
            EventType::Heartbeat | EventType::Error => PRIORITY_LIVENESS,
        }
    }

    /// Heartbeats carry no state and skip the staleness check.
    pub fn exempt_from_window(&self) -> bool {
        matches!(self, EventType::Heartbeat)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire format exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub origin_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub player_id: PlayerId,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRequest {
    pub local: GameSnapshot,
    pub remote: GameSnapshot,
}

/// Closed set of typed event bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    GameState(SessionState),
    PlayerUpdate(PlayerRecord),
    TaskCompletion(TaskCompletion),
    SyncRequest,
    SyncResponse(GameSnapshot),
    RecoveryRequest(RecoveryRequest),
    RecoveryResponse(GameSnapshot),
    Heartbeat,
    Error { message: String },
}

fn decode<T: serde::de::DeserializeOwned>(event_type: EventType, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| SyncError::Validation(format!("malformed {} data: {}", event_type, e)))
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::GameState(_) => EventType::GameState,
            EventPayload::PlayerUpdate(_) => EventType::PlayerUpdate,
            EventPayload::TaskCompletion(_) => EventType::TaskCompletion,
            EventPayload::SyncRequest => EventType::SyncRequest,
            EventPayload::SyncResponse(_) => EventType::SyncResponse,
            EventPayload::RecoveryRequest(_) => EventType::RecoveryRequest,
            EventPayload::RecoveryResponse(_) => EventType::RecoveryResponse,
            EventPayload::Heartbeat => EventType::Heartbeat,
            EventPayload::Error { .. } => EventType::Error,
        }
    }

    pub fn decode(event_type: EventType, data: Value) -> Result<Self> {
        Ok(match event_type {
            EventType::GameState => EventPayload::GameState(decode(event_type, data)?),
            EventType::PlayerUpdate => {
                let player: PlayerRecord = decode(event_type, data)?;
                DependencyGraph::from_tasks(&player.tasks)?;
                EventPayload::PlayerUpdate(player)
            }
            EventType::TaskCompletion => EventPayload::TaskCompletion(decode(event_type, data)?),
            EventType::SyncRequest => EventPayload::SyncRequest,
            EventType::SyncResponse => EventPayload::SyncResponse(decode(event_type, data)?),
            EventType::RecoveryRequest => {
                EventPayload::RecoveryRequest(decode(event_type, data)?)
            }
            EventType::RecoveryResponse => {
                EventPayload::RecoveryResponse(decode(event_type, data)?)
            }
            EventType::Heartbeat => EventPayload::Heartbeat,
            EventType::Error => {
                let message = match &data {
                    Value::String(s) => s.clone(),
                    Value::Object(map) => map
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    _ => String::new(),
                };
                EventPayload::Error { message }
            }
        })
    }

    pub fn data(&self) -> Value {
        let encoded = match self {
            EventPayload::GameState(s) => serde_json::to_value(s),
            EventPayload::PlayerUpdate(p) => serde_json::to_value(p),
            EventPayload::TaskCompletion(c) => serde_json::to_value(c),
            EventPayload::SyncResponse(s) | EventPayload::RecoveryResponse(s) => {
                serde_json::to_value(s)
            }
            EventPayload::RecoveryRequest(r) => serde_json::to_value(r),
            EventPayload::Error { message } => Ok(serde_json::json!({ "message": message })),
            EventPayload::SyncRequest | EventPayload::Heartbeat => Ok(serde_json::json!({})),
        };
        encoded.unwrap_or(Value::Null)
    }
}

/// A validated event. Created at the network boundary and discarded once applied.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub payload: EventPayload,
    pub timestamp_ms: i64,
    pub priority: u8,
    pub origin_id: String,
    /// Arrival order, assigned on enqueue.
    pub seq: u64,
}

impl SyncEvent {
    pub fn new(payload: EventPayload, timestamp_ms: i64, origin_id: impl Into<String>) -> Self {
        let priority = payload.event_type().priority();
        SyncEvent {
            payload,
            timestamp_ms,
            priority,
            origin_id: origin_id.into(),
            seq: 0,
        }
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    /// Validate a raw inbound envelope. Missing `type`/`timestampMs`, an
    /// unknown `type`, or a body that does not decode are all rejected.
    pub fn from_raw(raw: &Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| SyncError::Validation("event must be a JSON object".into()))?;
        let type_str = obj
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| SyncError::Validation("missing field: type".into()))?;
        let timestamp_ms = obj
            .get("timestampMs")
            .and_then(|t| t.as_i64())
            .ok_or_else(|| SyncError::Validation("missing field: timestampMs".into()))?;
        let event_type = EventType::parse(type_str)
            .ok_or_else(|| SyncError::Validation(format!("unrecognized type: {}", type_str)))?;
        let origin_id = obj
            .get("originId")
            .and_then(|o| o.as_str())
            .unwrap_or_default()
            .to_string();
        let data = obj.get("data").cloned().unwrap_or(Value::Null);

        let payload = EventPayload::decode(event_type, data)?;
        Ok(SyncEvent::new(payload, timestamp_ms, origin_id))
    }

    pub fn to_envelope(&self) -> EventEnvelope {
        EventEnvelope {
            event_type: self.event_type().as_str().to_string(),
            data: self.payload.data(),
            timestamp_ms: self.timestamp_ms,
            origin_id: self.origin_id.clone(),
        }
    }
}

impl EventEnvelope {
    pub fn outbound(payload: EventPayload, timestamp_ms: i64, origin_id: &str) -> Self {
        SyncEvent::new(payload, timestamp_ms, origin_id).to_envelope()
    }
}

struct Queued(SyncEvent);

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap pops the greatest: higher priority, then older timestamp,
    // then earlier arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .priority
            .cmp(&other.0.priority)
            .then_with(|| other.0.timestamp_ms.cmp(&self.0.timestamp_ms))
            .then_with(|| other.0.seq.cmp(&self.0.seq))
    }
}

/// Validating front door plus the priority queue behind it.
pub struct EventIntake {
    heap: BinaryHeap<Queued>,
    next_seq: u64,
    capacity: usize,
    rejected: u64,
}

impl EventIntake {
    pub fn new(capacity: usize) -> Self {
        EventIntake {
            heap: BinaryHeap::new(),
            next_seq: 0,
            capacity: capacity.max(1),
            rejected: 0,
        }
    }

    /// Validate and enqueue a raw envelope. Rejections are logged and counted.
    pub fn submit(&mut self, raw: &Value) -> Result<()> {
        match SyncEvent::from_raw(raw) {
            Ok(event) => self.enqueue(event),
            Err(e) => {
                self.rejected += 1;
                tracing::warn!("[INTAKE] rejected event: {}", e);
                Err(e)
            }
        }
    }

    pub fn enqueue(&mut self, mut event: SyncEvent) -> Result<()> {
        if self.heap.len() >= self.capacity {
            tracing::warn!(
                "[INTAKE] queue full ({}), dropping {} from {}",
                self.capacity,
                event.event_type(),
                event.origin_id
            );
            return Err(SyncError::QueueFull(self.heap.len()));
        }
        event.seq = self.next_seq;
        self.next_seq += 1;
        tracing::debug!(
            "[INTAKE] queued {} seq={} priority={} ts={}",
            event.event_type(),
            event.seq,
            event.priority,
            event.timestamp_ms
        );
        self.heap.push(Queued(event));
        Ok(())
    }

    pub fn dequeue_next(&mut self) -> Option<SyncEvent> {
        self.heap.pop().map(|q| q.0)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(t: &str, ts: i64) -> Value {
        json!({"type": t, "data": {}, "timestampMs": ts, "originId": "peer-a"})
    }

    #[test]
    fn test_rejects_missing_type() {
        let mut intake = EventIntake::new(16);
        let err = intake
            .submit(&json!({"timestampMs": 1, "data": {}}))
            .unwrap_err();
        assert_eq!(err, SyncError::Validation("missing field: type".into()));
        assert!(intake.is_empty());
        assert_eq!(intake.rejected_count(), 1);
    }

    #[test]
    fn test_rejects_missing_timestamp_and_unknown_type() {
        let mut intake = EventIntake::new(16);
        assert!(intake.submit(&json!({"type": "heartbeat"})).is_err());
        assert!(intake.submit(&raw("teleport", 5)).is_err());
        assert!(intake.submit(&json!("not an object")).is_err());
        assert!(intake.is_empty());
        assert_eq!(intake.rejected_count(), 3);
    }

    #[test]
    fn test_rejects_malformed_body() {
        let mut intake = EventIntake::new(16);
        let err = intake
            .submit(&json!({"type": "game-state", "data": {"round": "x"}, "timestampMs": 1}))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_rejects_cyclic_player_update() {
        let mut intake = EventIntake::new(16);
        let data = json!({
            "id": "p1",
            "tasks": [
                {"id": "a", "dependsOn": ["b"]},
                {"id": "b", "dependsOn": ["a"]}
            ]
        });
        let err = intake
            .submit(&json!({"type": "player-update", "data": data, "timestampMs": 1}))
            .unwrap_err();
        assert!(matches!(err, SyncError::DependencyCycle(_)));
    }

    #[test]
    fn test_priority_table() {
        assert_eq!(EventType::GameState.priority(), PRIORITY_STATE);
        assert_eq!(EventType::RecoveryResponse.priority(), PRIORITY_STATE);
        assert_eq!(EventType::TaskCompletion.priority(), PRIORITY_UPDATE);
        assert_eq!(EventType::Heartbeat.priority(), PRIORITY_LIVENESS);
        assert_eq!(EventType::Error.priority(), PRIORITY_LIVENESS);
    }

    #[test]
    fn test_queue_ordering_is_priority_then_time_then_arrival() {
        let mut intake = EventIntake::new(16);
        intake.submit(&raw("heartbeat", 1)).unwrap();
        intake.submit(&raw("sync-request", 30)).unwrap();
        intake.submit(&raw("error", 1)).unwrap();
        intake.submit(&raw("sync-request", 20)).unwrap();
        intake.submit(&raw("sync-request", 20)).unwrap();

        let order: Vec<(EventType, i64, u64)> = std::iter::from_fn(|| intake.dequeue_next())
            .map(|e| (e.event_type(), e.timestamp_ms, e.seq))
            .collect();
        assert_eq!(
            order,
            vec![
                (EventType::SyncRequest, 20, 3),
                (EventType::SyncRequest, 20, 4),
                (EventType::SyncRequest, 30, 1),
                (EventType::Heartbeat, 1, 0),
                (EventType::Error, 1, 2),
            ]
        );
        assert!(intake.dequeue_next().is_none());
    }

    #[test]
    fn test_queue_capacity() {
        let mut intake = EventIntake::new(1);
        intake.submit(&raw("heartbeat", 1)).unwrap();
        assert_eq!(
            intake.submit(&raw("heartbeat", 2)),
            Err(SyncError::QueueFull(1))
        );
    }

    #[test]
    fn test_envelope_wire_format() {
        let envelope = EventEnvelope::outbound(
            EventPayload::TaskCompletion(TaskCompletion {
                player_id: "p1".into(),
                task_id: "t1".into(),
                subtask_id: None,
            }),
            42,
            "node-a",
        );
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "task-completion");
        assert_eq!(value["timestampMs"], 42);
        assert_eq!(value["originId"], "node-a");
        assert_eq!(value["data"]["playerId"], "p1");

        let back = SyncEvent::from_raw(&value).unwrap();
        assert_eq!(back.event_type(), EventType::TaskCompletion);
        assert_eq!(back.origin_id, "node-a");
    }
}
