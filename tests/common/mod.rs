#![allow(dead_code)]

use roundsync::{
    Effect, EventEnvelope, ManualTimeSource, PlayerRecord, SubtaskRecord, SyncConfig, SyncEngine,
    TaskRecord,
};
use std::sync::Arc;
use std::time::Duration;

pub const START_MS: i64 = 1_700_000_000_000;

pub struct Node {
    pub engine: SyncEngine,
    pub time: Arc<ManualTimeSource>,
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        work_duration_ms: 60_000,
        action_duration_ms: 30_000,
        total_rounds: 2,
        ..SyncConfig::default()
    }
}

pub fn node(id: &str) -> Node {
    let time = Arc::new(ManualTimeSource::new(START_MS));
    let engine = SyncEngine::new(id, test_config()).with_time_source(time.clone());
    Node { engine, time }
}

/// One player with a two-subtask task and a plain task.
pub fn sample_player() -> PlayerRecord {
    PlayerRecord::new("p1", "Ada").with_tasks(vec![
        TaskRecord::new("t1", false).with_subtasks(vec![
            SubtaskRecord::new("s1", false),
            SubtaskRecord::new("s2", false),
        ]),
        TaskRecord::new("t2", false),
    ])
}

pub fn broadcasts(effects: &[Effect]) -> Vec<EventEnvelope> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Broadcast(envelope) => Some(envelope.clone()),
            _ => None,
        })
        .collect()
}

pub fn scheduled_delays(effects: &[Effect]) -> Vec<Duration> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::ScheduleReconnect(delay) => Some(*delay),
            _ => None,
        })
        .collect()
}

/// Hand envelopes to `to` over the wire format and apply them.
pub fn deliver(envelopes: &[EventEnvelope], to: &mut SyncEngine) -> Vec<Effect> {
    for envelope in envelopes {
        let raw = serde_json::to_value(envelope).unwrap();
        to.submit(&raw).unwrap();
    }
    to.process_pending()
}

/// Ping-pong broadcasts between two nodes until both go quiet. Clocks stay
/// put, so every batch lands at the timestamp it was sent with.
pub fn exchange(a: &mut Node, b: &mut Node, from_a: Vec<Effect>, from_b: Vec<Effect>) -> usize {
    let mut to_b = broadcasts(&from_a);
    let mut to_a = broadcasts(&from_b);
    let mut rounds = 0;
    while !(to_a.is_empty() && to_b.is_empty()) {
        rounds += 1;
        assert!(rounds <= 20, "nodes never went quiet");
        let next_from_b = deliver(&to_b, &mut b.engine);
        let next_from_a = deliver(&to_a, &mut a.engine);
        to_b = broadcasts(&next_from_a);
        to_a = broadcasts(&next_from_b);
    }
    rounds
}
