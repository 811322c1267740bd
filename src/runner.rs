//! Actor wrapper around [`SyncEngine`].
//!
//! One tokio task owns the engine and drains a bounded command channel.
//! Clock ticks, heartbeat checks, reconnect timers and probe results are all
//! delivered as commands on that same channel, so every mutation still runs
//! one at a time.

use crate::detector::ConflictRecord;
use crate::engine::{ConnectionState, Effect, EngineStatus, SyncEngine};
use crate::error::{Result, SyncError};
use crate::transport::Transport;
use crate::types::{GameSnapshot, PlayerRecord};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Operator and player actions applied through the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalCommand {
    StartSession,
    Pause,
    Resume,
    ResetSession,
    UpsertPlayer(PlayerRecord),
    CompleteTask {
        player_id: String,
        task_id: String,
        subtask_id: Option<String>,
    },
    ResetRecovery,
    ReportDisconnect,
}

pub enum EngineCommand {
    Inbound {
        raw: Value,
        reply: oneshot::Sender<Result<()>>,
    },
    Local {
        command: LocalCommand,
        reply: oneshot::Sender<Result<GameSnapshot>>,
    },
    Tick {
        elapsed_ms: u64,
    },
    HeartbeatCheck,
    ReconnectDue,
    ProbeResult {
        reachable: bool,
    },
    Snapshot {
        reply: oneshot::Sender<GameSnapshot>,
    },
    Conflicts {
        limit: usize,
        reply: oneshot::Sender<Vec<ConflictRecord>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    connection: watch::Receiver<ConnectionState>,
}

impl EngineHandle {
    /// Hand a raw inbound envelope to the engine. Validation failures come
    /// back to the caller; everything after intake is the engine's business.
    pub async fn submit(&self, raw: Value) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .try_send(EngineCommand::Inbound { raw, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SyncError::QueueFull(self.tx.max_capacity()),
                mpsc::error::TrySendError::Closed(_) => SyncError::EngineStopped,
            })?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    pub async fn command(&self, command: LocalCommand) -> Result<GameSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Local { command, reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)?
    }

    pub async fn start_session(&self) -> Result<GameSnapshot> {
        self.command(LocalCommand::StartSession).await
    }

    pub async fn pause(&self) -> Result<GameSnapshot> {
        self.command(LocalCommand::Pause).await
    }

    pub async fn resume(&self) -> Result<GameSnapshot> {
        self.command(LocalCommand::Resume).await
    }

    pub async fn reset_session(&self) -> Result<GameSnapshot> {
        self.command(LocalCommand::ResetSession).await
    }

    pub async fn upsert_player(&self, player: PlayerRecord) -> Result<GameSnapshot> {
        self.command(LocalCommand::UpsertPlayer(player)).await
    }

    pub async fn complete_task(
        &self,
        player_id: &str,
        task_id: &str,
        subtask_id: Option<&str>,
    ) -> Result<GameSnapshot> {
        self.command(LocalCommand::CompleteTask {
            player_id: player_id.to_string(),
            task_id: task_id.to_string(),
            subtask_id: subtask_id.map(str::to_string),
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<GameSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    pub async fn conflicts(&self, limit: usize) -> Result<Vec<ConflictRecord>> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Conflicts { limit, reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Status { reply }).await?;
        rx.await.map_err(|_| SyncError::EngineStopped)
    }

    /// Latest connection state; updated after every command.
    pub fn connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(EngineCommand::Shutdown).await;
    }

    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SyncError::EngineStopped)
    }
}

/// At most one pending reconnect; scheduling a new one aborts the old.
#[derive(Default)]
struct ReconnectTimer {
    pending: Option<JoinHandle<()>>,
}

impl ReconnectTimer {
    fn schedule(&mut self, delay: Duration, tx: mpsc::WeakSender<EngineCommand>) {
        self.cancel();
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(EngineCommand::ReconnectDue).await;
            }
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

/// Sends `make(elapsed_ms)` every `period` until the engine goes away.
fn spawn_interval<F>(period: Duration, tx: mpsc::WeakSender<EngineCommand>, make: F) -> JoinHandle<()>
where
    F: Fn(u64) -> EngineCommand + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last = interval.tick().await;
        loop {
            let at: Instant = interval.tick().await;
            let elapsed_ms = at.duration_since(last).as_millis() as u64;
            last = at;
            let Some(tx) = tx.upgrade() else { break };
            if tx.send(make(elapsed_ms)).await.is_err() {
                break;
            }
        }
    })
}

/// Move `engine` into its own task and start its timers.
pub fn spawn_engine(engine: SyncEngine, transport: Arc<dyn Transport>) -> (EngineHandle, JoinHandle<()>) {
    let config = engine.config().clone();
    let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
    let (status_tx, status_rx) = watch::channel(engine.connection());

    let ticker = spawn_interval(config.tick_interval(), tx.downgrade(), |elapsed_ms| {
        EngineCommand::Tick { elapsed_ms }
    });
    let heartbeat = spawn_interval(config.heartbeat_interval(), tx.downgrade(), |_| {
        EngineCommand::HeartbeatCheck
    });

    tracing::info!(
        "[ENGINE] node {} started (tick {}ms, heartbeat {}ms)",
        engine.node_id(),
        config.tick_interval_ms,
        config.heartbeat_interval_ms
    );

    let weak = tx.downgrade();
    let task = tokio::spawn(async move {
        run(engine, rx, weak, transport, status_tx).await;
        ticker.abort();
        heartbeat.abort();
    });

    (
        EngineHandle {
            tx,
            connection: status_rx,
        },
        task,
    )
}

fn apply_local(engine: &mut SyncEngine, command: LocalCommand) -> Result<Vec<Effect>> {
    match command {
        LocalCommand::StartSession => engine.start_session(),
        LocalCommand::Pause => engine.pause(),
        LocalCommand::Resume => engine.resume(),
        LocalCommand::ResetSession => engine.reset_session(),
        LocalCommand::UpsertPlayer(player) => engine.upsert_player(player),
        LocalCommand::CompleteTask {
            player_id,
            task_id,
            subtask_id,
        } => engine.complete_task(&player_id, &task_id, subtask_id.as_deref()),
        LocalCommand::ResetRecovery => Ok(engine.reset_recovery()),
        LocalCommand::ReportDisconnect => Ok(engine.report_disconnect()),
    }
}

async fn run(
    mut engine: SyncEngine,
    mut rx: mpsc::Receiver<EngineCommand>,
    tx: mpsc::WeakSender<EngineCommand>,
    transport: Arc<dyn Transport>,
    status_tx: watch::Sender<ConnectionState>,
) {
    let mut reconnect = ReconnectTimer::default();

    while let Some(command) = rx.recv().await {
        let effects = match command {
            EngineCommand::Inbound { raw, reply } => match engine.submit(&raw) {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                    engine.process_pending()
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Vec::new()
                }
            },
            EngineCommand::Local { command, reply } => match apply_local(&mut engine, command) {
                Ok(effects) => {
                    publish(&engine, &status_tx);
                    let _ = reply.send(Ok(engine.snapshot()));
                    effects
                }
                Err(e) => {
                    let _ = reply.send(Err(e));
                    Vec::new()
                }
            },
            EngineCommand::Tick { elapsed_ms } => engine.tick(elapsed_ms),
            EngineCommand::HeartbeatCheck => engine.heartbeat_check(transport.peer_count()),
            EngineCommand::ReconnectDue => engine.reconnect_due(),
            EngineCommand::ProbeResult { reachable } => engine.probe_result(reachable),
            EngineCommand::Snapshot { reply } => {
                let _ = reply.send(engine.snapshot());
                Vec::new()
            }
            EngineCommand::Conflicts { limit, reply } => {
                let _ = reply.send(engine.conflicts(limit));
                Vec::new()
            }
            EngineCommand::Status { reply } => {
                let _ = reply.send(engine.status());
                Vec::new()
            }
            EngineCommand::Shutdown => {
                tracing::info!("[ENGINE] shutting down");
                break;
            }
        };

        for effect in effects {
            match effect {
                Effect::Broadcast(envelope) => transport.broadcast(envelope),
                Effect::ScheduleReconnect(delay) => reconnect.schedule(delay, tx.clone()),
                Effect::ProbeConnection => {
                    let probe = transport.probe();
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let reachable = probe.await;
                        if let Some(tx) = tx.upgrade() {
                            let _ = tx.send(EngineCommand::ProbeResult { reachable }).await;
                        }
                    });
                }
            }
        }

        publish(&engine, &status_tx);
    }

    reconnect.cancel();
}

fn publish(engine: &SyncEngine, status_tx: &watch::Sender<ConnectionState>) {
    let connection = engine.connection();
    status_tx.send_if_modified(|current| {
        if *current == connection {
            return false;
        }
        if connection == ConnectionState::Exhausted {
            tracing::error!("[ENGINE] reconnection exhausted; waiting for operator reset");
        }
        *current = connection;
        true
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::intake::EventEnvelope;
    use crate::transport::{ProbeFuture, StandaloneTransport};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<EventEnvelope>>,
        reachable: AtomicBool,
    }

    impl Transport for RecordingTransport {
        fn broadcast(&self, envelope: EventEnvelope) {
            self.sent.lock().unwrap().push(envelope);
        }

        fn peer_count(&self) -> usize {
            1
        }

        fn probe(&self) -> ProbeFuture {
            let reachable = self.reachable.load(Ordering::SeqCst);
            Box::pin(async move { reachable })
        }
    }

    fn config() -> SyncConfig {
        SyncConfig {
            work_duration_ms: 3_000,
            action_duration_ms: 2_000,
            total_rounds: 1,
            ..SyncConfig::default()
        }
    }

    #[tokio::test]
    async fn test_local_commands_roundtrip() {
        let engine = SyncEngine::new("node-a", config());
        let (handle, _task) = spawn_engine(engine, Arc::new(StandaloneTransport));

        let snapshot = handle.start_session().await.unwrap();
        assert_eq!(snapshot.session.phase, crate::types::Phase::Work);

        handle
            .upsert_player(PlayerRecord::new("p1", "Ada"))
            .await
            .unwrap();
        assert_eq!(handle.snapshot().await.unwrap().players.len(), 1);
        assert!(matches!(
            handle.resume().await,
            Err(SyncError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_submit_reports_validation_errors() {
        let engine = SyncEngine::new("node-a", config());
        let (handle, _task) = spawn_engine(engine, Arc::new(StandaloneTransport));

        let err = handle.submit(json!({"type": "bogus", "timestampMs": 1})).await;
        assert!(matches!(err, Err(SyncError::Validation(_))));
        assert_eq!(handle.status().await.unwrap().rejected_events, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clock_advances_on_ticks() {
        let engine = SyncEngine::new("node-a", config());
        let (handle, _task) = spawn_engine(engine, Arc::new(StandaloneTransport));
        handle.start_session().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let session = handle.snapshot().await.unwrap().session;
        assert_eq!(session.phase, crate::types::Phase::Action);
    }

    #[tokio::test]
    async fn test_disconnect_probe_and_recover() {
        let transport = Arc::new(RecordingTransport::default());
        transport.reachable.store(true, Ordering::SeqCst);
        let mut cfg = config();
        cfg.initial_reconnect_delay_ms = 10;
        let engine = SyncEngine::new("node-a", cfg);
        let (handle, _task) = spawn_engine(engine, transport.clone());
        let mut connection = handle.connection();

        handle.command(LocalCommand::ReportDisconnect).await.unwrap();
        assert_eq!(*connection.borrow_and_update(), ConnectionState::Reconnecting);

        connection.changed().await.unwrap();
        assert_eq!(*connection.borrow(), ConnectionState::Connected);
        let sent = transport.sent.lock().unwrap();
        assert!(sent.iter().any(|e| e.event_type == "sync-request"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_engine() {
        let engine = SyncEngine::new("node-a", config());
        let (handle, task) = spawn_engine(engine, Arc::new(StandaloneTransport));
        handle.shutdown().await;
        task.await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap_err(), SyncError::EngineStopped);
    }
}
