//! # Roundsync
//!
//! Real-time state synchronization for round-based multiplayer sessions.
//! Keeps a round/phase countdown, player scores and task completion
//! consistent across peers that may disconnect, reconnect and replay stale
//! events.
//!
//! The core is a single-writer [`SyncEngine`]: inbound events are validated,
//! queued by priority, filtered through a sliding sync window, checked for
//! conflicts against the local snapshot and resolved (`latest`, `merge` or
//! `preserve`) before anything is applied. Scores never decrease and
//! completed tasks never regress under `merge`.
//!
//! Run it standalone, embed it behind your own transport via [`Transport`],
//! or serve it over HTTP with the companion `roundsync-http` and
//! `roundsync-server` crates.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use roundsync::{spawn_engine, PlayerRecord, StandaloneTransport, SyncConfig, SyncEngine};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() -> roundsync::Result<()> {
//! let engine = SyncEngine::new("node-a", SyncConfig::from_env());
//! let (handle, _task) = spawn_engine(engine, Arc::new(StandaloneTransport));
//!
//! handle.upsert_player(PlayerRecord::new("p1", "Ada")).await?;
//! handle.start_session().await?;
//!
//! let snapshot = handle.snapshot().await?;
//! println!("round {} {}", snapshot.session.round, snapshot.session.phase);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Dependencies | Use case |
//! |---------|-------------|----------|
//! | `axum-support` | axum | [`SyncError`] implements `IntoResponse` |
//!
//! Enabled by default.

pub mod audit;
pub mod clock;
pub mod config;
pub mod deps;
pub mod detector;
pub mod engine;
pub mod error;
pub mod heartbeat;
pub mod intake;
pub mod persistence;
pub mod recovery;
pub mod resolver;
pub mod runner;
pub mod scoring;
pub mod time;
pub mod transport;
pub mod types;
pub mod window;

pub use config::SyncConfig;
pub use detector::{ConflictKind, ConflictLevel, ConflictRecord};
pub use engine::{ConnectionState, Effect, EngineStatus, SyncEngine};
pub use error::{Result, SyncError};
pub use intake::{EventEnvelope, EventPayload, EventType, SyncEvent};
pub use persistence::{JsonFileStore, MemoryStore, SnapshotStore};
pub use resolver::ResolutionStrategy;
pub use runner::{spawn_engine, EngineHandle, LocalCommand};
pub use scoring::{CompletionScorer, ScoreCalculator};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
pub use transport::{ProbeFuture, StandaloneTransport, Transport};
pub use types::*;
