//! Peer transport for roundsync: node identity from `node.json`, one HTTP
//! client per peer, and a fan-out manager the engine broadcasts through.
//!
//! The manager is constructed once at startup and handed to the engine
//! runner and the HTTP layer explicitly.

pub mod config;
pub mod manager;
pub mod peer;
pub mod types;

pub use config::{NodeConfig, PeerConfig};
pub use manager::ReplicationManager;
pub use peer::PeerClient;
