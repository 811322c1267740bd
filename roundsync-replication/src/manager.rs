use super::config::NodeConfig;
use super::peer::PeerClient;
use super::types::{PeerStatus, ReplicationStatus};
use dashmap::DashMap;
use roundsync::{EventEnvelope, ProbeFuture, Transport};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Fans engine broadcasts out to every peer and tracks per-peer health
pub struct ReplicationManager {
    node_config: NodeConfig,
    peers: Vec<Arc<PeerClient>>,
    /// peer_id -> consecutive failed sends
    failures: Arc<DashMap<String, u32>>,
}

impl ReplicationManager {
    pub fn new(node_config: NodeConfig) -> Arc<Self> {
        let peers: Vec<Arc<PeerClient>> = node_config
            .peers
            .iter()
            .map(|peer_config| {
                Arc::new(PeerClient::new(
                    peer_config.node_id.clone(),
                    peer_config.addr.clone(),
                ))
            })
            .collect();

        Arc::new(Self {
            node_config,
            peers,
            failures: Arc::new(DashMap::new()),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.node_config.node_id
    }

    pub fn node_config(&self) -> &NodeConfig {
        &self.node_config
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Send `envelope` to all peers without waiting for any of them.
    pub fn broadcast_event(&self, envelope: EventEnvelope) {
        if self.peers.is_empty() {
            return;
        }
        let envelope = Arc::new(envelope);

        for peer in &self.peers {
            let peer = Arc::clone(peer);
            let envelope = Arc::clone(&envelope);
            let failures = Arc::clone(&self.failures);

            tokio::spawn(async move {
                match peer.send_event(&envelope).await {
                    Ok(()) => {
                        failures.remove(peer.peer_id());
                        tracing::debug!(
                            "[PEER {}] delivered {} @{}",
                            peer.peer_id(),
                            envelope.event_type,
                            envelope.timestamp_ms
                        );
                    }
                    Err(e) => {
                        *failures.entry(peer.peer_id().to_string()).or_insert(0) += 1;
                        tracing::warn!("[PEER {}] {}", peer.peer_id(), e);
                    }
                }
            });
        }
    }

    /// True as soon as any peer answers its health check. With no peers
    /// there is nothing to be disconnected from.
    pub async fn probe_any(peers: Vec<Arc<PeerClient>>) -> bool {
        if peers.is_empty() {
            return true;
        }
        let mut set = JoinSet::new();
        for peer in peers {
            set.spawn(async move { peer.probe().await });
        }
        while let Some(result) = set.join_next().await {
            if matches!(result, Ok(true)) {
                set.abort_all();
                return true;
            }
        }
        false
    }

    pub fn status(&self) -> ReplicationStatus {
        ReplicationStatus {
            node_id: self.node_config.node_id.clone(),
            replication_enabled: !self.peers.is_empty(),
            peer_count: self.peers.len(),
            peers: self
                .peers
                .iter()
                .map(|p| PeerStatus {
                    peer_id: p.peer_id().to_string(),
                    addr: p.base_url().to_string(),
                    last_success_ms: p.last_success_ms(),
                    consecutive_failures: self
                        .failures
                        .get(p.peer_id())
                        .map(|f| *f)
                        .unwrap_or(0),
                })
                .collect(),
        }
    }
}

impl Transport for ReplicationManager {
    fn broadcast(&self, envelope: EventEnvelope) {
        self.broadcast_event(envelope);
    }

    fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn probe(&self) -> ProbeFuture {
        Box::pin(Self::probe_any(self.peers.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::super::config::{NodeConfig, PeerConfig};
    use super::*;
    use roundsync::EventPayload;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(peers: Vec<PeerConfig>) -> NodeConfig {
        NodeConfig {
            node_id: "node-a".to_string(),
            bind_addr: "0.0.0.0:7800".to_string(),
            peers,
            sync: None,
        }
    }

    #[test]
    fn test_manager_creation() {
        let manager = ReplicationManager::new(config(vec![PeerConfig {
            node_id: "node-b".to_string(),
            addr: "http://node-b:7800".to_string(),
        }]));

        assert_eq!(manager.node_id(), "node-a");
        assert_eq!(Transport::peer_count(manager.as_ref()), 1);
        assert!(manager.status().replication_enabled);
    }

    #[tokio::test]
    async fn test_manager_no_peers_probe_is_up() {
        let manager = ReplicationManager::new(config(vec![]));
        assert_eq!(manager.peer_count(), 0);
        assert!(manager.probe().await);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_peer() {
        let b = MockServer::start().await;
        let c = MockServer::start().await;
        for server in [&b, &c] {
            Mock::given(method("POST"))
                .and(path("/internal/events"))
                .respond_with(ResponseTemplate::new(202))
                .expect(1)
                .mount(server)
                .await;
        }

        let manager = ReplicationManager::new(config(vec![
            PeerConfig {
                node_id: "node-b".to_string(),
                addr: b.uri(),
            },
            PeerConfig {
                node_id: "node-c".to_string(),
                addr: c.uri(),
            },
        ]));
        manager.broadcast(EventEnvelope::outbound(EventPayload::Heartbeat, 1, "node-a"));

        for _ in 0..50 {
            if manager.status().peers.iter().all(|p| p.last_success_ms > 0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(manager.status().peers.iter().all(|p| p.last_success_ms > 0));
    }

    #[tokio::test]
    async fn test_failed_sends_are_counted() {
        let manager = ReplicationManager::new(config(vec![PeerConfig {
            node_id: "node-b".to_string(),
            addr: "http://127.0.0.1:1".to_string(),
        }]));
        manager.broadcast(EventEnvelope::outbound(EventPayload::Heartbeat, 1, "node-a"));

        for _ in 0..100 {
            if manager.status().peers[0].consecutive_failures > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(manager.status().peers[0].consecutive_failures, 1);
        assert!(!manager.probe().await);
    }
}
