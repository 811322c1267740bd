use roundsync::EventEnvelope;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// HTTP client wrapper for communicating with a single peer node
pub struct PeerClient {
    peer_id: String,
    base_url: String,
    http_client: reqwest::Client,
    last_success: Arc<AtomicI64>, // Unix millis
}

impl PeerClient {
    pub fn new(peer_id: String, base_url: String) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            peer_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
            last_success: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn last_success_ms(&self) -> i64 {
        self.last_success.load(Ordering::Relaxed)
    }

    fn mark_success(&self) {
        self.last_success
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Deliver one event envelope to this peer's intake.
    pub async fn send_event(&self, envelope: &EventEnvelope) -> Result<(), String> {
        let url = format!("{}/internal/events", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| format!("Failed to send event to {}: {}", self.peer_id, e))?;

        if !response.status().is_success() {
            return Err(format!(
                "Peer {} rejected {}: {}",
                self.peer_id,
                envelope.event_type,
                response.status()
            ));
        }

        self.mark_success();
        Ok(())
    }

    /// `GET /health`; any 2xx counts as reachable.
    pub async fn probe(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self.http_client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                self.mark_success();
                true
            }
            Ok(response) => {
                tracing::debug!("[PEER {}] health returned {}", self.peer_id, response.status());
                false
            }
            Err(e) => {
                tracing::debug!("[PEER {}] health check failed: {}", self.peer_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roundsync::EventPayload;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_peer_client_creation() {
        let peer = PeerClient::new("test-peer".to_string(), "http://localhost:7800/".to_string());

        assert_eq!(peer.peer_id(), "test-peer");
        assert_eq!(peer.base_url(), "http://localhost:7800");
        assert_eq!(peer.last_success_ms(), 0);
    }

    #[tokio::test]
    async fn test_send_event_posts_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/events"))
            .and(body_partial_json(serde_json::json!({
                "type": "heartbeat",
                "originId": "node-a"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let peer = PeerClient::new("node-b".to_string(), server.uri());
        let envelope = EventEnvelope::outbound(EventPayload::Heartbeat, 1_000, "node-a");
        peer.send_event(&envelope).await.unwrap();
        assert!(peer.last_success_ms() > 0);
    }

    #[tokio::test]
    async fn test_send_event_reports_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/internal/events"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let peer = PeerClient::new("node-b".to_string(), server.uri());
        let envelope = EventEnvelope::outbound(EventPayload::SyncRequest, 1_000, "node-a");
        let err = peer.send_event(&envelope).await.unwrap_err();
        assert!(err.contains("sync-request"));
        assert_eq!(peer.last_success_ms(), 0);
    }

    #[tokio::test]
    async fn test_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let up = PeerClient::new("node-b".to_string(), server.uri());
        assert!(up.probe().await);

        let down = PeerClient::new("node-c".to_string(), "http://127.0.0.1:1".to_string());
        assert!(!down.probe().await);
    }
}
