use roundsync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub node_id: String,
    pub bind_addr: String,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    /// Engine tuning; when absent the `ROUNDSYNC_*` environment applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
    pub addr: String, // e.g. "http://10.0.1.2:7800"
}

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7800";

impl NodeConfig {
    /// Load `{data_dir}/node.json`, or fall back to a standalone node named
    /// after `ROUNDSYNC_NODE_ID` (else the hostname).
    pub fn load_or_default(data_dir: &Path) -> Self {
        let node_json = data_dir.join("node.json");

        if node_json.exists() {
            match Self::load(&node_json) {
                Ok(config) => {
                    tracing::info!(
                        "Loaded node config: node_id={}, peers={}",
                        config.node_id,
                        config.peers.len()
                    );
                    return config;
                }
                Err(e) => tracing::error!("{}, using defaults", e),
            }
        }

        let config = Self::standalone();
        tracing::info!(
            "No node.json found, running standalone: node_id={}",
            config.node_id
        );
        config
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        let mut config: NodeConfig = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?;

        let own_id = config.node_id.clone();
        config.peers.retain(|p| {
            if p.node_id == own_id {
                tracing::warn!("Ignoring peer entry for this node ({})", own_id);
                return false;
            }
            true
        });
        Ok(config)
    }

    pub fn standalone() -> Self {
        let node_id = std::env::var("ROUNDSYNC_NODE_ID").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string())
        });
        let bind_addr =
            std::env::var("ROUNDSYNC_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());

        NodeConfig {
            node_id,
            bind_addr,
            peers: vec![],
            sync: None,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        self.sync.clone().unwrap_or_else(SyncConfig::from_env)
    }
}
