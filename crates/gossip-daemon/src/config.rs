//! Configuration loading for the daemon.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use gossip_core::GossipConfig;
use serde::{Deserialize, Serialize};

/// Daemon configuration: the listen address plus the engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// UDP address to gossip on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    #[serde(flatten)]
    pub gossip: GossipConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            gossip: GossipConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from a JSON file, or use defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: DaemonConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 7946))
}
