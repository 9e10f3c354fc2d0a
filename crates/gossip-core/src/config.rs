//! Engine configuration.
//!
//! Every field has a serde default so partial JSON files are accepted.

use crate::NodeId;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the gossip engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipConfig {
    /// Identity of this node (generated at start-up if not set)
    #[serde(default)]
    pub node_id: Option<NodeId>,

    /// Bootstrap addresses contacted until the cluster is discovered
    #[serde(default)]
    pub seeds: Vec<SocketAddr>,

    /// Round period in milliseconds (default: 1s)
    #[serde(default = "default_gossip_interval")]
    pub gossip_interval_ms: u64,

    /// Number of random live partners per round (default: 3)
    #[serde(default = "default_fanout")]
    pub fanout: usize,

    /// Maximum payload bytes of a replicated state (default: 1024)
    #[serde(default = "default_max_state_size")]
    pub max_state_size: usize,

    #[serde(default)]
    pub failure_detector: FailureDetectorConfig,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl GossipConfig {
    pub fn gossip_interval(&self) -> Duration {
        Duration::from_millis(self.gossip_interval_ms)
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            seeds: Vec::new(),
            gossip_interval_ms: default_gossip_interval(),
            fanout: default_fanout(),
            max_state_size: default_max_state_size(),
            failure_detector: FailureDetectorConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Tuning for the phi-accrual failure detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDetectorConfig {
    /// Suspicion level above which a peer is convicted (default: 8.0)
    #[serde(default = "default_convict_threshold")]
    pub convict_threshold: f64,

    /// Number of inter-arrival samples kept (default: 1000)
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Samples shorter than this are clamped up (default: 100ms)
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,

    /// Samples longer than this are clamped down (default: 30s)
    #[serde(default = "default_max_interval")]
    pub max_interval_ms: u64,

    /// Assumed mean interval before a second heartbeat arrives (default: 1s)
    #[serde(default = "default_bootstrap_interval")]
    pub bootstrap_interval_ms: u64,
}

impl Default for FailureDetectorConfig {
    fn default() -> Self {
        Self {
            convict_threshold: default_convict_threshold(),
            window_size: default_window_size(),
            min_interval_ms: default_min_interval(),
            max_interval_ms: default_max_interval(),
            bootstrap_interval_ms: default_bootstrap_interval(),
        }
    }
}

/// Retry behaviour for asynchronous connection establishment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first retry (default: 500ms)
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Upper bound on the delay between retries (default: 10s)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Multiplier applied per attempt (default: 2.0)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Attempts before the address is forgotten (None = unlimited)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_factor: default_backoff_factor(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ReconnectConfig {
    /// Whether `attempts` failed connects exhaust the retry budget.
    pub fn exceeded(&self, attempts: u32) -> bool {
        self.max_attempts.map(|max| attempts >= max).unwrap_or(false)
    }
}

/// Delay before connect attempt number `attempt` (1-based), with
/// exponential backoff capped at `max_delay_ms`.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let initial = Duration::from_millis(config.initial_delay_ms).as_secs_f64();
    let max = Duration::from_millis(config.max_delay_ms).as_secs_f64();
    let delay_secs = initial * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(max))
}

fn default_gossip_interval() -> u64 {
    1000
}

fn default_fanout() -> usize {
    3
}

fn default_max_state_size() -> usize {
    1024
}

fn default_convict_threshold() -> f64 {
    8.0
}

fn default_window_size() -> usize {
    1000
}

fn default_min_interval() -> u64 {
    100
}

fn default_max_interval() -> u64 {
    30_000
}

fn default_bootstrap_interval() -> u64 {
    1000
}

fn default_initial_delay() -> u64 {
    500
}

fn default_max_delay() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_attempts() -> Option<u32> {
    Some(5)
}
