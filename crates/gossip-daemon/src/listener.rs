//! Listener that reports membership changes to the log.

use gossip_core::{GossipListener, NodeId};
use tracing::info;

/// Logs every registration change at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl GossipListener for LoggingListener {
    fn on_register(&self, id: NodeId, payload: &[u8]) {
        info!("Registered {}: {}", id, describe(payload));
    }

    fn on_update(&self, id: NodeId, payload: &[u8]) {
        info!("Updated {}: {}", id, describe(payload));
    }

    fn on_deregister(&self, id: NodeId) {
        info!("Deregistered {}", id);
    }
}

/// Render a payload for the log: text if it is UTF-8, else its size.
fn describe(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => format!("{:?}", text),
        Err(_) => format!("<{} bytes>", payload.len()),
    }
}
