//! gossip-daemon library: UDP transport, config loading and listener.
//!
//! The binary in `main.rs` wires these together; integration tests use
//! them directly to run several engines over loopback.

pub mod config;
pub mod listener;
pub mod udp;

pub use config::DaemonConfig;
pub use listener::LoggingListener;
pub use udp::{UdpCommunications, UdpHandle};
