#![cfg_attr(not(test), no_std)]

//! PC-Table SmartShop Module Library
//!
//! Core of the PC-Table node: a timer-multiplexed MQTT telemetry/command
//! client that keeps local sensor and actuator state in sync with the
//! CircleLab message bus over an unreliable WiFi link.
//!
//! Everything hardware-independent lives here and runs on the host. The
//! ESP32 bindings (`wifi`, `transport`) are built with the `firmware`
//! feature only.

pub mod config;
pub mod dht;
pub mod dispatcher;
pub mod encoder;
pub mod link;
pub mod mqtt;
pub mod node;
pub mod publisher;
pub mod session;
pub mod state;
pub mod state_machine;
pub mod timer;

#[cfg(feature = "firmware")]
pub mod transport;
#[cfg(feature = "firmware")]
pub mod wifi;

use core::fmt;

pub use config::{ConfigError, NodeConfig};
pub use session::{BusSession, BusTransport, InboundMessage, Message, TransportError};
pub use timer::IntervalTimer;

/// Project version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bounded topic string used throughout the node
pub type Topic = heapless::String<{ config::MAX_TOPIC_LEN }>;

/// Error types for the PC-Table node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// Bus operation attempted while the session is not connected
    NotConnected,
    /// The bus transport reported a failure
    Transport(TransportError),
    /// Formatted payload did not fit the publish buffer
    PayloadOverflow,
    /// Topic did not fit the bounded topic string
    TopicOverflow,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::NotConnected => f.write_str("bus session not connected"),
            NodeError::Transport(e) => write!(f, "transport error: {}", e),
            NodeError::PayloadOverflow => f.write_str("payload buffer overflow"),
            NodeError::TopicOverflow => f.write_str("topic too long"),
        }
    }
}

impl From<TransportError> for NodeError {
    fn from(e: TransportError) -> Self {
        NodeError::Transport(e)
    }
}

/// Build a topic from a root and a leaf, joined by `/`
pub fn join_topics(root: &str, leaf: &str) -> Result<Topic, NodeError> {
    let mut topic = Topic::new();
    topic.push_str(root).map_err(|_| NodeError::TopicOverflow)?;
    if !root.is_empty() && !root.ends_with('/') {
        topic.push('/').map_err(|_| NodeError::TopicOverflow)?;
    }
    topic.push_str(leaf).map_err(|_| NodeError::TopicOverflow)?;
    Ok(topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_topics_with_single_separator() {
        assert_eq!(join_topics("modules", "pc-table").unwrap(), "modules/pc-table");
        assert_eq!(join_topics("modules/", "pc-table").unwrap(), "modules/pc-table");
        assert_eq!(join_topics("", "pc-table").unwrap(), "pc-table");
    }

    #[test]
    fn rejects_overlong_topic() {
        let leaf = "x".repeat(config::MAX_TOPIC_LEN);
        assert_eq!(join_topics("modules", &leaf), Err(NodeError::TopicOverflow));
    }
}
