//! Server, broker, and logging settings.
//!
//! Grouped here because they are all small.

use serde::{Deserialize, Serialize};

/// Network and per-connection settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP / WebSocket port.
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Seconds between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds without any inbound frame before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Largest accepted inbound frame, in bytes.
    pub max_message_size: usize,
    /// Frames buffered per connection before delivery to it fails.
    pub outbound_queue: usize,
    /// Seconds allowed for tasks to drain on shutdown.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 1000,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 64 * 1024,
            outbound_queue: 256,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Queue and session settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Capacity of the broker's command queue.
    pub command_queue: usize,
    /// End sessions with no relayed message for this many seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_idle_timeout_secs: Option<u64>,
    /// How often idle sessions are looked for.
    pub idle_sweep_interval_secs: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            command_queue: 1024,
            session_idle_timeout_secs: None,
            idle_sweep_interval_secs: 15,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Filter directive (`RUST_LOG` syntax).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
