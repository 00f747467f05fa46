//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file only needs the fields it changes.

mod server;

pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9000 },
///   "broker": { "sessionIdleTimeoutSecs": 600 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HelpdeskSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Queue and session settings.
    pub broker: BrokerSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl HelpdeskSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.outbound_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.outboundQueue must be at least 1".into(),
            ));
        }
        if self.broker.command_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.commandQueue must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if self.server.heartbeat_timeout_secs < self.server.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) is shorter than heartbeatIntervalSecs ({})",
                self.server.heartbeat_timeout_secs, self.server.heartbeat_interval_secs
            )));
        }
        if self.broker.session_idle_timeout_secs == Some(0) {
            return Err(SettingsError::InvalidValue(
                "broker.sessionIdleTimeoutSecs must be positive when set".into(),
            ));
        }
        Ok(())
    }
}
