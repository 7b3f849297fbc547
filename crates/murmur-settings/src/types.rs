//! Settings types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MurmurSettings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
}

impl MurmurSettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.idle_timeout_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.idleTimeoutSecs must be positive".into(),
            ));
        }
        if self.server.reap_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.reapIntervalSecs must be positive".into(),
            ));
        }
        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be positive".into(),
            ));
        }
        if self.server.max_line_length == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxLineLength must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// TCP listen port.
    pub port: u16,
    /// Seconds of inactivity before a session is evicted.
    pub idle_timeout_secs: u64,
    /// Seconds between idle sweeps.
    pub reap_interval_secs: u64,
    /// Outbound lines buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
    /// Longest accepted input line in bytes.
    pub max_line_length: usize,
}

impl ServerSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs)
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4000,
            idle_timeout_secs: 60,
            reap_interval_secs: 10,
            max_send_queue: 256,
            max_line_length: 8192,
        }
    }
}

/// Log output settings. `RUST_LOG` takes precedence over `level`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = MurmurSettings::default();
        assert_eq!(s.server.port, 4000);
        assert_eq!(s.server.idle_timeout(), Duration::from_secs(60));
        assert_eq!(s.server.reap_interval(), Duration::from_secs(10));
        assert!(s.validate().is_ok());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(MurmurSettings::default()).unwrap();
        assert_eq!(json["server"]["idleTimeoutSecs"], 60);
        assert_eq!(json["server"]["maxSendQueue"], 256);
        assert_eq!(json["logging"]["level"], "info");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: MurmurSettings =
            serde_json::from_str(r#"{"server": {"port": 5000}}"#).unwrap();
        assert_eq!(s.server.port, 5000);
        assert_eq!(s.server.idle_timeout_secs, 60);
        assert!(!s.logging.json);
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let mut s = MurmurSettings::default();
        s.server.idle_timeout_secs = 0;
        let err = s.validate().unwrap_err();
        assert!(err.to_string().contains("idleTimeoutSecs"));
    }

    #[test]
    fn validate_rejects_zero_queue() {
        let mut s = MurmurSettings::default();
        s.server.max_send_queue = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }
}
