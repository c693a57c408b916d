use std::path::PathBuf;

use relay_core::TopicCatalog;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};
use crate::loader::parse_log_level;

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    pub server: ServerSettings,
    /// The closed set of subscribable topics.
    pub topics: Vec<String>,
    pub store: StoreSettings,
    pub producer: ProducerSettings,
    pub logging: LoggingSettings,
}

impl RelaySettings {
    /// Build the topic catalog from `topics`.
    pub fn topic_catalog(&self) -> Result<TopicCatalog> {
        TopicCatalog::new(&self.topics)
            .map_err(|e| SettingsError::InvalidValue(format!("topics: {e}")))
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let catalog = self.topic_catalog()?;

        if self.server.max_send_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxSendQueue must be at least 1".into(),
            ));
        }
        if self.server.dispatch_queue == 0 {
            return Err(SettingsError::InvalidValue(
                "server.dispatchQueue must be at least 1".into(),
            ));
        }
        if parse_log_level(&self.logging.level).is_none() {
            return Err(SettingsError::InvalidValue(format!(
                "logging.level {:?} is not one of trace, debug, info, warn, error",
                self.logging.level
            )));
        }
        if self.producer.enabled {
            if catalog.resolve(&self.producer.topic).is_err() {
                return Err(SettingsError::InvalidValue(format!(
                    "producer.topic {:?} is not a configured topic",
                    self.producer.topic
                )));
            }
            if self.producer.interval_ms < 10 {
                return Err(SettingsError::InvalidValue(
                    "producer.intervalMs must be at least 10".into(),
                ));
            }
            if self.producer.records_per_batch == 0 {
                return Err(SettingsError::InvalidValue(
                    "producer.recordsPerBatch must be at least 1".into(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            topics: TopicCatalog::default()
                .topics()
                .iter()
                .map(|t| t.as_str().to_string())
                .collect(),
            store: StoreSettings::default(),
            producer: ProducerSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

/// Network and connection-handling settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    /// `0` binds an ephemeral port.
    pub port: u16,
    /// Per-connection outbound queue depth.
    pub max_send_queue: usize,
    pub heartbeat_interval_secs: u64,
    /// Connections without a pong for this long are reaped.
    pub client_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    /// Depth of the in-process batch dispatch queue.
    pub dispatch_queue: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9091,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            client_timeout_secs: 90,
            reaper_interval_secs: 60,
            dispatch_queue: 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// SQLite file, ignored by the memory backend.
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: crate::loader::relay_home()
                .join("database")
                .join("subscriptions.db"),
        }
    }
}

/// Built-in clock source that publishes `{"eventTime": <millis>}` records.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProducerSettings {
    pub enabled: bool,
    pub topic: String,
    pub interval_ms: u64,
    pub records_per_batch: usize,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            topic: "time".to_string(),
            interval_ms: 500,
            records_per_batch: 1,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let settings = RelaySettings::default();
        assert_eq!(settings.server.port, 9091);
        assert_eq!(settings.server.max_send_queue, 256);
        assert_eq!(settings.topics, vec!["time", "location"]);
        assert_eq!(settings.store.backend, StoreBackend::Sqlite);
        assert!(!settings.producer.enabled);
        assert_eq!(settings.logging.level, "info");
        settings.validate().unwrap();
    }

    #[test]
    fn camel_case_json() {
        let json = serde_json::to_value(RelaySettings::default()).unwrap();
        assert_eq!(json["server"]["maxSendQueue"], 256);
        assert_eq!(json["producer"]["recordsPerBatch"], 1);
        assert_eq!(json["store"]["backend"], "sqlite");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let settings: RelaySettings =
            serde_json::from_str(r#"{"server": {"port": 7000}}"#).unwrap();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.topics, vec!["time", "location"]);
    }

    #[test]
    fn validate_rejects_empty_topics() {
        let mut settings = RelaySettings::default();
        settings.topics.clear();
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn validate_rejects_producer_on_unknown_topic() {
        let mut settings = RelaySettings::default();
        settings.producer.enabled = true;
        settings.producer.topic = "weather".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn disabled_producer_is_not_validated() {
        let mut settings = RelaySettings::default();
        settings.producer.topic = "weather".into();
        settings.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_queue() {
        let mut settings = RelaySettings::default();
        settings.server.max_send_queue = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_log_level() {
        let mut settings = RelaySettings::default();
        settings.logging.level = "verbose".into();
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("logging.level"));

        settings.logging.level = "WARN".into();
        settings.validate().unwrap();
    }
}
