//! Configuration loading for the bridge.
//!
//! Configuration is loaded from a TOML file (default: `lora-bridge.toml`).
//! Every section and field is optional.

use lorabridge_core::{Compaction, DEFAULT_TRACKER_CAPACITY};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the bridge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Modem channel configuration.
    pub transport: TransportConfig,
    /// Relay engine configuration.
    pub sync: SyncConfig,
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Codec configuration.
    pub codec: CodecConfig,
    /// Identity of this device.
    pub device: DeviceConfig,
}

/// Modem channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Port the modem process sends to (default: 1383).
    #[serde(default = "default_rx_port")]
    pub rx_port: u16,
    /// Port the modem process listens on (default: 1382).
    #[serde(default = "default_tx_port")]
    pub tx_port: u16,
    /// Host of both endpoints (default: 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: String,
    /// Inbound routing workers (default: 2). Sends have one worker of their own.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pending tasks per queue before the oldest is discarded (default: 100).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Receive buffer per datagram in bytes (default: 4096).
    #[serde(default = "default_recv_buffer")]
    pub recv_buffer: usize,
    /// How long `stop()` waits for the receive loop (default: 500 ms).
    #[serde(default = "default_join_timeout_ms")]
    pub join_timeout_ms: u64,
}

/// Relay engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Ids held per direction before the dedup tracker resets (default: 2000).
    #[serde(default = "default_tracker_capacity")]
    pub tracker_capacity: usize,
    /// Types never published to the host from the radio.
    #[serde(default = "default_inbound_type_filter")]
    pub inbound_type_filter: Vec<String>,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file, or `:memory:`.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Codec configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodecConfig {
    /// Compaction scheme; must match on both ends of the link.
    #[serde(default)]
    pub compaction: Compaction,
}

/// Identity of this device.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Device uid; stamped into loop markers and used as chat sender.
    #[serde(default = "default_device_uid")]
    pub uid: String,
    /// Display name used for composed chat.
    #[serde(default = "default_callsign")]
    pub callsign: String,
}

// Default value functions
fn default_rx_port() -> u16 {
    1383
}

fn default_tx_port() -> u16 {
    1382
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_workers() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    100
}

fn default_recv_buffer() -> usize {
    4096
}

fn default_join_timeout_ms() -> u64 {
    500
}

fn default_tracker_capacity() -> usize {
    DEFAULT_TRACKER_CAPACITY
}

fn default_inbound_type_filter() -> Vec<String> {
    ["b-t-f-d", "b-t-f-r", "a-f-G-U-C"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("lora-bridge.db")
}

fn default_device_uid() -> String {
    "LORA-BRIDGE".to_string()
}

fn default_callsign() -> String {
    "LORA".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            rx_port: default_rx_port(),
            tx_port: default_tx_port(),
            host: default_host(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            recv_buffer: default_recv_buffer(),
            join_timeout_ms: default_join_timeout_ms(),
        }
    }
}

impl TransportConfig {
    /// Join timeout as a duration.
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tracker_capacity: default_tracker_capacity(),
            inbound_type_filter: default_inbound_type_filter(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            uid: default_device_uid(),
            callsign: default_callsign(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.transport;
        if t.workers == 0 {
            return Err(ConfigError::Invalid("transport.workers must be at least 1".into()));
        }
        if t.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "transport.queue_capacity must be at least 1".into(),
            ));
        }
        if t.recv_buffer == 0 {
            return Err(ConfigError::Invalid("transport.recv_buffer must be at least 1".into()));
        }
        if t.rx_port != 0 && t.rx_port == t.tx_port {
            return Err(ConfigError::Invalid(format!(
                "transport.rx_port and transport.tx_port are both {}",
                t.rx_port
            )));
        }
        if self.device.uid.trim().is_empty() {
            return Err(ConfigError::Invalid("device.uid must not be empty".into()));
        }
        Ok(())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.transport.rx_port, 1383);
        assert_eq!(config.transport.tx_port, 1382);
        assert_eq!(config.transport.workers, 2);
        assert_eq!(config.transport.queue_capacity, 100);
        assert_eq!(config.transport.join_timeout(), Duration::from_millis(500));
        assert_eq!(config.sync.tracker_capacity, 2000);
        assert_eq!(config.codec.compaction, Compaction::BinaryXml);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[transport]
rx_port = 2383
tx_port = 2382
workers = 4

[sync]
inbound_type_filter = ["b-t-f-d"]

[storage]
database = "/data/bridge.db"

[codec]
compaction = "plain"

[device]
uid = "ANDROID-42"
callsign = "ECHO"
"#;

        let config: BridgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.transport.rx_port, 2383);
        assert_eq!(config.transport.tx_port, 2382);
        assert_eq!(config.transport.workers, 4);
        assert_eq!(config.transport.host, "127.0.0.1");
        assert_eq!(config.sync.inbound_type_filter, vec!["b-t-f-d".to_string()]);
        assert_eq!(config.storage.database, PathBuf::from("/data/bridge.db"));
        assert_eq!(config.codec.compaction, Compaction::Plain);
        assert_eq!(config.device.uid, "ANDROID-42");
        assert_eq!(config.device.callsign, "ECHO");
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: BridgeConfig = toml::from_str("").unwrap();
        assert_eq!(config.transport.recv_buffer, 4096);
        assert_eq!(
            config.sync.inbound_type_filter,
            vec!["b-t-f-d", "b-t-f-r", "a-f-G-U-C"]
        );
        assert_eq!(config.device.uid, "LORA-BRIDGE");
    }

    #[test]
    fn unknown_compaction_is_a_parse_error() {
        let result: Result<BridgeConfig, _> = toml::from_str("[codec]\ncompaction = \"zstd\"");
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = BridgeConfig::default();
        config.transport.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn validate_rejects_equal_ports() {
        let mut config = BridgeConfig::default();
        config.transport.tx_port = config.transport.rx_port;
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_reads_and_validates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bridge.toml");
        std::fs::write(&path, "[transport]\nworkers = 0\n").unwrap();
        assert!(matches!(
            BridgeConfig::from_file(&path),
            Err(ConfigError::Invalid(_))
        ));

        std::fs::write(&path, "[device]\nuid = \"X\"\n").unwrap();
        assert_eq!(BridgeConfig::from_file(&path).unwrap().device.uid, "X");

        assert!(matches!(
            BridgeConfig::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
