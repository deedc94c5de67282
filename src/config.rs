//! Configuration management for Helion
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Unknown or type-mismatched fields are
//! rejected at parse time rather than silently merged onto defaults.

use crate::error::{HelionError, Result};
use crate::inverter::InverterType;
use crate::price::PriceLevel;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Config schema version
    pub version: u32,

    /// Message-bus topic configuration
    pub mqtt: MqttConfig,

    /// Configured inverters and their command vocabularies
    pub inverters: Vec<InverterConfig>,

    /// Dynamic pricing configuration
    pub price: PriceConfig,

    /// Warning monitor configuration
    pub warnings: WarningsConfig,

    /// Notification dispatch configuration
    pub notifications: NotificationsConfig,

    /// Durable store configuration
    pub persistence: PersistenceConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Evaluation tick interval in milliseconds
    pub poll_interval_ms: u64,

    /// Price refresh interval in seconds
    pub price_refresh_interval_secs: u64,

    /// Whether computed decisions are actually published as commands.
    /// When false the engine runs in learner mode: decisions are
    /// computed and logged but never handed to the command publisher.
    pub active_control: bool,

    /// Timezone for local-time rule windows
    pub timezone: String,
}

/// Message-bus topic configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MqttConfig {
    /// Topic prefix for inverter command topics
    pub topic_prefix: String,
}

/// Single inverter entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InverterConfig {
    /// Inverter command vocabulary family
    pub kind: InverterType,

    /// Index used in command topics (inverter_<n>)
    pub index: u32,
}

/// Dynamic pricing configuration
///
/// Owned by the user and mutated only through
/// [`Config::update_price_config`]; persisted as a single record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PriceConfig {
    /// Whether the price provider is enabled
    pub enabled: bool,

    /// Pricing API access token
    pub access_token: String,

    /// Optional specific home ID; first home found when empty
    pub home_id: String,

    /// Market country code
    pub country: String,

    /// Timezone of the price area
    pub timezone: String,

    /// Display currency code
    pub currency: String,

    /// SoC above which charging always stops
    pub target_soc: f64,

    /// SoC floor the battery should not drop under
    pub minimum_soc: f64,

    /// Judge prices by discrete level membership instead of numerics
    pub use_price_levels: bool,

    /// Levels considered acceptable when `use_price_levels` is set
    pub allowed_price_levels: Vec<PriceLevel>,

    /// Absolute ceiling in minor currency units (hundredths), used as a
    /// last resort when no average is computable
    pub max_price_threshold: Option<i64>,
}

/// Warning monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarningsConfig {
    /// Global enable for the warning monitor
    pub enabled: bool,

    /// Maximum retained warning events (FIFO by recency)
    pub max_history_items: usize,
}

/// Notification dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationsConfig {
    /// Global enable for notification dispatch
    pub enabled: bool,

    /// Opaque recipient identifiers for the configured sink
    pub recipients: Vec<String>,

    /// Per-send timeout in seconds
    pub send_timeout_secs: u64,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Directory holding persisted JSON documents
    pub data_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,

    /// Optional console-specific level override
    pub console_level: Option<String>,

    /// Optional file-specific level override
    pub file_level: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            topic_prefix: "helion".to_string(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            access_token: String::new(),
            home_id: String::new(),
            country: "NO".to_string(),
            timezone: "Europe/Oslo".to_string(),
            currency: "NOK".to_string(),
            target_soc: 80.0,
            minimum_soc: 20.0,
            use_price_levels: false,
            allowed_price_levels: vec![PriceLevel::VeryCheap, PriceLevel::Cheap],
            max_price_threshold: None,
        }
    }
}

impl Default for WarningsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_history_items: 50,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            recipients: Vec::new(),
            send_timeout_secs: 10,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: "/data/helion".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/helion.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
            console_level: None,
            file_level: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            mqtt: MqttConfig::default(),
            inverters: vec![InverterConfig {
                kind: InverterType::Modern,
                index: 1,
            }],
            price: PriceConfig::default(),
            warnings: WarningsConfig::default(),
            notifications: NotificationsConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            poll_interval_ms: 5000,
            price_refresh_interval_secs: 900,
            active_control: true,
            timezone: "Europe/Oslo".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        let default_paths = [
            "helion_config.yaml",
            "/data/helion_config.yaml",
            "/etc/helion/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.mqtt.topic_prefix.is_empty() {
            return Err(HelionError::validation(
                "mqtt.topic_prefix",
                "Topic prefix cannot be empty",
            ));
        }

        if self.poll_interval_ms == 0 {
            return Err(HelionError::validation(
                "poll_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(HelionError::validation(
                "timezone",
                "Unknown timezone identifier",
            ));
        }

        if self.warnings.max_history_items == 0 {
            return Err(HelionError::validation(
                "warnings.max_history_items",
                "Must be greater than 0",
            ));
        }

        if self.notifications.enabled && self.notifications.recipients.is_empty() {
            return Err(HelionError::validation(
                "notifications.recipients",
                "At least one recipient is required when notifications are enabled",
            ));
        }

        Self::validate_price_config(&self.price)?;

        Ok(())
    }

    /// Validate a price configuration in isolation
    pub fn validate_price_config(price: &PriceConfig) -> Result<()> {
        if !(0.0..=100.0).contains(&price.target_soc) {
            return Err(HelionError::validation(
                "price.target_soc",
                "Must be between 0 and 100",
            ));
        }

        if !(0.0..=100.0).contains(&price.minimum_soc) {
            return Err(HelionError::validation(
                "price.minimum_soc",
                "Must be between 0 and 100",
            ));
        }

        if price.minimum_soc > price.target_soc {
            return Err(HelionError::validation(
                "price.minimum_soc",
                "Cannot exceed target_soc",
            ));
        }

        if price.timezone.parse::<chrono_tz::Tz>().is_err() {
            return Err(HelionError::validation(
                "price.timezone",
                "Unknown timezone identifier",
            ));
        }

        if let Some(threshold) = price.max_price_threshold
            && threshold < 0
        {
            return Err(HelionError::validation(
                "price.max_price_threshold",
                "Cannot be negative",
            ));
        }

        if price.use_price_levels && price.allowed_price_levels.is_empty() {
            return Err(HelionError::validation(
                "price.allowed_price_levels",
                "Cannot be empty when use_price_levels is set",
            ));
        }

        Ok(())
    }

    /// Replace the price configuration after validating the update
    pub fn update_price_config(&mut self, new_price: PriceConfig) -> Result<()> {
        Self::validate_price_config(&new_price)?;
        self.price = new_price;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.version, 1);
        assert_eq!(config.poll_interval_ms, 5000);
        assert!(config.active_control);
        assert!((config.price.target_soc - 80.0).abs() < f64::EPSILON);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.mqtt.topic_prefix = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.timezone = "Mars/Olympus".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_price_config_update_rejects_invalid() {
        let mut config = Config::default();

        let mut bad = PriceConfig::default();
        bad.minimum_soc = 90.0; // above target_soc
        assert!(config.update_price_config(bad).is_err());

        let mut good = PriceConfig::default();
        good.target_soc = 85.0;
        assert!(config.update_price_config(good).is_ok());
        assert!((config.price.target_soc - 85.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_partial_yaml_merges_onto_defaults() {
        let yaml = "price:\n  enabled: true\n  access_token: tok\nwarnings:\n  enabled: false\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.price.enabled);
        assert_eq!(config.price.access_token, "tok");
        assert!(!config.warnings.enabled);
        assert_eq!(config.poll_interval_ms, 5000);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let parsed: std::result::Result<MqttConfig, _> =
            serde_yaml::from_str("topic_prefix: helion\nbogus_field: 1\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.poll_interval_ms, deserialized.poll_interval_ms);
        assert_eq!(config.price, deserialized.price);
    }
}
