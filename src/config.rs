//! Application configuration

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;
use tracing::warn;

use crate::errors::GatewayError;

/// Configuration snapshot handed to the coordinator
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub cot: CotConfig,
    pub bbox: BoundingBox,
    pub radio: RadioConfig,
    pub aggregator: AggregatorConfig,
    pub stream: StreamConfig,
    pub known_craft: KnownCraftConfig,
    pub cache: CacheConfig,
    pub intake: IntakeConfig,
    pub transport: TransportConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CotConfig {
    /// Seconds from generation until a track goes stale
    pub stale_seconds: u64,
    /// Event type for vessels with no better classification
    pub default_type: String,
    /// Suppress events for aids to navigation
    pub ignore_aton: bool,
    /// Appended to event remarks
    pub host_id: Option<String>,
}

impl Default for CotConfig {
    fn default() -> Self {
        Self {
            stale_seconds: 3600,
            default_type: "a-u-S-X-M".to_string(),
            ignore_aton: false,
            host_id: None,
        }
    }
}

/// Geographic filter for aggregator and stream feeds
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self {
            lat_min: -90.0,
            lat_max: 90.0,
            lon_min: -180.0,
            lon_max: 180.0,
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RadioConfig {
    pub enabled: bool,
    pub listen_addr: SocketAddr,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub fragment_timeout: Duration,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5050)),
            fragment_timeout: Duration::from_secs(10),
        }
    }
}

pub const DEFAULT_AGGREGATOR_URL: &str = "https://data.aishub.net/ws.php?username={username}&format=1&output=json&compress=0&latmin={latmin}&latmax={latmax}&lonmin={lonmin}&lonmax={lonmax}";

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregatorConfig {
    pub enabled: bool,
    /// URL template with `{latmin}`, `{latmax}`, `{lonmin}`, `{lonmax}` and
    /// `{username}` placeholders
    pub url: String,
    pub username: Option<String>,
    /// Sent as `x-api-key` (SeaVision)
    pub api_key: Option<String>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub poll_interval: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: DEFAULT_AGGREGATOR_URL.to_string(),
            username: None,
            api_key: None,
            poll_interval: Duration::from_secs(61),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key: Option<String>,
    /// Empty means every message type the mapper understands
    pub message_types: Vec<String>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub initial_backoff: Duration,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub max_backoff: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "wss://stream.aisstream.io/v0/stream".to_string(),
            api_key: None,
            message_types: Vec::new(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct KnownCraftConfig {
    pub path: Option<PathBuf>,
    /// Only emit events for vessels matched by a rule
    pub explicit_only: bool,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub path: Option<PathBuf>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub flush_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_interval: Duration::from_secs(60),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IntakeConfig {
    pub capacity: usize,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    pub shutdown_grace: Duration,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TransportConfig {
    pub cot_addr: SocketAddr,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            cot_addr: SocketAddr::from(([127, 0, 0, 1], 6969)),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("AISCOT")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("stream.message_types"),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), GatewayError> {
        self.bbox.validate()?;

        if !(self.radio.enabled || self.aggregator.enabled || self.stream.enabled) {
            return Err(configuration_error("No feed is enabled"));
        }
        if self.aggregator.enabled {
            self.aggregator.validate()?;
        }
        if self.stream.enabled {
            self.stream.validate()?;
        }
        if self.intake.capacity == 0 {
            return Err(configuration_error("Intake capacity must be greater than zero"));
        }
        if self.cot.stale_seconds == 0 {
            return Err(configuration_error("Stale seconds must be greater than zero"));
        }
        if self.known_craft.explicit_only && self.known_craft.path.is_none() {
            return Err(configuration_error(
                "Explicit-only mode needs a known craft table",
            ));
        }
        self.cache.validate()?;
        Ok(())
    }
}

impl BoundingBox {
    pub fn validate(&self) -> Result<(), GatewayError> {
        let lat_ok = (-90.0..=90.0).contains(&self.lat_min) && (-90.0..=90.0).contains(&self.lat_max);
        let lon_ok =
            (-180.0..=180.0).contains(&self.lon_min) && (-180.0..=180.0).contains(&self.lon_max);
        if !lat_ok || !lon_ok {
            return Err(configuration_error("Bounding box is outside geographic range"));
        }
        if self.lat_min >= self.lat_max || self.lon_min >= self.lon_max {
            return Err(configuration_error("Bounding box minimum must be below maximum"));
        }
        Ok(())
    }
}

impl AggregatorConfig {
    fn validate(&self) -> Result<(), GatewayError> {
        if self.url.trim().is_empty() {
            return Err(configuration_error("Aggregator URL cannot be empty"));
        }
        if self.url.contains("{username}") && self.username.is_none() {
            return Err(configuration_error(
                "Aggregator URL needs a username but none is configured",
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(configuration_error("Poll interval must be greater than zero"));
        }
        Ok(())
    }

    /// Fill the URL template for `bbox`.
    pub fn request_url(&self, bbox: &BoundingBox) -> String {
        self.url
            .replace("{latmin}", &bbox.lat_min.to_string())
            .replace("{latmax}", &bbox.lat_max.to_string())
            .replace("{lonmin}", &bbox.lon_min.to_string())
            .replace("{lonmax}", &bbox.lon_max.to_string())
            .replace("{username}", self.username.as_deref().unwrap_or(""))
    }
}

impl StreamConfig {
    fn validate(&self) -> Result<(), GatewayError> {
        if self.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(configuration_error("Stream feed requires an API key"));
        }
        if self.initial_backoff.is_zero() || self.max_backoff < self.initial_backoff {
            return Err(configuration_error(
                "Stream backoff must be non-zero and max_backoff >= initial_backoff",
            ));
        }
        Ok(())
    }
}

impl CacheConfig {
    /// Validate configuration parameters. Nothing to check without a path.
    pub fn validate(&self) -> Result<(), GatewayError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        validate_path(path)?;
        self.validate_flush_interval()?;
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            ensure_directory_exists(dir)?;
        }
        Ok(())
    }

    fn validate_flush_interval(&self) -> Result<(), GatewayError> {
        if self.flush_interval.is_zero() {
            return Err(configuration_error("Flush interval must be greater than zero"));
        }
        Ok(())
    }
}

fn validate_path(path: &Path) -> Result<(), GatewayError> {
    if path.to_str().unwrap_or("").is_empty() {
        return Err(configuration_error("Cache path cannot be empty"));
    }
    Ok(())
}

fn ensure_directory_exists(dir: &Path) -> Result<(), GatewayError> {
    if !dir.exists() {
        warn!("Cache directory does not exist, attempting to create it");
        std::fs::create_dir_all(dir).map_err(|e| GatewayError::ConfigurationError {
            message: format!("Could not create cache directory: {}", e),
        })?;
    }
    Ok(())
}

fn configuration_error(message: &str) -> GatewayError {
    GatewayError::ConfigurationError {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_load_config() {
        env::set_var("AISCOT__COT__STALE_SECONDS", "600");
        env::set_var("AISCOT__COT__HOST_ID", "pier-7");
        env::set_var("AISCOT__STREAM__MESSAGE_TYPES", "PositionReport,ShipStaticData");
        env::set_var("AISCOT__STREAM__MAX_BACKOFF", "30");
        env::set_var("AISCOT__RADIO__LISTEN_ADDR", "127.0.0.1:5051");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.cot.stale_seconds, 600);
        assert_eq!(config.cot.host_id.as_deref(), Some("pier-7"));
        assert_eq!(config.cot.default_type, "a-u-S-X-M");
        assert_eq!(
            config.stream.message_types,
            vec!["PositionReport", "ShipStaticData"]
        );
        assert_eq!(config.stream.max_backoff, Duration::from_secs(30));
        assert_eq!(config.stream.initial_backoff, Duration::from_secs(1));
        assert_eq!(config.radio.listen_addr, "127.0.0.1:5051".parse().unwrap());
        assert_eq!(config.aggregator.poll_interval, Duration::from_secs(61));
        assert_eq!(config.intake.capacity, 1024);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_no_feed_enabled() {
        let mut config = AppConfig::default();
        config.radio.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_feed_needs_settings() {
        let mut config = AppConfig::default();
        config.stream.enabled = true;
        assert!(config.validate().is_err());
        config.stream.api_key = Some("secret".to_string());
        assert!(config.validate().is_ok());

        let mut config = AppConfig::default();
        config.aggregator.enabled = true;
        assert!(config.validate().is_err());
        config.aggregator.username = Some("AH_TEST".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bounding_box_validate() {
        let bbox = BoundingBox {
            lat_min: 37.0,
            lat_max: 38.0,
            lon_min: -123.0,
            lon_max: -122.0,
        };
        assert!(bbox.validate().is_ok());

        let swapped = BoundingBox {
            lat_min: -123.0,
            lat_max: -122.0,
            lon_min: 37.0,
            lon_max: 38.0,
        };
        assert!(swapped.validate().is_err());

        let inverted = BoundingBox {
            lat_min: 38.0,
            lat_max: 37.0,
            ..bbox
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_request_url() {
        let config = AggregatorConfig {
            username: Some("AH_TEST".to_string()),
            ..AggregatorConfig::default()
        };
        let bbox = BoundingBox {
            lat_min: 37.5,
            lat_max: 38.0,
            lon_min: -123.0,
            lon_max: -122.25,
        };
        let url = config.request_url(&bbox);
        assert!(url.contains("username=AH_TEST"));
        assert!(url.contains("latmin=37.5&latmax=38&lonmin=-123&lonmax=-122.25"));
    }

    #[test]
    fn test_cache_config_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            path: Some(dir.path().join("nested").join("identities.json")),
            flush_interval: Duration::from_secs(10),
        };
        assert!(config.validate().is_ok());
        assert!(dir.path().join("nested").is_dir());

        let config = CacheConfig {
            path: Some(PathBuf::from("")),
            flush_interval: Duration::from_secs(10),
        };
        assert!(config.validate().is_err());

        let config = CacheConfig {
            path: Some(PathBuf::from("/tmp/identities.json")),
            flush_interval: Duration::from_secs(0),
        };
        assert!(config.validate().is_err());
    }
}
