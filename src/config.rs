//! Configuration for the motion alert agent.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Beacon region used when none is configured.
pub const DEFAULT_BEACON_UUID: Uuid = Uuid::from_u128(0x18F17185_AB14_2018_0329_000000000015);

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Requested sensor sampling rate
    pub sample_rate_hz: u32,

    /// Aligned triples per classification window
    pub window_size: usize,

    /// Minimum interval between considered proximity events
    #[serde(with = "duration_serde")]
    pub proximity_throttle: Duration,

    /// Minimum interval between fired alerts
    #[serde(with = "duration_serde")]
    pub alert_cooldown: Duration,

    /// Prediction must exceed this to fire an alert
    pub prediction_alert_threshold: f64,

    /// Restrict inference to the CPU
    pub background_safe_inference: bool,

    /// Completed windows waiting for inference before the oldest is dropped
    pub window_queue_capacity: usize,

    /// Unmatched samples buffered per sensor
    pub sensor_backlog_capacity: usize,

    /// Only proximity events from this beacon region are considered
    pub beacon_uuid: Option<Uuid>,

    pub alert_title: String,
    pub alert_body: String,

    /// IANA timezone used to name recording files
    pub timezone: String,

    /// Path for storing state and stats
    pub data_path: PathBuf,

    /// Path for sensor recordings
    pub recordings_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("motion-alert-agent");

        Self {
            sample_rate_hz: 50,
            window_size: 50,
            proximity_throttle: Duration::from_secs(5),
            alert_cooldown: Duration::from_secs(5),
            prediction_alert_threshold: 0.5,
            background_safe_inference: false,
            window_queue_capacity: 4,
            sensor_backlog_capacity: 256,
            beacon_uuid: Some(DEFAULT_BEACON_UUID),
            alert_title: "Beware!".to_string(),
            alert_body: "You are crossing the road!".to_string(),
            timezone: "UTC".to_string(),
            recordings_path: data_dir.join("recordings"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("motion-alert-agent")
            .join("config.json")
    }

    /// Path of the persisted session stats.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("stats.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.recordings_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Parsed recording timezone.
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.timezone)))
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("sample_rate_hz", self.sample_rate_hz as usize),
            ("window_size", self.window_size),
            ("window_queue_capacity", self.window_queue_capacity),
            ("sensor_backlog_capacity", self.sensor_backlog_capacity),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        if !(0.0..=1.0).contains(&self.prediction_alert_threshold) {
            return Err(ConfigError::Invalid(format!(
                "prediction_alert_threshold must be within [0, 1], got {}",
                self.prediction_alert_threshold
            )));
        }
        self.timezone()?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration as fractional seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
