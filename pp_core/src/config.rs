use std::{
    env, fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

pub const BUILTIN_LISTENER_CONFIG: &str = include_str!("data/listener_config.json");
pub const CONFIG_PATH_ENV: &str = "POWERPLAY_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    pub feed: FeedConfig,
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub detection: SnipeThresholds,
    pub snapshot: SnapshotConfig,
}

impl ListenerConfig {
    pub fn builtin() -> Self {
        Self::from_json_str(BUILTIN_LISTENER_CONFIG).unwrap_or_default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = ListenerConfig::from_json_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse listener config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read listener config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub endpoint: String,
    pub schema_ref: String,
    pub events: Vec<String>,
    pub silence_timeout_secs: u64,
    pub reconnect_delay_secs: u64,
    pub version_window: usize,
    pub seed_version: String,
    pub seed_count: usize,
    pub live_version_prefix: String,
}

impl FeedConfig {
    pub fn silence_timeout(&self) -> Duration {
        Duration::from_secs(self.silence_timeout_secs.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: "tcp://eddn.edcd.io:9500".to_string(),
            schema_ref: "https://eddn.edcd.io/schemas/journal/1".to_string(),
            events: vec!["FSDJump".to_string(), "Location".to_string()],
            silence_timeout_secs: 300,
            reconnect_delay_secs: 2,
            version_window: 200,
            seed_version: "4.2.0.0".to_string(),
            seed_count: 5,
            live_version_prefix: "4.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Valkey/Redis URL. Without one the listener keeps state in process.
    pub url: Option<String>,
    pub key_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: Some("redis://127.0.0.1:6379".to_string()),
            key_prefix: "edbgs-map".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("db.sqlite3"),
        }
    }
}

/// Tuning for the snipe detector. Values are empirically fit against the live feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SnipeThresholds {
    /// Hours over which the age-scaled thresholds ramp to their maximum.
    pub ramp_hours: f64,
    pub acquisition_base: f64,
    pub acquisition_ramp: f64,
    pub acquisition_min_progress: f64,
    /// Control points behind a full acquisition bar.
    pub acquisition_cp_scale: f64,
    pub eoc_acquisition_ceiling: f64,
    /// Control points credited for a Fortified system collapsing to Unoccupied.
    pub collapse_range: f64,
    pub undermining_margin: i64,
    pub reinforcement_base: f64,
    pub reinforcement_ramp: f64,
    /// Same-tier EOC swings are only considered below this start progress...
    pub eoc_settled_progress: f64,
    /// ...or when they moved more than this fraction of the tier.
    pub eoc_min_swing: f64,
    pub stronghold_rest_progress: f64,
    pub eoc_undermining_floor: i64,
}

impl Default for SnipeThresholds {
    fn default() -> Self {
        Self {
            ramp_hours: 10.0,
            acquisition_base: 0.25,
            acquisition_ramp: 0.5,
            acquisition_min_progress: 0.5,
            acquisition_cp_scale: 120_000.0,
            eoc_acquisition_ceiling: 0.8,
            collapse_range: 650_000.0,
            undermining_margin: 25_000,
            reinforcement_base: 30_000.0,
            reinforcement_ramp: 70_000.0,
            eoc_settled_progress: 0.25,
            eoc_min_swing: 0.2,
            stronghold_rest_progress: 0.999,
            eoc_undermining_floor: 25_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// How long before the tick the cycle stats are captured.
    pub lead_minutes: i64,
    /// Pause after a capture so the next schedule lands in the following cycle.
    pub settle_minutes: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            lead_minutes: 5,
            settle_minutes: 10,
        }
    }
}

/// Loads the config named by `POWERPLAY_CONFIG_PATH`, falling back to the builtin copy.
pub fn load_listener_config_from_env() -> (ListenerConfig, Option<PathBuf>) {
    if let Some(path) = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from) {
        match ListenerConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "powerplay::config",
                    path = %path.display(),
                    "listener_config.loaded=file"
                );
                return (config, Some(path));
            }
            Err(err) => {
                tracing::warn!(
                    target: "powerplay::config",
                    path = %path.display(),
                    error = %err,
                    "listener_config.load_failed"
                );
            }
        }
    }

    tracing::info!(target: "powerplay::config", "listener_config.loaded=builtin");
    (ListenerConfig::builtin(), None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_matches_defaults() {
        let config = ListenerConfig::from_json_str(BUILTIN_LISTENER_CONFIG).unwrap();
        assert_eq!(config.detection, SnipeThresholds::default());
        assert_eq!(config.feed.events, vec!["FSDJump", "Location"]);
        assert_eq!(config.feed.silence_timeout(), Duration::from_secs(300));
        assert_eq!(config.cache.key_prefix, "edbgs-map");
    }

    #[test]
    fn partial_config_keeps_defaults_for_missing_sections() {
        let config = ListenerConfig::from_json_str(
            r#"{"cache": {"url": null}, "detection": {"undermining_margin": 40000}}"#,
        )
        .unwrap();
        assert!(config.cache.url.is_none());
        assert_eq!(config.cache.key_prefix, "edbgs-map");
        assert_eq!(config.detection.undermining_margin, 40_000);
        assert_eq!(config.detection.reinforcement_base, 30_000.0);
        assert_eq!(config.feed.version_window, 200);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ListenerConfig::from_file(Path::new("/nonexistent/listener.json")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFailed { .. }));
        assert!(err.to_string().contains("/nonexistent/listener.json"));
    }
}
