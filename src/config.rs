//! Application configuration, parsed from a YAML file.
//!
//! `config.yaml` is tried first, then `config.example.yaml`. The optional
//! `relays` / `sensors` sections select real hardware drivers; when absent,
//! the application falls back to in-memory stubs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::AppError;

#[derive(Debug, Clone, Deserialize)]
pub struct LocationConfig {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WeatherConfig {
    pub user_agent: String,
    #[serde(default = "default_poll_interval_minutes")]
    pub poll_interval_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    pub gpio_pin: u8,
    #[serde(default = "default_active_high")]
    pub active_high: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub id: String,
}

/// Descriptive ground-loop metadata; not used by the control logic.
#[derive(Debug, Clone, Deserialize)]
pub struct GroundLoopConfig {
    #[serde(default = "default_loops")]
    pub loops: u32,
    #[serde(default = "default_total_length_m")]
    pub total_length_m: u32,
    #[serde(default = "default_pipe_outer_mm")]
    pub pipe_outer_mm: u32,
    #[serde(default = "default_pipe_wall_mm")]
    pub pipe_wall_mm: u32,
}

/// Descriptive buffer-tank metadata; not used by the control logic.
#[derive(Debug, Clone, Deserialize)]
pub struct TankConfig {
    #[serde(default = "default_volume_liters")]
    pub volume_liters: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub location: LocationConfig,
    pub weather: WeatherConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub relays: Option<BTreeMap<String, RelayConfig>>,
    #[serde(default)]
    pub sensors: Option<BTreeMap<String, SensorConfig>>,
    #[serde(default)]
    pub ground_loop: Option<GroundLoopConfig>,
    #[serde(default)]
    pub tank: Option<TankConfig>,
}

fn default_poll_interval_minutes() -> u64 {
    30
}

fn default_database_path() -> String {
    "frostguard.db".to_string()
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8000
}

fn default_active_high() -> bool {
    true
}

fn default_loops() -> u32 {
    8
}

fn default_total_length_m() -> u32 {
    900
}

fn default_pipe_outer_mm() -> u32 {
    20
}

fn default_pipe_wall_mm() -> u32 {
    2
}

fn default_volume_liters() -> u32 {
    200
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// When `path` is `None`, tries `config.yaml` first, then
    /// `config.example.yaml` in the current directory.
    pub fn load(path: Option<&Path>) -> Result<Self, AppError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => find_default_config()?,
        };

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            AppError::Config(format!("Cannot read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("Invalid config {}: {}", path.display(), e)))
    }
}

fn find_default_config() -> Result<PathBuf, AppError> {
    for candidate in ["config.yaml", "config.example.yaml"] {
        let p = PathBuf::from(candidate);
        if p.exists() {
            return Ok(p);
        }
    }
    Err(AppError::Config(
        "Found neither config.yaml nor config.example.yaml".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "\
location:
  lat: 59.91
  lon: 10.75
weather:
  user_agent: frostguard-test/0.1
";

    #[test]
    fn test_minimal_config_applies_defaults() {
        let cfg: AppConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.location.lat, 59.91);
        assert_eq!(cfg.weather.poll_interval_minutes, 30);
        assert_eq!(cfg.database.path, "frostguard.db");
        assert_eq!(cfg.web.host, "0.0.0.0");
        assert_eq!(cfg.web.port, 8000);
        assert!(cfg.relays.is_none());
        assert!(cfg.sensors.is_none());
    }

    #[test]
    fn test_full_config_parses_hardware_sections() {
        let yaml = "\
location:
  lat: 59.91
  lon: 10.75
weather:
  user_agent: frostguard-test/0.1
  poll_interval_minutes: 15
database:
  path: /var/lib/frostguard/frostguard.db
web:
  host: 127.0.0.1
  port: 8080
relays:
  heat_pump:
    gpio_pin: 26
  circulation_pump:
    gpio_pin: 20
    active_high: false
sensors:
  loop_inlet:
    id: 28-0123456789ab
  tank:
    id: 28-0123456789xx
ground_loop:
  loops: 8
  total_length_m: 900
tank:
  volume_liters: 200
";
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        let relays = cfg.relays.expect("relays section should parse");
        assert_eq!(relays["heat_pump"].gpio_pin, 26);
        assert!(relays["heat_pump"].active_high, "active_high defaults to true");
        assert!(!relays["circulation_pump"].active_high);

        let sensors = cfg.sensors.expect("sensors section should parse");
        assert_eq!(sensors["loop_inlet"].id, "28-0123456789ab");
        assert_eq!(cfg.ground_loop.unwrap().pipe_outer_mm, 20);
        assert_eq!(cfg.tank.unwrap().volume_liters, 200);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let yaml = "\
location:
  lat: 59.91
  lon: 10.75
";
        let result = serde_yaml::from_str::<AppConfig>(yaml);
        assert!(result.is_err(), "weather section is required");
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let result = AppConfig::load(Some(Path::new("/nonexistent/frostguard.yaml")));
        assert!(matches!(result, Err(AppError::Config(_))));
    }
}
