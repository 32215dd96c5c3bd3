use std::{path::{Path, PathBuf}, str::FromStr};

use chrono::{DateTime, Utc};
use ride_tracker_lib::location_sample::LocationSample;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0:?}: {1}")]
    Read(PathBuf, String),
    #[error("line {line}: expected `key = value`")]
    Syntax { line: usize },
    #[error("invalid value for {key}: {value}")]
    Value { key: String, value: String },
}

/// Where the engine takes "now" from when a sample arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockMode {
    /// Wall clock at arrival. Used for live sources.
    #[default]
    Wall,
    /// The sample's own timestamp. Used when replaying recorded tracks.
    Sample,
}

impl ClockMode {
    pub fn now(&self, sample: Option<&LocationSample>) -> DateTime<Utc> {
        match (self, sample) {
            (ClockMode::Sample, Some(sample)) => sample.timestamp,
            _ => Utc::now(),
        }
    }
}

impl FromStr for ClockMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wall" => Ok(ClockMode::Wall),
            "sample" => Ok(ClockMode::Sample),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Samples with a larger accuracy radius are dropped. Exactly this value is kept.
    pub max_accuracy_m: f64,
    /// Deltas at or below this do not count towards distance.
    pub noise_floor_m: f64,
    /// Mean speed over the window needed to start recording.
    pub start_speed_mps: f64,
    /// Trailing samples slower than this are trimmed on stop.
    pub trim_speed_mps: f64,
    pub speed_window: usize,
    pub provisional_capacity: usize,
    /// Trips shorter than this are discarded by the recorder, not the engine.
    pub min_trip_distance_m: f64,
    pub clock: ClockMode,
    pub database: Option<PathBuf>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_accuracy_m: 50.,
            noise_floor_m: 2.,
            start_speed_mps: 2.5,
            trim_speed_mps: 2.,
            speed_window: 3,
            provisional_capacity: 10,
            min_trip_distance_m: 30.,
            clock: ClockMode::Wall,
            database: None,
        }
    }
}

impl TrackerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| ConfigError::Read(path.to_path_buf(), err.to_string()))?;
        Self::parse(&text)
    }

    /// Reads `key = value` lines on top of the defaults. `#` starts a comment line.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(ConfigError::Syntax { line: index + 1 });
            };
            let key = key.trim();
            let value = value.trim();

            let invalid = || ConfigError::Value { key: key.to_string(), value: value.to_string() };

            match key {
                "max_accuracy_m" => config.max_accuracy_m = parse_number(value).ok_or_else(invalid)?,
                "noise_floor_m" => config.noise_floor_m = parse_number(value).ok_or_else(invalid)?,
                "start_speed_mps" => config.start_speed_mps = parse_number(value).ok_or_else(invalid)?,
                "trim_speed_mps" => config.trim_speed_mps = parse_number(value).ok_or_else(invalid)?,
                "min_trip_distance_m" => config.min_trip_distance_m = parse_number(value).ok_or_else(invalid)?,
                "speed_window" => config.speed_window = value.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(invalid)?,
                "provisional_capacity" => config.provisional_capacity = value.parse::<usize>().ok().filter(|n| *n > 0).ok_or_else(invalid)?,
                "clock" => config.clock = value.parse().map_err(|_| invalid())?,
                "database" => config.database = Some(PathBuf::from(value)),
                _ => {
                    tracing::warn!("Unknown config key: {}", key);
                }
            }
        }

        Ok(config)
    }
}

fn parse_number(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|n| n.is_finite() && *n >= 0.)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ride_thresholds() {
        let config = TrackerConfig::default();
        assert_eq!(config.max_accuracy_m, 50.);
        assert_eq!(config.noise_floor_m, 2.);
        assert_eq!(config.start_speed_mps, 2.5);
        assert_eq!(config.trim_speed_mps, 2.);
        assert_eq!(config.speed_window, 3);
        assert_eq!(config.provisional_capacity, 10);
        assert_eq!(config.clock, ClockMode::Wall);
    }

    #[test]
    fn parse_overrides() {
        let config = TrackerConfig::parse("
            # replay settings
            clock = sample
            max_accuracy_m = 25
            speed_window=5
            database = /tmp/rides.db
            colour = blue
        ").unwrap();

        assert_eq!(config.clock, ClockMode::Sample);
        assert_eq!(config.max_accuracy_m, 25.);
        assert_eq!(config.speed_window, 5);
        assert_eq!(config.database, Some(PathBuf::from("/tmp/rides.db")));
        assert_eq!(config.noise_floor_m, 2.);
    }

    #[test]
    fn parse_rejects_bad_values() {
        assert!(matches!(TrackerConfig::parse("speed_window = 0"), Err(ConfigError::Value { .. })));
        assert!(matches!(TrackerConfig::parse("noise_floor_m = -1"), Err(ConfigError::Value { .. })));
        assert!(matches!(TrackerConfig::parse("clock = sundial"), Err(ConfigError::Value { .. })));
        assert!(matches!(TrackerConfig::parse("just words"), Err(ConfigError::Syntax { line: 1 })));
    }

    #[test]
    fn sample_clock_uses_sample_time() {
        let sample = LocationSample::new(DateTime::from_timestamp(1_000, 0).unwrap(), 0., 0., 0., 0., 0.);
        assert_eq!(ClockMode::Sample.now(Some(&sample)), sample.timestamp);
        assert_ne!(ClockMode::Wall.now(Some(&sample)), sample.timestamp);
    }
}
