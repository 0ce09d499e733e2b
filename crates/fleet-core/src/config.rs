//! fleet.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub planner: PlannerConfig,
    pub traffic: TrafficConfig,
    pub dispatch: DispatchConfig,
    pub presence: PresenceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8470,
            data_dir: PathBuf::from("/var/lib/fleetgrid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Spacing between emitted waypoints.
    pub sample_step: f64,
    /// Upper bound for the recommended speed of a plan.
    pub default_speed: f64,
    /// Bound on every map graph query (and the external path service).
    pub graph_timeout: String,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            sample_step: 0.5,
            default_speed: 1.0,
            graph_timeout: "2s".to_string(),
        }
    }
}

impl PlannerConfig {
    pub fn graph_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("planner.graph_timeout", &self.graph_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// Telemetry older than this is ignored for proximity checks.
    pub stale_after: String,
    /// Max distance from the edge centerline for a robot to count as on it.
    pub lateral_tolerance: f64,
    /// Gap kept to a halted robot ahead.
    pub safety_buffer: f64,
    /// Radius around a node inside which a segment counts as a junction manoeuvre.
    pub junction_radius: f64,
    pub graph_timeout: String,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            stale_after: "5s".to_string(),
            lateral_tolerance: 0.3,
            safety_buffer: 1.0,
            junction_radius: 0.5,
            graph_timeout: "2s".to_string(),
        }
    }
}

impl TrafficConfig {
    pub fn stale_after(&self) -> Result<Duration, ConfigError> {
        parse_duration("traffic.stale_after", &self.stale_after)
    }

    pub fn graph_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("traffic.graph_timeout", &self.graph_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// NAKs tolerated before a command is dead-lettered.
    pub max_retries: u32,
    /// A pending command without an ack for this long counts as NAKed.
    pub ack_timeout: String,
    pub publish_timeout: String,
    /// How often overdue commands are swept.
    pub sweep_interval: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            ack_timeout: "10s".to_string(),
            publish_timeout: "2s".to_string(),
            sweep_interval: "5s".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn ack_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("dispatch.ack_timeout", &self.ack_timeout)
    }

    pub fn publish_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration("dispatch.publish_timeout", &self.publish_timeout)
    }

    pub fn sweep_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("dispatch.sweep_interval", &self.sweep_interval)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// A robot silent for this long is considered disconnected.
    pub offline_after: String,
    pub sweep_interval: String,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            offline_after: "30s".to_string(),
            sweep_interval: "5s".to_string(),
        }
    }
}

impl PresenceConfig {
    pub fn offline_after(&self) -> Result<Duration, ConfigError> {
        parse_duration("presence.offline_after", &self.offline_after)
    }

    pub fn sweep_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("presence.sweep_interval", &self.sweep_interval)
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the planner and arbiter cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.planner.sample_step > 0.0 && self.planner.sample_step.is_finite()) {
            return Err(ConfigError::Invalid {
                field: "planner.sample_step",
                reason: "must be a positive number".to_string(),
            });
        }
        if !(self.planner.default_speed > 0.0) {
            return Err(ConfigError::Invalid {
                field: "planner.default_speed",
                reason: "must be positive".to_string(),
            });
        }
        if self.traffic.lateral_tolerance < 0.0 || self.traffic.safety_buffer < 0.0 {
            return Err(ConfigError::Invalid {
                field: "traffic",
                reason: "tolerances must not be negative".to_string(),
            });
        }
        self.planner.graph_timeout()?;
        self.traffic.stale_after()?;
        self.traffic.graph_timeout()?;
        self.dispatch.ack_timeout()?;
        self.dispatch.publish_timeout()?;
        self.dispatch.sweep_interval()?;
        self.presence.offline_after()?;
        self.presence.sweep_interval()?;
        Ok(())
    }
}

/// Parse a duration string like `"500ms"`, `"5s"` or `"2m"`.
pub fn parse_duration(field: &'static str, s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::Duration {
        field,
        value: s.to_string(),
    };
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(Duration::from_secs_f64)
            .ok_or_else(invalid)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid())
    } else {
        Err(invalid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = FleetConfig::from_toml_str("").unwrap();
        assert_eq!(config, FleetConfig::default());
        assert_eq!(config.planner.sample_step, 0.5);
        assert_eq!(config.traffic.stale_after().unwrap(), Duration::from_secs(5));
        assert_eq!(config.dispatch.max_retries, 3);
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let config = FleetConfig::from_toml_str(
            r#"
[traffic]
safety_buffer = 2.0

[presence]
offline_after = "1m"
"#,
        )
        .unwrap();
        assert_eq!(config.traffic.safety_buffer, 2.0);
        assert_eq!(config.traffic.lateral_tolerance, 0.3);
        assert_eq!(
            config.presence.offline_after().unwrap(),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn rejects_bad_duration() {
        let err = FleetConfig::from_toml_str("[dispatch]\nack_timeout = \"soon\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Duration { field: "dispatch.ack_timeout", .. }));
    }

    #[test]
    fn rejects_non_positive_step() {
        let err = FleetConfig::from_toml_str("[planner]\nsample_step = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("t", "2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("t", "500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("t", "0.25s").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("t", "3m").unwrap(), Duration::from_secs(180));
        assert!(parse_duration("t", "invalid").is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = FleetConfig::default();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("[traffic]"));
        assert_eq!(FleetConfig::from_toml_str(&text).unwrap(), config);
    }
}
