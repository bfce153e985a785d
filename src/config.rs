use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top level configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Setting `realtime: true` deactivates the simulated clock.
    /// Only if it is set to `false` will the [`SimulationConfig`] take effect.
    pub realtime: bool,
    /// Configuration of the simulated clock.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationConfig>,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            realtime: true,
            simulation: None,
        }
    }
}

/// Configuration for a simulated clock.
///
/// Simulated time never moves on its own; it only advances through a
/// [`ClockController`](crate::ClockController).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// What time should the clock start at.
    #[serde(default = "Utc::now")]
    pub start_at: DateTime<Utc>,
}

impl SimulationConfig {
    /// Create a config starting at the current wall-clock time.
    pub fn now() -> Self {
        Self {
            start_at: Utc::now(),
        }
    }

    /// Create a config starting at a specific time.
    pub fn starting_at(start_at: DateTime<Utc>) -> Self {
        Self { start_at }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_realtime() {
        let config = ClockConfig::default();
        assert!(config.realtime);
        assert!(config.simulation.is_none());
    }

    #[test]
    fn start_at_defaults_to_now() {
        let before = Utc::now();
        let config: SimulationConfig = serde_json::from_str("{}").unwrap();
        assert!(config.start_at >= before);
    }

    #[test]
    fn deserialize_simulated() {
        let config: ClockConfig = serde_json::from_str(
            r#"{ "realtime": false, "simulation": { "start_at": "2018-01-01T10:00:00Z" } }"#,
        )
        .unwrap();
        assert!(!config.realtime);
        let start = config.simulation.unwrap().start_at;
        assert_eq!(start.to_rfc3339(), "2018-01-01T10:00:00+00:00");
    }
}
