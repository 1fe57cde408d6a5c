//! SmartQueue configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scheduler::SchedulerConfig;

/// Main SmartQueue configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Scheduler tuning
    pub scheduler: SchedulerConfig,

    /// Synthetic workload for `sq simulate`
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for candidate in Self::candidates() {
            if candidate.exists() {
                match Self::load_from_file(&candidate) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", candidate.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them once logging works.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::candidates().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        serde_yaml::from_str::<Self>(&content).ok()?.log_level
    }

    /// Project-local config first, then the user config
    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(".smartqueue.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            candidates.push(config_dir.join("smartqueue").join("smartqueue.yml"));
        }
        candidates
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Synthetic workload parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of tasks to submit
    pub tasks: usize,

    /// Probability that a task fails
    #[serde(rename = "failure-rate")]
    pub failure_rate: f64,

    /// Shortest simulated task duration in milliseconds
    #[serde(rename = "min-duration-ms")]
    pub min_duration_ms: u64,

    /// Longest simulated task duration in milliseconds
    #[serde(rename = "max-duration-ms")]
    pub max_duration_ms: u64,

    /// How often the concurrency controller runs, in milliseconds
    #[serde(rename = "adjust-interval-ms")]
    pub adjust_interval_ms: u64,

    /// RNG seed; random when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tasks: 20,
            failure_rate: 0.1,
            min_duration_ms: 10,
            max_duration_ms: 100,
            adjust_interval_ms: 50,
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.log_level.is_none());
        assert_eq!(config.scheduler.max_concurrency, 4);
        assert_eq!(config.simulation.tasks, 20);
        assert_eq!(config.simulation.failure_rate, 0.1);
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
log-level: debug

scheduler:
  max-concurrency: 2
  learning-rate: 0.25
  controller:
    max-concurrency: 6

simulation:
  tasks: 8
  failure-rate: 0.5
  min-duration-ms: 1
  max-duration-ms: 5
  adjust-interval-ms: 10
  seed: 42
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.scheduler.max_concurrency, 2);
        assert_eq!(config.scheduler.learning_rate, 0.25);
        assert_eq!(config.scheduler.controller.max_concurrency, 6);
        assert_eq!(config.simulation.tasks, 8);
        assert_eq!(config.simulation.failure_rate, 0.5);
        assert_eq!(config.simulation.seed, Some(42));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let yaml = r#"
simulation:
  tasks: 3
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        // Specified value
        assert_eq!(config.simulation.tasks, 3);

        // Defaults for unspecified
        assert_eq!(config.simulation.max_duration_ms, 100);
        assert_eq!(config.scheduler.discount_factor, 0.9);
    }

    #[test]
    fn test_load_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "log-level: warn\nscheduler:\n  max-concurrency: 7").unwrap();

        let path = file.path().to_path_buf();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.max_concurrency, 7);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let path = PathBuf::from("/nonexistent/smartqueue.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_roundtrip_yaml() {
        let yaml = serde_yaml::to_string(&Config::default()).unwrap();
        assert!(yaml.contains("max-concurrency"));
        assert!(!yaml.contains("log-level"));
    }
}
