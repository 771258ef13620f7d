use error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::path::Path;

pub mod error;

/// Optional tuning file for the analysis knobs that rarely change per run.
/// The command line carries everything else.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Throughput bucket width in seconds.
    pub interval: f64,
    /// Minimum gap between ACKs that counts as a connection interruption.
    pub min_interruption: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: 0.050,
            min_interruption: 0.1,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.analysis.interval > 0.0) {
            return Err(ConfigError::Validation(format!(
                "Throughput interval must be positive, got {}.",
                self.analysis.interval
            )));
        }

        if !(self.analysis.min_interruption > 0.0) {
            return Err(ConfigError::Validation(format!(
                "Minimum interruption must be positive, got {}.",
                self.analysis.min_interruption
            )));
        }

        Ok(())
    }
}

/// Loads the tuning file if one was given, built-in defaults otherwise.
pub fn handle(path: Option<&Path>) -> Result<Config, ConfigError> {
    match path {
        Some(path) => {
            let config_content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&config_content)?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}
