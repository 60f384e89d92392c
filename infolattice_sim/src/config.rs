//! Harness configuration, loadable from JSON.

use infolattice_core::{DetectorConfig, LatticeError, SimulationParams, StochasticConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading a harness config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(#[from] LatticeError),
}

/// Settings shared by every scenario run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Edge length of the cubic lattice
    pub size: usize,

    /// Seed wave number along x
    pub kx: usize,

    /// Steps per scenario (forward half for the photon window)
    pub steps: usize,

    /// Standard deviation of the thermal E_asym noise (conservation stress)
    pub noise_std: f64,

    /// Export every n-th step
    pub export_interval: usize,

    pub params: SimulationParams,
    pub stochastic: StochasticConfig,
    pub detector: DetectorConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            size: 8,
            kx: 6,
            steps: 100,
            noise_std: 0.05,
            export_interval: 10,
            params: SimulationParams::default(),
            stochastic: StochasticConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Reads and validates a JSON config file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: HarnessConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LatticeError> {
        if self.size == 0 {
            return Err(LatticeError::InvalidDimensions {
                width: 0,
                height: 0,
                depth: 0,
            });
        }
        if !self.noise_std.is_finite() || self.noise_std < 0.0 {
            return Err(LatticeError::parameter("noise_std must be >= 0"));
        }
        if self.export_interval == 0 {
            return Err(LatticeError::parameter("export_interval must be at least 1"));
        }
        self.params.validate()?;
        self.stochastic.validate()?;
        self.detector.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = HarnessConfig::from_json(r#"{ "size": 4, "params": { "time_step": 0.5 } }"#).unwrap();
        assert_eq!(config.size, 4);
        assert_eq!(config.kx, 6);
        assert_eq!(config.params.time_step, 0.5);
        assert_eq!(config.params.max_history, 256);
        assert_eq!(config.detector.history_depth, 50);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            HarnessConfig::from_json(r#"{ "detector": { "persistence_threshold": 99 } }"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(HarnessConfig::from_json("not json"), Err(ConfigError::Parse(_))));
    }
}
