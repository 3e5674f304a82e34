//! Hyperparameters for the ensemble and its variants.

use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, Result};

/// Window length used by the legacy turbine deployment.
pub const DEFAULT_TIMESTEPS: usize = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Window length T.
    pub timesteps: usize,
    pub training: TrainingConfig,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        EnsembleConfig {
            timesteps: DEFAULT_TIMESTEPS,
            training: TrainingConfig::default(),
        }
    }
}

impl EnsembleConfig {
    pub fn with_timesteps(timesteps: usize) -> Self {
        EnsembleConfig {
            timesteps,
            ..Self::default()
        }
    }

    /// Parse a YAML document; missing fields take their defaults.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: EnsembleConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.timesteps == 0 {
            return Err(AnomalyError::invalid_config("timesteps must be positive"));
        }
        self.training.validate()
    }
}

/// Per-variant training settings. Every variant is fit with the same values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of samples (taken from the end) held out for validation.
    pub validation_split: f64,
    /// Epochs without validation improvement before stopping early; 0 disables.
    pub patience: usize,
    /// Widths of the hidden ReLU layers. Empty means a linear read-out.
    pub hidden_units: Vec<usize>,
    pub seed: u64,
    /// Worker threads for variant training, 0 uses every core.
    pub threads: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            epochs: 100,
            batch_size: 32,
            learning_rate: 1e-3,
            validation_split: 0.2,
            patience: 10,
            hidden_units: vec![16],
            seed: 42,
            threads: 0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(AnomalyError::invalid_config("epochs must be positive"));
        }
        if self.batch_size == 0 {
            return Err(AnomalyError::invalid_config("batch_size must be positive"));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(AnomalyError::invalid_config(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(AnomalyError::invalid_config(format!(
                "validation_split must lie in [0, 1), got {}",
                self.validation_split
            )));
        }
        if self.hidden_units.iter().any(|&width| width == 0) {
            return Err(AnomalyError::invalid_config("hidden layer width must be positive"));
        }
        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get()
        } else {
            self.threads
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EnsembleConfig::default();
        assert_eq!(config.timesteps, 300);
        assert_eq!(config.training.validation_split, 0.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EnsembleConfig::with_timesteps(0).validate().is_err());

        let mut training = TrainingConfig::default();
        training.validation_split = 1.0;
        assert!(training.validate().is_err());

        let mut training = TrainingConfig::default();
        training.learning_rate = f64::NAN;
        assert!(training.validate().is_err());

        let mut training = TrainingConfig::default();
        training.batch_size = 0;
        assert!(training.validate().is_err());

        let mut training = TrainingConfig::default();
        training.hidden_units = vec![8, 0];
        assert!(training.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let config = EnsembleConfig::from_yaml("timesteps: 12\ntraining:\n  epochs: 5\n").unwrap();
        assert_eq!(config.timesteps, 12);
        assert_eq!(config.training.epochs, 5);
        assert_eq!(config.training.batch_size, 32);

        let err = EnsembleConfig::from_yaml("timesteps: 0\n").unwrap_err();
        assert!(matches!(err, AnomalyError::InvalidConfig(_)));
        let err = EnsembleConfig::from_yaml("timesteps: [1\n").unwrap_err();
        assert!(matches!(err, AnomalyError::Yaml(_)));
    }

    #[test]
    fn test_worker_threads_falls_back_to_cores() {
        let mut training = TrainingConfig::default();
        assert!(training.worker_threads() >= 1);
        training.threads = 3;
        assert_eq!(training.worker_threads(), 3);
    }
}
