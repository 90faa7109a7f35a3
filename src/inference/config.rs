//! SMC run configuration.

use crate::errors::{Result, SmcError};
use crate::inference::mask::{WordBoundary, MAX_WORD_LEN};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a new population is drawn from the weighted one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingScheme {
    /// N independent draws proportional to weight.
    #[default]
    Multinomial,
    /// One uniform offset, N evenly spaced pointers (lower variance).
    Systematic,
}

/// How active particles are stepped within a round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Execution {
    Sequential,
    /// Rayon data-parallel over active particles.
    #[default]
    Parallel,
}

/// What a particle does when its active mask has no support.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyMaskPolicy {
    /// Reject masks with an empty bucket up front and fail the run if a step
    /// still meets an empty proposal.
    #[default]
    Abort,
    /// The particle finishes with the text it has.
    Finish,
}

/// Configuration for one SMC run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmcConfig {
    /// Population size N.
    pub num_particles: usize,
    /// Per-particle token budget.
    pub max_tokens: usize,
    /// Maximum characters per whitespace-delimited word.
    pub max_word_len: usize,
    pub word_boundary: WordBoundary,
    pub resampling: ResamplingScheme,
    /// `None`: resample every round. `Some(t)`: resample only when ESS / N < t.
    pub ess_threshold: Option<f64>,
    pub execution: Execution,
    pub empty_mask: EmptyMaskPolicy,
    /// Fixed seed for a reproducible run.
    pub seed: Option<u64>,
    /// Stop at the first round boundary after this many milliseconds.
    pub timeout_ms: Option<u64>,
}

impl Default for SmcConfig {
    fn default() -> Self {
        Self {
            num_particles: 20,
            max_tokens: 50,
            max_word_len: MAX_WORD_LEN,
            word_boundary: WordBoundary::default(),
            resampling: ResamplingScheme::default(),
            ess_threshold: None,
            execution: Execution::default(),
            empty_mask: EmptyMaskPolicy::default(),
            seed: None,
            timeout_ms: None,
        }
    }
}

impl SmcConfig {
    /// Load a JSON config; missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self =
            serde_json::from_str(&content).map_err(|e| SmcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_particles == 0 {
            return Err(SmcError::InvalidConfig("num_particles must be > 0".into()));
        }
        if self.max_tokens == 0 {
            return Err(SmcError::InvalidConfig("max_tokens must be > 0".into()));
        }
        if self.max_word_len == 0 {
            return Err(SmcError::InvalidConfig("max_word_len must be > 0".into()));
        }
        if let Some(t) = self.ess_threshold {
            if !(t > 0.0 && t <= 1.0) {
                return Err(SmcError::InvalidConfig(format!(
                    "ess_threshold must be in (0, 1], got {}",
                    t
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SmcConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_word_len, 5);
        assert_eq!(config.ess_threshold, None);
        assert_eq!(config.resampling, ResamplingScheme::Multinomial);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = SmcConfig {
            num_particles: 0,
            ..SmcConfig::default()
        };
        assert!(config.validate().is_err());
        config.num_particles = 4;
        config.ess_threshold = Some(1.5);
        assert!(config.validate().is_err());
        config.ess_threshold = Some(0.5);
        config.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_json_partial_config() {
        let path = std::env::temp_dir().join("smc_oxidized_config_test.json");
        std::fs::write(
            &path,
            r#"{ "num_particles": 3, "resampling": "systematic", "empty_mask": "finish" }"#,
        )
        .unwrap();
        let config = SmcConfig::from_json_file(&path).unwrap();
        assert_eq!(config.num_particles, 3);
        assert_eq!(config.resampling, ResamplingScheme::Systematic);
        assert_eq!(config.empty_mask, EmptyMaskPolicy::Finish);
        assert_eq!(config.max_tokens, 50);
        let _ = std::fs::remove_file(&path);
    }
}
