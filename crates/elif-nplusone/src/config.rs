//! Detector configuration and builder

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use service_builder::builder;
use std::env;
use std::str::FromStr;

/// Environment variable overriding [`DetectorConfig::n_plus_one_threshold`]
pub const ENV_THRESHOLD: &str = "NPLUSONE_THRESHOLD";
/// Environment variable overriding [`DetectorConfig::detect_n_plus_one`]
pub const ENV_DETECT_N_PLUS_ONE: &str = "NPLUSONE_DETECT_N_PLUS_ONE";
/// Environment variable overriding [`DetectorConfig::detect_unused_eager_loading`]
pub const ENV_DETECT_UNUSED_EAGER_LOADING: &str = "NPLUSONE_DETECT_UNUSED_EAGER_LOADING";
/// Environment variable overriding [`DetectorConfig::detect_counter_cache`]
pub const ENV_DETECT_COUNTER_CACHE: &str = "NPLUSONE_DETECT_COUNTER_CACHE";
/// Environment variable overriding [`DetectorConfig::capture_call_sites`]
pub const ENV_CAPTURE_CALL_SITES: &str = "NPLUSONE_CAPTURE_CALL_SITES";

/// Configuration for one unit of work's detectors.
///
/// Allow-lists and output settings belong to the reporting layer and are
/// not part of this struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
#[builder]
pub struct DetectorConfig {
    /// Distinct sibling lazy reads of the same association that confirm an N+1
    #[builder(default = "2", getter)]
    pub n_plus_one_threshold: usize,

    /// Enable the N+1 detector
    #[builder(default = "true", getter)]
    pub detect_n_plus_one: bool,

    /// Enable the unused eager loading detector
    #[builder(default = "true", getter)]
    pub detect_unused_eager_loading: bool,

    /// Enable the counter cache detector
    #[builder(default = "true", getter)]
    pub detect_counter_cache: bool,

    /// Record where the firing notification was issued from
    #[builder(default = "true", getter)]
    pub capture_call_sites: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            n_plus_one_threshold: 2,
            detect_n_plus_one: true,
            detect_unused_eager_loading: true,
            detect_counter_cache: true,
            capture_call_sites: true,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from `NPLUSONE_*` environment variables.
    /// Unset variables keep their defaults.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(threshold) = env_value(ENV_THRESHOLD, "positive integer")? {
            config.n_plus_one_threshold = threshold;
        }
        if let Some(enabled) = env_value(ENV_DETECT_N_PLUS_ONE, "true or false")? {
            config.detect_n_plus_one = enabled;
        }
        if let Some(enabled) = env_value(ENV_DETECT_UNUSED_EAGER_LOADING, "true or false")? {
            config.detect_unused_eager_loading = enabled;
        }
        if let Some(enabled) = env_value(ENV_DETECT_COUNTER_CACHE, "true or false")? {
            config.detect_counter_cache = enabled;
        }
        if let Some(enabled) = env_value(ENV_CAPTURE_CALL_SITES, "true or false")? {
            config.capture_call_sites = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document. Missing keys keep their defaults.
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.n_plus_one_threshold == 0 {
            return Err(ConfigError::InvalidValue {
                field: "n_plus_one_threshold".to_string(),
                value: self.n_plus_one_threshold.to_string(),
                expected: "a threshold of at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Configuration with every detector switched off
    pub fn disabled() -> Self {
        Self {
            detect_n_plus_one: false,
            detect_unused_eager_loading: false,
            detect_counter_cache: false,
            ..Self::default()
        }
    }
}

impl DetectorConfigBuilder {
    pub fn threshold(self, threshold: usize) -> Self {
        self.n_plus_one_threshold(threshold)
    }

    pub fn only_n_plus_one(self) -> Self {
        self.detect_n_plus_one(true)
            .detect_unused_eager_loading(false)
            .detect_counter_cache(false)
    }

    pub fn without_call_sites(self) -> Self {
        self.capture_call_sites(false)
    }

    /// Build and validate the configuration
    pub fn build_config(self) -> ConfigResult<DetectorConfig> {
        let config = self
            .build_with_defaults()
            .map_err(|err| ConfigError::Build(format!("{:?}", err)))?;
        config.validate()?;
        Ok(config)
    }
}

fn env_value<T: FromStr>(name: &str, expected: &str) -> ConfigResult<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: name.to_string(),
                value: raw,
                expected: expected.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
