//! Pipeline configuration.
//!
//! Read from TOML; every section and field is optional and falls back to
//! `PipelineConfig::default()`.

use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub pipeline: SlotConfig,
    pub backend: BackendConfig,
    pub preprocess: PreprocessConfig,
}

/// Request pool settings for a loaded model.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct SlotConfig {
    /// Number of asynchronous request slots, which is also the pipeline depth.
    pub num_requests: usize,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BackendConfig {
    /// Worker threads for the host backend; one per logical CPU when unset.
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Side length of the square model input, in pixels.
    pub input_size: u32,
}

impl Default for SlotConfig {
    fn default() -> Self {
        Self {
            num_requests: 2,
            batch_size: 1,
        }
    }
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { input_size: 224 }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pipeline: SlotConfig::default(),
            backend: BackendConfig::default(),
            preprocess: PreprocessConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.num_requests == 0 {
            return Err(ConfigError::Invalid("pipeline.num_requests must be at least 1".to_string()));
        }
        if self.pipeline.batch_size == 0 {
            return Err(ConfigError::Invalid("pipeline.batch_size must be at least 1".to_string()));
        }
        if self.backend.workers == Some(0) {
            return Err(ConfigError::Invalid("backend.workers must be at least 1 when set".to_string()));
        }
        if self.preprocess.input_size == 0 {
            return Err(ConfigError::Invalid("preprocess.input_size must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn default_path() -> &'static str {
        "slot_pipeline.toml"
    }
}
