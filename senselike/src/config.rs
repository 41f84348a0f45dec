//! Handler configuration.
//!
//! Every request option that is left unset falls back to a value here.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::reduction::ReductionConfig;
use crate::sense::LITERAL_KB_ID;

pub const DEFAULT_SENSE_FIELD: &str = "content";
pub const DEFAULT_SENSE_WEIGHT: f32 = 1.0;
pub const DEFAULT_NUM_TERMS_TO_USE: usize = 5;
pub const DEFAULT_THRESHOLD: f32 = 1.0;
pub const DEFAULT_MAX_CANDIDATE_SET_SIZE: usize = 5000;
pub const DEFAULT_MIN_DOC_SET_SIZE_FOR_FILTER: usize = 500;
pub const DEFAULT_ROWS: usize = 10;
pub const DEFAULT_CACHE_CAPACITY: u64 = 512;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Text field used when a request names none.
    pub sense_field: String,
    /// Knowledge-base id used when a request names none.
    pub knowledge_base: String,
    pub sense_weight: f32,
    pub reduction: ReductionConfig,
    pub rows: usize,
    /// Entry capacity of the similarity cache.
    pub cache_capacity: u64,
    /// When false no similarity cache is registered and every request recomputes.
    pub enable_cache: bool,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            sense_field: DEFAULT_SENSE_FIELD.to_string(),
            knowledge_base: LITERAL_KB_ID.to_string(),
            sense_weight: DEFAULT_SENSE_WEIGHT,
            reduction: ReductionConfig::default(),
            rows: DEFAULT_ROWS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            enable_cache: true,
        }
    }
}

impl HandlerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sense_field.trim().is_empty() {
            return Err(ConfigError::Invalid("sense_field must not be empty".into()));
        }
        if !self.sense_weight.is_finite() || self.sense_weight < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "sense_weight must be a non-negative number, got {}",
                self.sense_weight
            )));
        }
        if !self.reduction.threshold.is_finite() {
            return Err(ConfigError::Invalid("threshold must be finite".into()));
        }
        if self.enable_cache && self.cache_capacity == 0 {
            return Err(ConfigError::Invalid("cache_capacity must be positive".into()));
        }
        Ok(())
    }
}
