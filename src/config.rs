//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

const MODEL_ROOT_ENV: &str = "PLANKTOSCAN_MODEL_ROOT";
const LABELS_ENV: &str = "PLANKTOSCAN_LABELS";

/// A registry entry supplied through configuration instead of the built-in table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorConfig {
    /// Short model identifier used by callers
    pub id: String,
    /// Artifact path, relative to `model_root` unless absolute
    pub artifact: PathBuf,
    /// Canonical architecture name (e.g. `ResNet50`)
    pub architecture: String,
}

/// Configuration for the classification engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "defaults::model_root")]
    pub model_root: PathBuf,
    #[serde(default = "defaults::labels_path")]
    pub labels_path: PathBuf,
    #[serde(default = "defaults::max_cached_models")]
    pub max_cached_models: usize,
    /// Fraction of system memory above which resident models are evicted
    #[serde(default = "defaults::memory_threshold")]
    pub memory_threshold: f64,
    /// Fraction of system memory above which preloading stops
    #[serde(default = "defaults::preload_memory_threshold")]
    pub preload_memory_threshold: f64,
    /// Total load attempts per artifact
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,
    #[serde(default = "defaults::retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "defaults::validate_on_load")]
    pub validate_on_load: bool,
    #[serde(default = "defaults::preload_models")]
    pub preload_models: Vec<String>,
    #[serde(default = "defaults::preload_delay_ms")]
    pub preload_delay_ms: u64,
    /// Custom registry; the built-in model table is used when absent
    #[serde(default)]
    pub models: Option<Vec<DescriptorConfig>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_root: defaults::model_root(),
            labels_path: defaults::labels_path(),
            max_cached_models: defaults::MAX_CACHED_MODELS,
            memory_threshold: defaults::MEMORY_THRESHOLD,
            preload_memory_threshold: defaults::PRELOAD_MEMORY_THRESHOLD,
            max_retries: defaults::MAX_RETRIES,
            retry_base_delay_ms: defaults::RETRY_BASE_DELAY_MS,
            validate_on_load: defaults::VALIDATE_ON_LOAD,
            preload_models: defaults::preload_models(),
            preload_delay_ms: defaults::PRELOAD_DELAY_MS,
            models: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Override paths from `PLANKTOSCAN_MODEL_ROOT` / `PLANKTOSCAN_LABELS`.
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var(MODEL_ROOT_ENV) {
            log::debug!("Using model root from {}: {}", MODEL_ROOT_ENV, root);
            self.model_root = PathBuf::from(root);
        }
        if let Ok(labels) = std::env::var(LABELS_ENV) {
            log::debug!("Using label table from {}: {}", LABELS_ENV, labels);
            self.labels_path = PathBuf::from(labels);
        }
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_cached_models == 0 {
            return Err(Error::Config("max_cached_models must be at least 1".into()));
        }
        for (name, value) in [
            ("memory_threshold", self.memory_threshold),
            ("preload_memory_threshold", self.preload_memory_threshold),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(Error::Config(format!(
                    "{} must be in (0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.preload_memory_threshold > self.memory_threshold {
            return Err(Error::Config(format!(
                "preload_memory_threshold ({}) must not exceed memory_threshold ({})",
                self.preload_memory_threshold, self.memory_threshold
            )));
        }
        if self.max_retries == 0 {
            return Err(Error::Config("max_retries must be at least 1".into()));
        }
        Ok(())
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn preload_delay(&self) -> Duration {
        Duration::from_millis(self.preload_delay_ms)
    }
}
