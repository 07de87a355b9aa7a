//! Default values for engine configuration.

use std::path::PathBuf;

pub const MODEL_ROOT: &str = "model/classification";
pub const LABELS_PATH: &str = "model/labels.json";
pub const MAX_CACHED_MODELS: usize = 6;
pub const MEMORY_THRESHOLD: f64 = 0.85;
pub const PRELOAD_MEMORY_THRESHOLD: f64 = 0.70;
pub const MAX_RETRIES: u32 = 3;
pub const RETRY_BASE_DELAY_MS: u64 = 1000;
pub const VALIDATE_ON_LOAD: bool = true;
pub const PRELOAD_DELAY_MS: u64 = 2000;
pub const PRELOAD_MODELS: [&str; 3] = ["efficientnetv2b0", "mobilenetv3_small", "resnet50"];

/// Memory estimate for handles whose parameter count cannot be introspected.
pub const UNKNOWN_MODEL_MEMORY_MB: f64 = 512.0;

/// Number of ranked classes returned per prediction.
pub const TOP_K: usize = 3;

pub fn model_root() -> PathBuf { PathBuf::from(MODEL_ROOT) }
pub fn labels_path() -> PathBuf { PathBuf::from(LABELS_PATH) }
pub fn max_cached_models() -> usize { MAX_CACHED_MODELS }
pub fn memory_threshold() -> f64 { MEMORY_THRESHOLD }
pub fn preload_memory_threshold() -> f64 { PRELOAD_MEMORY_THRESHOLD }
pub fn max_retries() -> u32 { MAX_RETRIES }
pub fn retry_base_delay_ms() -> u64 { RETRY_BASE_DELAY_MS }
pub fn validate_on_load() -> bool { VALIDATE_ON_LOAD }
pub fn preload_delay_ms() -> u64 { PRELOAD_DELAY_MS }
pub fn preload_models() -> Vec<String> { PRELOAD_MODELS.iter().map(|s| s.to_string()).collect() }
