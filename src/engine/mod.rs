//! Classification engine.
//!
//! Ties the pipeline together for callers:
//! - id resolution (`model::registry`)
//! - resident handles (`cache`), loaded on a miss through `loader`
//! - preprocessing, inference and reduction
//! - startup warming (`preload`)

pub mod preload;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::cache::{CacheStats, MemoryProbe, ModelCache, SystemMemory};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::inference::{executor, reducer, PredictionResult, StageTimings};
use crate::loader::{ArtifactLoader, RetryPolicy};
use crate::model::{Architecture, DescriptorRegistry, LabelTable, ModelDescriptor, ModelHandle};
use crate::preprocess::{self, ImageSource};

pub use preload::{PreloadFailure, PreloadReport, PreloadTask, PreloadTiming};

/// Cache snapshot plus engine-level state.
#[derive(Debug, Clone, Serialize)]
pub struct CacheInfo {
    #[serde(flatten)]
    pub cache: CacheStats,
    /// Whether the label table has been read
    pub labels_cached: bool,
}

/// Preload readiness of one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreloadStatus {
    pub id: String,
    pub artifact_path: PathBuf,
    pub exists: bool,
    pub resident: bool,
}

/// Serves classification requests against a bounded set of resident models.
pub struct ClassificationEngine {
    config: EngineConfig,
    registry: DescriptorRegistry,
    loader: ArtifactLoader,
    cache: ModelCache,
    labels: OnceCell<Arc<LabelTable>>,
}

impl ClassificationEngine {
    /// Build an engine with the default strategy chain and system memory probe.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let registry = match &config.models {
            Some(entries) => DescriptorRegistry::from_config(&config.model_root, entries)?,
            None => DescriptorRegistry::builtin(&config.model_root),
        };
        let loader = ArtifactLoader::new(RetryPolicy::new(
            config.max_retries,
            config.retry_base_delay(),
        ));
        Self::with_parts(config, registry, loader, Arc::new(SystemMemory::new()))
    }

    /// Build an engine from explicit parts.
    pub fn with_parts(
        config: EngineConfig,
        registry: DescriptorRegistry,
        loader: ArtifactLoader,
        memory: Arc<dyn MemoryProbe>,
    ) -> Result<Self> {
        config.validate()?;
        let cache = ModelCache::new(config.max_cached_models, config.memory_threshold, memory);

        log::info!(
            "Classification engine ready: {} model(s), cache capacity {}, memory threshold {:.0}%",
            registry.len(),
            config.max_cached_models,
            config.memory_threshold * 100.0
        );
        log::debug!("Load strategies: {:?}", loader.strategy_names());

        Ok(Self {
            config,
            registry,
            loader,
            cache,
            labels: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    pub(crate) fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Ids callers may pass to [`predict`](Self::predict).
    pub fn available_models(&self) -> Vec<String> {
        self.registry.ids()
    }

    /// Classify one image with the model registered as `model_id`.
    ///
    /// With `use_cache = false` a private handle is loaded for this request
    /// only and the cache is left untouched.
    pub fn predict(
        &self,
        model_id: &str,
        image: impl Into<ImageSource>,
        use_cache: bool,
    ) -> Result<PredictionResult> {
        let started = Instant::now();
        let source = image.into();
        let descriptor = self.registry.resolve(model_id)?;
        if let ImageSource::Path(path) = &source {
            preprocess::validate_image_path(path)?;
        }

        let stage = Instant::now();
        let (handle, cache_hit) = self.acquire(descriptor, use_cache)?;
        let model_load = stage.elapsed();

        let stage = Instant::now();
        let input = preprocess::build_input(&source, descriptor.architecture)?;
        let preprocessing = stage.elapsed();

        let stage = Instant::now();
        let scores = executor::run(&handle, &input)?;
        let inference = stage.elapsed();

        let stage = Instant::now();
        let labels = self.labels()?;
        let ranking = reducer::reduce(&scores, &labels)?;
        let postprocessing = stage.elapsed();

        let predicted = ranking.predicted().clone();
        let performance = StageTimings {
            model_load,
            preprocessing,
            inference,
            postprocessing,
            total: started.elapsed(),
            cache_hit,
        };
        log::info!(
            "{}: {} ({:.2}%) in {:.1} ms (cache {})",
            model_id,
            predicted.label,
            predicted.percentage,
            performance.total.as_secs_f64() * 1000.0,
            if cache_hit { "hit" } else { "miss" }
        );

        Ok(PredictionResult {
            model_id: descriptor.id.clone(),
            architecture: descriptor.architecture.name().to_string(),
            predicted_class: predicted.label,
            confidence: predicted.confidence,
            top_k: ranking.top_k,
            message: ranking.message,
            performance,
        })
    }

    /// Warm `ids` in order. See [`preload`] for the rules.
    pub fn preload(&self, ids: &[String]) -> PreloadReport {
        preload::run(self, ids, None)
    }

    /// Start warming the configured models in the background.
    pub fn start_preloading(self: &Arc<Self>) -> PreloadTask {
        PreloadTask::spawn(
            Arc::clone(self),
            self.config.preload_models.clone(),
            self.config.preload_delay(),
        )
    }

    /// Artifact presence and residency for each of `ids`.
    pub fn preload_status(&self, ids: &[String]) -> Result<Vec<PreloadStatus>> {
        ids.iter()
            .map(|id| {
                let descriptor = self.registry.resolve(id)?;
                Ok(PreloadStatus {
                    id: descriptor.id.clone(),
                    artifact_path: descriptor.artifact_path.clone(),
                    exists: descriptor.artifact_path.exists(),
                    resident: self.cache.contains(&descriptor.artifact_path),
                })
            })
            .collect()
    }

    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            cache: self.cache.stats(),
            labels_cached: self.labels.get().is_some(),
        }
    }

    /// Drop every resident model. The next request for any model reloads it.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Release all resident models ahead of process exit.
    pub fn shutdown(&self) {
        log::info!("Shutting down classification engine");
        self.cache.clear();
    }

    fn labels(&self) -> Result<Arc<LabelTable>> {
        self.labels
            .get_or_try_init(|| LabelTable::load(&self.config.labels_path).map(Arc::new))
            .map(Arc::clone)
    }

    fn acquire(&self, descriptor: &ModelDescriptor, use_cache: bool) -> Result<(ModelHandle, bool)> {
        let architecture = descriptor.architecture;
        let validate = self.config.validate_on_load;

        if !use_cache {
            log::debug!("Loading {} outside the cache", descriptor.id);
            let handle = self.load_artifact(&descriptor.artifact_path, architecture, validate, false)?;
            return Ok((handle, false));
        }

        let lookup = self.cache.get_or_load(&descriptor.artifact_path, |path| {
            self.load_artifact(path, architecture, validate, true)
        })?;
        let hit = lookup.is_hit();
        Ok((lookup.into_handle(), hit))
    }

    /// Load through the strategy chain with retries.
    ///
    /// With `purge_cache`, every failed attempt drops any cache entry for
    /// `path`; the cache lock is re-entered from the same thread.
    pub(crate) fn load_artifact(
        &self,
        path: &Path,
        architecture: Architecture,
        validate: bool,
        purge_cache: bool,
    ) -> Result<ModelHandle> {
        let shape = architecture.input_shape();
        let validate_shape = if validate { Some(&shape[..]) } else { None };
        let purge = |failed: &Path| {
            if purge_cache {
                self.cache.remove(failed);
            }
        };
        self.loader.load_with_retry(
            path,
            self.loader.retry_policy().max_attempts,
            validate_shape,
            &purge,
        )
    }
}

impl Drop for ClassificationEngine {
    fn drop(&mut self) {
        if !self.cache.is_empty() {
            self.cache.clear();
        }
    }
}
