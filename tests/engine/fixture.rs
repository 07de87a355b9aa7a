//! Shared setup for engine tests: a temporary model root with placeholder
//! artifacts, a label table, and a stub load strategy that counts loads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use image::{Rgb, RgbImage};
use ndarray::{arr2, ArrayD};
use tempfile::TempDir;

use planktoscan::{
    Architecture, ArtifactLoader, ClassificationEngine, DescriptorRegistry, EngineConfig, Error,
    Infer, LoadStrategy, MemoryProbe, ModelDescriptor, ModelHandle, Result, RetryPolicy,
};

pub(crate) const MODEL_IDS: [&str; 3] = ["m1", "m2", "m3"];
pub(crate) const LABELS: [&str; 4] = ["Acartia", "Calanus", "Noctiluca", "Oithona"];
pub(crate) const SCORES: [f32; 4] = [0.1, 0.7, 0.05, 0.15];

/// Deterministic classifier: always returns `SCORES`.
pub(crate) struct FixedScores;

impl Infer for FixedScores {
    fn infer(&self, _input: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        Ok(arr2(&[SCORES]).into_dyn())
    }

    fn parameter_count(&self) -> Option<u64> {
        Some(2_500_000)
    }
}

/// Loads a `FixedScores` handle for any existing artifact, failing the
/// first `failures` attempts.
struct StubStrategy {
    loads: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl LoadStrategy for StubStrategy {
    fn name(&self) -> &str {
        "stub"
    }

    fn load(&self, path: &Path) -> Result<ModelHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !path.exists() {
            return Err(Error::Backend(format!("{} does not exist", path.display())));
        }
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            return Err(Error::Backend("transient read error".into()));
        }
        Ok(ModelHandle::callable(FixedScores))
    }
}

/// Memory use that tests can set directly.
pub(crate) struct SimulatedMemory(AtomicU64);

impl SimulatedMemory {
    pub(crate) fn set(&self, fraction: f64) {
        self.0.store(fraction.to_bits(), Ordering::SeqCst);
    }

    pub(crate) fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

pub(crate) struct TestFixture {
    pub(crate) dir: TempDir,
    pub(crate) loads: Arc<AtomicUsize>,
    pub(crate) failures: Arc<AtomicUsize>,
    pub(crate) memory: Arc<SimulatedMemory>,
}

impl TestFixture {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();

        let labels: serde_json::Map<String, serde_json::Value> = LABELS
            .iter()
            .enumerate()
            .map(|(i, name)| (i.to_string(), serde_json::json!(name)))
            .collect();
        std::fs::write(
            dir.path().join("labels.json"),
            serde_json::to_string(&labels).unwrap(),
        )
        .unwrap();

        for id in MODEL_IDS {
            std::fs::write(dir.path().join(format!("{}.onnx", id)), b"stub").unwrap();
        }

        Self {
            dir,
            loads: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
            memory: Arc::new(SimulatedMemory(AtomicU64::new(0.30f64.to_bits()))),
        }
    }

    pub(crate) fn root(&self) -> &Path {
        self.dir.path()
    }

    pub(crate) fn artifact(&self, id: &str) -> PathBuf {
        self.root().join(format!("{}.onnx", id))
    }

    pub(crate) fn config(&self) -> EngineConfig {
        EngineConfig {
            model_root: self.root().to_path_buf(),
            labels_path: self.root().join("labels.json"),
            max_cached_models: 2,
            memory_threshold: 0.85,
            preload_memory_threshold: 0.70,
            max_retries: 3,
            retry_base_delay_ms: 0,
            validate_on_load: true,
            preload_models: MODEL_IDS.iter().map(|s| s.to_string()).collect(),
            preload_delay_ms: 0,
            models: None,
        }
    }

    fn registry(&self) -> DescriptorRegistry {
        DescriptorRegistry::from_descriptors(
            MODEL_IDS
                .iter()
                .map(|id| ModelDescriptor::new(*id, self.artifact(id), Architecture::MobileNetV2)),
        )
        .unwrap()
    }

    fn loader(&self, config: &EngineConfig) -> ArtifactLoader {
        ArtifactLoader::with_strategies(
            vec![Box::new(StubStrategy {
                loads: Arc::clone(&self.loads),
                failures: Arc::clone(&self.failures),
            })],
            RetryPolicy::new(config.max_retries, config.retry_base_delay()),
        )
        .with_sleeper(|_| {})
    }

    pub(crate) fn engine(&self) -> ClassificationEngine {
        self.engine_with(self.config())
    }

    pub(crate) fn engine_with(&self, config: EngineConfig) -> ClassificationEngine {
        let memory = Arc::clone(&self.memory);
        self.engine_with_probe(config, Arc::new(move || memory.get()))
    }

    pub(crate) fn engine_with_probe(
        &self,
        config: EngineConfig,
        probe: Arc<dyn MemoryProbe>,
    ) -> ClassificationEngine {
        let loader = self.loader(&config);
        ClassificationEngine::with_parts(config, self.registry(), loader, probe).unwrap()
    }

    pub(crate) fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_next_loads(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Write a small gradient PNG and return its path.
    pub(crate) fn write_png(&self, name: &str) -> PathBuf {
        let path = self.root().join(name);
        RgbImage::from_fn(32, 24, |x, y| Rgb([(x * 8) as u8, (y * 10) as u8, 128]))
            .save(&path)
            .unwrap();
        path
    }

    pub(crate) fn write_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.root().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}
