//! PlanktoScan - model cache and inference dispatch for plankton image classifiers.

mod defaults;
pub mod error;

pub mod cache;
pub mod config;
pub mod engine;
pub mod inference;
pub mod loader;
pub mod model;
pub mod preprocess;

pub use error::{Error, Result, StrategyFailure};

pub use config::{DescriptorConfig, EngineConfig};

pub use engine::{
    CacheInfo, ClassificationEngine, PreloadFailure, PreloadReport, PreloadStatus, PreloadTask,
    PreloadTiming,
};

pub use cache::{
    estimate_memory_mb, Admission, CacheStats, EntryStats, EvictionReason, Lookup, MemoryProbe,
    ModelCache, SystemMemory,
};

pub use loader::{ArtifactLoader, LoadStrategy, RetryPolicy};

pub use model::{
    Architecture, DescriptorRegistry, GraphOutput, Infer, LabelTable, ModelDescriptor,
    ModelHandle, Signature, SignatureFn, SignatureGraph,
};

pub use inference::{ClassScore, PredictionResult, StageTimings};

pub use preprocess::{image_metadata, ImageMetadata, ImageSource, Normalization};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
