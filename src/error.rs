//! Error types for PlanktoScan.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// One failed loading strategy, kept for diagnostics when the whole chain fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyFailure {
    /// Strategy name (e.g. `onnx-optimized`)
    pub strategy: String,
    /// Rendered error from that strategy
    pub message: String,
}

impl fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.message)
    }
}

fn render_failures(failures: &[StrategyFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// PlanktoScan error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Requested model id is not in the registry
    #[error("Model '{id}' is not available. Available models: {}", .available.join(", "))]
    ModelNotAvailable { id: String, available: Vec<String> },

    /// Architecture name has no preprocessing policy
    #[error("Unknown architecture: {0}")]
    UnknownArchitecture(String),

    /// Every loading strategy failed for an artifact
    #[error("Failed to load artifact {}: tried [{}]", .path.display(), render_failures(.failures))]
    ArtifactLoad {
        path: PathBuf,
        failures: Vec<StrategyFailure>,
    },

    /// Loaded model could not run a synthetic forward pass
    #[error("Model validation failed: {0}")]
    Validation(String),

    /// Image file does not exist
    #[error("Image file not found: {}", .0.display())]
    ImageNotFound(PathBuf),

    /// Image reference is unusable before decoding
    #[error("Invalid image source: {0}")]
    InvalidImageSource(String),

    /// Image bytes could not be decoded
    #[error("Image decode error: {0}")]
    ImageDecode(String),

    /// Inference produced something the reducer cannot use
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Inference backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid base64 in a data URL
    #[error("Invalid base64 image payload")]
    InvalidBase64,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure was caused by the caller's input (4xx) rather than
    /// the engine (5xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::ModelNotAvailable { .. }
                | Self::ImageNotFound(_)
                | Self::InvalidImageSource(_)
                | Self::ImageDecode(_)
                | Self::InvalidBase64
        )
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::ImageDecode(err.to_string())
    }
}

/// Result type alias for PlanktoScan operations.
pub type Result<T> = std::result::Result<T, Error>;
