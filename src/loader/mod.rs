//! Artifact loading.
//!
//! An artifact is opened by trying an ordered chain of [`LoadStrategy`]s,
//! stopping at the first that succeeds. [`ArtifactLoader::load_with_retry`]
//! wraps the chain with exponential backoff and an optional synthetic
//! forward pass so a model that loads but cannot infer never counts as loaded.

pub mod onnx;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result, StrategyFailure};
use crate::inference::executor;
use crate::model::ModelHandle;

pub use onnx::{OnnxOptimized, OnnxPlain, SignatureBundle, SIGNATURE_MANIFEST};

/// One way of turning an on-disk artifact into a handle.
pub trait LoadStrategy: Send + Sync {
    fn name(&self) -> &str;
    fn load(&self, path: &Path) -> Result<ModelHandle>;
}

/// Exponential backoff between load attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt `attempt` (1-based): base, 2×base, 4×base, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            crate::defaults::MAX_RETRIES,
            Duration::from_millis(crate::defaults::RETRY_BASE_DELAY_MS),
        )
    }
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Loads artifacts through an ordered strategy chain.
pub struct ArtifactLoader {
    strategies: Vec<Box<dyn LoadStrategy>>,
    retry: RetryPolicy,
    sleeper: Sleeper,
}

impl ArtifactLoader {
    /// The default chain: optimized ONNX, plain ONNX, signature bundle.
    pub fn new(retry: RetryPolicy) -> Self {
        Self::with_strategies(
            vec![
                Box::new(OnnxOptimized),
                Box::new(OnnxPlain),
                Box::new(SignatureBundle),
            ],
            retry,
        )
    }

    pub fn with_strategies(strategies: Vec<Box<dyn LoadStrategy>>, retry: RetryPolicy) -> Self {
        Self {
            strategies,
            retry,
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    /// Replace the function used to wait between attempts.
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn strategy_names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Try each strategy in order; on total failure report all of them.
    pub fn load(&self, path: &Path) -> Result<ModelHandle> {
        let mut failures = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.load(path) {
                Ok(handle) => {
                    log::info!(
                        "Loaded {} with strategy '{}' ({})",
                        path.display(),
                        strategy.name(),
                        handle.kind()
                    );
                    return Ok(handle);
                }
                Err(e) => {
                    log::warn!(
                        "Strategy '{}' failed for {}: {}",
                        strategy.name(),
                        path.display(),
                        e
                    );
                    failures.push(StrategyFailure {
                        strategy: strategy.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Err(Error::ArtifactLoad {
            path: path.to_path_buf(),
            failures,
        })
    }

    /// Load with retries and optional validation.
    ///
    /// `validate_shape` is the input shape of the synthetic forward pass; a
    /// validation failure is retried like a load failure. `purge` runs after
    /// every failed attempt so no stale entry for `path` survives. The last
    /// error is returned unchanged once attempts are exhausted.
    pub fn load_with_retry(
        &self,
        path: &Path,
        max_attempts: u32,
        validate_shape: Option<&[usize]>,
        purge: &dyn Fn(&Path),
    ) -> Result<ModelHandle> {
        let max_attempts = max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result = self.load(path).and_then(|handle| {
                if let Some(shape) = validate_shape {
                    executor::validate(&handle, shape)?;
                    log::debug!("Validated {} with input shape {:?}", path.display(), shape);
                }
                Ok(handle)
            });

            match result {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    purge(path);
                    if attempt >= max_attempts {
                        log::error!(
                            "Giving up on {} after {} attempt(s): {}",
                            path.display(),
                            attempt,
                            e
                        );
                        return Err(e);
                    }
                    let delay = self.retry.delay_after(attempt);
                    log::warn!(
                        "Load attempt {}/{} for {} failed: {}; retrying in {:?}",
                        attempt,
                        max_attempts,
                        path.display(),
                        e,
                        delay
                    );
                    (self.sleeper)(delay);
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for ArtifactLoader {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
