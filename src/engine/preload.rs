//! Startup warming.
//!
//! Models are loaded in priority order until memory use crosses the preload
//! threshold. Warming only fills free cache slots: it never evicts a model
//! that is already resident.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::ClassificationEngine;
use crate::cache::Admission;
use crate::inference::reducer::as_millis;

/// A model that could not be warmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreloadFailure {
    pub id: String,
    pub reason: String,
}

/// Load time of one warmed model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreloadTiming {
    pub id: String,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
    pub estimated_memory_mb: f64,
}

/// Outcome of one warming pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreloadReport {
    /// Loaded by this pass, in order
    pub success: Vec<String>,
    pub failed: Vec<PreloadFailure>,
    /// Already resident, no free slot, or not reached
    pub skipped: Vec<String>,
    pub timings: Vec<PreloadTiming>,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
    /// Stopped because memory use crossed the preload threshold
    pub aborted_on_memory: bool,
    /// Stopped by [`PreloadTask`] cancellation
    pub cancelled: bool,
}

impl PreloadReport {
    fn skip_rest(&mut self, rest: &[String]) {
        self.skipped.extend(rest.iter().cloned());
    }
}

/// Warm `ids` in order, checking `cancel` before each model.
pub(crate) fn run(
    engine: &ClassificationEngine,
    ids: &[String],
    cancel: Option<&AtomicBool>,
) -> PreloadReport {
    let started = Instant::now();
    let threshold = engine.config().preload_memory_threshold;
    let mut report = PreloadReport::default();

    log::info!("Preloading {} model(s): {:?}", ids.len(), ids);

    for (position, id) in ids.iter().enumerate() {
        if cancel.is_some_and(|flag| flag.load(Ordering::Acquire)) {
            log::info!("Preloading cancelled before {}", id);
            report.cancelled = true;
            report.skip_rest(&ids[position..]);
            break;
        }

        let descriptor = match engine.registry().resolve(id) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                log::warn!("Cannot preload {}: {}", id, e);
                report.failed.push(PreloadFailure {
                    id: id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        let path = &descriptor.artifact_path;

        if engine.cache().contains(path) {
            log::debug!("{} already resident", id);
            report.skipped.push(id.clone());
            continue;
        }

        let used = engine.cache().memory_used_fraction();
        if used > threshold {
            log::warn!(
                "Memory use {:.1}% exceeds preload threshold {:.1}%, stopping before {}",
                used * 100.0,
                threshold * 100.0,
                id
            );
            report.aborted_on_memory = true;
            report.skip_rest(&ids[position..]);
            break;
        }

        if !path.exists() {
            log::warn!("Cannot preload {}: artifact not found at {}", id, path.display());
            report.failed.push(PreloadFailure {
                id: id.clone(),
                reason: format!("artifact not found: {}", path.display()),
            });
            continue;
        }

        let stage = Instant::now();
        let admission = engine.cache().load_if_room(path, |p| {
            engine.load_artifact(p, descriptor.architecture, true, true)
        });
        match admission {
            Ok(Admission::Loaded {
                estimated_memory_mb,
            }) => {
                let elapsed = stage.elapsed();
                log::info!(
                    "Preloaded {} in {:.2}s (~{:.1} MB)",
                    id,
                    elapsed.as_secs_f64(),
                    estimated_memory_mb
                );
                report.success.push(id.clone());
                report.timings.push(PreloadTiming {
                    id: id.clone(),
                    elapsed,
                    estimated_memory_mb,
                });
            }
            Ok(Admission::AlreadyResident) => report.skipped.push(id.clone()),
            Ok(Admission::NoRoom) => {
                log::info!("Cache full, not preloading {}", id);
                report.skipped.push(id.clone());
            }
            Err(e) => {
                log::warn!("Failed to preload {}: {}", id, e);
                report.failed.push(PreloadFailure {
                    id: id.clone(),
                    reason: e.to_string(),
                });
            }
        }
    }

    report.elapsed = started.elapsed();
    log::info!(
        "Preloading finished in {:.2}s: {} loaded, {} failed, {} skipped",
        report.elapsed.as_secs_f64(),
        report.success.len(),
        report.failed.len(),
        report.skipped.len()
    );
    report
}

struct CancelSignal {
    cancelled: AtomicBool,
    wake: Notify,
}

impl CancelSignal {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.wake.notify_one();
    }
}

/// Background warming task.
///
/// Waits `delay`, then warms models on the blocking pool. Cancellation is
/// checked between models; a load in progress runs to completion.
pub struct PreloadTask {
    signal: Arc<CancelSignal>,
    handle: Option<JoinHandle<PreloadReport>>,
}

impl PreloadTask {
    /// Spawn on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime. Use [`spawn_on`](Self::spawn_on)
    /// from synchronous code.
    pub fn spawn(engine: Arc<ClassificationEngine>, ids: Vec<String>, delay: Duration) -> Self {
        Self::spawn_on(&Handle::current(), engine, ids, delay)
    }

    /// Spawn on `runtime`.
    pub fn spawn_on(
        runtime: &Handle,
        engine: Arc<ClassificationEngine>,
        ids: Vec<String>,
        delay: Duration,
    ) -> Self {
        let signal = Arc::new(CancelSignal {
            cancelled: AtomicBool::new(false),
            wake: Notify::new(),
        });

        let task_signal = Arc::clone(&signal);
        let handle = runtime.spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = task_signal.wake.notified() => {}
            }

            if task_signal.cancelled.load(Ordering::Acquire) {
                log::info!("Preloading cancelled before start");
                return PreloadReport {
                    skipped: ids,
                    cancelled: true,
                    ..PreloadReport::default()
                };
            }

            let warming = tokio::task::spawn_blocking(move || {
                run(&engine, &ids, Some(&task_signal.cancelled))
            });
            match warming.await {
                Ok(report) => report,
                Err(e) => {
                    log::error!("Preload worker failed: {}", e);
                    PreloadReport::default()
                }
            }
        });

        Self {
            signal,
            handle: Some(handle),
        }
    }

    /// Ask the task to stop at the next model boundary.
    pub fn cancel(&self) {
        self.signal.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the task to finish on its own.
    pub async fn join(mut self) -> Option<PreloadReport> {
        let handle = self.handle.take()?;
        match handle.await {
            Ok(report) => Some(report),
            Err(e) => {
                log::error!("Preload task failed: {}", e);
                None
            }
        }
    }

    /// Cancel and wait up to `timeout` for the task to stop.
    ///
    /// Returns `None` if the task did not stop in time; it then ends after
    /// the load in progress.
    pub async fn shutdown(mut self, timeout: Duration) -> Option<PreloadReport> {
        self.signal.cancel();
        let handle = self.handle.take()?;
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                log::error!("Preload task failed: {}", e);
                None
            }
            Err(_) => {
                log::warn!("Preload task still running after {:?}", timeout);
                None
            }
        }
    }
}

impl Drop for PreloadTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.signal.cancel();
        }
    }
}
