//! Resident model cache.
//!
//! Holds a bounded set of loaded handles keyed by artifact path. All
//! bookkeeping happens under one re-entrant lock, and a miss holds that lock
//! across the load so "check, load, insert" is atomic: concurrent callers for
//! the same path see either no entry or a fully loaded one, and the loader
//! runs once. Misses on different paths serialize.
//!
//! Eviction runs before every insert while the cache is full or system
//! memory use is above the threshold:
//! - full: least recently used first; equal timestamps evict the larger model
//! - memory pressure: largest estimated footprint first; ties evict the older

pub mod memory;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::ReentrantMutex;
use serde::Serialize;

use crate::defaults;
use crate::error::Result;
use crate::model::ModelHandle;

pub use memory::{MemoryProbe, SystemMemory};

const BYTES_PER_PARAMETER: f64 = 4.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Memory estimate for a handle: float32 parameters when countable, otherwise
/// a deliberately high default.
pub fn estimate_memory_mb(handle: &ModelHandle) -> f64 {
    handle
        .parameter_count()
        .map(|params| params as f64 * BYTES_PER_PARAMETER / BYTES_PER_MB)
        .unwrap_or(defaults::UNKNOWN_MODEL_MEMORY_MB)
}

/// A resident model.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub artifact_path: PathBuf,
    pub handle: ModelHandle,
    pub loaded_at: Instant,
    pub last_accessed: Instant,
    pub estimated_memory_mb: f64,
    pub hits: u64,
}

/// Why an entry was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    Capacity,
    MemoryPressure,
}

/// Result of [`ModelCache::get_or_load`].
#[derive(Debug, Clone)]
pub enum Lookup {
    Hit(ModelHandle),
    Loaded(ModelHandle),
}

impl Lookup {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn handle(&self) -> &ModelHandle {
        match self {
            Self::Hit(h) | Self::Loaded(h) => h,
        }
    }

    pub fn into_handle(self) -> ModelHandle {
        match self {
            Self::Hit(h) | Self::Loaded(h) => h,
        }
    }
}

/// Result of [`ModelCache::load_if_room`].
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    AlreadyResident,
    /// Cache is full; nothing was loaded
    NoRoom,
    Loaded { estimated_memory_mb: f64 },
}

/// Per-entry view in [`CacheStats`].
#[derive(Debug, Clone, Serialize)]
pub struct EntryStats {
    pub path: PathBuf,
    pub kind: &'static str,
    pub memory_mb: f64,
    /// Seconds since the entry was loaded
    pub age_secs: f64,
    /// Seconds since the entry was last used
    pub idle_secs: f64,
    pub hits: u64,
}

/// Read-only snapshot of the cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub count: usize,
    pub max_entries: usize,
    pub memory_threshold: f64,
    pub memory_used_fraction: f64,
    pub total_estimated_mb: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Most recently used first
    pub entries: Vec<EntryStats>,
}

struct CacheState {
    entries: HashMap<PathBuf, CacheEntry>,
    max_entries: usize,
    memory_threshold: f64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheState {
    fn victim(&self, reason: EvictionReason) -> Option<PathBuf> {
        let entries = self.entries.values();
        let chosen = match reason {
            EvictionReason::Capacity => entries.min_by(|a, b| {
                a.last_accessed.cmp(&b.last_accessed).then_with(|| {
                    b.estimated_memory_mb
                        .total_cmp(&a.estimated_memory_mb)
                })
            }),
            EvictionReason::MemoryPressure => entries.max_by(|a, b| {
                a.estimated_memory_mb
                    .total_cmp(&b.estimated_memory_mb)
                    .then_with(|| b.last_accessed.cmp(&a.last_accessed))
            }),
        };
        chosen.map(|entry| entry.artifact_path.clone())
    }

    fn remove(&mut self, path: &Path, reason: EvictionReason) -> Option<CacheEntry> {
        let entry = self.entries.remove(path)?;
        self.evictions += 1;
        log::info!(
            "Evicted {} ({:.1} MB, reason: {:?}, idle {:.1}s)",
            path.display(),
            entry.estimated_memory_mb,
            reason,
            entry.last_accessed.elapsed().as_secs_f64()
        );
        Some(entry)
    }
}

/// Bounded, LRU-with-memory-pressure model cache.
pub struct ModelCache {
    state: ReentrantMutex<RefCell<CacheState>>,
    memory: Arc<dyn MemoryProbe>,
}

impl ModelCache {
    pub fn new(max_entries: usize, memory_threshold: f64, memory: Arc<dyn MemoryProbe>) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(CacheState {
                entries: HashMap::new(),
                max_entries: max_entries.max(1),
                memory_threshold,
                hits: 0,
                misses: 0,
                evictions: 0,
            })),
            memory,
        }
    }

    /// Current system memory use as a fraction.
    pub fn memory_used_fraction(&self) -> f64 {
        self.memory.used_fraction()
    }

    /// Return the resident handle for `path`, loading it on a miss.
    ///
    /// A failing `loader` leaves the cache without an entry for `path`.
    pub fn get_or_load<F>(&self, path: &Path, loader: F) -> Result<Lookup>
    where
        F: FnOnce(&Path) -> Result<ModelHandle>,
    {
        let guard = self.state.lock();

        if let Some(handle) = Self::touch(&guard, path) {
            log::debug!("Cache hit: {}", path.display());
            return Ok(Lookup::Hit(handle));
        }

        guard.borrow_mut().misses += 1;
        log::info!("Cache miss, loading from disk: {}", path.display());

        self.make_room(&guard, true);
        let handle = loader(path)?;
        // The loader may have re-entered the cache; re-check the count only.
        self.make_room(&guard, false);

        let now = Instant::now();
        let estimated_memory_mb = estimate_memory_mb(&handle);
        guard.borrow_mut().entries.insert(
            path.to_path_buf(),
            CacheEntry {
                artifact_path: path.to_path_buf(),
                handle: handle.clone(),
                loaded_at: now,
                last_accessed: now,
                estimated_memory_mb,
                hits: 0,
            },
        );
        log::info!(
            "Cached {} ({}, ~{:.1} MB)",
            path.display(),
            handle.kind(),
            estimated_memory_mb
        );
        Ok(Lookup::Loaded(handle))
    }

    /// Load `path` only if it fits without evicting anything.
    pub fn load_if_room<F>(&self, path: &Path, loader: F) -> Result<Admission>
    where
        F: FnOnce(&Path) -> Result<ModelHandle>,
    {
        let guard = self.state.lock();
        {
            let state = guard.borrow();
            if state.entries.contains_key(path) {
                return Ok(Admission::AlreadyResident);
            }
            if state.entries.len() >= state.max_entries {
                return Ok(Admission::NoRoom);
            }
        }

        let handle = loader(path)?;
        // Computed before borrowing: `parameter_count` may call back into the cache.
        let estimated_memory_mb = estimate_memory_mb(&handle);

        let mut state = guard.borrow_mut();
        if state.entries.len() >= state.max_entries {
            return Ok(Admission::NoRoom);
        }
        let now = Instant::now();
        state.entries.insert(
            path.to_path_buf(),
            CacheEntry {
                artifact_path: path.to_path_buf(),
                handle,
                loaded_at: now,
                last_accessed: now,
                estimated_memory_mb,
                hits: 0,
            },
        );
        Ok(Admission::Loaded {
            estimated_memory_mb,
        })
    }

    /// Whether `path` is resident. Does not count as an access.
    pub fn contains(&self, path: &Path) -> bool {
        let guard = self.state.lock();
        let present = guard.borrow().entries.contains_key(path);
        present
    }

    pub fn len(&self) -> usize {
        let guard = self.state.lock();
        let len = guard.borrow().entries.len();
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict the least recently used entry.
    pub fn evict_one(&self) -> Option<PathBuf> {
        self.evict(EvictionReason::Capacity)
    }

    /// Drop the entry for `path`, if any.
    pub fn remove(&self, path: &Path) -> bool {
        let guard = self.state.lock();
        let removed = guard.borrow_mut().entries.remove(path);
        match removed {
            Some(_) => {
                log::debug!("Purged cache entry for {}", path.display());
                true
            }
            None => false,
        }
    }

    /// Evict everything.
    pub fn clear(&self) {
        let guard = self.state.lock();
        let drained: Vec<CacheEntry> = {
            let mut state = guard.borrow_mut();
            let drained: Vec<_> = state.entries.drain().map(|(_, entry)| entry).collect();
            state.evictions += drained.len() as u64;
            drained
        };

        let released: f64 = drained.iter().map(|e| e.estimated_memory_mb).sum();
        let count = drained.len();
        // Handles are freed here, while the lock still keeps new loads out.
        drop(drained);
        log::info!("Model cache cleared: {} model(s), ~{:.1} MB released", count, released);
    }

    pub fn stats(&self) -> CacheStats {
        let memory_used_fraction = self.memory.used_fraction();
        let guard = self.state.lock();
        let state = guard.borrow();

        let mut entries: Vec<&CacheEntry> = state.entries.values().collect();
        entries.sort_by(|a, b| b.last_accessed.cmp(&a.last_accessed));

        CacheStats {
            count: state.entries.len(),
            max_entries: state.max_entries,
            memory_threshold: state.memory_threshold,
            memory_used_fraction,
            total_estimated_mb: state.entries.values().map(|e| e.estimated_memory_mb).sum(),
            hits: state.hits,
            misses: state.misses,
            evictions: state.evictions,
            entries: entries
                .into_iter()
                .map(|e| EntryStats {
                    path: e.artifact_path.clone(),
                    kind: e.handle.kind(),
                    memory_mb: e.estimated_memory_mb,
                    age_secs: e.loaded_at.elapsed().as_secs_f64(),
                    idle_secs: e.last_accessed.elapsed().as_secs_f64(),
                    hits: e.hits,
                })
                .collect(),
        }
    }

    /// Why the next insert would need an eviction, if it would.
    pub fn should_evict(&self) -> Option<EvictionReason> {
        let guard = self.state.lock();
        let (len, max_entries, threshold) = {
            let state = guard.borrow();
            (state.entries.len(), state.max_entries, state.memory_threshold)
        };
        if len >= max_entries {
            return Some(EvictionReason::Capacity);
        }
        if len > 0 && self.memory.used_fraction() > threshold {
            return Some(EvictionReason::MemoryPressure);
        }
        None
    }

    fn touch(state: &RefCell<CacheState>, path: &Path) -> Option<ModelHandle> {
        let mut state = state.borrow_mut();
        let entry = state.entries.get_mut(path)?;
        entry.last_accessed = Instant::now();
        entry.hits += 1;
        let handle = entry.handle.clone();
        state.hits += 1;
        Some(handle)
    }

    fn evict(&self, reason: EvictionReason) -> Option<PathBuf> {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let victim = state.victim(reason)?;
        state.remove(&victim, reason);
        Some(victim)
    }

    fn make_room(&self, state: &RefCell<CacheState>, check_memory: bool) {
        loop {
            let reason = match self.should_evict() {
                Some(EvictionReason::MemoryPressure) if !check_memory => return,
                Some(reason) => reason,
                None => return,
            };
            let mut locked = state.borrow_mut();
            let evicted = match locked.victim(reason) {
                Some(victim) => locked.remove(&victim, reason),
                None => None,
            };
            drop(locked);
            if evicted.is_none() {
                return;
            }
        }
    }
}
