//! System memory probing.

use parking_lot::Mutex;
use sysinfo::System;

/// Reports the fraction of system memory in use, in [0, 1].
pub trait MemoryProbe: Send + Sync {
    fn used_fraction(&self) -> f64;
}

impl<F> MemoryProbe for F
where
    F: Fn() -> f64 + Send + Sync,
{
    fn used_fraction(&self) -> f64 {
        self()
    }
}

/// Probe backed by `sysinfo`, reusing one `System` instance.
pub struct SystemMemory {
    system: Mutex<System>,
}

impl SystemMemory {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemory {
    fn used_fraction(&self) -> f64 {
        let mut system = self.system.lock();
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        system.used_memory() as f64 / total as f64
    }
}
