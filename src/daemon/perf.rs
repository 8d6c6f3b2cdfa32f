//! System performance samples attached to target-folder events.

use std::path::Path;

use parking_lot::Mutex;
use sysinfo::System;

use crate::daemon::event_log::EventLog;
use crate::daemon::queue::FsEventKind;

/// One point-in-time reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub cpu_percent: f32,
    pub memory_percent: f64,
    pub load_one: f64,
}

/// Samples CPU, memory and load for every processed target event.
pub struct PerformanceSampler {
    system: Mutex<System>,
}

impl PerformanceSampler {
    /// The first CPU refresh only sets a baseline, so it is taken here and
    /// every later sample reports usage since the previous one.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        Self { system: Mutex::new(system) }
    }

    pub fn sample(&self) -> PerformanceSample {
        let mut sys = self.system.lock();
        sys.refresh_memory();
        sys.refresh_cpu();

        let total = sys.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            sys.used_memory() as f64 / total as f64 * 100.0
        };

        PerformanceSample {
            cpu_percent: sys.global_cpu_info().cpu_usage(),
            memory_percent,
            load_one: System::load_average().one,
        }
    }

    /// Write one sample for `kind` on `path` to the performance log.
    pub fn record(&self, kind: FsEventKind, path: &Path, log: &dyn EventLog) {
        let sample = self.sample();
        log.log_performance(&format!(
            "{} {}: cpu={:.1}% mem={:.1}% load1={:.2}",
            kind,
            path.display(),
            sample.cpu_percent,
            sample.memory_percent,
            sample.load_one
        ));
    }
}

impl Default for PerformanceSampler {
    fn default() -> Self {
        Self::new()
    }
}
