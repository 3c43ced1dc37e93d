//! System Resource Probing

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Disks, System};
use crate::monitoring::error::{MonitorError, MonitorResult};

/// Process-wide resource usage, all in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SystemSnapshot {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
}

/// Source of system resource snapshots
pub trait SystemProbe: Send + Sync {
    fn probe(&self) -> MonitorResult<SystemSnapshot>;
}

/// Probe backed by `sysinfo`.
///
/// CPU usage is measured between consecutive refreshes, so the first
/// snapshot after construction reads low.
pub struct SysinfoProbe {
    system: Mutex<System>,
    disks: Mutex<Disks>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            disks: Mutex::new(Disks::new_with_refreshed_list()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        used as f64 / total as f64 * 100.0
    }
}

impl SystemProbe for SysinfoProbe {
    fn probe(&self) -> MonitorResult<SystemSnapshot> {
        let (cpu_usage, memory_usage) = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();
            if system.total_memory() == 0 {
                return Err(MonitorError::probe_failed("total memory reported as zero"));
            }
            (
                system.global_cpu_info().cpu_usage() as f64,
                percent(system.used_memory(), system.total_memory()),
            )
        };

        let disk_usage = {
            let mut disks = self.disks.lock();
            disks.refresh();
            let (total, available) = disks
                .list()
                .iter()
                .fold((0u64, 0u64), |(total, available), disk| {
                    (total + disk.total_space(), available + disk.available_space())
                });
            percent(total.saturating_sub(available), total)
        };

        Ok(SystemSnapshot {
            cpu_usage: cpu_usage.clamp(0.0, 100.0),
            memory_usage,
            disk_usage,
        })
    }
}

/// Probe returning a preset snapshot or failure
pub struct FixedProbe {
    next: Mutex<MonitorResult<SystemSnapshot>>,
}

impl FixedProbe {
    pub fn new(snapshot: SystemSnapshot) -> Self {
        Self { next: Mutex::new(Ok(snapshot)) }
    }

    /// A probe reporting an idle machine
    pub fn idle() -> Self {
        Self::new(SystemSnapshot { cpu_usage: 5.0, memory_usage: 20.0, disk_usage: 30.0 })
    }

    pub fn set(&self, snapshot: SystemSnapshot) {
        *self.next.lock() = Ok(snapshot);
    }

    pub fn fail(&self, message: &str) {
        *self.next.lock() = Err(MonitorError::probe_failed(message));
    }
}

impl SystemProbe for FixedProbe {
    fn probe(&self) -> MonitorResult<SystemSnapshot> {
        self.next.lock().clone()
    }
}
