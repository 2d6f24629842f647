//! Resource monitoring for the backpressure loop.

use crate::config::ResourceBudget;
use std::path::{Path, PathBuf};

/// Answer of a resource poll.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PauseDecision {
    pub pause: bool,
    pub reason: String,
}

impl PauseDecision {
    pub fn proceed() -> Self {
        Self::default()
    }

    pub fn pause(reason: impl Into<String>) -> Self {
        Self {
            pause: true,
            reason: reason.into(),
        }
    }
}

/// Read-only view of system load, polled before every stage group.
pub trait ResourceMonitor: Send + Sync {
    fn should_pause(&self) -> PauseDecision;
}

/// Never asks for a pause.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unthrottled;

impl ResourceMonitor for Unthrottled {
    fn should_pause(&self) -> PauseDecision {
        PauseDecision::proceed()
    }
}

/// Memory and load readings at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSnapshot {
    pub memory_percent: f64,
    /// One-minute load average divided by CPU count, as a percentage
    pub cpu_percent: f64,
}

impl ResourceSnapshot {
    /// Compare against the budget thresholds.
    pub fn evaluate(&self, budget: &ResourceBudget) -> PauseDecision {
        let mut reasons = Vec::new();
        if self.memory_percent > budget.memory_threshold_percent {
            reasons.push(format!(
                "memory {:.1}% > {:.0}%",
                self.memory_percent, budget.memory_threshold_percent
            ));
        }
        if self.cpu_percent > budget.cpu_threshold_percent {
            reasons.push(format!(
                "cpu {:.1}% > {:.0}%",
                self.cpu_percent, budget.cpu_threshold_percent
            ));
        }
        if reasons.is_empty() {
            PauseDecision::proceed()
        } else {
            PauseDecision::pause(reasons.join(", "))
        }
    }
}

/// Reads `/proc/meminfo` and `/proc/loadavg`.
///
/// Where those files are missing or unreadable the monitor never pauses.
#[derive(Debug, Clone)]
pub struct SystemResourceMonitor {
    budget: ResourceBudget,
    proc_root: PathBuf,
    cpus: usize,
}

impl SystemResourceMonitor {
    pub fn new(budget: ResourceBudget) -> Self {
        Self::with_proc_root(budget, "/proc")
    }

    /// Read from another directory laid out like `/proc`.
    pub fn with_proc_root(budget: ResourceBudget, root: impl AsRef<Path>) -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            budget,
            proc_root: root.as_ref().to_path_buf(),
            cpus,
        }
    }

    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus.max(1);
        self
    }

    pub fn snapshot(&self) -> Option<ResourceSnapshot> {
        let meminfo = std::fs::read_to_string(self.proc_root.join("meminfo")).ok()?;
        let loadavg = std::fs::read_to_string(self.proc_root.join("loadavg")).ok()?;
        Some(ResourceSnapshot {
            memory_percent: parse_memory_percent(&meminfo)?,
            cpu_percent: parse_load_percent(&loadavg, self.cpus)?,
        })
    }
}

impl ResourceMonitor for SystemResourceMonitor {
    fn should_pause(&self) -> PauseDecision {
        match self.snapshot() {
            Some(snapshot) => snapshot.evaluate(&self.budget),
            None => PauseDecision::proceed(),
        }
    }
}

fn meminfo_kb(meminfo: &str, field: &str) -> Option<f64> {
    meminfo.lines().find_map(|line| {
        let rest = line.strip_prefix(field)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

fn parse_memory_percent(meminfo: &str) -> Option<f64> {
    let total = meminfo_kb(meminfo, "MemTotal")?;
    let available = meminfo_kb(meminfo, "MemAvailable")?;
    if total <= 0.0 {
        return None;
    }
    Some((total - available) / total * 100.0)
}

fn parse_load_percent(loadavg: &str, cpus: usize) -> Option<f64> {
    let one_minute: f64 = loadavg.split_whitespace().next()?.parse().ok()?;
    Some(one_minute / cpus.max(1) as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const MEMINFO: &str = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    2000000 kB\n";

    #[test]
    fn test_parse_memory_percent() {
        let pct = parse_memory_percent(MEMINFO).unwrap();
        assert!((pct - 87.5).abs() < 1e-9);
        assert!(parse_memory_percent("MemTotal: 0 kB\nMemAvailable: 0 kB\n").is_none());
        assert!(parse_memory_percent("garbage").is_none());
    }

    #[test]
    fn test_parse_load_percent() {
        let pct = parse_load_percent("3.00 2.50 2.00 1/123 4567\n", 4).unwrap();
        assert!((pct - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_evaluate() {
        let budget = ResourceBudget::default();
        let calm = ResourceSnapshot {
            memory_percent: 40.0,
            cpu_percent: 10.0,
        };
        assert!(!calm.evaluate(&budget).pause);

        let busy = ResourceSnapshot {
            memory_percent: 91.0,
            cpu_percent: 95.0,
        };
        let decision = busy.evaluate(&budget);
        assert!(decision.pause);
        assert!(decision.reason.contains("memory"));
        assert!(decision.reason.contains("cpu"));
    }

    #[test]
    fn test_system_monitor_reads_proc_layout() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();
        std::fs::write(dir.path().join("loadavg"), "0.50 0.40 0.30 1/100 1\n").unwrap();

        let monitor =
            SystemResourceMonitor::with_proc_root(ResourceBudget::default(), dir.path()).with_cpus(2);
        let decision = monitor.should_pause();
        assert!(decision.pause);
        assert!(decision.reason.starts_with("memory 87.5%"));
    }

    #[test]
    fn test_system_monitor_without_proc_never_pauses() {
        let dir = tempdir().unwrap();
        let monitor = SystemResourceMonitor::with_proc_root(ResourceBudget::default(), dir.path());
        assert!(monitor.snapshot().is_none());
        assert_eq!(monitor.should_pause(), PauseDecision::proceed());
    }
}
