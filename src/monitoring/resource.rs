//! Resource Usage Monitoring
//!
//! Samples CPU and memory usage of the engine process during a run for
//! the end-of-run report.

use std::time::{Duration, Instant};

use sysinfo::{get_current_pid, Pid, ProcessRefreshKind, System};

/// A single resource usage sample.
#[derive(Debug, Clone)]
pub struct ResourceSample {
    /// When this sample was taken
    pub timestamp: Instant,
    /// CPU usage percentage (0-100+)
    pub cpu_usage: f32,
    /// Memory usage in megabytes
    pub memory_mb: u64,
}

/// Monitors resource usage of the current process.
///
/// The first call to [`sample`](Self::sample) warms up the CPU counters;
/// later calls are rate limited.
pub struct ResourceMonitor {
    system: System,
    process_id: Option<Pid>,
    samples: Vec<ResourceSample>,
    warmup_done: bool,
    last_sample: Option<Instant>,
    min_interval: Duration,
}

impl ResourceMonitor {
    /// Creates a new monitor for the current process.
    pub fn new() -> Self {
        Self {
            system: System::new(),
            process_id: get_current_pid().ok(),
            samples: Vec::new(),
            warmup_done: false,
            last_sample: None,
            min_interval: Duration::from_millis(250),
        }
    }

    /// Sets the minimum interval between samples.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Takes a resource usage sample, if due.
    pub fn sample(&mut self) {
        let Some(pid) = self.process_id else {
            return;
        };
        let now = Instant::now();

        let refresh_kind = ProcessRefreshKind::new().with_cpu().with_memory();

        // CPU readings need a baseline refresh first
        if !self.warmup_done {
            self.system.refresh_processes_specifics(refresh_kind);
            self.warmup_done = true;
            self.last_sample = Some(now);
            return;
        }

        if let Some(last) = self.last_sample {
            if now.duration_since(last) < self.min_interval {
                return;
            }
        }

        self.system.refresh_processes_specifics(refresh_kind);
        self.last_sample = Some(now);

        if let Some(process) = self.system.process(pid) {
            self.samples.push(ResourceSample {
                timestamp: now,
                cpu_usage: process.cpu_usage(),
                memory_mb: process.memory() / (1024 * 1024),
            });
        }
    }

    /// Returns all collected samples.
    pub fn get_samples(&self) -> &[ResourceSample] {
        &self.samples
    }

    /// Returns the peak memory usage in MB.
    pub fn peak_memory_mb(&self) -> u64 {
        self.samples.iter().map(|s| s.memory_mb).max().unwrap_or(0)
    }

    /// Returns the average CPU usage across samples.
    pub fn average_cpu(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.cpu_usage).sum::<f32>() / self.samples.len() as f32
    }

    /// Returns a human-readable summary of resource usage.
    pub fn get_summary(&self) -> String {
        if self.samples.is_empty() {
            return "No resource data collected".to_string();
        }

        format!(
            "Resource Usage:\n  Average CPU: {:.1}%\n  Peak Memory: {} MB\n  Samples: {}",
            self.average_cpu(),
            self.peak_memory_mb(),
            self.samples.len()
        )
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_monitor_creation() {
        let monitor = ResourceMonitor::new();
        assert!(monitor.get_samples().is_empty());
    }

    #[test]
    fn test_first_sample_is_warmup() {
        let mut monitor = ResourceMonitor::new();
        monitor.sample();
        assert!(monitor.get_samples().is_empty());

        thread::sleep(Duration::from_millis(300));
        monitor.sample();
        assert!(!monitor.get_samples().is_empty());
    }

    #[test]
    fn test_rate_limiting() {
        let mut monitor = ResourceMonitor::new().with_min_interval(Duration::from_millis(200));

        monitor.sample(); // warmup
        monitor.sample(); // within interval, dropped
        assert!(monitor.get_samples().is_empty());

        thread::sleep(Duration::from_millis(250));
        monitor.sample();
        assert!(!monitor.get_samples().is_empty());
    }

    #[test]
    fn test_summary_empty() {
        let monitor = ResourceMonitor::new();
        assert!(monitor.get_summary().contains("No resource data collected"));
    }

    #[test]
    fn test_summary_format() {
        let mut monitor = ResourceMonitor::new();
        monitor.sample(); // warmup
        thread::sleep(Duration::from_millis(300));
        monitor.sample();

        let summary = monitor.get_summary();
        assert!(summary.contains("Average CPU"));
        assert!(summary.contains("Peak Memory"));
        assert!(summary.contains("Samples"));
    }

    #[test]
    fn test_empty_aggregates() {
        let monitor = ResourceMonitor::new();
        assert_eq!(monitor.peak_memory_mb(), 0);
        assert_eq!(monitor.average_cpu(), 0.0);
    }
}
