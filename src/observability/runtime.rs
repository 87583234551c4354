//! Process and tokio runtime statistics.
//!
//! Nothing records these implicitly, so the push path samples them on an
//! interval and publishes them as gauges on the meter provider's recorder.
//! A scraper sees them only if the push path registered them.

use std::time::Duration;

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics::SharedRecorder;

pub const PROCESS_RESIDENT_MEMORY: &str = "process_resident_memory_bytes";
pub const PROCESS_VIRTUAL_MEMORY: &str = "process_virtual_memory_bytes";
pub const PROCESS_CPU_USAGE: &str = "process_cpu_usage_percent";
pub const SYSTEM_CPU_USAGE: &str = "system_cpu_usage_percent";
pub const RUNTIME_WORKERS: &str = "runtime_workers";
pub const RUNTIME_ALIVE_TASKS: &str = "runtime_alive_tasks";

/// One sample of everything published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeStats {
    pub resident_memory: u64,
    pub virtual_memory: u64,
    pub process_cpu: f32,
    pub system_cpu: f32,
    pub workers: usize,
    pub alive_tasks: usize,
}

impl RuntimeStats {
    pub fn publish(&self) {
        ::metrics::gauge!(PROCESS_RESIDENT_MEMORY).set(self.resident_memory as f64);
        ::metrics::gauge!(PROCESS_VIRTUAL_MEMORY).set(self.virtual_memory as f64);
        ::metrics::gauge!(PROCESS_CPU_USAGE).set(self.process_cpu as f64);
        ::metrics::gauge!(SYSTEM_CPU_USAGE).set(self.system_cpu as f64);
        ::metrics::gauge!(RUNTIME_WORKERS).set(self.workers as f64);
        ::metrics::gauge!(RUNTIME_ALIVE_TASKS).set(self.alive_tasks as f64);
    }
}

/// Samples the current process.
pub struct StatsSampler {
    system: System,
    pid: Option<Pid>,
}

impl StatsSampler {
    pub fn new() -> Self {
        let pid = sysinfo::get_current_pid().ok();
        if pid.is_none() {
            tracing::warn!("Cannot determine current pid, process stats disabled");
        }
        Self {
            system: System::new(),
            pid,
        }
    }

    pub fn sample(&mut self) -> RuntimeStats {
        let mut stats = RuntimeStats::default();

        self.system.refresh_cpu_all();
        stats.system_cpu = self.system.global_cpu_usage();

        if let Some(pid) = self.pid {
            self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]));
            if let Some(process) = self.system.process(pid) {
                stats.resident_memory = process.memory();
                stats.virtual_memory = process.virtual_memory();
                stats.process_cpu = process.cpu_usage();
            }
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let metrics = handle.metrics();
            stats.workers = metrics.num_workers();
            stats.alive_tasks = metrics.num_alive_tasks();
        }
        stats
    }
}

impl Default for StatsSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish a sample to `recorder` every `interval` until `signal` fires.
pub fn spawn_runtime_stats(
    interval: Duration,
    recorder: SharedRecorder,
    mut signal: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = StatsSampler::new();
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = signal.cancelled() => break,
                _ = ticker.tick() => {
                    let stats = sampler.sample();
                    recorder.scoped(|| stats.publish());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    use metrics_exporter_prometheus::PrometheusBuilder;

    #[tokio::test]
    async fn test_sample_sees_runtime_and_process() {
        let stats = StatsSampler::new().sample();
        assert!(stats.workers >= 1);
        assert!(stats.resident_memory > 0);
    }

    #[test]
    fn test_publish_goes_to_scoped_recorder() {
        let recorder = SharedRecorder::new(PrometheusBuilder::new().build_recorder());
        let stats = RuntimeStats {
            resident_memory: 4096,
            workers: 2,
            ..RuntimeStats::default()
        };
        recorder.scoped(|| stats.publish());

        let rendered = recorder.handle().render();
        assert!(rendered.contains("process_resident_memory_bytes 4096"));
        assert!(rendered.contains("runtime_workers 2"));
    }
}
