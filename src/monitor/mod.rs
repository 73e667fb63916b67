//! System resource monitoring
//!
//! Samples host and accelerator utilisation while a run is active and hands
//! the aggregated values to a sink, usually the run's metric log.
//!
//! # Architecture
//!
//! - **ResourceSampler**: one source of readings (host CPU/RAM, Apple GPU)
//! - **SampleBuffer**: per-key sample storage, aggregated as a rounded mean
//! - **SystemMetricsMonitor**: drives samplers and emits `system/`-prefixed values
//! - **MonitorHandle**: stops the background sampling thread
//!
//! # Example
//!
//! ```
//! use mlexptools::config::SystemMetricsConfig;
//! use mlexptools::monitor::{HostSampler, ResourceSampler, SystemMetricsMonitor};
//!
//! let config = SystemMetricsConfig { samples_before_logging: 2, ..Default::default() };
//! let samplers: Vec<Box<dyn ResourceSampler>> = vec![Box::new(HostSampler::new())];
//! let mut monitor = SystemMetricsMonitor::with_samplers(samplers, &config);
//!
//! assert!(monitor.tick().is_none());
//! let (step, values) = monitor.tick().unwrap();
//! assert_eq!(step, 0);
//! assert!(values.contains_key("system/cpu_utilization_percentage"));
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::SystemMetricsConfig;

mod apple_gpu;
mod host;

pub use apple_gpu::{AppleGpuSampler, GpuStats};
pub use host::HostSampler;


/// Key prefix of every value a monitor emits
pub const SYSTEM_PREFIX: &str = "system/";

// =============================================================================
// Sampler contract
// =============================================================================

/// Errors raised while collecting a sample
#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{binary} exited with {status}")]
    CommandFailed { binary: String, status: String },

    #[error("Failed to parse sampler output: {0}")]
    Parse(String),
}

/// A source of resource readings
pub trait ResourceSampler: Send {
    /// Sampler name used in log messages
    fn name(&self) -> &str;

    /// Take one reading and buffer it
    fn collect(&mut self) -> Result<(), SamplerError>;

    /// Aggregate buffered readings, keyed without prefix
    fn aggregate(&self) -> BTreeMap<String, f64>;

    /// Drop buffered readings
    fn clear(&mut self);
}

/// Per-key sample storage
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    samples: BTreeMap<String, Vec<f64>>,
}

impl SampleBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: f64) {
        self.samples.entry(key.to_string()).or_default().push(value);
    }

    /// Mean of each key's samples, rounded to one decimal
    pub fn aggregate(&self) -> BTreeMap<String, f64> {
        self.samples
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(key, values)| {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                (key.clone(), (mean * 10.0).round() / 10.0)
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.samples.values().all(Vec::is_empty)
    }
}

/// Host sampler plus the Apple GPU sampler when it can run here
pub fn default_samplers() -> Vec<Box<dyn ResourceSampler>> {
    let mut samplers: Vec<Box<dyn ResourceSampler>> = vec![Box::new(HostSampler::new())];

    if cfg!(all(target_os = "macos", target_arch = "aarch64")) {
        match apple_gpu::default_binary_path() {
            Some(binary) if binary.is_file() => {
                samplers.push(Box::new(AppleGpuSampler::new(binary)));
            }
            _ => tracing::debug!("Apple GPU stats binary not found; GPU sampling disabled"),
        }
    }

    samplers
}

// =============================================================================
// SystemMetricsMonitor
// =============================================================================

/// Drives a set of samplers and aggregates their readings
pub struct SystemMetricsMonitor {
    samplers: Vec<Box<dyn ResourceSampler>>,
    interval: Duration,
    samples_before_logging: usize,
    samples_taken: usize,
    step: u64,
}

impl SystemMetricsMonitor {
    /// Monitor over [`default_samplers`]
    pub fn new(config: &SystemMetricsConfig) -> Self {
        Self::with_samplers(default_samplers(), config)
    }

    pub fn with_samplers(samplers: Vec<Box<dyn ResourceSampler>>, config: &SystemMetricsConfig) -> Self {
        let interval = Duration::try_from_secs_f64(config.sampling_interval_secs)
            .unwrap_or_else(|_| Duration::from_secs(10));
        Self {
            samplers,
            interval,
            samples_before_logging: config.samples_before_logging.max(1),
            samples_taken: 0,
            step: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sampler_names(&self) -> Vec<&str> {
        self.samplers.iter().map(|s| s.name()).collect()
    }

    /// Collect from every sampler; failures are logged and skipped
    pub fn sample_once(&mut self) {
        for sampler in &mut self.samplers {
            if let Err(e) = sampler.collect() {
                tracing::error!(sampler = sampler.name(), error = %e, "Failed to collect system metrics");
            }
        }
        self.samples_taken += 1;
    }

    /// Take one sample; every `samples_before_logging` samples, return the
    /// aggregated values with their logging step and clear the buffers
    pub fn tick(&mut self) -> Option<(u64, BTreeMap<String, f64>)> {
        self.sample_once();
        if self.samples_taken < self.samples_before_logging {
            return None;
        }

        let mut values = BTreeMap::new();
        for sampler in &mut self.samplers {
            for (key, value) in sampler.aggregate() {
                values.insert(format!("{SYSTEM_PREFIX}{key}"), value);
            }
            sampler.clear();
        }

        let step = self.step;
        self.step += 1;
        self.samples_taken = 0;
        tracing::debug!(step, count = values.len(), "Aggregated system metrics");
        Some((step, values))
    }

    /// Sample on a background thread until the handle is stopped
    ///
    /// Sink errors are logged; sampling continues.
    pub fn spawn<F>(mut self, mut sink: F) -> std::io::Result<MonitorHandle>
    where
        F: FnMut(u64, &BTreeMap<String, f64>) -> crate::Result<()> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let interval = self.interval;

        let thread = thread::Builder::new()
            .name("system-metrics".to_string())
            .spawn(move || {
                while !flag.load(Ordering::SeqCst) {
                    if let Some((step, values)) = self.tick() {
                        if let Err(e) = sink(step, &values) {
                            tracing::error!(error = %e, "Failed to log system metrics");
                        }
                    }

                    let deadline = Instant::now() + interval;
                    while !flag.load(Ordering::SeqCst) {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::park_timeout(deadline - now);
                    }
                }
            })?;

        Ok(MonitorHandle {
            stop,
            thread: Some(thread),
        })
    }
}

impl std::fmt::Debug for SystemMetricsMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemMetricsMonitor")
            .field("samplers", &self.sampler_names())
            .field("interval", &self.interval)
            .field("samples_before_logging", &self.samples_before_logging)
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

/// Stops a spawned monitor; dropping the handle stops it too
#[derive(Debug)]
pub struct MonitorHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            if thread.join().is_err() {
                tracing::error!("System metrics thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
