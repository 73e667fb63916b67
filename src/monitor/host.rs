//! Host CPU and memory sampling

use std::collections::BTreeMap;

use sysinfo::System;

use super::{ResourceSampler, SampleBuffer, SamplerError};

/// CPU and RAM utilisation of the host
pub struct HostSampler {
    system: System,
    buffer: SampleBuffer,
}

impl HostSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta between refreshes; prime the first reading
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system,
            buffer: SampleBuffer::new(),
        }
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for HostSampler {
    fn name(&self) -> &str {
        "host"
    }

    fn collect(&mut self) -> Result<(), SamplerError> {
        self.system.refresh_cpu();
        self.system.refresh_memory();

        let cpus = self.system.cpus();
        let cpu_usage =
            cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpus.len().max(1) as f64;

        let used = self.system.used_memory() as f64;
        let total = self.system.total_memory().max(1) as f64;

        self.buffer.push("cpu_utilization_percentage", cpu_usage);
        self.buffer.push("system_memory_usage_megabytes", used / 1e6);
        self.buffer.push("system_memory_usage_percentage", used / total * 100.0);
        Ok(())
    }

    fn aggregate(&self) -> BTreeMap<String, f64> {
        self.buffer.aggregate()
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl std::fmt::Debug for HostSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSampler")
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_sampler_keys() {
        let mut sampler = HostSampler::new();
        sampler.collect().unwrap();

        let values = sampler.aggregate();
        assert_eq!(
            values.keys().map(String::as_str).collect::<Vec<_>>(),
            vec![
                "cpu_utilization_percentage",
                "system_memory_usage_megabytes",
                "system_memory_usage_percentage",
            ]
        );
        let memory_pct = values["system_memory_usage_percentage"];
        assert!((0.0..=100.0).contains(&memory_pct));
    }

    #[test]
    fn test_host_sampler_clear() {
        let mut sampler = HostSampler::new();
        sampler.collect().unwrap();
        sampler.clear();
        assert!(sampler.aggregate().is_empty());
    }
}
