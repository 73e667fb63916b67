//! Apple silicon GPU sampling through an external stats binary
//!
//! The binary is invoked as `<binary> --json` and must print one JSON object
//! per line with `utilization`, `mem_used`, `temperature` and `power` fields.
//! Only the first line is read.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use super::{ResourceSampler, SampleBuffer, SamplerError};

/// Environment variable overriding the stats binary location
pub const BINARY_ENV: &str = "MLEXPTOOLS_APPLE_GPU_STATS";

const BINARY_NAME: &str = "apple_gpu_stats";

/// Raw reading printed by the stats binary
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GpuStats {
    pub utilization: f64,
    pub mem_used: f64,
    pub temperature: f64,
    /// Watts
    pub power: f64,
}

impl GpuStats {
    /// Parse the first line of the binary's output
    pub fn parse(output: &str) -> Result<Self, SamplerError> {
        let line = output
            .trim()
            .lines()
            .next()
            .ok_or_else(|| SamplerError::Parse("empty output".to_string()))?;
        serde_json::from_str(line).map_err(|e| SamplerError::Parse(e.to_string()))
    }
}

/// GPU utilisation, memory, temperature and power of an Apple silicon host
#[derive(Debug)]
pub struct AppleGpuSampler {
    binary: PathBuf,
    buffer: SampleBuffer,
}

impl AppleGpuSampler {
    /// Power draw treated as 100%
    pub const MAX_POWER_WATTS: f64 = 16.5;

    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            buffer: SampleBuffer::new(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Buffer one parsed reading
    pub fn record(&mut self, stats: &GpuStats) {
        self.buffer.push("mps_usage", stats.utilization);
        self.buffer.push("mps_memory_allocated", stats.mem_used);
        self.buffer.push("mps_temperature", stats.temperature);
        self.buffer.push("mps_power_watts", stats.power);
        self.buffer
            .push("mps_power_percent", stats.power / Self::MAX_POWER_WATTS * 100.0);
    }
}

impl ResourceSampler for AppleGpuSampler {
    fn name(&self) -> &str {
        "apple_gpu"
    }

    fn collect(&mut self) -> Result<(), SamplerError> {
        let output = Command::new(&self.binary).arg("--json").output()?;
        if !output.status.success() {
            return Err(SamplerError::CommandFailed {
                binary: self.binary.display().to_string(),
                status: output.status.to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stats = GpuStats::parse(&stdout)?;
        self.record(&stats);
        Ok(())
    }

    fn aggregate(&self) -> BTreeMap<String, f64> {
        self.buffer.aggregate()
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// `$MLEXPTOOLS_APPLE_GPU_STATS`, else `apple_gpu_stats` next to the executable
pub(crate) fn default_binary_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(BINARY_ENV) {
        return Some(PathBuf::from(path));
    }
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(BINARY_NAME)))
}
