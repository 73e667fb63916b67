//! YAML schema for the experiment writer

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete writer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Experiment to create or reuse
    pub experiment_name: String,

    /// Name of the run started by the writer
    pub run_name: String,

    /// Store directory
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Mapping sections whose children are left out of logged params
    #[serde(default = "default_skip_sections")]
    pub skip_param_sections: Vec<String>,

    /// Background resource sampling
    #[serde(default)]
    pub system_metrics: SystemMetricsConfig,
}

impl WriterConfig {
    /// Configuration with defaults for everything but the names
    pub fn new(experiment_name: impl Into<String>, run_name: impl Into<String>) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            run_name: run_name.into(),
            db_path: default_db_path(),
            skip_param_sections: default_skip_sections(),
            system_metrics: SystemMetricsConfig::default(),
        }
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    pub fn with_system_metrics(mut self, system_metrics: SystemMetricsConfig) -> Self {
        self.system_metrics = system_metrics;
        self
    }
}

/// Resource sampling settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between samples
    #[serde(default = "default_sampling_interval")]
    pub sampling_interval_secs: f64,

    /// Samples aggregated into each logged value
    #[serde(default = "default_samples_before_logging")]
    pub samples_before_logging: usize,
}

impl Default for SystemMetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sampling_interval_secs: default_sampling_interval(),
            samples_before_logging: default_samples_before_logging(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("mlruns")
}

fn default_skip_sections() -> Vec<String> {
    vec!["augmentation".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_sampling_interval() -> f64 {
    10.0
}

fn default_samples_before_logging() -> usize {
    1
}
