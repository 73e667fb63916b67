//! Experiment store
//!
//! Provides the `ExperimentStorage` trait and the backends that persist
//! experiments, runs, parameters, metric series and artifacts.
//!
//! # Backends
//!
//! - `InMemoryStorage`: process-local store for tests and short-lived tools
//! - `FileStorage`: directory-backed store (`mlruns.json` index plus artifact blobs)
//!
//! # Example
//!
//! ```
//! use mlexptools::storage::{ExperimentStorage, InMemoryStorage, RunStatus};
//!
//! let mut storage = InMemoryStorage::new();
//! let exp_id = storage.create_experiment("my-experiment", None).unwrap();
//! let run_id = storage.create_run(&exp_id, "baseline").unwrap();
//! storage.start_run(&run_id).unwrap();
//! storage.log_metric(&run_id, "loss", 0, 0.5).unwrap();
//! storage.complete_run(&run_id, RunStatus::Success).unwrap();
//! ```

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::InMemoryStorage;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Experiment already exists: {0}")]
    ExperimentExists(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Artifact not found: {0}")]
    ArtifactNotFound(String),

    #[error("Invalid artifact key: {0}")]
    InvalidArtifactKey(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is created but not yet started
    Pending,
    /// Run is currently executing
    Running,
    /// Run completed successfully
    Success,
    /// Run failed with an error
    Failed,
    /// Run was cancelled
    Cancelled,
}

impl RunStatus {
    /// Whether the run can no longer change state
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed | RunStatus::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Cancelled => "KILLED",
        };
        f.write_str(label)
    }
}

/// A single metric data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Training step
    pub step: u64,
    /// Metric value; non-finite values are stored as JSON `null` and read back as NaN
    #[serde(with = "nan_as_null")]
    pub value: f64,
    /// Timestamp when recorded
    pub timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Create a new metric point with current timestamp
    pub fn new(step: u64, value: f64) -> Self {
        Self {
            step,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Create a metric point with specific timestamp
    pub fn with_timestamp(step: u64, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            step,
            value,
            timestamp,
        }
    }
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}

/// Experiment metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentInfo {
    pub id: String,
    pub name: String,
    pub config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Run metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: String,
    pub experiment_id: String,
    pub name: String,
    pub status: RunStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Artifact metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactInfo {
    /// Relative key under the run's artifact root
    pub key: String,
    /// Content-addressable hash
    pub hash: String,
    /// Size in bytes
    pub size: u64,
}

/// Trait for experiment storage backends
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` so a store can be shared with
/// background samplers behind a mutex.
pub trait ExperimentStorage: Send + Sync {
    /// Create a new experiment and return its ID
    ///
    /// Experiment names are unique; a taken name fails with
    /// [`StorageError::ExperimentExists`].
    fn create_experiment(
        &mut self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> Result<String>;

    /// Look up an experiment by name
    fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentInfo>>;

    /// All experiments, in creation order
    fn list_experiments(&self) -> Result<Vec<ExperimentInfo>>;

    /// Create a new run within an experiment
    ///
    /// The run starts in `Pending` status.
    fn create_run(&mut self, experiment_id: &str, run_name: &str) -> Result<String>;

    /// Start a run, transitioning from Pending to Running
    fn start_run(&mut self, run_id: &str) -> Result<()>;

    /// Complete a running run with a terminal status
    fn complete_run(&mut self, run_id: &str, status: RunStatus) -> Result<()>;

    /// Run metadata
    fn get_run(&self, run_id: &str) -> Result<RunInfo>;

    /// Runs of one experiment, in creation order
    fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunInfo>>;

    /// Get the current status of a run
    fn get_run_status(&self, run_id: &str) -> Result<RunStatus> {
        self.get_run(run_id).map(|run| run.status)
    }

    /// Record a parameter
    ///
    /// Re-logging the same value is a no-op; a different value for an existing
    /// key fails with [`StorageError::InvalidState`].
    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<()>;

    /// All parameters of a run, sorted by key
    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>>;

    /// Log a metric value for a run
    fn log_metric(&mut self, run_id: &str, key: &str, step: u64, value: f64) -> Result<()>;

    /// Metric series for a run and key, ordered by step
    fn get_metrics(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>>;

    /// Metric keys logged for a run, sorted
    fn metric_keys(&self, run_id: &str) -> Result<Vec<String>>;

    /// Store an artifact and return its content-addressable hash
    fn log_artifact(&mut self, run_id: &str, key: &str, data: &[u8]) -> Result<String>;

    /// Read an artifact's bytes
    fn get_artifact(&self, run_id: &str, key: &str) -> Result<Vec<u8>>;

    /// Artifacts of a run, sorted by key
    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactInfo>>;

    /// Persist buffered state; backends without buffering do nothing
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Compute the CAS hash for artifact data
pub fn content_hash(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("sha256-{}", hex::encode(digest))
}

/// Reject empty, absolute or parent-escaping artifact keys
pub(crate) fn validate_artifact_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if key.trim().is_empty() || escapes {
        return Err(StorageError::InvalidArtifactKey(key.to_string()));
    }
    Ok(())
}
