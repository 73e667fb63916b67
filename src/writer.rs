//! Experiment writer
//!
//! `ExperimentWriter` owns one run from start to finish: it creates or reuses
//! the named experiment, starts a run, forwards params, metrics and artifacts
//! to the store, and completes the run when finished or dropped.
//!
//! # Example
//!
//! ```
//! use mlexptools::storage::{ExperimentStorage, InMemoryStorage, RunStatus};
//! use mlexptools::writer::ExperimentWriter;
//!
//! let mut writer = ExperimentWriter::from_storage(InMemoryStorage::new(), "mnist", "mlp").unwrap();
//!
//! // Auto-incrementing step per key
//! writer.log_metric("loss", 0.5, None).unwrap();
//! writer.log_metric("loss", 0.4, None).unwrap();
//!
//! // Or an explicit step
//! writer.log_metric("accuracy", 0.85, Some(10)).unwrap();
//!
//! let storage = writer.storage();
//! let run_id = writer.run_id().to_string();
//! writer.finish().unwrap();
//!
//! let store = storage.lock().unwrap();
//! assert_eq!(store.get_run_status(&run_id).unwrap(), RunStatus::Success);
//! assert_eq!(store.get_metrics(&run_id, "loss").unwrap()[1].step, 1);
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{flatten_params, validate_config, SystemMetricsConfig, WriterConfig};
use crate::error::{Error, Result};
use crate::monitor::{MonitorHandle, SystemMetricsMonitor};
use crate::storage::{ExperimentStorage, FileStorage, RunStatus, StorageError};

/// Artifact key of [`ExperimentWriter::log_state_dict`]
pub const STATE_DICT_KEY: &str = "weights/model.json";

/// Artifact key of [`ExperimentWriter::log_model`]
pub const MODEL_KEY: &str = "models/model.json";

/// File extensions accepted by [`ExperimentWriter::log_image`]
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg", "pdf", "gif"];

/// Lock a shared store, mapping poisoning to a backend error
pub(crate) fn lock_storage<S>(storage: &Mutex<S>) -> std::result::Result<MutexGuard<'_, S>, StorageError> {
    storage
        .lock()
        .map_err(|e| StorageError::Backend(format!("storage lock poisoned: {e}")))
}

/// A run being written to an experiment store
///
/// Generic over the storage backend so tests can run against
/// `InMemoryStorage` and tools against `FileStorage`.
pub struct ExperimentWriter<S: ExperimentStorage + 'static> {
    storage: Arc<Mutex<S>>,
    experiment_id: String,
    experiment_name: String,
    run_id: String,
    run_name: String,
    skip_param_sections: Vec<String>,
    step_counters: HashMap<String, u64>,
    monitor: Option<MonitorHandle>,
    finished: bool,
}

impl ExperimentWriter<FileStorage> {
    /// Open the configured file store and start a run
    ///
    /// Starts background system metrics when enabled in the config.
    pub fn open(config: &WriterConfig) -> Result<Self> {
        validate_config(config).map_err(|e| Error::ConfigError(format!("Invalid config: {e}")))?;

        let storage = FileStorage::open(&config.db_path)?;
        let mut writer = Self::from_storage(storage, &config.experiment_name, &config.run_name)?;
        writer.skip_param_sections = config.skip_param_sections.clone();

        if config.system_metrics.enabled {
            let handle = writer.start_system_metrics(&config.system_metrics)?;
            writer.monitor = Some(handle);
        }
        Ok(writer)
    }
}

impl<S: ExperimentStorage + 'static> ExperimentWriter<S> {
    /// Create or reuse `experiment_name`, then create and start a run
    pub fn new(storage: Arc<Mutex<S>>, experiment_name: &str, run_name: &str) -> Result<Self> {
        let (experiment_id, run_id) = {
            let mut store = lock_storage(&storage)?;

            let experiment_id = match store.get_experiment_by_name(experiment_name)? {
                Some(existing) => {
                    tracing::info!(experiment = experiment_name, "Experiment already exists");
                    existing.id
                }
                None => {
                    tracing::info!(experiment = experiment_name, "Create a new experiment");
                    store.create_experiment(experiment_name, None)?
                }
            };

            let run_id = store.create_run(&experiment_id, run_name)?;
            store.start_run(&run_id)?;
            (experiment_id, run_id)
        };

        tracing::info!(experiment = experiment_name, run = run_name, run_id = %run_id, "Run started");
        Ok(Self {
            storage,
            experiment_id,
            experiment_name: experiment_name.to_string(),
            run_id,
            run_name: run_name.to_string(),
            skip_param_sections: vec!["augmentation".to_string()],
            step_counters: HashMap::new(),
            monitor: None,
            finished: false,
        })
    }

    /// [`new`](Self::new) over a store the writer will share
    pub fn from_storage(storage: S, experiment_name: &str, run_name: &str) -> Result<Self> {
        Self::new(Arc::new(Mutex::new(storage)), experiment_name, run_name)
    }

    fn store(&self) -> Result<MutexGuard<'_, S>> {
        Ok(lock_storage(&self.storage)?)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.finished {
            return Err(StorageError::InvalidState(format!(
                "Run {} is already finished",
                self.run_id
            ))
            .into());
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Params
    // -------------------------------------------------------------------------

    /// Log a nested parameter structure as flattened `section.key` params
    ///
    /// Children of sections named in the skip list are left out.
    pub fn log_params<P: Serialize + ?Sized>(&mut self, params: &P) -> Result<()> {
        let value =
            serde_json::to_value(params).map_err(|e| Error::Serialization(e.to_string()))?;
        let flat = flatten_params(&value, &self.skip_param_sections)?;

        self.ensure_active()?;
        let mut store = self.store()?;
        for (key, value) in &flat {
            store.log_param(&self.run_id, key, value)?;
        }
        tracing::debug!(run_id = %self.run_id, count = flat.len(), "Logged params");
        Ok(())
    }

    pub fn log_param(&mut self, key: &str, value: impl ToString) -> Result<()> {
        self.ensure_active()?;
        self.store()?.log_param(&self.run_id, key, &value.to_string())?;
        Ok(())
    }

    pub fn set_skip_param_sections(&mut self, sections: Vec<String>) {
        self.skip_param_sections = sections;
    }

    // -------------------------------------------------------------------------
    // Metrics
    // -------------------------------------------------------------------------

    /// Log one metric value
    ///
    /// With `step == None` the key's own counter is used, starting at 0. An
    /// explicit step moves the counter past it.
    pub fn log_metric(&mut self, key: &str, value: f64, step: Option<u64>) -> Result<()> {
        self.ensure_active()?;

        let counter = self.step_counters.entry(key.to_string()).or_insert(0);
        let step = step.unwrap_or(*counter);

        if !value.is_finite() {
            tracing::warn!(key, step, value, "Logging non-finite metric value");
        }
        lock_storage(&self.storage)?.log_metric(&self.run_id, key, step, value)?;

        *counter = (*counter).max(step + 1);
        Ok(())
    }

    /// Log several metrics at one step
    ///
    /// Accepts a [`ComputedMetrics`](crate::collection::ComputedMetrics) (by
    /// value or reference) or any `(key, value)` iterator.
    pub fn log_metrics<I, K>(&mut self, metrics: I, step: Option<u64>) -> Result<()>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        for (key, value) in metrics {
            self.log_metric(key.as_ref(), value, step)?;
        }
        Ok(())
    }

    /// Next auto step for a metric key
    pub fn current_step(&self, key: &str) -> u64 {
        self.step_counters.get(key).copied().unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Artifacts
    // -------------------------------------------------------------------------

    /// Store a local file under its file name
    pub fn log_artifact(&mut self, local_path: impl AsRef<Path>) -> Result<String> {
        let path = local_path.as_ref();
        let key = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::InvalidInput(format!("not a file path: {}", path.display())))?;
        let data = fs::read(path)?;
        self.put_artifact(key, &data)
    }

    /// Store every file below a directory, keyed by its relative path
    ///
    /// Returns the stored keys, sorted.
    pub fn log_artifacts(&mut self, local_dir: impl AsRef<Path>) -> Result<Vec<String>> {
        let root = local_dir.as_ref();
        let mut files = Vec::new();
        collect_files(root, root, &mut files)?;
        files.sort();

        let mut keys = Vec::with_capacity(files.len());
        for (key, path) in files {
            let data = fs::read(&path)?;
            self.put_artifact(&key, &data)?;
            keys.push(key);
        }
        Ok(keys)
    }

    /// Store serialized model weights at `weights/model.json`
    pub fn log_state_dict<T: Serialize + ?Sized>(&mut self, state: &T) -> Result<String> {
        self.put_json(STATE_DICT_KEY, state)
    }

    /// Store a serialized model at `models/model.json`
    pub fn log_model<T: Serialize + ?Sized>(&mut self, model: &T) -> Result<String> {
        self.put_json(MODEL_KEY, model)
    }

    /// Store rendered image bytes (a plot or figure) at `key`
    ///
    /// The key must end in a recognised image extension.
    pub fn log_image(&mut self, data: &[u8], key: &str) -> Result<String> {
        let extension = Path::new(key)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some(ext) if IMAGE_EXTENSIONS.contains(&ext) => self.put_artifact(key, data),
            _ => Err(Error::InvalidInput(format!(
                "image key '{key}' must end in one of: {}",
                IMAGE_EXTENSIONS.join(", ")
            ))),
        }
    }

    /// Read back an artifact of this run
    pub fn load_artifact(&self, key: &str) -> Result<Vec<u8>> {
        Ok(self.store()?.get_artifact(&self.run_id, key)?)
    }

    /// Deserialize the model stored by [`log_model`](Self::log_model)
    pub fn load_model<T: DeserializeOwned>(&self) -> Result<T> {
        let bytes = self.load_artifact(MODEL_KEY)?;
        serde_json::from_slice(&bytes).map_err(|e| Error::Serialization(e.to_string()))
    }

    fn put_json<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<String> {
        let data =
            serde_json::to_vec_pretty(value).map_err(|e| Error::Serialization(e.to_string()))?;
        self.put_artifact(key, &data)
    }

    fn put_artifact(&mut self, key: &str, data: &[u8]) -> Result<String> {
        self.ensure_active()?;
        let hash = self.store()?.log_artifact(&self.run_id, key, data)?;
        tracing::debug!(run_id = %self.run_id, key, "Logged artifact");
        Ok(hash)
    }

    // -------------------------------------------------------------------------
    // System metrics
    // -------------------------------------------------------------------------

    /// Sample system resources in the background, logging into this run
    ///
    /// The returned handle stops sampling when stopped or dropped.
    pub fn start_system_metrics(&self, config: &SystemMetricsConfig) -> Result<MonitorHandle> {
        self.ensure_active()?;

        let monitor = SystemMetricsMonitor::new(config);
        tracing::info!(run_id = %self.run_id, ?monitor, "Starting system metrics monitor");

        let storage = Arc::clone(&self.storage);
        let run_id = self.run_id.clone();
        let handle = monitor.spawn(move |step, values| {
            let mut store = lock_storage(&storage)?;
            for (key, value) in values {
                store.log_metric(&run_id, key, step, *value)?;
            }
            Ok(())
        })?;
        Ok(handle)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Complete the run as successful
    pub fn finish(self) -> Result<()> {
        self.finish_with(RunStatus::Success)
    }

    /// Complete the run with a terminal status
    pub fn finish_with(mut self, status: RunStatus) -> Result<()> {
        self.complete(status)
    }

    fn complete(&mut self, status: RunStatus) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }

        self.finished = true;
        {
            let mut store = self.store()?;
            store.complete_run(&self.run_id, status)?;
            store.flush()?;
        }
        tracing::info!(
            experiment = %self.experiment_name,
            run = %self.run_name,
            %status,
            "Experiment {}/{} finish.",
            self.experiment_name,
            self.run_name
        );
        Ok(())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_name(&self) -> &str {
        &self.run_name
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Shared handle to the underlying store
    pub fn storage(&self) -> Arc<Mutex<S>> {
        Arc::clone(&self.storage)
    }
}

impl<S: ExperimentStorage + 'static> Drop for ExperimentWriter<S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        tracing::warn!(run_id = %self.run_id, "Writer dropped before finish; cancelling run");
        if let Err(e) = self.complete(RunStatus::Cancelled) {
            tracing::error!(run_id = %self.run_id, error = %e, "Failed to cancel run");
        }
    }
}

impl<S: ExperimentStorage + 'static> std::fmt::Debug for ExperimentWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentWriter")
            .field("experiment", &self.experiment_name)
            .field("run_id", &self.run_id)
            .field("run_name", &self.run_name)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

/// Recursively list files below `dir` as `(relative key, path)`
fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, std::path::PathBuf)>,
) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .map_err(|e| Error::InvalidInput(e.to_string()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push((key, path));
        }
    }
    Ok(())
}
