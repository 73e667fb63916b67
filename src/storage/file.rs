//! Directory-backed storage
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/
//!   mlruns.json                 # experiments, runs, params, metrics, artifact index
//!   artifacts/<run_id>/<key>    # artifact bytes
//! ```
//!
//! Lifecycle transitions write the index immediately. Params and metrics are
//! buffered until `flush`, the next lifecycle transition, or drop.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{
    content_hash, validate_artifact_key, ArtifactInfo, ExperimentInfo, ExperimentStorage,
    InMemoryStorage, MetricPoint, Result, RunInfo, RunStatus,
};

/// File-backed experiment storage
#[derive(Debug)]
pub struct FileStorage {
    root: PathBuf,
    index: InMemoryStorage,
    dirty: bool,
}

impl FileStorage {
    /// Index file name under the store root
    pub const INDEX_FILE: &'static str = "mlruns.json";

    /// Open a store, creating the directory if needed
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("artifacts"))?;

        let index_path = root.join(Self::INDEX_FILE);
        let index = if index_path.exists() {
            let content = fs::read_to_string(&index_path)?;
            serde_json::from_str(&content)?
        } else {
            InMemoryStorage::new()
        };

        tracing::debug!(root = %root.display(), "Opened experiment store");
        Ok(Self {
            root,
            index,
            dirty: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, run_id: &str, key: &str) -> PathBuf {
        self.root.join("artifacts").join(run_id).join(key)
    }

    /// Write the index atomically through a temp file
    fn write_index(&mut self) -> Result<()> {
        let path = self.root.join(Self::INDEX_FILE);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&self.index)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        self.dirty = false;
        Ok(())
    }
}

impl ExperimentStorage for FileStorage {
    fn create_experiment(
        &mut self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> Result<String> {
        let id = self.index.create_experiment(name, config)?;
        self.write_index()?;
        Ok(id)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentInfo>> {
        self.index.get_experiment_by_name(name)
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentInfo>> {
        self.index.list_experiments()
    }

    fn create_run(&mut self, experiment_id: &str, run_name: &str) -> Result<String> {
        let id = self.index.create_run(experiment_id, run_name)?;
        self.write_index()?;
        Ok(id)
    }

    fn start_run(&mut self, run_id: &str) -> Result<()> {
        self.index.start_run(run_id)?;
        self.write_index()
    }

    fn complete_run(&mut self, run_id: &str, status: RunStatus) -> Result<()> {
        self.index.complete_run(run_id, status)?;
        self.write_index()
    }

    fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        self.index.get_run(run_id)
    }

    fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        self.index.list_runs(experiment_id)
    }

    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.index.log_param(run_id, key, value)?;
        self.dirty = true;
        Ok(())
    }

    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        self.index.get_params(run_id)
    }

    fn log_metric(&mut self, run_id: &str, key: &str, step: u64, value: f64) -> Result<()> {
        self.index.log_metric(run_id, key, step, value)?;
        self.dirty = true;
        Ok(())
    }

    fn get_metrics(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>> {
        self.index.get_metrics(run_id, key)
    }

    fn metric_keys(&self, run_id: &str) -> Result<Vec<String>> {
        self.index.metric_keys(run_id)
    }

    fn log_artifact(&mut self, run_id: &str, key: &str, data: &[u8]) -> Result<String> {
        validate_artifact_key(key)?;
        self.index.ensure_writable(run_id)?;

        let path = self.artifact_path(run_id, key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;

        let hash = content_hash(data);
        self.index.record_artifact(
            run_id,
            ArtifactInfo {
                key: key.to_string(),
                hash: hash.clone(),
                size: data.len() as u64,
            },
        )?;
        self.dirty = true;

        tracing::debug!(run_id, key, hash = %hash, "Stored artifact");
        Ok(hash)
    }

    fn get_artifact(&self, run_id: &str, key: &str) -> Result<Vec<u8>> {
        self.index.artifact_info(run_id, key)?;
        Ok(fs::read(self.artifact_path(run_id, key))?)
    }

    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactInfo>> {
        self.index.list_artifacts(run_id)
    }

    fn flush(&mut self) -> Result<()> {
        if self.dirty {
            self.write_index()?;
        }
        Ok(())
    }
}

impl Drop for FileStorage {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::error!(root = %self.root.display(), error = %e, "Failed to flush experiment store");
        }
    }
}
