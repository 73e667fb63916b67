//! In-Memory Storage Backend
//!
//! Provides an in-memory implementation of `ExperimentStorage` for tests and
//! short-lived tools. The metadata is serializable; `FileStorage` persists it
//! as its index.

use std::collections::{BTreeMap, HashMap};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{
    content_hash, validate_artifact_key, ArtifactInfo, ExperimentInfo, ExperimentStorage,
    MetricPoint, Result, RunInfo, RunStatus, StorageError,
};

/// In-memory experiment storage backend
///
/// Artifact bytes live in a content-addressed blob map that is not part of
/// the serialized state.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct InMemoryStorage {
    experiments: Vec<ExperimentInfo>,
    runs: Vec<RunInfo>,
    params: BTreeMap<String, BTreeMap<String, String>>, // run_id -> key -> value
    metrics: BTreeMap<String, BTreeMap<String, Vec<MetricPoint>>>, // run_id -> key -> series
    artifacts: BTreeMap<String, BTreeMap<String, ArtifactInfo>>, // run_id -> key -> info
    #[serde(skip)]
    blobs: HashMap<String, Vec<u8>>, // CAS hash -> data
    next_exp_id: u64,
    next_run_id: u64,
}

impl InMemoryStorage {
    /// Create a new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of experiments
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Get the number of runs
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Get the number of distinct artifact blobs
    pub fn artifact_count(&self) -> usize {
        self.blobs.len()
    }

    fn run(&self, run_id: &str) -> Result<&RunInfo> {
        self.runs
            .iter()
            .find(|run| run.id == run_id)
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))
    }

    fn run_mut(&mut self, run_id: &str) -> Result<&mut RunInfo> {
        self.runs
            .iter_mut()
            .find(|run| run.id == run_id)
            .ok_or_else(|| StorageError::RunNotFound(run_id.to_string()))
    }

    /// Fail unless the run exists and has not finished
    pub(crate) fn ensure_writable(&self, run_id: &str) -> Result<()> {
        let run = self.run(run_id)?;
        if run.status.is_terminal() {
            return Err(StorageError::InvalidState(format!(
                "Run {run_id} is already {}",
                run.status
            )));
        }
        Ok(())
    }

    /// Register artifact metadata whose bytes live elsewhere
    pub(crate) fn record_artifact(&mut self, run_id: &str, info: ArtifactInfo) -> Result<()> {
        self.ensure_writable(run_id)?;
        self.artifacts
            .entry(run_id.to_string())
            .or_default()
            .insert(info.key.clone(), info);
        Ok(())
    }

    pub(crate) fn artifact_info(&self, run_id: &str, key: &str) -> Result<&ArtifactInfo> {
        self.run(run_id)?;
        self.artifacts
            .get(run_id)
            .and_then(|artifacts| artifacts.get(key))
            .ok_or_else(|| StorageError::ArtifactNotFound(format!("{run_id}/{key}")))
    }
}

impl ExperimentStorage for InMemoryStorage {
    fn create_experiment(
        &mut self,
        name: &str,
        config: Option<serde_json::Value>,
    ) -> Result<String> {
        if self.experiments.iter().any(|exp| exp.name == name) {
            return Err(StorageError::ExperimentExists(name.to_string()));
        }

        let exp_id = format!("exp-{}", self.next_exp_id);
        self.next_exp_id += 1;

        self.experiments.push(ExperimentInfo {
            id: exp_id.clone(),
            name: name.to_string(),
            config,
            created_at: Utc::now(),
        });

        Ok(exp_id)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentInfo>> {
        Ok(self.experiments.iter().find(|exp| exp.name == name).cloned())
    }

    fn list_experiments(&self) -> Result<Vec<ExperimentInfo>> {
        Ok(self.experiments.clone())
    }

    fn create_run(&mut self, experiment_id: &str, run_name: &str) -> Result<String> {
        if !self.experiments.iter().any(|exp| exp.id == experiment_id) {
            return Err(StorageError::ExperimentNotFound(experiment_id.to_string()));
        }

        let run_id = format!("run-{}", self.next_run_id);
        self.next_run_id += 1;

        self.runs.push(RunInfo {
            id: run_id.clone(),
            experiment_id: experiment_id.to_string(),
            name: run_name.to_string(),
            status: RunStatus::Pending,
            start_time: None,
            end_time: None,
        });

        Ok(run_id)
    }

    fn start_run(&mut self, run_id: &str) -> Result<()> {
        let run = self.run_mut(run_id)?;

        if run.status != RunStatus::Pending {
            return Err(StorageError::InvalidState(format!(
                "Run {run_id} is not in Pending state"
            )));
        }

        run.status = RunStatus::Running;
        run.start_time = Some(Utc::now());
        Ok(())
    }

    fn complete_run(&mut self, run_id: &str, status: RunStatus) -> Result<()> {
        if !status.is_terminal() {
            return Err(StorageError::InvalidState(format!(
                "{status} is not a terminal status"
            )));
        }

        let run = self.run_mut(run_id)?;

        if run.status != RunStatus::Running {
            return Err(StorageError::InvalidState(format!(
                "Run {run_id} is not in Running state"
            )));
        }

        run.status = status;
        run.end_time = Some(Utc::now());
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<RunInfo> {
        self.run(run_id).cloned()
    }

    fn list_runs(&self, experiment_id: &str) -> Result<Vec<RunInfo>> {
        if !self.experiments.iter().any(|exp| exp.id == experiment_id) {
            return Err(StorageError::ExperimentNotFound(experiment_id.to_string()));
        }
        Ok(self
            .runs
            .iter()
            .filter(|run| run.experiment_id == experiment_id)
            .cloned()
            .collect())
    }

    fn log_param(&mut self, run_id: &str, key: &str, value: &str) -> Result<()> {
        self.ensure_writable(run_id)?;

        let params = self.params.entry(run_id.to_string()).or_default();
        match params.get(key) {
            Some(existing) if existing != value => Err(StorageError::InvalidState(format!(
                "Param '{key}' of run {run_id} already set to '{existing}'"
            ))),
            Some(_) => Ok(()),
            None => {
                params.insert(key.to_string(), value.to_string());
                Ok(())
            }
        }
    }

    fn get_params(&self, run_id: &str) -> Result<BTreeMap<String, String>> {
        self.run(run_id)?;
        Ok(self.params.get(run_id).cloned().unwrap_or_default())
    }

    fn log_metric(&mut self, run_id: &str, key: &str, step: u64, value: f64) -> Result<()> {
        self.ensure_writable(run_id)?;

        self.metrics
            .entry(run_id.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(MetricPoint::new(step, value));

        Ok(())
    }

    fn get_metrics(&self, run_id: &str, key: &str) -> Result<Vec<MetricPoint>> {
        self.run(run_id)?;

        let mut points = self
            .metrics
            .get(run_id)
            .and_then(|series| series.get(key))
            .cloned()
            .unwrap_or_default();

        // Stable, so points logged at the same step keep arrival order
        points.sort_by_key(|p| p.step);

        Ok(points)
    }

    fn metric_keys(&self, run_id: &str) -> Result<Vec<String>> {
        self.run(run_id)?;
        Ok(self
            .metrics
            .get(run_id)
            .map(|series| series.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn log_artifact(&mut self, run_id: &str, key: &str, data: &[u8]) -> Result<String> {
        validate_artifact_key(key)?;
        self.ensure_writable(run_id)?;

        let hash = content_hash(data);
        self.blobs.insert(hash.clone(), data.to_vec());
        self.record_artifact(
            run_id,
            ArtifactInfo {
                key: key.to_string(),
                hash: hash.clone(),
                size: data.len() as u64,
            },
        )?;

        Ok(hash)
    }

    fn get_artifact(&self, run_id: &str, key: &str) -> Result<Vec<u8>> {
        let info = self.artifact_info(run_id, key)?;
        self.blobs
            .get(&info.hash)
            .cloned()
            .ok_or_else(|| StorageError::ArtifactNotFound(format!("{run_id}/{key}")))
    }

    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactInfo>> {
        self.run(run_id)?;
        Ok(self
            .artifacts
            .get(run_id)
            .map(|artifacts| artifacts.values().cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage_with_run() -> (InMemoryStorage, String) {
        let mut storage = InMemoryStorage::new();
        let exp_id = storage.create_experiment("test-exp", None).unwrap();
        let run_id = storage.create_run(&exp_id, "run").unwrap();
        (storage, run_id)
    }

    #[test]
    fn test_in_memory_storage_new() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.experiment_count(), 0);
        assert_eq!(storage.run_count(), 0);
    }

    #[test]
    fn test_create_experiment() {
        let mut storage = InMemoryStorage::new();
        let exp_id = storage.create_experiment("test-exp", None).unwrap();

        assert!(exp_id.starts_with("exp-"));
        assert_eq!(storage.experiment_count(), 1);
    }

    #[test]
    fn test_create_experiment_with_config() {
        let mut storage = InMemoryStorage::new();
        let config = serde_json::json!({"learning_rate": 0.001});
        storage.create_experiment("test-exp", Some(config.clone())).unwrap();

        let exp = storage.get_experiment_by_name("test-exp").unwrap().unwrap();
        assert_eq!(exp.config, Some(config));
    }

    #[test]
    fn test_create_experiment_duplicate_name() {
        let mut storage = InMemoryStorage::new();
        storage.create_experiment("test-exp", None).unwrap();

        match storage.create_experiment("test-exp", None).unwrap_err() {
            StorageError::ExperimentExists(name) => assert_eq!(name, "test-exp"),
            e => panic!("Expected ExperimentExists, got {e:?}"),
        }
        assert_eq!(storage.experiment_count(), 1);
    }

    #[test]
    fn test_get_experiment_by_name_missing() {
        let storage = InMemoryStorage::new();
        assert!(storage.get_experiment_by_name("nope").unwrap().is_none());
    }

    #[test]
    fn test_create_run() {
        let (storage, run_id) = storage_with_run();

        assert!(run_id.starts_with("run-"));
        assert_eq!(storage.run_count(), 1);
        assert_eq!(storage.get_run_status(&run_id).unwrap(), RunStatus::Pending);
        assert_eq!(storage.get_run(&run_id).unwrap().name, "run");
    }

    #[test]
    fn test_create_run_invalid_experiment() {
        let mut storage = InMemoryStorage::new();
        let result = storage.create_run("fake-exp", "run");

        match result.unwrap_err() {
            StorageError::ExperimentNotFound(id) => assert_eq!(id, "fake-exp"),
            e => panic!("Expected ExperimentNotFound, got {e:?}"),
        }
    }

    #[test]
    fn test_start_run() {
        let (mut storage, run_id) = storage_with_run();

        storage.start_run(&run_id).unwrap();
        let run = storage.get_run(&run_id).unwrap();
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.start_time.is_some());
    }

    #[test]
    fn test_start_run_invalid_state() {
        let (mut storage, run_id) = storage_with_run();

        storage.start_run(&run_id).unwrap();
        let result = storage.start_run(&run_id); // Already started

        match result.unwrap_err() {
            StorageError::InvalidState(_) => {}
            e => panic!("Expected InvalidState, got {e:?}"),
        }
    }

    #[test]
    fn test_complete_run() {
        let (mut storage, run_id) = storage_with_run();

        storage.start_run(&run_id).unwrap();
        storage.complete_run(&run_id, RunStatus::Success).unwrap();

        let run = storage.get_run(&run_id).unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert!(run.end_time.is_some());
    }

    #[test]
    fn test_complete_run_invalid_state() {
        let (mut storage, run_id) = storage_with_run();

        // Try to complete without starting
        let result = storage.complete_run(&run_id, RunStatus::Success);
        assert!(matches!(result, Err(StorageError::InvalidState(_))));
    }

    #[test]
    fn test_complete_run_requires_terminal_status() {
        let (mut storage, run_id) = storage_with_run();
        storage.start_run(&run_id).unwrap();

        let result = storage.complete_run(&run_id, RunStatus::Pending);
        assert!(matches!(result, Err(StorageError::InvalidState(_))));
        assert_eq!(storage.get_run_status(&run_id).unwrap(), RunStatus::Running);
    }

    #[test]
    fn test_log_metric() {
        let (mut storage, run_id) = storage_with_run();

        storage.log_metric(&run_id, "loss", 0, 0.5).unwrap();
        storage.log_metric(&run_id, "loss", 1, 0.4).unwrap();

        let metrics = storage.get_metrics(&run_id, "loss").unwrap();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].step, 0);
        assert!((metrics[0].value - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics[1].step, 1);
        assert!((metrics[1].value - 0.4).abs() < f64::EPSILON);
    }

    #[test]
    fn test_log_metric_invalid_run() {
        let mut storage = InMemoryStorage::new();
        let result = storage.log_metric("fake-run", "loss", 0, 0.5);

        match result.unwrap_err() {
            StorageError::RunNotFound(id) => assert_eq!(id, "fake-run"),
            e => panic!("Expected RunNotFound, got {e:?}"),
        }
    }

    #[test]
    fn test_log_metric_after_completion() {
        let (mut storage, run_id) = storage_with_run();
        storage.start_run(&run_id).unwrap();
        storage.complete_run(&run_id, RunStatus::Failed).unwrap();

        let result = storage.log_metric(&run_id, "loss", 0, 0.5);
        assert!(matches!(result, Err(StorageError::InvalidState(_))));
    }

    #[test]
    fn test_get_metrics_ordering() {
        let (mut storage, run_id) = storage_with_run();

        // Log out of order
        storage.log_metric(&run_id, "loss", 2, 0.3).unwrap();
        storage.log_metric(&run_id, "loss", 0, 0.5).unwrap();
        storage.log_metric(&run_id, "loss", 1, 0.4).unwrap();

        let steps: Vec<u64> = storage
            .get_metrics(&run_id, "loss")
            .unwrap()
            .iter()
            .map(|p| p.step)
            .collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[test]
    fn test_get_metrics_empty() {
        let (storage, run_id) = storage_with_run();
        assert!(storage.get_metrics(&run_id, "loss").unwrap().is_empty());
    }

    #[test]
    fn test_metric_keys_sorted() {
        let (mut storage, run_id) = storage_with_run();
        storage.log_metric(&run_id, "val_loss", 0, 0.5).unwrap();
        storage.log_metric(&run_id, "train_loss", 0, 0.6).unwrap();

        assert_eq!(
            storage.metric_keys(&run_id).unwrap(),
            vec!["train_loss".to_string(), "val_loss".to_string()]
        );
    }

    #[test]
    fn test_log_param() {
        let (mut storage, run_id) = storage_with_run();
        storage.log_param(&run_id, "optimizer.lr", "0.001").unwrap();
        storage.log_param(&run_id, "optimizer.lr", "0.001").unwrap();

        let params = storage.get_params(&run_id).unwrap();
        assert_eq!(params.get("optimizer.lr").map(String::as_str), Some("0.001"));
    }

    #[test]
    fn test_log_param_conflict() {
        let (mut storage, run_id) = storage_with_run();
        storage.log_param(&run_id, "epochs", "10").unwrap();

        let result = storage.log_param(&run_id, "epochs", "20");
        assert!(matches!(result, Err(StorageError::InvalidState(_))));
        assert_eq!(storage.get_params(&run_id).unwrap()["epochs"], "10");
    }

    #[test]
    fn test_log_artifact() {
        let (mut storage, run_id) = storage_with_run();

        let data = b"model weights data";
        let hash = storage.log_artifact(&run_id, "model.bin", data).unwrap();

        assert_eq!(hash, content_hash(data));
        assert_eq!(storage.artifact_count(), 1);
        assert_eq!(storage.get_artifact(&run_id, "model.bin").unwrap(), data);

        let listed = storage.list_artifacts(&run_id).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size, data.len() as u64);
    }

    #[test]
    fn test_log_artifact_invalid_run() {
        let mut storage = InMemoryStorage::new();
        let result = storage.log_artifact("fake-run", "model.bin", b"data");
        assert!(matches!(result, Err(StorageError::RunNotFound(_))));
    }

    #[test]
    fn test_log_artifact_invalid_key() {
        let (mut storage, run_id) = storage_with_run();
        let result = storage.log_artifact(&run_id, "../model.bin", b"data");
        assert!(matches!(result, Err(StorageError::InvalidArtifactKey(_))));
    }

    #[test]
    fn test_get_artifact_missing() {
        let (storage, run_id) = storage_with_run();
        let result = storage.get_artifact(&run_id, "model.bin");
        assert!(matches!(result, Err(StorageError::ArtifactNotFound(_))));
    }

    #[test]
    fn test_identical_artifacts_share_blob() {
        let (mut storage, run_id) = storage_with_run();
        let a = storage.log_artifact(&run_id, "a.bin", b"same").unwrap();
        let b = storage.log_artifact(&run_id, "b.bin", b"same").unwrap();

        assert_eq!(a, b);
        assert_eq!(storage.artifact_count(), 1);
        assert_eq!(storage.list_artifacts(&run_id).unwrap().len(), 2);
    }

    #[test]
    fn test_multiple_experiments_and_runs() {
        let mut storage = InMemoryStorage::new();

        let exp1 = storage.create_experiment("exp-1", None).unwrap();
        let exp2 = storage.create_experiment("exp-2", None).unwrap();

        let run1 = storage.create_run(&exp1, "a").unwrap();
        let run2 = storage.create_run(&exp1, "b").unwrap();
        let run3 = storage.create_run(&exp2, "c").unwrap();

        assert_eq!(storage.experiment_count(), 2);
        assert_eq!(storage.run_count(), 3);

        // Each run is independent
        storage.start_run(&run1).unwrap();
        storage.start_run(&run2).unwrap();

        assert_eq!(storage.get_run_status(&run1).unwrap(), RunStatus::Running);
        assert_eq!(storage.get_run_status(&run2).unwrap(), RunStatus::Running);
        assert_eq!(storage.get_run_status(&run3).unwrap(), RunStatus::Pending);

        let names: Vec<String> = storage
            .list_runs(&exp1)
            .unwrap()
            .into_iter()
            .map(|run| run.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_state_serializes_without_blobs() {
        let (mut storage, run_id) = storage_with_run();
        storage.log_metric(&run_id, "loss", 0, 0.5).unwrap();
        storage.log_artifact(&run_id, "model.bin", b"bytes").unwrap();

        let json = serde_json::to_string(&storage).unwrap();
        let restored: InMemoryStorage = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.run_count(), 1);
        assert_eq!(restored.get_metrics(&run_id, "loss").unwrap().len(), 1);
        assert_eq!(restored.list_artifacts(&run_id).unwrap().len(), 1);
        assert_eq!(restored.artifact_count(), 0);
    }
}
