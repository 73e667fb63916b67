//! CLI argument parsing and command execution
//!
//! # Usage
//!
//! ```bash
//! mlexptools runs ./mlruns
//! mlexptools metrics ./mlruns run-0 train_loss --format json
//! mlexptools sample --count 5 --interval-ms 200
//! mlexptools validate writer.yaml
//! ```

use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use crate::config::load_config;
use crate::error::{Error, Result};
use crate::monitor::{HostSampler, ResourceSampler};
use crate::storage::{ExperimentInfo, ExperimentStorage, FileStorage, RunInfo};

/// Inspect experiment stores and sample system resources
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "mlexptools")]
#[command(version)]
#[command(about = "Inspect experiment stores and sample system resources")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// List experiments and their runs
    Runs(RunsArgs),

    /// Print one metric series of a run
    Metrics(MetricsArgs),

    /// Sample host CPU and memory and print the aggregate
    Sample(SampleArgs),

    /// Validate a writer configuration file
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct RunsArgs {
    /// Store directory
    #[arg(value_name = "STORE")]
    pub store: PathBuf,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct MetricsArgs {
    /// Store directory
    #[arg(value_name = "STORE")]
    pub store: PathBuf,

    /// Run ID
    #[arg(value_name = "RUN_ID")]
    pub run_id: String,

    /// Metric key
    #[arg(value_name = "KEY")]
    pub key: String,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct SampleArgs {
    /// Number of samples to take
    #[arg(short, long, default_value_t = 5)]
    pub count: usize,

    /// Milliseconds between samples
    #[arg(short, long, default_value_t = 500)]
    pub interval_ms: u64,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct ValidateArgs {
    /// Path to YAML config file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Unknown output format: {s}. Valid formats: text, json")),
        }
    }
}

/// Parse arguments from an iterator (for testing)
pub fn parse_args<I, T>(args: I) -> std::result::Result<Cli, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    Cli::try_parse_from(args)
}

/// Execute a parsed command and return what should be printed
pub fn run(cli: &Cli) -> Result<String> {
    match &cli.command {
        Command::Runs(args) => run_runs(args, cli.format),
        Command::Metrics(args) => run_metrics(args, cli.format),
        Command::Sample(args) => run_sample(args, cli.format),
        Command::Validate(args) => run_validate(args, cli.format),
    }
}

fn open_existing(store: &Path) -> Result<FileStorage> {
    if !store.join(FileStorage::INDEX_FILE).is_file() {
        return Err(Error::InvalidInput(format!(
            "no experiment store at {}",
            store.display()
        )));
    }
    Ok(FileStorage::open(store)?)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| Error::Serialization(e.to_string()))
}

#[derive(Serialize)]
struct ExperimentListing {
    #[serde(flatten)]
    experiment: ExperimentInfo,
    runs: Vec<RunInfo>,
}

fn run_runs(args: &RunsArgs, format: OutputFormat) -> Result<String> {
    let storage = open_existing(&args.store)?;

    let mut listing = Vec::new();
    for experiment in storage.list_experiments()? {
        let runs = storage.list_runs(&experiment.id)?;
        listing.push(ExperimentListing { experiment, runs });
    }

    match format {
        OutputFormat::Json => to_json(&listing),
        OutputFormat::Text => {
            let mut out = String::new();
            for entry in &listing {
                out.push_str(&format!("{}  {}\n", entry.experiment.id, entry.experiment.name));
                for run in &entry.runs {
                    out.push_str(&format!("  {}  {}  {}\n", run.id, run.name, run.status));
                }
            }
            Ok(out)
        }
    }
}

fn run_metrics(args: &MetricsArgs, format: OutputFormat) -> Result<String> {
    let storage = open_existing(&args.store)?;
    let points = storage.get_metrics(&args.run_id, &args.key)?;

    match format {
        OutputFormat::Json => to_json(&points),
        OutputFormat::Text => Ok(points
            .iter()
            .map(|p| format!("{}\t{}\n", p.step, p.value))
            .collect()),
    }
}

fn run_sample(args: &SampleArgs, format: OutputFormat) -> Result<String> {
    if args.count == 0 {
        return Err(Error::InvalidParameter("--count must be > 0".to_string()));
    }

    let mut sampler = HostSampler::new();
    for i in 0..args.count {
        if i > 0 {
            thread::sleep(Duration::from_millis(args.interval_ms));
        }
        if let Err(e) = sampler.collect() {
            tracing::error!(error = %e, "Failed to sample host");
        }
    }
    let values = sampler.aggregate();

    match format {
        OutputFormat::Json => to_json(&values),
        OutputFormat::Text => Ok(values
            .iter()
            .map(|(key, value)| format!("{key}: {value}\n"))
            .collect()),
    }
}

fn run_validate(args: &ValidateArgs, format: OutputFormat) -> Result<String> {
    let config = load_config(&args.config)?;

    match format {
        OutputFormat::Json => to_json(&config),
        OutputFormat::Text => Ok(format!(
            "Config OK: {}/{} -> {}\n",
            config.experiment_name,
            config.run_name,
            config.db_path.display()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RunStatus;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    fn seeded_store() -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let mut storage = FileStorage::open(dir.path()).unwrap();
        let exp_id = storage.create_experiment("mnist", None).unwrap();
        let run_id = storage.create_run(&exp_id, "baseline").unwrap();
        storage.start_run(&run_id).unwrap();
        storage.log_metric(&run_id, "loss", 1, 0.4).unwrap();
        storage.log_metric(&run_id, "loss", 0, 0.9).unwrap();
        storage.complete_run(&run_id, RunStatus::Success).unwrap();
        (dir, run_id)
    }

    #[test]
    fn test_parse_runs() {
        let cli = parse_args(["mlexptools", "runs", "./mlruns"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Runs(RunsArgs {
                store: PathBuf::from("./mlruns")
            })
        );
        assert_eq!(cli.format, OutputFormat::Text);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = parse_args(["mlexptools", "sample", "--count", "3", "--format", "json", "-v"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
        match cli.command {
            Command::Sample(args) => {
                assert_eq!(args.count, 3);
                assert_eq!(args.interval_ms, 500);
            }
            other => panic!("Expected Sample, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_format() {
        assert!(parse_args(["mlexptools", "runs", "x", "--format", "xml"]).is_err());
    }

    #[test]
    fn test_parse_metrics_requires_key() {
        assert!(parse_args(["mlexptools", "metrics", "./mlruns", "run-0"]).is_err());
    }

    #[test]
    fn test_runs_text() {
        let (dir, run_id) = seeded_store();
        let cli = parse_args(["mlexptools", "runs", dir.path().to_str().unwrap()]).unwrap();

        let out = run(&cli).unwrap();
        assert!(out.starts_with("exp-0  mnist\n"));
        assert!(out.contains(&format!("  {run_id}  baseline  FINISHED")));
    }

    #[test]
    fn test_runs_json() {
        let (dir, _) = seeded_store();
        let cli = parse_args(["mlexptools", "--format", "json", "runs", dir.path().to_str().unwrap()])
            .unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&run(&cli).unwrap()).unwrap();
        assert_eq!(parsed[0]["name"], "mnist");
        assert_eq!(parsed[0]["runs"][0]["status"], "Success");
    }

    #[test]
    fn test_metrics_step_ordered() {
        let (dir, run_id) = seeded_store();
        let store = dir.path().to_str().unwrap();
        let cli = parse_args(["mlexptools", "metrics", store, run_id.as_str(), "loss"]).unwrap();

        assert_eq!(run(&cli).unwrap(), "0\t0.9\n1\t0.4\n");
    }

    #[test]
    fn test_metrics_unknown_run() {
        let (dir, _) = seeded_store();
        let store = dir.path().to_str().unwrap();
        let cli = parse_args(["mlexptools", "metrics", store, "run-99", "loss"]).unwrap();

        assert!(matches!(run(&cli), Err(Error::Storage(_))));
    }

    #[test]
    fn test_missing_store() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let cli = parse_args(["mlexptools", "runs", missing.to_str().unwrap()]).unwrap();

        assert!(matches!(run(&cli), Err(Error::InvalidInput(_))));
        assert!(!missing.exists());
    }

    #[test]
    fn test_sample_json() {
        let cli = parse_args(["mlexptools", "sample", "-c", "2", "-i", "10", "--format", "json"]).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&run(&cli).unwrap()).unwrap();
        assert!(parsed.get("system_memory_usage_megabytes").is_some());
    }

    #[test]
    fn test_sample_zero_count() {
        let cli = parse_args(["mlexptools", "sample", "--count", "0"]).unwrap();
        assert!(matches!(run(&cli), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_validate() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"experiment_name: mnist\nrun_name: mlp\n").unwrap();
        let cli = parse_args(["mlexptools", "validate", file.path().to_str().unwrap()]).unwrap();

        assert_eq!(run(&cli).unwrap(), "Config OK: mnist/mlp -> mlruns\n");
    }
}
