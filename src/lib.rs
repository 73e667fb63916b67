//! # mlexptools: Metrics and Experiment Tracking for Training Loops
//!
//! mlexptools provides streaming metric accumulators that can be updated batch
//! by batch and merged across workers, fixed-schema metric collections, and an
//! experiment writer that records params, metric series and artifacts per run.
//!
//! ## Architecture
//!
//! - **metrics**: Accumulators (weighted mean, calibration error, accuracy, raw concatenation)
//! - **collection**: Named metric groups with prefixed reduction
//! - **storage**: Experiment store trait with in-memory and file backends
//! - **writer**: Run lifecycle façade over a store
//! - **monitor**: Background system resource sampling
//! - **config**: Declarative YAML writer configuration
//! - **logging**: `tracing` subscriber setup
//! - **cli**: `mlexptools` command-line interface
//!
//! ## Example
//!
//! ```
//! use ndarray::array;
//! use mlexptools::collection::MetricCollection;
//! use mlexptools::metrics::{Mean, MetricArgs, MulticlassCalibrationError};
//! use mlexptools::storage::InMemoryStorage;
//! use mlexptools::writer::ExperimentWriter;
//!
//! mlexptools::metric_collection! {
//!     struct ValMetrics {
//!         ece: MulticlassCalibrationError,
//!         loss: Mean,
//!     }
//! }
//!
//! let mut metrics = ValMetrics {
//!     ece: MulticlassCalibrationError::new(),
//!     loss: Mean::new(),
//! };
//! metrics
//!     .update([
//!         ("ece", MetricArgs::from((array![[0.9, 0.1], [0.2, 0.8]], vec![0usize, 0]))),
//!         ("loss", MetricArgs::from(vec![0.3, 0.5])),
//!     ])
//!     .unwrap();
//!
//! let mut writer = ExperimentWriter::from_storage(InMemoryStorage::new(), "demo", "run-1").unwrap();
//! writer.log_metrics(&metrics.compute_with_prefix("val"), Some(0)).unwrap();
//! writer.finish().unwrap();
//! ```

pub mod cli;
pub mod collection;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod monitor;
pub mod storage;
pub mod writer;

pub mod error;

// Re-export commonly used types
pub use collection::{ComputedMetrics, MetricCollection, MetricSet};
pub use error::{Error, Result};
pub use metrics::{MergeState, Metric, MetricArgs, MetricInput};
pub use writer::ExperimentWriter;
