//! Declarative YAML configuration for the experiment writer
//!
//! # Example
//!
//! ```yaml
//! experiment_name: cifar10
//! run_name: resnet18-baseline
//! db_path: mlruns
//! skip_param_sections: [augmentation]
//!
//! system_metrics:
//!   enabled: true
//!   sampling_interval_secs: 10.0
//!   samples_before_logging: 1
//! ```

mod load;
mod params;
mod schema;
mod validate;



pub use load::{load_config, parse_config};
pub use params::flatten_params;
pub use schema::{SystemMetricsConfig, WriterConfig};
pub use validate::{validate_config, ValidationError};
