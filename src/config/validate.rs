//! Configuration validation

use super::schema::WriterConfig;

/// Validation error type
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Experiment name must not be empty")]
    EmptyExperimentName,

    #[error("Run name must not be empty")]
    EmptyRunName,

    #[error("Invalid sampling interval: {0} (must be a finite value > 0.0)")]
    InvalidSamplingInterval(f64),

    #[error("Invalid samples_before_logging: {0} (must be > 0)")]
    InvalidSamplesBeforeLogging(usize),
}

/// Validate a writer configuration
pub fn validate_config(config: &WriterConfig) -> Result<(), ValidationError> {
    if config.experiment_name.trim().is_empty() {
        return Err(ValidationError::EmptyExperimentName);
    }

    if config.run_name.trim().is_empty() {
        return Err(ValidationError::EmptyRunName);
    }

    let metrics = &config.system_metrics;
    if !metrics.sampling_interval_secs.is_finite() || metrics.sampling_interval_secs <= 0.0 {
        return Err(ValidationError::InvalidSamplingInterval(
            metrics.sampling_interval_secs,
        ));
    }

    if metrics.samples_before_logging == 0 {
        return Err(ValidationError::InvalidSamplesBeforeLogging(
            metrics.samples_before_logging,
        ));
    }

    Ok(())
}
