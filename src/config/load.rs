//! Loading writer configuration from YAML

use std::fs;
use std::path::Path;

use super::schema::WriterConfig;
use super::validate::validate_config;
use crate::error::{Error, Result};

/// Load and validate a writer configuration file
pub fn load_config<P: AsRef<Path>>(config_path: P) -> Result<WriterConfig> {
    let yaml_content = fs::read_to_string(config_path.as_ref()).map_err(|e| {
        Error::ConfigError(format!(
            "Failed to read config file {}: {}",
            config_path.as_ref().display(),
            e
        ))
    })?;

    parse_config(&yaml_content)
}

/// Parse and validate a writer configuration from YAML text
pub fn parse_config(yaml_content: &str) -> Result<WriterConfig> {
    let config: WriterConfig = serde_yaml::from_str(yaml_content)
        .map_err(|e| Error::ConfigError(format!("Failed to parse YAML config: {e}")))?;

    validate_config(&config).map_err(|e| Error::ConfigError(format!("Invalid config: {e}")))?;

    Ok(config)
}
