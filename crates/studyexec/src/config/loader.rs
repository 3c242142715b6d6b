//! Configuration file loading
//!
//! Handles loading and parsing configuration files using the config crate.

use std::path::Path;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};

use crate::config::{Config, ConfigError, ENV_PREFIX, EXAMPLE_CONFIG};
use crate::types::{MAX_TIMEOUT_SECONDS, MIN_TIMEOUT_SECONDS};

impl Config {
    /// Load configuration layered as: embedded defaults, then the optional
    /// file, then `STUDYEXEC__*` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder =
            ConfigBuilder::builder().add_source(File::from_str(EXAMPLE_CONFIG, FileFormat::Toml));

        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
                path: path.to_path_buf(),
                source,
            })?;
            builder = builder.add_source(File::from_str(&content, FileFormat::Toml));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file (with environment overrides)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load(Some(path.as_ref()))
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config = ConfigBuilder::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    fn validate(&self) -> Result<(), ConfigError> {
        for (id, runtime) in [("r", &self.runtimes.r), ("python", &self.runtimes.python)] {
            if runtime.name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "runtime '{id}' has empty name"
                )));
            }
            if runtime.extension.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "runtime '{id}' has empty extension"
                )));
            }
            if runtime.command.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "runtime '{id}' has empty command"
                )));
            }
        }

        if self.runtimes.r.extension == self.runtimes.python.extension {
            return Err(ConfigError::Invalid(
                "R and Python runtimes share the same extension".to_owned(),
            ));
        }

        if let Some(ref command) = self.default_analysis.command
            && command.is_empty()
        {
            return Err(ConfigError::Invalid(
                "default analysis has empty command".to_owned(),
            ));
        }

        if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&self.default_timeout_seconds) {
            return Err(ConfigError::Invalid(format!(
                "default_timeout_seconds must be within [{MIN_TIMEOUT_SECONDS}, {MAX_TIMEOUT_SECONDS}]"
            )));
        }

        if self.max_output_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_output_bytes must be greater than zero".to_owned(),
            ));
        }

        if self.store.retry_attempts == 0 {
            return Err(ConfigError::Invalid(
                "store.retry_attempts must be at least 1".to_owned(),
            ));
        }

        Ok(())
    }
}
