use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

pub use crate::config::runtime::{FileExtension, RuntimeConfig, Runtimes, SCRIPT_PLACEHOLDER};
use crate::dataset::DatasetConfig;
use crate::process::DEFAULT_MAX_OUTPUT_BYTES;
use crate::types::DEFAULT_TIMEOUT_SECONDS;

mod loader;
pub mod runtime;

/// Example configuration embedded at compile time.
///
/// Library users can access this to generate a starter config file.
pub const EXAMPLE_CONFIG: &str = include_str!("../../studyexec.example.toml");

/// Prefix for environment variable overrides (`STUDYEXEC__DATASET__HOST`)
pub const ENV_PREFIX: &str = "STUDYEXEC";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid characters in file extension")]
    InvalidFileExtChars,

    #[error("failed to read config file at {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Config for the execution engine
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Directory holding one subdirectory of files per study
    #[serde(default = "default_studies_dir")]
    pub studies_dir: PathBuf,

    /// Root of the execution store
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Timeout used when a caller does not pick one
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,

    /// Per-stream cap on captured child output, in bytes
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    /// How much of the stderr tail is quoted in failure messages
    #[serde(default = "default_stderr_excerpt_chars")]
    pub stderr_excerpt_chars: usize,

    /// Store retry policy
    #[serde(default)]
    pub store: StoreConfig,

    /// Dataset connection parameters handed to runnables
    #[serde(default)]
    pub dataset: DatasetConfig,

    /// R and Python interpreters
    #[serde(default)]
    pub runtimes: Runtimes,

    /// What to run when a study ships no script
    #[serde(default)]
    pub default_analysis: DefaultAnalysisConfig,
}

/// Retry policy for store writes
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Total attempts per write, including the first
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Delay before retry `n` is `n * retry_backoff_ms`
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Default analysis settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultAnalysisConfig {
    /// External command for the platform's default analysis.
    ///
    /// When unset, the built-in study inventory analysis runs instead.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

impl Config {
    /// Create a new config from the embedded example
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config rooted at the given directories, everything else default
    pub fn with_dirs(studies_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            studies_dir: studies_dir.into(),
            results_dir: results_dir.into(),
            ..Self::default()
        }
    }

    /// Directory holding the files of one study
    pub fn study_dir(&self, study_id: &str) -> PathBuf {
        self.studies_dir.join(study_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::parse_toml(EXAMPLE_CONFIG).expect("embedded default config should be valid")
    }
}

fn default_studies_dir() -> PathBuf {
    PathBuf::from("/studies")
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("/results")
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

fn default_max_output_bytes() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_stderr_excerpt_chars() -> usize {
    2000
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    100
}
