//! Command builder for runnable processes

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cap on captured bytes per output stream
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 16 * 1024 * 1024;

/// Builder for a single child process invocation
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    /// Program followed by its arguments
    command: Vec<String>,
    /// Working directory of the child
    working_dir: Option<PathBuf>,
    /// Variables set on top of the (possibly cleared) environment
    env: BTreeMap<String, String>,
    /// Start from an empty environment instead of inheriting
    env_clear: bool,
    /// Hard wall clock limit
    timeout: Duration,
    /// Per-stream capture cap in bytes
    max_output: usize,
}

impl ProcessCommand {
    /// Create a command from a program and its arguments
    pub fn new(command: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            working_dir: None,
            env: BTreeMap::new(),
            env_clear: false,
            timeout: Duration::from_secs(crate::types::DEFAULT_TIMEOUT_SECONDS),
            max_output: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    /// Set the working directory
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables
    pub fn envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Do not inherit the parent environment
    pub fn env_clear(mut self, enable: bool) -> Self {
        self.env_clear = enable;
        self
    }

    /// Set the wall clock timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the per-stream output cap in bytes
    pub fn max_output_bytes(mut self, bytes: usize) -> Self {
        self.max_output = bytes;
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.command.first().map(String::as_str)
    }

    pub fn args(&self) -> &[String] {
        self.command.get(1..).unwrap_or_default()
    }

    pub fn get_working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }

    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn is_env_clear(&self) -> bool {
        self.env_clear
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_max_output_bytes(&self) -> usize {
        self.max_output
    }

    /// Program and arguments joined for display
    pub fn display(&self) -> String {
        self.command.join(" ")
    }
}
