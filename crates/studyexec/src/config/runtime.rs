use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Placeholder replaced by the absolute script path in runtime commands
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

/// Configuration for a script interpreter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Human-readable name (e.g., "R")
    pub name: String,

    /// Script file extension, matched case-sensitively
    pub extension: FileExtension,

    /// Command and arguments; `{script}` is replaced with the script path
    pub command: Vec<String>,

    /// Command used by the health check to probe the interpreter
    #[serde(default)]
    pub version_command: Vec<String>,

    /// Extra environment variables for the runnable
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl RuntimeConfig {
    /// Expand the `{script}` placeholder in the run command
    pub fn expand_command(&self, script: &Path) -> Vec<String> {
        let script = script.to_string_lossy();
        self.command
            .iter()
            .map(|arg| arg.replace(SCRIPT_PLACEHOLDER, &script))
            .collect()
    }

    /// Whether a file name carries this runtime's extension
    pub fn matches(&self, file_name: &str) -> bool {
        Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == self.extension.as_str())
    }

    pub(crate) fn default_r() -> Self {
        Self {
            name: "R".to_owned(),
            extension: FileExtension("R".to_owned()),
            command: vec!["Rscript".to_owned(), SCRIPT_PLACEHOLDER.to_owned()],
            version_command: vec!["R".to_owned(), "--version".to_owned()],
            env: HashMap::new(),
        }
    }

    pub(crate) fn default_python() -> Self {
        Self {
            name: "Python".to_owned(),
            extension: FileExtension("py".to_owned()),
            command: vec!["python3".to_owned(), SCRIPT_PLACEHOLDER.to_owned()],
            version_command: vec!["python3".to_owned(), "--version".to_owned()],
            env: HashMap::new(),
        }
    }
}

/// The two script interpreters, in resolution priority order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runtimes {
    #[serde(default = "RuntimeConfig::default_r")]
    pub r: RuntimeConfig,

    #[serde(default = "RuntimeConfig::default_python")]
    pub python: RuntimeConfig,
}

impl Default for Runtimes {
    fn default() -> Self {
        Self {
            r: RuntimeConfig::default_r(),
            python: RuntimeConfig::default_python(),
        }
    }
}

/// File extension without dot (e.g., "py")
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
