//! Script resolution
//!
//! Decides which single runnable a study executes: the first R script in
//! lexicographic order, else the first Python script, else the default
//! analysis.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::config::Runtimes;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("study not found: {0}")]
    StudyNotFound(String),

    #[error("failed to read study directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Interpreter family of a study script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    R,
    Python,
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptKind::R => write!(f, "R"),
            ScriptKind::Python => write!(f, "Python"),
        }
    }
}

/// The one thing an execution will run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runnable {
    Script { kind: ScriptKind, path: PathBuf },
    DefaultAnalysis,
}

impl Runnable {
    pub fn describe(&self) -> String {
        match self {
            Runnable::Script { kind, path } => format!("{kind} script: {}", path.display()),
            Runnable::DefaultAnalysis => "default analysis".to_owned(),
        }
    }
}

/// Pick the runnable among a study's file names
///
/// Pure policy, independent of the filesystem. Returns the chosen file name.
pub fn choose<'a>(
    file_names: impl IntoIterator<Item = &'a str>,
    runtimes: &Runtimes,
) -> Option<(ScriptKind, &'a str)> {
    let mut first_r: Option<&str> = None;
    let mut first_py: Option<&str> = None;

    for name in file_names {
        if runtimes.r.matches(name) {
            first_r = Some(first_r.map_or(name, |cur| cur.min(name)));
        } else if runtimes.python.matches(name) {
            first_py = Some(first_py.map_or(name, |cur| cur.min(name)));
        }
    }

    first_r
        .map(|name| (ScriptKind::R, name))
        .or_else(|| first_py.map(|name| (ScriptKind::Python, name)))
}

/// Resolve the runnable of the study stored in `study_dir`
///
/// Only regular files directly inside the directory are considered.
#[instrument(skip(runtimes))]
pub async fn resolve(study_dir: &Path, runtimes: &Runtimes) -> Result<Runnable, ResolveError> {
    let names = list_study_files(study_dir).await?;
    let runnable = match choose(names.iter().map(String::as_str), runtimes) {
        Some((kind, name)) => Runnable::Script {
            kind,
            path: study_dir.join(name),
        },
        None => Runnable::DefaultAnalysis,
    };
    debug!(runnable = %runnable.describe(), "resolved runnable");
    Ok(runnable)
}

/// Names of the regular files in a study directory
pub async fn list_study_files(study_dir: &Path) -> Result<Vec<String>, ResolveError> {
    let io_err = |source: std::io::Error| ResolveError::Io {
        path: study_dir.to_path_buf(),
        source,
    };

    let mut entries = match tokio::fs::read_dir(study_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ResolveError::StudyNotFound(study_id_of(study_dir)));
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        // Follows symlinks, so a linked script still counts
        let is_file = tokio::fs::metadata(entry.path())
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Whether the study has a file set at all
pub async fn study_exists(study_dir: &Path) -> bool {
    tokio::fs::metadata(study_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

fn study_id_of(study_dir: &Path) -> String {
    study_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| study_dir.display().to_string())
}
