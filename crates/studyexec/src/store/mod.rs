//! Execution artifact store
//!
//! Artifacts live under `<root>/<study_id>/<execution_id>/`:
//!
//! - `status.json`: the status record, replaced atomically on every write
//! - `results.json`: the result record, written at most once
//! - `execution.log`: append-only run log
//! - `workspace/`: working directory handed to the runnable
//!
//! Every execution owns its directory, so writers of different keys never
//! touch the same file, and atomic replacement means readers of a key never
//! see a half-written record.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};

use crate::types::{ExecutionKey, ExecutionResult, ExecutionStatus, validate_identifier};

mod atomic;

pub const STATUS_FILE: &str = "status.json";
pub const RESULTS_FILE: &str = "results.json";
pub const LOG_FILE: &str = "execution.log";
pub const WORKSPACE_DIR: &str = "workspace";

const HEALTH_PROBE_FILE: &str = ".write-probe";

/// Errors raised by the execution store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{artifact} not found for execution {key}")]
    NotFound {
        key: ExecutionKey,
        artifact: &'static str,
    },

    #[error("execution {0} already exists")]
    AlreadyExists(ExecutionKey),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("corrupt {artifact} for execution {key}: {reason}")]
    Corrupt {
        key: ExecutionKey,
        artifact: &'static str,
        reason: String,
    },

    #[error("failed to serialize {artifact}: {source}")]
    Serialize {
        artifact: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Whether the failure comes from the storage medium and may clear up
    /// on retry
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Io { .. })
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File-backed store for execution artifacts
#[derive(Debug, Clone)]
pub struct ExecutionStore {
    root: PathBuf,
}

impl ExecutionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory owned by one execution
    pub fn namespace_dir(&self, key: &ExecutionKey) -> Result<PathBuf, StoreError> {
        validate_identifier("study id", &key.study_id)
            .and_then(|()| validate_identifier("execution id", &key.execution_id))
            .map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        Ok(self.root.join(&key.study_id).join(&key.execution_id))
    }

    /// Working directory handed to the runnable
    pub fn workspace_dir(&self, key: &ExecutionKey) -> Result<PathBuf, StoreError> {
        Ok(self.namespace_dir(key)?.join(WORKSPACE_DIR))
    }

    /// Allocate the namespace of a new execution
    ///
    /// Fails with [`StoreError::AlreadyExists`] if the execution id is taken.
    /// The workspace is created separately by [`Self::ensure_workspace`], so
    /// retrying either step never trips over a partial allocation.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn create_namespace(&self, key: &ExecutionKey) -> Result<PathBuf, StoreError> {
        let dir = self.namespace_dir(key)?;
        let study_dir = self.root.join(&key.study_id);
        tokio::fs::create_dir_all(&study_dir)
            .await
            .map_err(|e| StoreError::io(&study_dir, e))?;

        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists(key.clone()));
            }
            Err(e) => return Err(StoreError::io(&dir, e)),
        }

        debug!(?dir, "allocated execution namespace");
        Ok(dir)
    }

    /// Create the workspace of an allocated namespace; idempotent
    pub async fn ensure_workspace(&self, key: &ExecutionKey) -> Result<PathBuf, StoreError> {
        let workspace = self.workspace_dir(key)?;
        tokio::fs::create_dir_all(&workspace)
            .await
            .map_err(|e| StoreError::io(&workspace, e))?;
        Ok(workspace)
    }

    /// Release a namespace that never got a status record
    pub async fn remove_namespace(&self, key: &ExecutionKey) -> Result<(), StoreError> {
        let dir = self.namespace_dir(key)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(&dir, e)),
        }
    }

    /// Atomically replace the status record
    #[instrument(skip(self, status), fields(key = %status.key(), state = %status.state))]
    pub async fn put_status(&self, status: &ExecutionStatus) -> Result<(), StoreError> {
        let path = self.namespace_dir(&status.key())?.join(STATUS_FILE);
        let content = serde_json::to_vec_pretty(status).map_err(|source| {
            StoreError::Serialize {
                artifact: STATUS_FILE,
                source,
            }
        })?;
        atomic::atomic_write_file(&path, &content)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    /// Read the status record, rejecting records with inconsistent fields
    pub async fn get_status(&self, key: &ExecutionKey) -> Result<ExecutionStatus, StoreError> {
        let content = self.read_artifact(key, STATUS_FILE).await?;
        let status: ExecutionStatus =
            serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                artifact: STATUS_FILE,
                reason: e.to_string(),
            })?;
        if status.key() != *key || !status.is_consistent() {
            return Err(StoreError::Corrupt {
                key: key.clone(),
                artifact: STATUS_FILE,
                reason: "status fields are inconsistent".to_owned(),
            });
        }
        Ok(status)
    }

    /// Atomically write the result record
    #[instrument(skip(self, result), fields(key = %key))]
    pub async fn put_result(
        &self,
        key: &ExecutionKey,
        result: &ExecutionResult,
    ) -> Result<(), StoreError> {
        let path = self.namespace_dir(key)?.join(RESULTS_FILE);
        let content = serde_json::to_vec_pretty(result).map_err(|source| {
            StoreError::Serialize {
                artifact: RESULTS_FILE,
                source,
            }
        })?;
        atomic::atomic_write_file(&path, &content)
            .await
            .map_err(|e| StoreError::io(&path, e))
    }

    pub async fn get_result(&self, key: &ExecutionKey) -> Result<ExecutionResult, StoreError> {
        let content = self.read_artifact(key, RESULTS_FILE).await?;
        serde_json::from_slice(&content).map_err(|e| StoreError::Corrupt {
            key: key.clone(),
            artifact: RESULTS_FILE,
            reason: e.to_string(),
        })
    }

    /// Append text to the execution log, creating it if needed
    pub async fn append_log(&self, key: &ExecutionKey, text: &str) -> Result<(), StoreError> {
        let path = self.namespace_dir(key)?.join(LOG_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(|e| StoreError::io(&path, e))?;
        file.flush().await.map_err(|e| StoreError::io(&path, e))
    }

    pub async fn get_log(&self, key: &ExecutionKey) -> Result<String, StoreError> {
        let content = self.read_artifact(key, LOG_FILE).await?;
        Ok(String::from_utf8_lossy(&content).into_owned())
    }

    /// Status records of every execution of a study, in no particular order
    ///
    /// Unknown studies yield an empty list. Executions whose status cannot
    /// be read are skipped.
    #[instrument(skip(self))]
    pub async fn list_executions(&self, study_id: &str) -> Result<Vec<ExecutionStatus>, StoreError> {
        validate_identifier("study id", study_id)
            .map_err(|e| StoreError::InvalidKey(e.to_string()))?;
        let study_dir = self.root.join(study_id);

        let mut entries = match tokio::fs::read_dir(&study_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&study_dir, e)),
        };

        let mut statuses = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::io(&study_dir, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let Some(execution_id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            let key = ExecutionKey::new(study_id, execution_id);
            match self.get_status(&key).await {
                Ok(status) => statuses.push(status),
                // Namespace allocated but first status not written yet
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!(key = %key, error = %e, "skipping unreadable execution"),
            }
        }
        Ok(statuses)
    }

    /// Probe that the root accepts writes, creating it when missing
    pub async fn check_writable(&self) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::io(&self.root, e))?;
        let probe = self.root.join(HEALTH_PROBE_FILE);
        atomic::atomic_write_file(&probe, b"ok")
            .await
            .map_err(|e| StoreError::io(&probe, e))?;
        tokio::fs::remove_file(&probe)
            .await
            .map_err(|e| StoreError::io(&probe, e))
    }

    async fn read_artifact(
        &self,
        key: &ExecutionKey,
        artifact: &'static str,
    ) -> Result<Vec<u8>, StoreError> {
        let path = self.namespace_dir(key)?.join(artifact);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
                key: key.clone(),
                artifact,
            }),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }
}
