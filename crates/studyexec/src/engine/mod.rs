//! Execution lifecycle for study runnables
//!
//! The [`Engine`] accepts an [`ExecutionRequest`], resolves the study's
//! runnable, runs it under a timeout, interprets its output and persists
//! status, result and log through the [`ExecutionStore`].
//!
//! Status goes through `pending → running → completed | failed`. Only two
//! writes are persisted per execution: `running` once the namespace exists,
//! and the terminal state once everything else is on disk. A reader that
//! sees `completed` can therefore always read the result.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::dataset::DatasetConfig;
use crate::engine::execute::Terminal;
use crate::process;
use crate::resolver;
use crate::store::{ExecutionStore, StoreError};
use crate::types::{
    ExecutionKey, ExecutionRequest, ExecutionResult, ExecutionStatus, InvalidTransition,
    RequestError,
};

mod default_analysis;
mod execute;

/// Environment variables set for every runnable, next to the dataset ones
pub const ENV_STUDY_ID: &str = "STUDY_ID";
pub const ENV_EXECUTION_ID: &str = "EXECUTION_ID";
pub const ENV_STUDY_PARAMETERS: &str = "STUDY_PARAMETERS";
pub const ENV_RESULTS_DIR: &str = "RESULTS_DIR";

/// Timeout applied to each interpreter probe of [`Engine::health`]
pub const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors that prevent an execution from reaching a persisted terminal state
///
/// A runnable that fails, times out or cannot be launched is not an error
/// here; it yields a `failed` status instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("study not found: {0}")]
    StudyNotFound(String),

    #[error("execution {0} already exists")]
    ExecutionExists(ExecutionKey),

    #[error("result store unavailable after {attempts} attempts: {source}")]
    StoreUnavailable {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Readiness of the engine's collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub r_available: bool,
    pub python_available: bool,
    pub studies_dir_present: bool,
    pub store_writable: bool,
}

impl HealthReport {
    /// Executions can be accepted and persisted
    ///
    /// Missing interpreters only fail the executions that need them.
    pub fn is_healthy(&self) -> bool {
        self.studies_dir_present && self.store_writable
    }
}

/// Runs study executions and serves their artifacts
#[derive(Debug, Clone)]
pub struct Engine {
    config: Config,
    store: ExecutionStore,
}

impl Engine {
    /// Create an engine with the given configuration
    pub fn new(config: Config) -> Self {
        let store = ExecutionStore::new(&config.results_dir);
        Self { config, store }
    }

    /// Create an engine with the embedded default configuration
    pub fn with_defaults() -> Self {
        Self::new(Config::default())
    }

    /// Replace the dataset connection handed to runnables
    pub fn with_dataset(mut self, dataset: DatasetConfig) -> Self {
        self.config.dataset = dataset;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one execution to a terminal state
    ///
    /// Blocks until the runnable exits or its timeout fires. Returns the
    /// persisted terminal status; a `failed` status is a successful return.
    /// Nothing is written for a study that does not exist.
    #[instrument(skip(self, request), fields(key = %request.key()))]
    pub async fn submit(&self, request: &ExecutionRequest) -> Result<ExecutionStatus, EngineError> {
        let key = request.key();
        let study_dir = self.config.study_dir(request.study_id());
        if !resolver::study_exists(&study_dir).await {
            return Err(EngineError::StudyNotFound(request.study_id().to_owned()));
        }

        match self
            .with_retry("allocate namespace", || self.store.create_namespace(key))
            .await
        {
            Ok(_) => {}
            Err(EngineError::Store(StoreError::AlreadyExists(key))) => {
                return Err(EngineError::ExecutionExists(key));
            }
            Err(e) => return Err(e),
        }
        if let Err(err) = self
            .with_retry("create workspace", || self.store.ensure_workspace(key))
            .await
        {
            if let Err(remove_err) = self.store.remove_namespace(key).await {
                warn!(error = %remove_err, "could not release execution namespace");
            }
            return Err(err);
        }

        let running = ExecutionStatus::pending(key, Utc::now()).start()?;
        self.with_retry("write running status", || self.store.put_status(&running))
            .await?;
        info!(timeout_secs = request.timeout_seconds(), "execution started");

        let terminal = match self.execute(request, &study_dir).await {
            Ok(terminal) => terminal,
            Err(err) => {
                self.abandon(running, &err).await;
                return Err(err);
            }
        };

        let finished = match terminal {
            Terminal::Completed(result) => {
                if let Err(err) = self
                    .with_retry("write result", || self.store.put_result(key, &result))
                    .await
                {
                    self.abandon(running, &err).await;
                    return Err(err);
                }
                running.complete(Utc::now())?
            }
            Terminal::Failed(message) => {
                warn!(error = %message, "execution failed");
                running.fail(Utc::now(), message)?
            }
        };

        self.with_retry("write terminal status", || self.store.put_status(&finished))
            .await?;
        info!(state = %finished.state, "execution finished");
        Ok(finished)
    }

    /// Current status of an execution
    pub async fn status(
        &self,
        study_id: &str,
        execution_id: &str,
    ) -> Result<ExecutionStatus, StoreError> {
        self.store
            .get_status(&ExecutionKey::new(study_id, execution_id))
            .await
    }

    /// Result of a completed execution
    pub async fn result(
        &self,
        study_id: &str,
        execution_id: &str,
    ) -> Result<ExecutionResult, StoreError> {
        self.store
            .get_result(&ExecutionKey::new(study_id, execution_id))
            .await
    }

    /// Full execution log
    pub async fn log(&self, study_id: &str, execution_id: &str) -> Result<String, StoreError> {
        self.store
            .get_log(&ExecutionKey::new(study_id, execution_id))
            .await
    }

    /// Status of every execution of a study, newest first
    pub async fn list_executions(&self, study_id: &str) -> Result<Vec<ExecutionStatus>, StoreError> {
        let mut statuses = self.store.list_executions(study_id).await?;
        statuses.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.execution_id.cmp(&a.execution_id))
        });
        Ok(statuses)
    }

    /// Probe interpreters, the studies directory and the store
    #[instrument(skip(self))]
    pub async fn health(&self) -> HealthReport {
        let runtimes = &self.config.runtimes;
        let (r_available, python_available, store) = tokio::join!(
            process::probe(&runtimes.r.version_command, HEALTH_PROBE_TIMEOUT),
            process::probe(&runtimes.python.version_command, HEALTH_PROBE_TIMEOUT),
            self.store.check_writable(),
        );
        if let Err(err) = &store {
            warn!(error = %err, "result store is not writable");
        }
        let studies_dir_present = tokio::fs::metadata(&self.config.studies_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);

        HealthReport {
            r_available,
            python_available,
            studies_dir_present,
            store_writable: store.is_ok(),
        }
    }

    /// Run a store operation, retrying while the store is unavailable
    ///
    /// Backoff grows linearly with the attempt number. Errors other than
    /// unavailability are returned immediately.
    async fn with_retry<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let attempts = self.config.store.retry_attempts.max(1);
        let backoff = Duration::from_millis(self.config.store.retry_backoff_ms);
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_unavailable() => return Err(EngineError::Store(err)),
                Err(err) if attempt >= attempts => {
                    warn!(op, attempts, error = %err, "giving up on result store");
                    return Err(EngineError::StoreUnavailable {
                        attempts,
                        source: err,
                    });
                }
                Err(err) => {
                    warn!(op, attempt, error = %err, "result store unavailable, retrying");
                    tokio::time::sleep(backoff * attempt).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Best-effort terminal write after a fatal store error mid-run
    async fn abandon(&self, running: ExecutionStatus, err: &EngineError) {
        let message = format!("execution aborted: {err}");
        let Ok(failed) = running.fail(Utc::now(), message) else {
            return;
        };
        if let Err(write_err) = self.store.put_status(&failed).await {
            warn!(error = %write_err, "could not record aborted execution");
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::with_defaults()
    }
}
