//! Running step of an execution
//!
//! Turns a resolved runnable into a [`Terminal`] outcome and writes the run
//! log along the way.

use std::path::Path;

use tracing::{debug, instrument, warn};

use crate::engine::default_analysis;
use crate::engine::{
    ENV_EXECUTION_ID, ENV_RESULTS_DIR, ENV_STUDY_ID, ENV_STUDY_PARAMETERS, Engine, EngineError,
};
use crate::interpret::interpret;
use crate::process::{self, ProcessCommand, ProcessError};
use crate::resolver::{self, ResolveError, Runnable, ScriptKind};
use crate::types::{ExecutionRequest, ExecutionResult, RunOutcome};

const STDOUT_MARKER: &str = "=== STDOUT ===";
const STDERR_MARKER: &str = "=== STDERR ===";
const TRUNCATED_NOTICE: &str = "[output truncated]";

/// How a run ended, before it is persisted
#[derive(Debug)]
pub(crate) enum Terminal {
    Completed(ExecutionResult),
    Failed(String),
}

impl Engine {
    /// Resolve and run the study's runnable
    ///
    /// Runnable failures become [`Terminal::Failed`]; only store errors are
    /// returned as `Err`.
    #[instrument(skip(self, request, study_dir))]
    pub(super) async fn execute(
        &self,
        request: &ExecutionRequest,
        study_dir: &Path,
    ) -> Result<Terminal, EngineError> {
        let runnable = match resolver::resolve(study_dir, &self.config.runtimes).await {
            Ok(runnable) => runnable,
            Err(ResolveError::StudyNotFound(id)) => {
                // Removed between acceptance and resolution
                self.append_log(request, &format!("Study {id} is no longer available\n"))
                    .await?;
                return Ok(Terminal::Failed(format!("Study not found: {id}")));
            }
            Err(err) => {
                self.append_log(request, &format!("{err}\n")).await?;
                return Ok(Terminal::Failed(err.to_string()));
            }
        };

        let workspace = self.store.workspace_dir(request.key())?;
        match runnable {
            Runnable::Script { kind, path } => {
                let runtime = match kind {
                    ScriptKind::R => &self.config.runtimes.r,
                    ScriptKind::Python => &self.config.runtimes.python,
                };
                let title = format!("Executing {} script: {}", runtime.name, path.display());
                self.append_log(request, &log_header(&title, request))
                    .await?;

                let command = ProcessCommand::new(runtime.expand_command(&path)).envs(&runtime.env);
                let command = self.prepare(command, request, &workspace);
                self.run_runnable(&format!("{} script", runtime.name), command, request)
                    .await
            }
            Runnable::DefaultAnalysis => {
                self.run_default_analysis(request, study_dir, &workspace)
                    .await
            }
        }
    }

    async fn run_default_analysis(
        &self,
        request: &ExecutionRequest,
        study_dir: &Path,
        workspace: &Path,
    ) -> Result<Terminal, EngineError> {
        if let Some(argv) = &self.config.default_analysis.command {
            let title = format!("Running default analysis: {}", argv.join(" "));
            self.append_log(request, &log_header(&title, request))
                .await?;
            let command = self.prepare(ProcessCommand::new(argv.iter()), request, workspace);
            return self.run_runnable("default analysis", command, request).await;
        }

        self.append_log(
            request,
            &log_header("Running built-in study inventory analysis", request),
        )
        .await?;
        match default_analysis::study_inventory(study_dir, request).await {
            Ok(inventory) => {
                self.append_log(
                    request,
                    &format!("Inventoried {} file(s)\n", inventory.file_count()),
                )
                .await?;
                Ok(Terminal::Completed(inventory.into_result()))
            }
            Err(err) => {
                self.append_log(request, &format!("Inventory failed: {err}\n"))
                    .await?;
                Ok(Terminal::Failed(format!("default analysis failed: {err}")))
            }
        }
    }

    /// Environment, working directory and limits shared by all runnables
    fn prepare(
        &self,
        command: ProcessCommand,
        request: &ExecutionRequest,
        workspace: &Path,
    ) -> ProcessCommand {
        command
            .envs(self.config.dataset.env_vars())
            .env(ENV_STUDY_ID, request.study_id())
            .env(ENV_EXECUTION_ID, request.execution_id())
            .env(ENV_STUDY_PARAMETERS, request.parameters_json())
            .env(ENV_RESULTS_DIR, workspace.to_string_lossy())
            .working_dir(workspace)
            .timeout(request.timeout())
            .max_output_bytes(self.config.max_output_bytes)
    }

    async fn run_runnable(
        &self,
        label: &str,
        command: ProcessCommand,
        request: &ExecutionRequest,
    ) -> Result<Terminal, EngineError> {
        debug!(command = %command.display(), dataset = %self.config.dataset.target(), "launching runnable");
        match process::run(command).await {
            Ok(outcome) => {
                let mut log = format_streams(
                    &outcome.stdout,
                    outcome.stdout_truncated,
                    &outcome.stderr,
                    outcome.stderr_truncated,
                );
                log.push_str(&outcome_trailer(&outcome));
                self.append_log(request, &log).await?;

                if outcome.is_success() {
                    Ok(Terminal::Completed(interpret(&outcome.stdout)))
                } else {
                    Ok(Terminal::Failed(failure_message(
                        label,
                        &outcome,
                        self.config.stderr_excerpt_chars,
                    )))
                }
            }
            Err(ProcessError::Timeout {
                timeout,
                elapsed,
                stdout,
                stderr,
                stdout_truncated,
                stderr_truncated,
            }) => {
                let mut log =
                    format_streams(&stdout, stdout_truncated, &stderr, stderr_truncated);
                log.push_str(&format!(
                    "Timed out after {} seconds; process killed\n",
                    timeout.as_secs()
                ));
                self.append_log(request, &log).await?;
                Ok(Terminal::Failed(format!(
                    "{label} execution timed out after {} seconds (elapsed {:.1}s)",
                    timeout.as_secs(),
                    elapsed.as_secs_f64()
                )))
            }
            Err(err) => {
                warn!(error = %err, "runnable could not be launched");
                self.append_log(request, &format!("Failed to launch {label}: {err}\n"))
                    .await?;
                Ok(Terminal::Failed(format!("failed to launch {label}: {err}")))
            }
        }
    }

    async fn append_log(&self, request: &ExecutionRequest, text: &str) -> Result<(), EngineError> {
        self.with_retry("append log", || self.store.append_log(request.key(), text))
            .await
    }
}

fn log_header(title: &str, request: &ExecutionRequest) -> String {
    format!(
        "{title}\nParameters: {}\nTimeout: {}s\n\n",
        request.parameters_json(),
        request.timeout_seconds()
    )
}

fn format_streams(stdout: &[u8], stdout_cut: bool, stderr: &[u8], stderr_cut: bool) -> String {
    let mut log = String::new();
    for (marker, data, cut) in [
        (STDOUT_MARKER, stdout, stdout_cut),
        (STDERR_MARKER, stderr, stderr_cut),
    ] {
        log.push_str(marker);
        log.push('\n');
        let text = String::from_utf8_lossy(data);
        log.push_str(&text);
        if !text.is_empty() && !text.ends_with('\n') {
            log.push('\n');
        }
        if cut {
            log.push_str(TRUNCATED_NOTICE);
            log.push('\n');
        }
    }
    log
}

fn outcome_trailer(outcome: &RunOutcome) -> String {
    format!(
        "\n{}, duration {:.2}s\n",
        describe_exit(outcome),
        outcome.duration.as_secs_f64()
    )
}

fn describe_exit(outcome: &RunOutcome) -> String {
    match (outcome.exit_code, outcome.signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("signal {signal}"),
        (None, None) => "unknown exit status".to_owned(),
    }
}

/// Error message of a runnable that exited unsuccessfully
fn failure_message(label: &str, outcome: &RunOutcome, excerpt_chars: usize) -> String {
    let stderr = outcome.stderr_lossy();
    let excerpt = tail_excerpt(stderr.trim(), excerpt_chars);
    let cause = describe_exit(outcome);
    if excerpt.is_empty() {
        format!("{label} failed with {cause}")
    } else {
        format!("{label} failed with {cause}: {excerpt}")
    }
}

/// Last `max_chars` characters of `text`, marked when cut
fn tail_excerpt(text: &str, max_chars: usize) -> String {
    if max_chars == 0 {
        return String::new();
    }
    match text.char_indices().rev().nth(max_chars - 1) {
        Some((0, _)) | None => text.to_owned(),
        Some((start, _)) => format!("...{}", &text[start..]),
    }
}
