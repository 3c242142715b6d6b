//! Integration tests for studyexec
//!
//! Runnables are real child processes. Both runtimes are pointed at `sh`,
//! so the fixture scripts under `tests/fixtures/studies` are shell scripts
//! whatever their extension.

#![cfg(unix)]

use std::path::{Path, PathBuf};

use studyexec::{Config, Engine, ExecutionRequest};
use tempfile::TempDir;

mod concurrency;
mod config_loading;
mod lifecycle;
mod store_failures;
mod timeouts;

const FIXTURES_PATH: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

pub(crate) fn studies_dir() -> PathBuf {
    Path::new(FIXTURES_PATH).join("studies")
}

pub(crate) fn config_fixture(name: &str) -> PathBuf {
    Path::new(FIXTURES_PATH).join("configs").join(name)
}

/// Config reading fixture studies, writing results under `results_dir`
pub(crate) fn test_config(results_dir: &Path) -> Config {
    let mut config = Config::with_dirs(studies_dir(), results_dir);
    for runtime in [&mut config.runtimes.r, &mut config.runtimes.python] {
        runtime.command = vec!["sh".to_owned(), "{script}".to_owned()];
        runtime.version_command = vec!["sh".to_owned(), "-c".to_owned(), "exit 0".to_owned()];
    }
    config.store.retry_backoff_ms = 1;
    config
}

/// Engine over the fixture studies with a fresh result store
pub(crate) fn test_engine() -> (TempDir, Engine) {
    let results = tempfile::tempdir().expect("failed to create results dir");
    let engine = Engine::new(test_config(results.path()));
    (results, engine)
}

pub(crate) fn request(study_id: &str, execution_id: &str) -> ExecutionRequest {
    ExecutionRequest::new(study_id, execution_id).expect("valid request")
}
