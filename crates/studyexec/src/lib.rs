//! Execution engine for study analytics scripts.
//!
//! Studyexec runs the R or Python script stored with a study as a child
//! process under a wall clock timeout, interprets its output and persists
//! status, results and log to a file-based store keyed by study and
//! execution id.
//!
//! # Features
//!
//! - **Script resolution**: the first R script wins over Python scripts, and a default analysis covers studies without one.
//! - **Bounded runs**: timeouts kill the whole process group, and captured output is capped per stream.
//! - **Structured results**: JSON stdout is kept verbatim, and anything else is wrapped as text.
//! - **Durable artifacts**: status and results are replaced atomically, so readers never see partial records.
//! - **TOML configuration**: runtimes, dataset connection and store retry settings, overridable from the environment.

pub use config::{Config, ConfigError, EXAMPLE_CONFIG, RuntimeConfig, Runtimes};
pub use dataset::DatasetConfig;
pub use engine::{Engine, EngineError, HealthReport};
pub use interpret::interpret;
pub use process::{ProcessCommand, ProcessError};
pub use resolver::{ResolveError, Runnable, ScriptKind};
pub use store::{ExecutionStore, StoreError};
pub use types::{
    ExecutionKey, ExecutionRequest, ExecutionResult, ExecutionState, ExecutionStatus,
    RequestError, RunOutcome,
};

pub mod config;
pub mod dataset;
pub mod engine;
pub mod interpret;
pub mod process;
pub mod resolver;
pub mod store;
pub mod types;
