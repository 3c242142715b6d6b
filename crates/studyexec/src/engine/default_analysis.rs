//! Built-in analysis for studies without a script
//!
//! Reports the study's file set together with the request parameters. Used
//! only when no external default analysis command is configured.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::{Value, json};

use crate::resolver::{self, ResolveError};
use crate::types::{ExecutionRequest, ExecutionResult};

pub(crate) const ANALYSIS_TYPE: &str = "study_inventory";

#[derive(Debug, Serialize)]
struct StudyFile {
    name: String,
    size_bytes: u64,
}

#[derive(Debug)]
pub(crate) struct StudyInventory {
    study_id: String,
    files: Vec<StudyFile>,
    parameters: BTreeMap<String, Value>,
}

impl StudyInventory {
    pub(crate) fn file_count(&self) -> usize {
        self.files.len()
    }

    pub(crate) fn into_result(self) -> ExecutionResult {
        ExecutionResult::new(json!({
            "analysis_type": ANALYSIS_TYPE,
            "study_id": self.study_id,
            "files": self.files,
            "parameters": self.parameters,
        }))
    }
}

/// Inventory the regular files of a study, in name order
pub(crate) async fn study_inventory(
    study_dir: &Path,
    request: &ExecutionRequest,
) -> Result<StudyInventory, ResolveError> {
    let names = resolver::list_study_files(study_dir).await?;
    let mut files = Vec::with_capacity(names.len());
    for name in names {
        let path = study_dir.join(&name);
        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map_err(|source| ResolveError::Io { path, source })?
            .len();
        files.push(StudyFile { name, size_bytes });
    }
    Ok(StudyInventory {
        study_id: request.study_id().to_owned(),
        files,
        parameters: request.parameters().clone(),
    })
}
