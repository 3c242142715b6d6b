//! Classification of runnable output

use serde_json::Value;
use tracing::debug;

use crate::types::ExecutionResult;

/// Interpret a runnable's standard output
///
/// Output that parses as JSON is returned verbatim. Anything else is
/// wrapped as `{"output": <text>, "type": "text"}`; this branch is expected
/// and never an error.
pub fn interpret(stdout: &[u8]) -> ExecutionResult {
    let text = String::from_utf8_lossy(stdout);
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => ExecutionResult::new(value),
        Err(err) => {
            debug!(error = %err, len = stdout.len(), "stdout is not JSON, keeping as text");
            ExecutionResult::text(text.into_owned())
        }
    }
}
