use serde_json::json;
use studyexec::{EngineError, ExecutionState};

use super::{request, studies_dir, test_config, test_engine};

#[tokio::test]
async fn test_json_output_completes() {
    let (_results, engine) = test_engine();

    let status = engine
        .submit(&request("json_study", "exec-1"))
        .await
        .expect("submit failed");

    assert_eq!(status.state, ExecutionState::Completed);
    assert!(status.results_available);
    assert!(status.completed_at.is_some());
    assert!(status.error_message.is_none());

    let result = engine.result("json_study", "exec-1").await.unwrap();
    assert_eq!(
        result.value(),
        &json!({"status": "success", "patient_count": 42, "analysis_type": "cohort_count"})
    );
}

#[tokio::test]
async fn test_text_output_falls_back() {
    let (_results, engine) = test_engine();

    let status = engine
        .submit(&request("text_study", "exec-1"))
        .await
        .unwrap();
    assert_eq!(status.state, ExecutionState::Completed);

    let result = engine.result("text_study", "exec-1").await.unwrap();
    assert!(result.is_text());
    assert_eq!(
        result.value(),
        &json!({"output": "Analysis finished\n42 patients matched\n", "type": "text"})
    );
}

#[tokio::test]
async fn test_failing_script_reports_exit_code_and_stderr() {
    let (_results, engine) = test_engine();

    let status = engine
        .submit(&request("failing_study", "exec-1"))
        .await
        .unwrap();

    assert_eq!(status.state, ExecutionState::Failed);
    assert!(!status.results_available);
    assert!(status.completed_at.is_some());
    let message = status.error_message.as_deref().unwrap();
    assert!(message.contains("exit code 1"), "{message}");
    assert!(message.contains("there is no package called 'foo'"), "{message}");

    let err = engine.result("failing_study", "exec-1").await.unwrap_err();
    assert!(err.is_not_found());

    let log = engine.log("failing_study", "exec-1").await.unwrap();
    assert!(log.contains("loading cohort"));
    assert!(log.contains("exit code 1"));
}

#[tokio::test]
async fn test_r_script_wins_over_python() {
    let (_results, engine) = test_engine();

    engine
        .submit(&request("mixed_study", "exec-1"))
        .await
        .unwrap();
    let result = engine.result("mixed_study", "exec-1").await.unwrap();
    assert_eq!(result.value(), &json!({"runtime": "R"}));

    let log = engine.log("mixed_study", "exec-1").await.unwrap();
    assert!(log.starts_with("Executing R script:"), "{log}");
    assert!(log.contains("z_last.R"));
}

#[tokio::test]
async fn test_study_without_script_runs_default_analysis() {
    let (_results, engine) = test_engine();

    let status = engine
        .submit(&request("inventory_study", "exec-1").with_parameter("cohort", "adults"))
        .await
        .unwrap();
    assert_eq!(status.state, ExecutionState::Completed);
    assert!(status.results_available);

    let result = engine.result("inventory_study", "exec-1").await.unwrap();
    assert_eq!(result.value()["analysis_type"], "study_inventory");
    assert_eq!(result.value()["study_id"], "inventory_study");
    assert_eq!(result.value()["files"][0]["name"], "README.md");
    assert_eq!(result.value()["parameters"], json!({"cohort": "adults"}));
}

#[tokio::test]
async fn test_configured_default_analysis_command() {
    let results = tempfile::tempdir().unwrap();
    let mut config = test_config(results.path());
    config.default_analysis.command = Some(vec![
        "sh".to_owned(),
        "-c".to_owned(),
        r#"printf '{"default": true, "study": "%s"}' "$STUDY_ID""#.to_owned(),
    ]);
    let engine = studyexec::Engine::new(config);

    let status = engine
        .submit(&request("inventory_study", "exec-1"))
        .await
        .unwrap();
    assert_eq!(status.state, ExecutionState::Completed);
    let result = engine.result("inventory_study", "exec-1").await.unwrap();
    assert_eq!(
        result.value(),
        &json!({"default": true, "study": "inventory_study"})
    );
}

#[tokio::test]
async fn test_runnable_environment_and_workspace() {
    let (results, engine) = test_engine();

    let request = request("env_study", "exec-env")
        .with_parameter("min_age", 18)
        .with_parameter("cohort", "adults");
    let status = engine.submit(&request).await.unwrap();
    assert_eq!(status.state, ExecutionState::Completed, "{status:?}");

    let result = engine.result("env_study", "exec-env").await.unwrap();
    let value = result.value();
    assert_eq!(value["study_id"], "env_study");
    assert_eq!(value["execution_id"], "exec-env");
    assert_eq!(value["database_host"], "omop-db");
    assert_eq!(value["database_port"], "5432");
    assert_eq!(value["parameters"], json!({"cohort": "adults", "min_age": 18}));

    let workspace = results
        .path()
        .join("env_study")
        .join("exec-env")
        .join("workspace");
    let cwd = std::fs::canonicalize(value["cwd"].as_str().unwrap()).unwrap();
    assert_eq!(cwd, std::fs::canonicalize(&workspace).unwrap());
    assert_eq!(value["results_dir"], workspace.to_string_lossy().into_owned());
    assert_eq!(
        std::fs::read_to_string(workspace.join("scratch.txt")).unwrap(),
        "scratch\n"
    );
    assert!(!studies_dir().join("env_study").join("scratch.txt").exists());
}

#[tokio::test]
async fn test_missing_interpreter_fails() {
    let results = tempfile::tempdir().unwrap();
    let mut config = test_config(results.path());
    config.runtimes.python.command = vec![
        "no-such-interpreter-xyz".to_owned(),
        "{script}".to_owned(),
    ];
    let engine = studyexec::Engine::new(config);

    let status = engine
        .submit(&request("json_study", "exec-1"))
        .await
        .unwrap();
    assert_eq!(status.state, ExecutionState::Failed);
    let message = status.error_message.unwrap();
    assert!(message.contains("failed to launch Python script"), "{message}");
}

#[tokio::test]
async fn test_missing_study_leaves_no_status() {
    let (results, engine) = test_engine();

    let err = engine
        .submit(&request("no_such_study", "exec-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StudyNotFound(ref id) if id == "no_such_study"));

    assert!(!results.path().join("no_such_study").exists());
    let err = engine.status("no_such_study", "exec-1").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(engine.list_executions("no_such_study").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_execution_id_is_rejected() {
    let (_results, engine) = test_engine();
    let request = request("json_study", "exec-1");

    let first = engine.submit(&request).await.unwrap();
    let err = engine.submit(&request).await.unwrap_err();
    assert!(matches!(err, EngineError::ExecutionExists(_)));

    // The first run's artifacts are untouched
    assert_eq!(engine.status("json_study", "exec-1").await.unwrap(), first);
}

#[tokio::test]
async fn test_retrieval_is_idempotent() {
    let (_results, engine) = test_engine();
    engine
        .submit(&request("json_study", "exec-1"))
        .await
        .unwrap();

    let status_a = engine.status("json_study", "exec-1").await.unwrap();
    let status_b = engine.status("json_study", "exec-1").await.unwrap();
    assert_eq!(status_a, status_b);

    let result_a = engine.result("json_study", "exec-1").await.unwrap();
    let result_b = engine.result("json_study", "exec-1").await.unwrap();
    assert_eq!(result_a, result_b);

    let log_a = engine.log("json_study", "exec-1").await.unwrap();
    let log_b = engine.log("json_study", "exec-1").await.unwrap();
    assert_eq!(log_a, log_b);
}

#[tokio::test]
async fn test_log_layout() {
    let (_results, engine) = test_engine();
    engine
        .submit(&request("json_study", "exec-1").with_parameter("cohort", "adults"))
        .await
        .unwrap();

    let log = engine.log("json_study", "exec-1").await.unwrap();
    let header = log.find("Executing Python script:").unwrap();
    let params = log.find(r#"Parameters: {"cohort":"adults"}"#).unwrap();
    let stdout = log.find("=== STDOUT ===").unwrap();
    let payload = log.find("patient_count").unwrap();
    let stderr = log.find("=== STDERR ===").unwrap();
    let trailer = log.find("exit code 0").unwrap();
    assert!(header < params && params < stdout && stdout < payload);
    assert!(payload < stderr && stderr < trailer);
}

#[tokio::test]
async fn test_list_executions_newest_first() {
    let (_results, engine) = test_engine();
    for id in ["exec-a", "exec-b", "exec-c"] {
        engine.submit(&request("text_study", id)).await.unwrap();
    }

    let listed = engine.list_executions("text_study").await.unwrap();
    let ids: Vec<_> = listed.iter().map(|s| s.execution_id.as_str()).collect();
    assert_eq!(ids, ["exec-c", "exec-b", "exec-a"]);
    assert!(listed.iter().all(|s| s.state == ExecutionState::Completed));
}

#[tokio::test]
async fn test_health_with_shell_runtimes() {
    let (_results, engine) = test_engine();
    let report = engine.health().await;
    assert!(report.r_available);
    assert!(report.python_available);
    assert!(report.studies_dir_present);
    assert!(report.store_writable);
    assert!(report.is_healthy());
}
