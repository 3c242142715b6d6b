use studyexec::{Engine, EngineError, ExecutionState};

use super::{request, test_config};

#[tokio::test]
async fn test_unwritable_store_surfaces_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("results");
    std::fs::write(&results, b"not a directory").unwrap();

    let mut config = test_config(&results);
    config.store.retry_attempts = 3;
    let engine = Engine::new(config);

    let err = engine
        .submit(&request("json_study", "exec-1"))
        .await
        .unwrap_err();
    match err {
        EngineError::StoreUnavailable { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(source.is_unavailable());
        }
        other => panic!("expected StoreUnavailable, got {other:?}"),
    }

    let report = engine.health().await;
    assert!(!report.store_writable);
    assert!(!report.is_healthy());
}

#[tokio::test]
async fn test_result_write_failure_records_aborted_execution() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.store.retry_attempts = 3;
    let engine = Engine::new(config);

    // The script occupies the result path with a directory
    let err = engine
        .submit(&request("blocked_result_study", "exec-1"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, EngineError::StoreUnavailable { attempts: 3, .. }),
        "{err:?}"
    );

    let status = engine.status("blocked_result_study", "exec-1").await.unwrap();
    assert_eq!(status.state, ExecutionState::Failed);
    assert!(!status.results_available);
    assert!(status.completed_at.is_some());
    let message = status.error_message.as_deref().unwrap();
    assert!(message.starts_with("execution aborted: "), "{message}");

    let log = engine.log("blocked_result_study", "exec-1").await.unwrap();
    assert!(log.contains("patient_count"));

    let listed = engine.list_executions("blocked_result_study").await.unwrap();
    assert_eq!(listed, vec![status]);
}

#[tokio::test]
async fn test_missing_results_dir_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let results = dir.path().join("nested").join("results");
    let engine = Engine::new(test_config(&results));

    engine
        .submit(&request("json_study", "exec-1"))
        .await
        .unwrap();
    assert!(results.join("json_study").join("exec-1").join("status.json").is_file());
}

#[tokio::test]
async fn test_corrupt_status_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(test_config(dir.path()));
    engine
        .submit(&request("json_study", "exec-1"))
        .await
        .unwrap();

    let status_path = dir.path().join("json_study").join("exec-1").join("status.json");
    std::fs::write(&status_path, b"{ not json").unwrap();

    let err = engine.status("json_study", "exec-1").await.unwrap_err();
    assert!(matches!(err, studyexec::StoreError::Corrupt { .. }));
    // Unreadable executions are skipped when listing
    assert!(engine.list_executions("json_study").await.unwrap().is_empty());
}
