use std::time::{Duration, Instant};

use studyexec::ExecutionState;

use super::{request, test_config, test_engine};

#[tokio::test]
async fn test_runnable_past_timeout_is_killed() {
    let (_results, engine) = test_engine();
    let request = request("slow_study", "exec-1")
        .with_timeout_seconds(10)
        .unwrap();

    let started = Instant::now();
    let status = engine.submit(&request).await.unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_secs(10), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(20), "{elapsed:?}");

    assert_eq!(status.state, ExecutionState::Failed);
    assert!(!status.results_available);
    let message = status.error_message.as_deref().unwrap();
    assert!(message.contains("timed out after 10 seconds"), "{message}");

    let log = engine.log("slow_study", "exec-1").await.unwrap();
    assert!(log.contains("started"));
    assert!(!log.contains("finished"));
    assert!(log.contains("Timed out after 10 seconds"));
    assert!(engine.result("slow_study", "exec-1").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_capped_output_is_marked_after_timeout() {
    let results = tempfile::tempdir().unwrap();
    let mut config = test_config(results.path());
    config.max_output_bytes = 4;
    let engine = studyexec::Engine::new(config);
    let request = request("slow_study", "exec-capped")
        .with_timeout_seconds(10)
        .unwrap();

    let status = engine.submit(&request).await.unwrap();
    assert_eq!(status.state, ExecutionState::Failed);

    let log = engine.log("slow_study", "exec-capped").await.unwrap();
    assert!(
        log.contains("=== STDOUT ===\nstar\n[output truncated]\n=== STDERR ===\n"),
        "{log}"
    );
    assert!(log.contains("Timed out after 10 seconds"), "{log}");
}

#[tokio::test]
async fn test_timeout_out_of_range_is_rejected() {
    let err = request("slow_study", "exec-1")
        .with_timeout_seconds(5)
        .unwrap_err();
    assert_eq!(err, studyexec::RequestError::TimeoutOutOfRange(5));
    assert!(request("slow_study", "exec-1").with_timeout_seconds(3601).is_err());
    assert!(request("slow_study", "exec-1").with_timeout_seconds(3600).is_ok());
}
