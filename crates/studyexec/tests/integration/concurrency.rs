use std::collections::HashSet;

use studyexec::{EngineError, ExecutionState};

use super::{request, test_engine};

#[tokio::test]
async fn test_concurrent_executions_do_not_interfere() {
    let (_results, engine) = test_engine();
    let (a, b, c) = (
        request("concurrent_study", "exec-a"),
        request("concurrent_study", "exec-b"),
        request("concurrent_study", "exec-c"),
    );

    let (ra, rb, rc) = tokio::join!(engine.submit(&a), engine.submit(&b), engine.submit(&c));
    for status in [ra.unwrap(), rb.unwrap(), rc.unwrap()] {
        assert_eq!(status.state, ExecutionState::Completed);
        let result = engine
            .result("concurrent_study", &status.execution_id)
            .await
            .unwrap();
        assert_eq!(result.value()["execution_id"], status.execution_id.as_str());
    }

    let listed: HashSet<_> = engine
        .list_executions("concurrent_study")
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.execution_id)
        .collect();
    assert_eq!(
        listed,
        HashSet::from(["exec-a".to_owned(), "exec-b".to_owned(), "exec-c".to_owned()])
    );
}

#[tokio::test]
async fn test_concurrent_duplicate_id_runs_once() {
    let (_results, engine) = test_engine();
    let request = request("concurrent_study", "exec-dup");

    let (first, second) = tokio::join!(engine.submit(&request), engine.submit(&request));
    let outcomes = [first, second];
    let completed = outcomes
        .iter()
        .filter(|r| matches!(r, Ok(s) if s.state == ExecutionState::Completed))
        .count();
    let rejected = outcomes
        .iter()
        .filter(|r| matches!(r, Err(EngineError::ExecutionExists(_))))
        .count();
    assert_eq!((completed, rejected), (1, 1));
}
