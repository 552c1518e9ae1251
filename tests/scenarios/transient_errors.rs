//! Test: throttled status polls are retried until the execution finishes

use crate::helpers::*;
use mlpipe::core::ExecutionStatus;
use mlpipe::execution::PipelineDriver;
use mlpipe::pipelines::showcase::{showcase_pipeline, ShowcaseOptions};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn test_wait_survives_throttling() {
    let (service, _) = local_driver(Arc::new(ScriptedRunner::new(3.0)));
    let flaky = Arc::new(FlakyService::new(service, 3));
    let driver = PipelineDriver::new(flaky.clone());
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();

    assert_status(&report, ExecutionStatus::Succeeded);
    assert!(flaky.polls() > 3);
}

#[tokio::test]
async fn test_progress_ends_with_terminal_status() {
    let (service, _) = local_driver(Arc::new(ScriptedRunner::new(8.0)));
    let flaky = Arc::new(FlakyService::new(service, 1));
    let driver = PipelineDriver::new(flaky);
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();

    let mut seen = Vec::new();
    let report = driver
        .wait_with_progress(&execution, POLL, TIMEOUT, |d| seen.push(d.status))
        .await
        .unwrap();

    assert_status(&report, ExecutionStatus::Failed);
    assert_eq!(seen.last(), Some(&ExecutionStatus::Failed));
    assert!(seen[..seen.len() - 1].iter().all(|s| !s.is_terminal()));
}
