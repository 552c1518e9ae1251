//! Test: stopping an execution and giving up on a slow one

use crate::helpers::*;
use mlpipe::core::{ExecutionStatus, StepStatus};
use mlpipe::execution::DriverError;
use mlpipe::pipelines::showcase::{showcase_pipeline, ShowcaseOptions};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_stop_interrupts_the_running_job() {
    let runner = Arc::new(ScriptedRunner::new(1.0).with_delay(Duration::from_secs(5)));
    let (_service, driver) = local_driver(runner.clone());
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    driver.stop(&execution).await.unwrap();

    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();
    assert_status(&report, ExecutionStatus::Stopped);
    assert_step(&report, "dataPreparation", StepStatus::Stopped);
    assert_step(&report, "trainModel", StepStatus::NotExecuted);
    assert_eq!(runner.step_names(), vec!["dataPreparation"]);

    // Stopping a terminal execution changes nothing
    driver.stop(&execution).await.unwrap();
    assert_eq!(driver.status(&execution).await.unwrap(), ExecutionStatus::Stopped);
}

#[tokio::test]
async fn test_timeout_leaves_execution_running() {
    let runner = Arc::new(ScriptedRunner::new(1.0).with_delay(Duration::from_millis(100)));
    let (_service, driver) = local_driver(runner);
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();

    let err = driver
        .wait(&execution, POLL, Duration::from_millis(30))
        .await
        .unwrap_err();
    match err {
        DriverError::ExecutionTimeout { execution_arn, .. } => {
            assert_eq!(execution_arn, execution.execution_arn)
        }
        other => panic!("expected timeout, got {:?}", other),
    }
    assert!(!driver.status(&execution).await.unwrap().is_terminal());

    // A later wait observes the outcome
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();
    assert_status(&report, ExecutionStatus::Succeeded);
}
