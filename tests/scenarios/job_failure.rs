//! Test: a failing job stops the execution and keeps its message

use crate::helpers::*;
use mlpipe::core::{ExecutionStatus, StepStatus};
use mlpipe::pipelines::showcase::{showcase_pipeline, ShowcaseOptions};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn test_training_failure_is_reported_verbatim() {
    let message = "ClientError: No capacity for ml.m5.xlarge in the requested zone";
    let runner = Arc::new(ScriptedRunner::new(1.0).failing("trainModel", message));
    let (_service, driver) = local_driver(runner.clone());
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();

    assert_status(&report, ExecutionStatus::Failed);
    assert_step(&report, "dataPreparation", StepStatus::Succeeded);
    assert_step(&report, "trainModel", StepStatus::Failed);
    assert_step(&report, "evaluateModel", StepStatus::NotExecuted);
    assert_step(&report, "reviewModelMetrics", StepStatus::NotExecuted);
    assert_step(&report, "registerModel", StepStatus::NotExecuted);
    assert_step(&report, "failModelBadMetric", StepStatus::NotExecuted);

    let failed = report.failed_step().unwrap();
    assert_eq!(failed.step_name, "trainModel");
    assert_eq!(failed.failure_reason.as_deref(), Some(message));
    assert!(report.failure_reason.as_deref().unwrap().contains(message));

    assert_eq!(runner.step_names(), vec!["dataPreparation", "trainModel"]);
}

#[tokio::test]
async fn test_every_step_is_listed_in_order() {
    let runner = Arc::new(ScriptedRunner::new(1.0).failing("dataPreparation", "bad input"));
    let (_service, driver) = local_driver(runner);
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();

    let names: Vec<&str> = report.steps.iter().map(|s| s.step_name.as_str()).collect();
    let order = pipeline.topological_order().unwrap();
    assert_eq!(names, order.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(
        report
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::NotExecuted)
            .count(),
        5
    );
}
