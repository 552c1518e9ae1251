//! Test: the showcase pipeline registers a model only when its mse is low enough

use crate::helpers::*;
use mlpipe::core::{ExecutionStatus, ParameterValue, StepStatus};
use mlpipe::execution::JobSpec;
use mlpipe::pipelines::showcase::{showcase_pipeline, ShowcaseOptions};
use mlpipe::registry::{ApprovalStatus, ModelRegistry};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn test_good_model_is_registered() {
    let runner = Arc::new(ScriptedRunner::new(5.0));
    let (service, driver) = local_driver(runner.clone());
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();

    assert_status(&report, ExecutionStatus::Succeeded);
    assert_eq!(report.failure_reason, None);
    assert_step(&report, "dataPreparation", StepStatus::Succeeded);
    assert_step(&report, "trainModel", StepStatus::Succeeded);
    assert_step(&report, "evaluateModel", StepStatus::Succeeded);
    assert_step(&report, "reviewModelMetrics", StepStatus::Succeeded);
    assert_step(&report, "registerModel", StepStatus::Succeeded);
    assert_step(&report, "failModelBadMetric", StepStatus::NotExecuted);

    // Only compute steps reach the runner
    assert_eq!(
        runner.step_names(),
        vec!["dataPreparation", "trainModel", "evaluateModel"]
    );

    let packages = service
        .model_registry()
        .list_model_packages(GROUP, Some(ApprovalStatus::Approved))
        .await
        .unwrap();
    assert_eq!(packages.len(), 1);
    assert_eq!(packages[0].model_name.as_deref(), Some("showcaseModel"));
    assert!(packages[0]
        .model_data
        .starts_with("local://artifacts/showcase/Model/trainModel-"));
    assert!(packages[0]
        .metrics_uri
        .as_deref()
        .unwrap()
        .ends_with("/evaluateModel/eval_report/evaluation.json"));

    let register = report.step("registerModel").unwrap();
    assert_eq!(register.outputs["model_package_arn"], packages[0].arn);
}

#[tokio::test]
async fn test_bad_model_fails_the_execution() {
    let runner = Arc::new(ScriptedRunner::new(9.0));
    let (service, driver) = local_driver(runner);
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();

    assert_status(&report, ExecutionStatus::Failed);
    assert_eq!(
        report.failure_reason.as_deref(),
        Some("Fail pipeline due to model metrics below requirements.")
    );
    assert_step(&report, "failModelBadMetric", StepStatus::Failed);
    assert_step(&report, "registerModel", StepStatus::NotExecuted);
    assert_eq!(report.failed_step().unwrap().step_name, "failModelBadMetric");

    let packages = service
        .model_registry()
        .list_model_packages(GROUP, None)
        .await
        .unwrap();
    assert!(packages.is_empty());
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    let runner = Arc::new(ScriptedRunner::new(7.0));
    let (_service, driver) = local_driver(runner);
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();

    assert_status(&report, ExecutionStatus::Succeeded);
    assert_step(&report, "registerModel", StepStatus::Succeeded);
}

#[tokio::test]
async fn test_parameter_overrides_reach_jobs() {
    let runner = Arc::new(ScriptedRunner::new(1.0));
    let (_service, driver) = local_driver(runner.clone());
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let overrides = pipeline
        .parse_overrides(&[
            ("trainInstanceCount".to_string(), "2".to_string()),
            ("trainInstanceType".to_string(), "ml.c5.2xlarge".to_string()),
        ])
        .unwrap();
    assert_eq!(overrides["trainInstanceCount"], ParameterValue::Integer(2));

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, overrides).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();
    assert_status(&report, ExecutionStatus::Succeeded);

    let training = runner
        .calls()
        .into_iter()
        .find_map(|call| match call.job {
            JobSpec::Training(job) => Some(job),
            JobSpec::Processing(_) => None,
        })
        .unwrap();
    assert_eq!(training.instance_count, 2);
    assert_eq!(training.instance_type, "ml.c5.2xlarge");
    assert_eq!(training.inputs["train"].content_type.as_deref(), Some("text/csv"));
}

#[tokio::test]
async fn test_unknown_override_is_rejected_at_start() {
    let runner = Arc::new(ScriptedRunner::new(1.0));
    let (_service, driver) = local_driver(runner.clone());
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();
    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();

    let mut overrides = HashMap::new();
    overrides.insert("noSuchParameter".to_string(), ParameterValue::from("x"));
    let err = driver.start(&handle, overrides).await.unwrap_err();

    assert!(matches!(
        err,
        mlpipe::execution::DriverError::Service(mlpipe::execution::ServiceError::Validation(_))
    ));
    assert!(runner.calls().is_empty());
}
