//! Test: a metric that cannot be evaluated fails the execution without taking a branch

use crate::helpers::*;
use mlpipe::core::{ExecutionStatus, StepStatus, TerminalReport};
use mlpipe::pipelines::showcase::{showcase_pipeline, ShowcaseOptions};
use mlpipe::registry::ModelRegistry;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

const MISSING_METRIC: &str =
    "Metric extraction failed: 'regression_metrics.mse.value' not found in report of step 'evaluateModel'";

async fn run_with_report(report: Option<Value>) -> TerminalReport {
    let runner = Arc::new(ScriptedRunner::new(1.0).with_report(report));
    let (service, driver) = local_driver(runner);
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let handle = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let execution = driver.start(&handle, HashMap::new()).await.unwrap();
    let report = driver.wait(&execution, POLL, TIMEOUT).await.unwrap();

    let packages = service
        .model_registry()
        .list_model_packages(GROUP, None)
        .await
        .unwrap();
    assert!(packages.is_empty());
    report
}

fn assert_no_branch_taken(report: &TerminalReport, reason: &str) {
    assert_status(report, ExecutionStatus::Failed);
    assert_step(report, "evaluateModel", StepStatus::Succeeded);
    assert_step(report, "reviewModelMetrics", StepStatus::Failed);
    assert_step(report, "registerModel", StepStatus::NotExecuted);
    assert_step(report, "failModelBadMetric", StepStatus::NotExecuted);

    let review = report.step("reviewModelMetrics").unwrap();
    assert_eq!(review.failure_reason.as_deref(), Some(reason));
    assert_eq!(review.branch, None);
    assert_eq!(
        report.failure_reason.as_deref(),
        Some(format!("Step reviewModelMetrics failed: {}", reason).as_str())
    );
}

#[tokio::test]
async fn test_missing_metric_path_fails_execution() {
    let report = run_with_report(Some(json!({"regression_metrics": {}}))).await;
    assert_no_branch_taken(&report, MISSING_METRIC);
}

#[tokio::test]
async fn test_missing_report_document_fails_execution() {
    let report = run_with_report(None).await;
    assert_no_branch_taken(&report, MISSING_METRIC);
}

#[tokio::test]
async fn test_non_numeric_metric_fails_execution() {
    let report = run_with_report(Some(json!({
        "regression_metrics": {"mse": {"value": "not available"}}
    })))
    .await;
    assert_no_branch_taken(&report, "Type mismatch: cannot compare string <= number");
}
