//! Test: upserting is idempotent and versions follow definition changes

use crate::helpers::*;
use mlpipe::core::{Parameter, PipelineDefinition};
use mlpipe::execution::{ExecutionService, Tag};
use mlpipe::pipelines::showcase::{showcase_pipeline, ShowcaseOptions};
use std::sync::Arc;

#[tokio::test]
async fn test_upsert_twice_keeps_version() {
    let (service, driver) = local_driver(Arc::new(ScriptedRunner::new(1.0)));
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let first = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();
    let second = driver
        .upsert(&pipeline, ROLE, Some("abalone regression"), &[Tag::new("team", "ml")])
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(second.version, 1);

    let description = service.describe_pipeline(&pipeline.name).await.unwrap();
    assert_eq!(description.description.as_deref(), Some("abalone regression"));
    assert_eq!(description.tags, vec![Tag::new("team", "ml")]);
}

#[tokio::test]
async fn test_adding_a_parameter_bumps_version() {
    let (service, driver) = local_driver(Arc::new(ScriptedRunner::new(1.0)));
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();
    let first = driver.upsert(&pipeline, ROLE, None, &[]).await.unwrap();

    let mut builder = pipeline.clone().into_builder();
    builder.add_parameter(Parameter::string("notes", "none")).unwrap();
    let extended = builder.build().unwrap();
    let second = driver.upsert(&extended, ROLE, None, &[]).await.unwrap();

    assert_eq!(first.pipeline_arn, second.pipeline_arn);
    assert_eq!(second.version, first.version + 1);

    let stored = service.describe_pipeline(&pipeline.name).await.unwrap();
    let definition = PipelineDefinition::from_json(&stored.definition).unwrap();
    let names: Vec<&str> = definition.steps.iter().map(|s| s.step.name.as_str()).collect();
    assert_eq!(
        names,
        pipeline.topological_order().unwrap().iter().map(String::as_str).collect::<Vec<_>>()
    );
    assert_eq!(definition.parameters.len(), 12);
}

#[tokio::test]
async fn test_unauthorized_role_is_rejected() {
    let (_service, driver) = local_driver(Arc::new(ScriptedRunner::new(1.0)));
    let pipeline = showcase_pipeline(&ShowcaseOptions::default()).unwrap();

    let err = driver.upsert(&pipeline, "", None, &[]).await.unwrap_err();
    assert!(matches!(
        err,
        mlpipe::execution::DriverError::Service(mlpipe::execution::ServiceError::Authorization(_))
    ));
}
