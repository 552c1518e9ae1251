use anyhow::{Context, Result};
use mlpipe::cli::commands::{EndpointConfigCommand, HistoryCommand, RunCommand, ValidateCommand};
use mlpipe::cli::output::*;
use mlpipe::cli::{Cli, Command};
use mlpipe::core::config::{DriverConfig, PipelineConfig};
use mlpipe::core::{ExecutionStatus, Pipeline};
use mlpipe::deploy::{build_config_file, EndpointSettings};
use mlpipe::execution::{DriverError, LocalExecutionService, PipelineDriver, SubprocessJobRunner, Tag};
use mlpipe::persistence::{
    create_summary, ExecutionSummary, HistoryRegistry, InMemoryPersistence, PersistenceBackend,
};
use mlpipe::pipelines;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn, Level};
use tracing_subscriber::FmtSubscriber;

const ARN_PREFIX: &str = "arn:local:";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::EndpointConfig(cmd) => endpoint_config(cmd).await?,
    }

    Ok(())
}

/// A pipeline together with the settings its source carried
struct LoadedPipeline {
    pipeline: Pipeline,
    description: Option<String>,
    driver: DriverConfig,
}

fn load_pipeline(
    module: Option<&str>,
    file: Option<&str>,
    kwargs: &[(String, String)],
) -> Result<LoadedPipeline> {
    match (module, file) {
        (_, Some(file)) => {
            if !kwargs.is_empty() {
                warn!("Factory arguments are ignored for pipeline files");
            }
            let config = PipelineConfig::from_file(file)
                .with_context(|| format!("Failed to load pipeline config {}", file))?;
            Ok(LoadedPipeline {
                pipeline: config.to_pipeline()?,
                description: config.description,
                driver: config.driver,
            })
        }
        (Some(module), None) => {
            let kwargs = kwargs.iter().cloned().collect();
            let pipeline = pipelines::build(module, &kwargs)
                .with_context(|| format!("Failed to build pipeline from module {}", module))?;
            Ok(LoadedPipeline {
                pipeline,
                description: None,
                driver: DriverConfig::default(),
            })
        }
        (None, None) => anyhow::bail!(
            "Either a pipeline module ({}) or a pipeline file is required",
            pipelines::modules().collect::<Vec<_>>().join(", ")
        ),
    }
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    let store = mlpipe::persistence::SqliteExecutionStore::with_default_path()
        .await
        .context("Failed to open execution history")?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Arc<dyn PersistenceBackend>> {
    warn!("Built without SQLite support; history is kept in memory only");
    Ok(Arc::new(InMemoryPersistence::new()))
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let loaded = load_pipeline(cmd.module.as_deref(), cmd.file.as_deref(), &cmd.kwargs)?;
    let pipeline = loaded.pipeline;

    println!("{} Loaded pipeline: {}", INFO, style(&pipeline.name).bold());
    debug!("Pipeline definition: {}", pipeline.definition()?.to_json()?);

    let overrides = pipeline
        .parse_overrides(&cmd.parameter)
        .context("Invalid parameter override")?;
    for (key, value) in &overrides {
        println!(
            "{} Parameter override: {} = {}",
            INFO,
            style(key).cyan(),
            style(value).dim()
        );
    }

    // Set up persistence
    let store: Arc<dyn PersistenceBackend> = if cmd.no_history {
        Arc::new(InMemoryPersistence::new())
    } else {
        history_store().await?
    };

    let spinner = create_spinner("Submitting pipeline");
    let printer = spinner.clone();
    let runner = Arc::new(SubprocessJobRunner::new(&cmd.job_runner, cmd.job_timeout));
    let service = LocalExecutionService::new(runner)
        .with_artifact_root(&cmd.artifact_root)
        .with_model_registry(Arc::new(HistoryRegistry::new(store.clone(), ARN_PREFIX)))
        .with_event_handler(move |event| printer.println(format_execution_event(&event)));
    let driver = PipelineDriver::new(Arc::new(service));

    let tags: Vec<Tag> = cmd.tag.iter().map(|(k, v)| Tag::new(k, v)).collect();
    let description = cmd.description.clone().or(loaded.description);
    let handle = driver
        .upsert(&pipeline, &cmd.role_arn, description.as_deref(), &tags)
        .await?;
    let execution = driver.start(&handle, overrides).await?;

    let poll_interval = cmd
        .poll_interval
        .map(|secs| Duration::from_secs(secs.max(1)))
        .unwrap_or_else(|| loaded.driver.poll_interval());
    let timeout = cmd
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| loaded.driver.timeout());

    let result = driver
        .wait_with_progress(&execution, poll_interval, timeout, |description| {
            spinner.set_message(format!("Execution is {}", format_status(description.status)));
        })
        .await;
    spinner.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e @ DriverError::ExecutionTimeout { .. }) => {
            println!("{} {}", WARN, style(&e).yellow());
            println!("  The execution keeps running: {}", style(&execution.execution_arn).dim());
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };

    println!("\n{} Steps:", INFO);
    for step in &report.steps {
        println!("  {}", format_step_report(step));
    }

    // Save to history
    if !cmd.no_history {
        let summary = create_summary(&pipeline.name, &report);
        store.save_execution(&summary).await?;
        println!(
            "\n{} Execution saved to history (ID: {})",
            INFO,
            style(summary.short_id()).dim()
        );
    }

    if report.succeeded() {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(&pipeline.name).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(&pipeline.name).bold(),
            format_status(report.status)
        );
        if let Some(reason) = &report.failure_reason {
            error!("{}", reason);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating pipeline...", INFO);

    match load_pipeline(cmd.module.as_deref(), cmd.file.as_deref(), &cmd.kwargs) {
        Ok(loaded) => {
            let pipeline = loaded.pipeline;
            println!("{} Pipeline definition is valid!", CHECK);
            println!("  Name: {}", style(&pipeline.name).bold());
            println!("  Steps: {}", style(pipeline.steps().len()).cyan());
            println!("  Parameters: {}", style(pipeline.parameters().len()).cyan());
            println!("  Order: {}", style(pipeline.topological_order()?.join(" → ")).dim());

            if cmd.json {
                println!("\n{}", pipeline.definition()?.to_json()?);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store().await?;

    if let Some(execution_id) = &cmd.execution_id {
        match store.load_execution(execution_id).await? {
            Some(summary) => print_execution_details(&summary, cmd.json)?,
            None => println!("{} Execution not found", WARN),
        }
        return Ok(());
    }

    let executions = if let Some(pipeline_name) = &cmd.pipeline {
        store.list_executions(pipeline_name).await?
    } else {
        let mut all_execs = Vec::new();
        for pipeline in store.list_pipelines().await? {
            all_execs.extend(store.list_executions(&pipeline).await?);
        }
        all_execs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        all_execs
    };
    let executions: Vec<ExecutionSummary> = executions.into_iter().take(cmd.limit).collect();

    if executions.is_empty() {
        println!("{} No executions found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{} Execution history (showing latest {}):", INFO, cmd.limit);
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
        if cmd.steps {
            for step in &summary.steps {
                println!("      {}", format_step_report(step));
            }
        }
    }

    Ok(())
}

fn print_execution_details(summary: &ExecutionSummary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    println!("{} Execution Details", INFO);
    println!("  ID: {}", style(&summary.execution_arn).cyan());
    println!("  Pipeline: {}", style(&summary.pipeline_name).bold());
    println!("  Status: {}", format_status(summary.status));
    if let Some(reason) = &summary.failure_reason {
        println!("  Reason: {}", style(reason).red());
    }
    println!("  Started: {}", style(summary.started_at.to_rfc3339()).dim());
    if let Some(completed) = summary.completed_at {
        println!("  Completed: {}", style(completed.to_rfc3339()).dim());
        if let Ok(duration) = completed.signed_duration_since(summary.started_at).to_std() {
            println!("  Duration: {}", style(format_duration(duration)).dim());
        }
    }
    println!(
        "  Progress: {} ({}/{})",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.succeeded_steps,
        summary.total_steps
    );

    println!("\n  {}", style("Steps:").bold());
    for step in &summary.steps {
        println!("    {}", format_step_report(step));
    }
    if summary.status == ExecutionStatus::Stopped {
        println!("\n{} Execution was stopped before finishing", WARN);
    }

    Ok(())
}

async fn endpoint_config(cmd: &EndpointConfigCommand) -> Result<()> {
    let registry = HistoryRegistry::new(history_store().await?, ARN_PREFIX);
    let settings = EndpointSettings::new(&cmd.endpoint_name, &cmd.model_execution_role);

    let adjusted = build_config_file(
        &registry,
        &cmd.model_package_group_name,
        &settings,
        Path::new(&cmd.import_path),
        Path::new(&cmd.export_path),
    )
    .await
    .context("Failed to build endpoint configuration")?;

    println!(
        "{} Endpoint configuration written to {}",
        CHECK,
        style(&cmd.export_path).bold()
    );
    if let Some(package) = adjusted["Parameters"]["ModelPackageName"].as_str() {
        println!("  Model package: {}", style(package).cyan());
    }

    Ok(())
}
