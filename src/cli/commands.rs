//! CLI command definitions

use clap::Args;
use std::collections::BTreeMap;

/// Build, upsert and run a pipeline, then wait for it to finish
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Pipeline factory module to build the pipeline from
    #[arg(short = 'n', long, conflicts_with = "file", required_unless_present = "file")]
    pub module: Option<String>,

    /// Path to a pipeline YAML file, instead of a factory module
    #[arg(short, long)]
    pub file: Option<String>,

    /// Factory keyword arguments (key=value)
    #[arg(short, long, value_parser = parse_key_value)]
    pub kwargs: Vec<(String, String)>,

    /// Parameter overrides for this execution (key=value)
    #[arg(short, long, value_parser = parse_key_value)]
    pub parameter: Vec<(String, String)>,

    /// Role used to manage the pipeline
    #[arg(short, long)]
    pub role_arn: String,

    /// Pipeline description sent with the definition
    #[arg(short, long)]
    pub description: Option<String>,

    /// Tags attached to the pipeline (key=value)
    #[arg(short, long, value_parser = parse_key_value)]
    pub tag: Vec<(String, String)>,

    /// Seconds between status polls
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Seconds to wait for the execution before giving up
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Program invoked for processing and training jobs
    #[arg(long, default_value = "mlpipe-job")]
    pub job_runner: String,

    /// Seconds a single job may run
    #[arg(long, default_value_t = 3600)]
    pub job_timeout: u64,

    /// Root location for job outputs
    #[arg(long, default_value = "local://artifacts")]
    pub artifact_root: String,

    /// Don't save execution to history
    #[arg(long)]
    pub no_history: bool,
}

impl RunCommand {
    pub fn kwargs_map(&self) -> BTreeMap<String, String> {
        self.kwargs.iter().cloned().collect()
    }
}

/// Validate a pipeline without running it
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Pipeline factory module
    #[arg(short = 'n', long, conflicts_with = "file", required_unless_present = "file")]
    pub module: Option<String>,

    /// Path to pipeline YAML file
    #[arg(short, long)]
    pub file: Option<String>,

    /// Factory keyword arguments (key=value)
    #[arg(short, long, value_parser = parse_key_value)]
    pub kwargs: Vec<(String, String)>,

    /// Print the pipeline definition as JSON
    #[arg(long)]
    pub json: bool,
}

/// Show execution history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Pipeline name to filter by
    #[arg(short, long)]
    pub pipeline: Option<String>,

    /// Number of recent executions to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show the step trace of each execution
    #[arg(long)]
    pub steps: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a specific execution (full identifier or id prefix)
    #[arg(long)]
    pub execution_id: Option<String>,
}

/// Build an endpoint configuration for the latest approved model
#[derive(Debug, Args, Clone)]
pub struct EndpointConfigCommand {
    /// Model package group to look up
    #[arg(long)]
    pub model_package_group_name: String,

    /// Name of the endpoint
    #[arg(long)]
    pub endpoint_name: String,

    /// Role the endpoint's model runs with
    #[arg(long)]
    pub model_execution_role: String,

    /// Endpoint configuration to read
    #[arg(long = "import")]
    pub import_path: String,

    /// Where to write the adjusted configuration
    #[arg(long = "export")]
    pub export_path: String,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
