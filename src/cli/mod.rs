//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{EndpointConfigCommand, HistoryCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Build, run and deploy ML pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "mlpipe")]
#[command(version = "0.1.0")]
#[command(about = "Define ML pipelines, run them to completion and deploy the approved model", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Upsert a pipeline, start an execution and wait for it
    Run(RunCommand),

    /// Validate a pipeline definition
    Validate(ValidateCommand),

    /// Show execution history
    History(HistoryCommand),

    /// Build an endpoint configuration file
    EndpointConfig(EndpointConfigCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
