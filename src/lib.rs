//! mlpipe - model-training pipelines and a driver that runs them to completion

pub mod cli;
pub mod core;
pub mod deploy;
pub mod execution;
pub mod persistence;
pub mod pipelines;
pub mod registry;

// Re-export commonly used types
pub use core::{DeferredValue, ExecutionStatus, Parameter, Pipeline, Step, StepReport, TerminalReport};
pub use execution::{DriverError, ExecutionService, LocalExecutionService, PipelineDriver};
pub use registry::{ApprovalStatus, ModelPackage, ModelRegistry};
