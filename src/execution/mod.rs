//! Pipeline execution: the driver, the service it talks to and an
//! in-process engine implementing that service

pub mod driver;
pub mod engine;
pub mod local;
pub mod runner;
pub mod scheduler;
pub mod service;

pub use driver::{DriverError, PipelineDriver};
pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent, StepError, StopSignal};
pub use local::LocalExecutionService;
pub use runner::{JobError, JobOutcome, JobRequest, JobRunner, JobSpec, SubprocessJobRunner};
pub use scheduler::{ExecutionScheduler, Readiness};
pub use service::{
    ExecutionDescription, ExecutionHandle, ExecutionService, PipelineDescription, PipelineHandle,
    ServiceError, Tag, UpsertRequest,
};
