//! Execution state models

use crate::core::{
    condition::Branch,
    step::{Step, StepType},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Overall execution status: `Pending -> Executing -> {Succeeded, Failed, Stopped}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Execution accepted, no step started yet
    Pending,
    /// Execution is running
    Executing,
    /// Every reached step succeeded
    Succeeded,
    /// A step failed or a fail step was reached
    Failed,
    /// Execution was stopped on request
    Stopped,
}

impl ExecutionStatus {
    /// No further transitions happen from a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Succeeded | ExecutionStatus::Failed | ExecutionStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "Pending",
            ExecutionStatus::Executing => "Executing",
            ExecutionStatus::Succeeded => "Succeeded",
            ExecutionStatus::Failed => "Failed",
            ExecutionStatus::Stopped => "Stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Pending" => Some(ExecutionStatus::Pending),
            "Executing" => Some(ExecutionStatus::Executing),
            "Succeeded" => Some(ExecutionStatus::Succeeded),
            "Failed" => Some(ExecutionStatus::Failed),
            "Stopped" => Some(ExecutionStatus::Stopped),
            _ => None,
        }
    }
}

/// State of a single step within an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepStatus {
    /// Never reached (initial state, also for steps of an unselected branch)
    NotExecuted,
    /// Step is running
    Executing,
    /// Step completed successfully
    Succeeded,
    /// Step failed
    Failed,
    /// Step was interrupted by a stop request
    Stopped,
}

impl StepStatus {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Succeeded | StepStatus::Failed | StepStatus::Stopped
        )
    }
}

/// Per-step entry of an execution trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    pub step_type: StepType,

    pub status: StepStatus,

    pub started_at: Option<DateTime<Utc>>,

    pub ended_at: Option<DateTime<Utc>>,

    /// Failure message, preserved verbatim from the job or condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Branch taken, for condition steps that ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,

    /// Output channel -> artifact location
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub outputs: BTreeMap<String, String>,
}

impl StepReport {
    /// Initial, unexecuted entry for a step
    pub fn not_executed(step: &Step) -> Self {
        Self {
            step_name: step.name.clone(),
            display_name: step.display_name.clone(),
            step_type: step.step_type(),
            status: StepStatus::NotExecuted,
            started_at: None,
            ended_at: None,
            failure_reason: None,
            branch: None,
            outputs: BTreeMap::new(),
        }
    }

    pub fn start(&mut self) {
        self.status = StepStatus::Executing;
        self.started_at = Some(Utc::now());
    }

    pub fn succeed(&mut self, outputs: BTreeMap<String, String>) {
        self.status = StepStatus::Succeeded;
        self.ended_at = Some(Utc::now());
        self.outputs = outputs;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.ended_at = Some(Utc::now());
        self.failure_reason = Some(reason.into());
    }

    pub fn stop(&mut self) {
        self.status = StepStatus::Stopped;
        self.ended_at = Some(Utc::now());
    }

    /// Wall time between start and end, if the step ran to an end
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some(end.signed_duration_since(start)),
            _ => None,
        }
    }
}

/// Final view of an execution returned by the driver once it is terminal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalReport {
    pub execution_arn: String,
    pub pipeline_arn: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified_at: DateTime<Utc>,
    /// Per-step trace in execution order
    pub steps: Vec<StepReport>,
}

impl TerminalReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    /// First step that ended Failed
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::step::FailStep;

    #[test]
    fn test_execution_status_is_terminal() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Executing.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_status_names_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Executing,
            ExecutionStatus::Succeeded,
            ExecutionStatus::Failed,
            ExecutionStatus::Stopped,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("Running"), None);
    }

    #[test]
    fn test_step_report_transitions() {
        let step = Step::new(
            "fail",
            FailStep {
                error_message: "bad".to_string(),
            },
        );
        let mut report = StepReport::not_executed(&step);
        assert_eq!(report.status, StepStatus::NotExecuted);
        assert!(!report.status.is_terminal());
        assert!(report.duration().is_none());

        report.start();
        assert_eq!(report.status, StepStatus::Executing);

        report.fail("bad");
        assert_eq!(report.status, StepStatus::Failed);
        assert_eq!(report.failure_reason.as_deref(), Some("bad"));
        assert!(report.duration().is_some());
    }
}
