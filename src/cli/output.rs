//! CLI output formatting

use crate::{
    core::{Branch, ExecutionStatus, StepReport, StepStatus},
    execution::ExecutionEvent,
    persistence::ExecutionSummary,
};
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "!");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static STOP: Emoji<'_, '_> = Emoji("⏹️  ", "# ");

/// Spinner shown while waiting on an execution
pub fn create_spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Executing => style("EXECUTING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Stopped => style("STOPPED").yellow().to_string(),
    }
}

/// Format a step status for display
pub fn format_step_status(status: StepStatus) -> String {
    match status {
        StepStatus::NotExecuted => style("NOT EXECUTED").dim().to_string(),
        StepStatus::Executing => style("EXECUTING").yellow().to_string(),
        StepStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        StepStatus::Failed => style("FAILED").red().to_string(),
        StepStatus::Stopped => style("STOPPED").yellow().to_string(),
    }
}

fn status_icon(status: ExecutionStatus) -> Emoji<'static, 'static> {
    match status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Stopped => STOP,
        ExecutionStatus::Pending | ExecutionStatus::Executing => SPINNER,
    }
}

/// One line of a step trace
pub fn format_step_report(report: &StepReport) -> String {
    let mut line = format!(
        "{} {} {}",
        style(&report.step_name).bold(),
        style(format!("[{}]", report.step_type)).dim(),
        format_step_status(report.status)
    );
    if let Some(duration) = report.duration().and_then(|d| d.to_std().ok()) {
        line.push_str(&format!(" {}", style(format_duration(duration)).dim()));
    }
    if let Some(branch) = report.branch {
        line.push_str(&format!(" -> {}", style(branch).cyan()));
    }
    if let Some(reason) = &report.failure_reason {
        line.push_str(&format!("\n      {}", style(reason).red()));
    }
    line
}

/// Format execution summary for display
pub fn format_execution_summary(summary: &ExecutionSummary) -> String {
    format!(
        "{} {} - {} - {} ({}/{}) - {}",
        status_icon(summary.status),
        style(summary.short_id()).dim(),
        style(&summary.pipeline_name).bold(),
        format_status(summary.status),
        summary.succeeded_steps,
        summary.total_steps,
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan()
    )
}

fn short_arn(arn: &str) -> &str {
    let id = arn.rsplit('/').next().unwrap_or(arn);
    &id[..id.len().min(8)]
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::ExecutionStarted {
            execution_arn,
            pipeline_name,
        } => format!(
            "{} Starting pipeline {} ({})",
            ROCKET,
            style(pipeline_name).bold(),
            style(short_arn(execution_arn)).dim()
        ),
        ExecutionEvent::StepStarted { step_name, .. } => {
            format!("{} {}", SPINNER, style(step_name).cyan())
        }
        ExecutionEvent::StepSucceeded { step_name, .. } => {
            format!("{} {}", CHECK, style(step_name).green())
        }
        ExecutionEvent::BranchSelected {
            step_name, branch, ..
        } => {
            let taken = match branch {
                Branch::If => style("if").green(),
                Branch::Else => style("else").yellow(),
            };
            format!("{} {} → {} branch", INFO, style(step_name).dim(), taken)
        }
        ExecutionEvent::StepFailed {
            step_name, reason, ..
        } => format!("{} {}: {}", CROSS, style(step_name).red(), style(reason).dim()),
        ExecutionEvent::ExecutionFinished {
            execution_arn,
            status,
        } => format!(
            "{} Execution ({}) {}",
            status_icon(*status),
            style(short_arn(execution_arn)).dim(),
            format_status(*status)
        ),
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
