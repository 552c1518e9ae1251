//! Scenario-based tests for mlpipe

#[path = "../helpers.rs"]
mod helpers;

mod condition_failures;
mod conditional_registration;
mod job_failure;
mod redefinition;
mod stop_and_timeout;
mod transient_errors;
