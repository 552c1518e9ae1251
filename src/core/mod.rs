//! Core domain models for pipelines
//!
//! This module defines the fundamental data structures that represent
//! pipelines, steps, deferred values and execution state.

pub mod condition;
pub mod config;
pub mod error;
pub mod parameter;
pub mod pipeline;
pub mod property;
pub mod state;
pub mod step;

pub use condition::*;
pub use error::*;
pub use parameter::*;
pub use pipeline::*;
pub use property::*;
pub use state::*;
pub use step::*;
