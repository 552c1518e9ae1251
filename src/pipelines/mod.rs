//! Pipeline factories selectable by name from the command line

pub mod showcase;

use crate::core::{BuildError, Pipeline};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors producing a pipeline from a factory
#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("Unknown pipeline module '{0}'")]
    UnknownModule(String),

    #[error("Unknown argument '{argument}' for pipeline module '{module}'")]
    UnknownArgument { module: String, argument: String },

    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Builds a pipeline from keyword arguments
pub type PipelineFactory = fn(&BTreeMap<String, String>) -> Result<Pipeline, FactoryError>;

const FACTORIES: &[(&str, PipelineFactory)] = &[("showcase", showcase::get_pipeline)];

/// Names of the registered factories
pub fn modules() -> impl Iterator<Item = &'static str> {
    FACTORIES.iter().map(|(name, _)| *name)
}

pub fn factory(module: &str) -> Result<PipelineFactory, FactoryError> {
    FACTORIES
        .iter()
        .find(|(name, _)| *name == module)
        .map(|(_, factory)| *factory)
        .ok_or_else(|| FactoryError::UnknownModule(module.to_string()))
}

/// Look up a factory and build its pipeline
pub fn build(module: &str, kwargs: &BTreeMap<String, String>) -> Result<Pipeline, FactoryError> {
    factory(module)?(kwargs)
}
