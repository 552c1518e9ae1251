//! Pipeline domain model
//!
//! Dependency edges are never declared explicitly. They are derived by
//! scanning each step's inputs for property references, plus one edge from
//! every condition step to the steps in its branches.

use crate::core::{
    error::{BuildError, ResolveError},
    parameter::{resolve_parameters, Parameter, ParameterValue},
    step::Step,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Version tag of the definition document layout
pub const DEFINITION_VERSION: &str = "2024-06-01";

/// A validated pipeline definition
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    parameters: Vec<Parameter>,

    steps: Vec<Step>,
}

/// Incremental pipeline construction.
///
/// Steps must be added after the steps they reference, which catches
/// dangling references at the call site that introduced them.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    name: String,
    parameters: Vec<Parameter>,
    steps: Vec<Step>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn add_parameter(&mut self, parameter: Parameter) -> Result<&mut Self, BuildError> {
        if self.parameters.iter().any(|p| p.name == parameter.name) {
            return Err(BuildError::DuplicateParameter(parameter.name));
        }
        parameter.check()?;
        self.parameters.push(parameter);
        Ok(self)
    }

    pub fn add_step(&mut self, step: Step) -> Result<&mut Self, BuildError> {
        if self.steps.iter().any(|s| s.name == step.name) {
            return Err(BuildError::DuplicateStepName(step.name));
        }

        for reference in step.references() {
            let exists = self
                .steps
                .iter()
                .any(|s| s.name == reference.step && s.has_output(&reference.output));
            if !exists {
                return Err(BuildError::DanglingReference {
                    step: step.name.clone(),
                    reference: reference.to_string(),
                });
            }
        }

        check_parameters(&step, &self.parameters)?;
        self.steps.push(step);
        Ok(self)
    }

    pub fn build(self) -> Result<Pipeline, BuildError> {
        Pipeline::new(self.name, self.parameters, self.steps)
    }
}

impl Pipeline {
    /// Assemble a pipeline from parts in any order and validate it
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<Parameter>,
        steps: Vec<Step>,
    ) -> Result<Self, BuildError> {
        let pipeline = Pipeline {
            name: name.into(),
            parameters,
            steps,
        };
        pipeline.validate()?;
        Ok(pipeline)
    }

    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Reopen the pipeline for edits; the result must be submitted again
    pub fn into_builder(self) -> PipelineBuilder {
        PipelineBuilder {
            name: self.name,
            parameters: self.parameters,
            steps: self.steps,
        }
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Get a step by name
    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Check names, references, branch targets and acyclicity
    pub fn validate(&self) -> Result<(), BuildError> {
        let mut parameter_names = HashSet::new();
        for parameter in &self.parameters {
            if !parameter_names.insert(parameter.name.as_str()) {
                return Err(BuildError::DuplicateParameter(parameter.name.clone()));
            }
            parameter.check()?;
        }

        let mut step_names = HashSet::new();
        for step in &self.steps {
            if !step_names.insert(step.name.as_str()) {
                return Err(BuildError::DuplicateStepName(step.name.clone()));
            }
        }

        for step in &self.steps {
            for reference in step.references() {
                let exists = self
                    .step(&reference.step)
                    .is_some_and(|source| source.has_output(&reference.output));
                if !exists {
                    return Err(BuildError::DanglingReference {
                        step: step.name.clone(),
                        reference: reference.to_string(),
                    });
                }
            }

            for (target, _) in step.branch_targets() {
                if target == step.name || !step_names.contains(target) {
                    return Err(BuildError::UnknownBranchStep {
                        step: step.name.clone(),
                        target: target.to_string(),
                    });
                }
            }

            check_parameters(step, &self.parameters)?;
        }

        self.topological_order().map(|_| ())
    }

    /// Upstream steps of every step
    pub fn dependency_graph(&self) -> BTreeMap<&str, BTreeSet<&str>> {
        let mut graph: BTreeMap<&str, BTreeSet<&str>> = self
            .steps
            .iter()
            .map(|s| (s.name.as_str(), s.dependencies()))
            .collect();

        for step in &self.steps {
            for (target, _) in step.branch_targets() {
                if let Some(upstream) = graph.get_mut(target) {
                    upstream.insert(step.name.as_str());
                }
            }
        }

        graph
    }

    /// Steps in dependency order; ties are broken by name so the order does
    /// not depend on insertion sequence
    pub fn topological_order(&self) -> Result<Vec<String>, BuildError> {
        let graph = self.dependency_graph();

        let mut remaining: BTreeMap<&str, usize> = graph
            .iter()
            .map(|(name, upstream)| {
                let known = upstream.iter().filter(|u| graph.contains_key(*u)).count();
                (*name, known)
            })
            .collect();

        let mut downstream: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, upstream) in &graph {
            for dep in upstream {
                downstream.entry(*dep).or_default().push(*name);
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();

        let mut order = Vec::with_capacity(graph.len());
        while let Some(name) = ready.pop_first() {
            remaining.remove(name);
            order.push(name.to_string());
            for next in downstream.get(name).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(next) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*next);
                    }
                }
            }
        }

        if order.len() < graph.len() {
            return Err(BuildError::CyclicDependency(find_cycle(&graph)));
        }

        Ok(order)
    }

    /// Parse `name=value` overrides using the declared parameter kinds
    pub fn parse_overrides(
        &self,
        raw: &[(String, String)],
    ) -> Result<HashMap<String, ParameterValue>, ResolveError> {
        raw.iter()
            .map(|(name, value)| {
                let parameter = self
                    .parameter(name)
                    .ok_or_else(|| ResolveError::UnknownParameter(name.clone()))?;
                let parsed = ParameterValue::parse(parameter.kind, value).ok_or_else(|| {
                    ResolveError::ParameterTypeMismatch {
                        name: name.clone(),
                        expected: parameter.kind,
                    }
                })?;
                Ok((name.clone(), parsed))
            })
            .collect()
    }

    /// Defaults merged with overrides
    pub fn resolve_parameters(
        &self,
        overrides: &HashMap<String, ParameterValue>,
    ) -> Result<BTreeMap<String, ParameterValue>, ResolveError> {
        resolve_parameters(&self.parameters, overrides)
    }

    /// Declarative document submitted to the execution service
    pub fn definition(&self) -> Result<PipelineDefinition, BuildError> {
        let order = self.topological_order()?;
        let graph = self.dependency_graph();

        let mut parameters = self.parameters.clone();
        parameters.sort_by(|a, b| a.name.cmp(&b.name));

        let steps = order
            .iter()
            .filter_map(|name| self.step(name))
            .map(|step| StepDefinition {
                depends_on: graph
                    .get(step.name.as_str())
                    .map(|upstream| upstream.iter().map(|s| s.to_string()).collect())
                    .unwrap_or_default(),
                step: step.clone(),
            })
            .collect();

        Ok(PipelineDefinition {
            version: DEFINITION_VERSION.to_string(),
            name: self.name.clone(),
            parameters,
            steps,
        })
    }
}

fn check_parameters(step: &Step, parameters: &[Parameter]) -> Result<(), BuildError> {
    for name in step.parameters() {
        if !parameters.iter().any(|p| p.name == name) {
            return Err(BuildError::UnknownParameter {
                step: step.name.clone(),
                parameter: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Locate one cycle with a depth-first walk over the upstream edges
fn find_cycle(graph: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<String> {
    fn visit<'a>(
        name: &'a str,
        graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(position) = path.iter().position(|p| *p == name) {
            let mut cycle: Vec<String> = path[position..].iter().map(|s| s.to_string()).collect();
            cycle.reverse();
            return Some(cycle);
        }
        if !visited.insert(name) {
            return None;
        }

        path.push(name);
        for upstream in graph.get(name).into_iter().flatten() {
            if let Some(cycle) = visit(*upstream, graph, visited, path) {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    let mut visited = HashSet::new();
    for name in graph.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(*name, graph, &mut visited, &mut path) {
            return cycle;
        }
    }
    Vec::new()
}

/// Serialized pipeline: parameter schema sorted by name, steps in
/// dependency order with their upstream edges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub version: String,
    pub name: String,
    pub parameters: Vec<Parameter>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    #[serde(flatten)]
    pub step: Step,

    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl PipelineDefinition {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    /// Rebuild and revalidate the pipeline described by this document
    pub fn into_pipeline(self) -> Result<Pipeline, BuildError> {
        Pipeline::new(
            self.name,
            self.parameters,
            self.steps.into_iter().map(|s| s.step).collect(),
        )
    }
}
