//! Execution scheduler - determines which step runs next
//!
//! Steps are visited once, in topological order. A step runs only when every
//! step it takes data from has succeeded and every condition step gating it
//! selected the branch it belongs to. Anything else stays unexecuted.

use crate::core::{BuildError, Branch, Pipeline};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Whether a visited step should run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Run,
    /// An upstream step did not succeed, or the step's branch was not taken
    Skip,
}

/// Scheduler for one execution
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    order: VecDeque<String>,
    upstream: HashMap<String, BTreeSet<String>>,
    gates: HashMap<String, Vec<(String, Branch)>>,
    succeeded: HashSet<String>,
    branches: HashMap<String, Branch>,
}

impl ExecutionScheduler {
    pub fn new(pipeline: &Pipeline) -> Result<Self, BuildError> {
        let order = pipeline.topological_order()?;

        let upstream = pipeline
            .steps()
            .iter()
            .map(|step| {
                let deps = step.dependencies().into_iter().map(str::to_string).collect();
                (step.name.clone(), deps)
            })
            .collect();

        let mut gates: HashMap<String, Vec<(String, Branch)>> = HashMap::new();
        for step in pipeline.steps() {
            for (target, branch) in step.branch_targets() {
                gates
                    .entry(target.to_string())
                    .or_default()
                    .push((step.name.clone(), branch));
            }
        }

        Ok(Self {
            order: order.into(),
            upstream,
            gates,
            succeeded: HashSet::new(),
            branches: HashMap::new(),
        })
    }

    /// Next step in order, with whether it may run
    pub fn next_step(&mut self) -> Option<(String, Readiness)> {
        let name = self.order.pop_front()?;
        let readiness = if self.is_runnable(&name) {
            Readiness::Run
        } else {
            Readiness::Skip
        };
        Some((name, readiness))
    }

    /// Record a succeeded step, with the branch it selected if it is a condition
    pub fn record_success(&mut self, step: &str, branch: Option<Branch>) {
        self.succeeded.insert(step.to_string());
        if let Some(branch) = branch {
            self.branches.insert(step.to_string(), branch);
        }
    }

    /// Steps not yet visited
    pub fn remaining(&self) -> usize {
        self.order.len()
    }

    fn is_runnable(&self, step: &str) -> bool {
        let inputs_ready = self
            .upstream
            .get(step)
            .map_or(true, |deps| deps.iter().all(|d| self.succeeded.contains(d)));

        let branch_taken = self.gates.get(step).map_or(true, |gates| {
            gates.iter().all(|(condition, branch)| {
                self.succeeded.contains(condition) && self.branches.get(condition) == Some(branch)
            })
        });

        inputs_ready && branch_taken
    }
}
