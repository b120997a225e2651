//! Saga definitions: validated step graphs with precomputed topology.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DefinitionError, Result};
use crate::step::StepDefinition;

/// A validated, immutable saga: an ordered graph of steps plus execution
/// settings.
///
/// Built once through [`SagaDefinition::builder`] and shared read-only for
/// the lifetime of the process. Validation guarantees the dependency graph
/// is complete and acyclic, so topology layers are computed at build time
/// and never change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaDefinition {
    /// Saga name, unique within the registry.
    pub name: String,
    /// Owning handler reference, passed through to the step invoker.
    pub handler: String,
    /// Steps in declaration order.
    pub steps: IndexMap<String, StepDefinition>,
    /// Cap on concurrently running steps within one layer (0 = unlimited).
    pub layer_concurrency: usize,
    layers: Vec<Vec<String>>,
}

impl SagaDefinition {
    /// Starts building a saga with the given name and handler reference.
    pub fn builder(name: impl Into<String>, handler: impl Into<String>) -> SagaDefinitionBuilder {
        SagaDefinitionBuilder {
            name: name.into(),
            handler: handler.into(),
            steps: Vec::new(),
            layer_concurrency: 0,
        }
    }

    /// Returns the step with the given id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.get(id)
    }

    /// Topology layers: layer 0 holds steps with no dependencies, layer k
    /// holds steps whose dependencies all lie in layers `< k`.
    pub fn topology_layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Map of step id to its dependency ids.
    pub fn dependency_map(&self) -> HashMap<String, Vec<String>> {
        self.steps
            .iter()
            .map(|(id, step)| (id.clone(), step.dependencies.iter().cloned().collect()))
            .collect()
    }
}

/// Fluent builder for [`SagaDefinition`].
///
/// `build` validates the whole graph: at least one step, no duplicate ids,
/// every dependency resolvable, and no cycles (a self-dependency is the
/// smallest cycle).
#[derive(Debug, Clone)]
pub struct SagaDefinitionBuilder {
    name: String,
    handler: String,
    steps: Vec<StepDefinition>,
    layer_concurrency: usize,
}

impl SagaDefinitionBuilder {
    /// Adds a step to the saga. Declaration order is preserved.
    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Caps the number of concurrently running steps per layer.
    pub fn layer_concurrency(mut self, limit: usize) -> Self {
        self.layer_concurrency = limit;
        self
    }

    /// Validates the graph and builds the immutable definition.
    pub fn build(self) -> Result<SagaDefinition> {
        if self.steps.is_empty() {
            return Err(DefinitionError::EmptySaga { saga: self.name });
        }

        let mut steps: IndexMap<String, StepDefinition> = IndexMap::new();
        for step in self.steps {
            if steps.contains_key(&step.id) {
                return Err(DefinitionError::DuplicateStep {
                    saga: self.name,
                    step: step.id,
                });
            }
            steps.insert(step.id.clone(), step);
        }

        for step in steps.values() {
            for dep in &step.dependencies {
                if !steps.contains_key(dep) {
                    return Err(DefinitionError::UnknownDependency {
                        saga: self.name,
                        step: step.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let layers = compute_layers(&self.name, &steps)?;

        Ok(SagaDefinition {
            name: self.name,
            handler: self.handler,
            steps,
            layer_concurrency: self.layer_concurrency,
            layers,
        })
    }
}

/// Assigns every step to a topology layer.
///
/// Iteratively peels off steps whose dependencies are already placed. If a
/// pass places nothing while steps remain, those steps form a cycle.
fn compute_layers(
    saga: &str,
    steps: &IndexMap<String, StepDefinition>,
) -> Result<Vec<Vec<String>>> {
    let mut placed: HashSet<&str> = HashSet::new();
    let mut remaining: Vec<&StepDefinition> = steps.values().collect();
    let mut layers = Vec::new();

    while !remaining.is_empty() {
        let (ready, blocked): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|step| step.dependencies.iter().all(|d| placed.contains(d.as_str())));

        if ready.is_empty() {
            let mut cycle: Vec<String> = blocked.iter().map(|s| s.id.clone()).collect();
            cycle.sort();
            return Err(DefinitionError::CycleDetected {
                saga: saga.to_string(),
                steps: cycle,
            });
        }

        for step in &ready {
            placed.insert(step.id.as_str());
        }
        layers.push(ready.iter().map(|s| s.id.clone()).collect());
        remaining = blocked;
    }

    Ok(layers)
}
