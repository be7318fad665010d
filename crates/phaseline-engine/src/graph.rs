//! Workflow dependency graph
//!
//! Validation happens before any backend call: unique phase names, known
//! roles, known dependencies and no cycles (Kahn's algorithm).

use phaseline_config::{RoleProfile, WorkflowDefinition};
use phaseline_utils::ConfigError;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Index-based view of a validated workflow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseGraph {
    names: Vec<String>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

impl PhaseGraph {
    /// Validate `definition` against the role catalog.
    ///
    /// # Errors
    ///
    /// - `ConfigError::InvalidWorkflow` for empty workflows, duplicate phase
    ///   names, unknown roles and unknown dependencies
    /// - `ConfigError::DependencyCycle` naming the phases on a cycle
    pub fn build(
        definition: &WorkflowDefinition,
        roles: &BTreeMap<String, RoleProfile>,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidWorkflow {
            workflow: definition.id.clone(),
            reason,
        };
        if definition.phases.is_empty() {
            return Err(invalid("workflow has no phases".to_string()));
        }

        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, phase) in definition.phases.iter().enumerate() {
            if phase.name.trim().is_empty() {
                return Err(invalid(format!("phase #{} has an empty name", i + 1)));
            }
            if index.insert(phase.name.as_str(), i).is_some() {
                return Err(invalid(format!("duplicate phase name '{}'", phase.name)));
            }
            if !roles.contains_key(&phase.role) {
                return Err(invalid(format!(
                    "phase '{}' uses unknown role '{}'",
                    phase.name, phase.role
                )));
            }
        }

        let n = definition.phases.len();
        let mut deps = vec![Vec::new(); n];
        let mut dependents = vec![Vec::new(); n];
        for (i, phase) in definition.phases.iter().enumerate() {
            let mut seen = HashSet::new();
            for dep in &phase.depends_on {
                let Some(&d) = index.get(dep.as_str()) else {
                    return Err(invalid(format!(
                        "phase '{}' depends on unknown phase '{dep}'",
                        phase.name
                    )));
                };
                if d == i {
                    return Err(ConfigError::DependencyCycle {
                        workflow: definition.id.clone(),
                        phases: vec![phase.name.clone()],
                    });
                }
                if seen.insert(d) {
                    deps[i].push(d);
                    dependents[d].push(i);
                }
            }
        }

        let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(i) = queue.pop_front() {
            order.push(i);
            for &child in &dependents[i] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }

        if order.len() != n {
            let phases = (0..n)
                .filter(|&i| in_degree[i] > 0)
                .map(|i| definition.phases[i].name.clone())
                .collect();
            return Err(ConfigError::DependencyCycle {
                workflow: definition.id.clone(),
                phases,
            });
        }

        Ok(Self {
            names: definition.phases.iter().map(|p| p.name.clone()).collect(),
            deps,
            dependents,
            order,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        &self.names[index]
    }

    #[must_use]
    pub fn deps(&self, index: usize) -> &[usize] {
        &self.deps[index]
    }

    #[must_use]
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// A topological order over phase indices
    #[must_use]
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Every phase reachable from `index` through dependency edges
    #[must_use]
    pub fn transitive_dependents(&self, index: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut stack = self.dependents[index].clone();
        let mut out = Vec::new();
        while let Some(i) = stack.pop() {
            if seen[i] {
                continue;
            }
            seen[i] = true;
            out.push(i);
            stack.extend_from_slice(&self.dependents[i]);
        }
        out.sort_unstable();
        out
    }

    /// Every phase `index` depends on, directly or not, in topological order
    #[must_use]
    pub fn ancestors(&self, index: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut stack = self.deps[index].clone();
        while let Some(i) = stack.pop() {
            if !seen[i] {
                seen[i] = true;
                stack.extend_from_slice(&self.deps[i]);
            }
        }
        self.order.iter().copied().filter(|&i| seen[i]).collect()
    }
}
