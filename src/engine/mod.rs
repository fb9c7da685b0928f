//! Workflow engine.
//!
//! Turns the configuration document's ordered step list into a DAG
//! ([`ResolvedWorkflow`]) and executes it across discovered repositories
//! with bounded concurrency ([`runner::Engine`]). Two guarantees hold
//! throughout:
//!
//! - steps respect their `after` constraints per repository, and
//! - a given worktree is mutated by at most one step at a time.

use indexmap::IndexMap;
use serde::Deserialize;

pub mod runner;
pub mod task;
pub mod template;

pub use runner::{Engine, EngineReport, PairFailure};
pub use task::{ActionDispatcher, Tasks};

/// One workflow step as declared in the configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepSpec {
    /// Optional name; unnamed steps get `step-<position>`.
    #[serde(default)]
    pub name: Option<String>,
    /// Names of steps that must complete first. When empty, the step
    /// implicitly depends on its positional predecessor.
    #[serde(default)]
    pub after: Vec<String>,
    pub action: String,
    /// Action options; string values may use `{{ repository.* }}` and
    /// `{{ environment.* }}` templates.
    #[serde(default, rename = "with")]
    pub with: IndexMap<String, serde_yaml::Value>,
}

/// A step with its dependencies resolved to indices.
#[derive(Debug, Clone)]
pub struct Step {
    pub index: usize,
    pub name: String,
    pub action: String,
    pub with: IndexMap<String, serde_yaml::Value>,
    /// Direct ancestors (indices into the workflow's step list).
    pub deps: Vec<usize>,
}

/// A validated workflow: named steps, resolved dependencies, and a
/// topological order. Construction fails on duplicate names, unknown
/// `after` references, and cycles.
#[derive(Debug, Clone)]
pub struct ResolvedWorkflow {
    pub steps: Vec<Step>,
    /// Step indices in a valid execution order (stable by declaration).
    pub topo_order: Vec<usize>,
}

impl ResolvedWorkflow {
    pub fn resolve(specs: &[StepSpec]) -> anyhow::Result<Self> {
        let mut names = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let name = spec
                .name
                .clone()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("step-{}", index + 1));
            if names.contains(&name) {
                anyhow::bail!("duplicate workflow step name: {name}");
            }
            names.push(name);
        }

        let mut steps = Vec::with_capacity(specs.len());
        for (index, spec) in specs.iter().enumerate() {
            let mut deps = Vec::new();
            if spec.after.is_empty() {
                // Positional ordering: an unconstrained step follows its
                // predecessor
                if index > 0 {
                    deps.push(index - 1);
                }
            } else {
                for reference in &spec.after {
                    let target = names
                        .iter()
                        .position(|name| name == reference)
                        .ok_or_else(|| {
                            anyhow::anyhow!(
                                "step {} references unknown step {reference:?} in after",
                                names[index]
                            )
                        })?;
                    if target == index {
                        anyhow::bail!("step {} depends on itself", names[index]);
                    }
                    deps.push(target);
                }
            }
            steps.push(Step {
                index,
                name: names[index].clone(),
                action: spec.action.clone(),
                with: spec.with.clone(),
                deps,
            });
        }

        let topo_order = topo_sort(&steps)?;
        Ok(Self { steps, topo_order })
    }

    /// Direct dependents of each step.
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.steps.len()];
        for step in &self.steps {
            for &dep in &step.deps {
                dependents[dep].push(step.index);
            }
        }
        dependents
    }
}

/// Kahn's algorithm, stable by declaration order. Fails on cycles before
/// any execution starts.
fn topo_sort(steps: &[Step]) -> anyhow::Result<Vec<usize>> {
    let mut in_degree: Vec<usize> = steps.iter().map(|s| s.deps.len()).collect();
    let mut dependents = vec![Vec::new(); steps.len()];
    for step in steps {
        for &dep in &step.deps {
            dependents[dep].push(step.index);
        }
    }

    let mut order = Vec::with_capacity(steps.len());
    let mut ready: Vec<usize> = (0..steps.len()).filter(|&i| in_degree[i] == 0).collect();
    while let Some(next) = ready.first().copied() {
        ready.remove(0);
        order.push(next);
        for &dependent in &dependents[next] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                // Keep declaration order among newly-ready steps
                let position = ready
                    .iter()
                    .position(|&i| i > dependent)
                    .unwrap_or(ready.len());
                ready.insert(position, dependent);
            }
        }
    }

    if order.len() != steps.len() {
        let stuck: Vec<&str> = steps
            .iter()
            .filter(|s| !order.contains(&s.index))
            .map(|s| s.name.as_str())
            .collect();
        anyhow::bail!("workflow has a dependency cycle involving: {}", stuck.join(", "));
    }
    Ok(order)
}
