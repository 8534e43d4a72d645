//! Execution Planner
//!
//! Groups workflow steps into waves:
//! - wave 0 holds every step without dependencies
//! - wave k holds every remaining step whose dependencies all sit in
//!   waves before k
//!
//! Waves run one after another; steps inside a wave run concurrently. The
//! levelling is breadth-first, so each wave is as wide as the graph allows.

use std::collections::HashSet;

use log::{debug, info};

use super::model::{Step, Workflow};
use super::validator::ValidationError;

/// Ordered waves of steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionPlan {
    waves: Vec<Vec<Step>>,
}

impl ExecutionPlan {
    /// Builds the plan for a workflow.
    ///
    /// Fails with [`ValidationError::CyclicDependency`] when some steps can
    /// never become ready, listing those steps in declaration order. A
    /// dependency on an undeclared step ends up here too if the workflow
    /// skipped validation.
    pub fn build(workflow: &Workflow) -> Result<Self, ValidationError> {
        let mut resolved: HashSet<&str> = HashSet::new();
        let mut remaining: Vec<&Step> = workflow.steps.iter().collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let (ready, blocked): (Vec<&Step>, Vec<&Step>) =
                remaining.into_iter().partition(|step| {
                    step.depends_on
                        .iter()
                        .all(|dep| resolved.contains(dep.as_str()))
                });

            if ready.is_empty() {
                let stuck: Vec<String> = blocked.iter().map(|s| s.name.clone()).collect();
                return Err(ValidationError::CyclicDependency(stuck));
            }

            debug!(
                "Wave {}: {:?}",
                waves.len(),
                ready.iter().map(|s| &s.name).collect::<Vec<_>>()
            );

            resolved.extend(ready.iter().map(|s| s.name.as_str()));
            waves.push(ready.into_iter().cloned().collect());
            remaining = blocked;
        }

        info!(
            "Planned {} steps into {} waves",
            workflow.len(),
            waves.len()
        );
        Ok(Self { waves })
    }

    /// Returns the waves in execution order.
    pub fn waves(&self) -> &[Vec<Step>] {
        &self.waves
    }

    /// Returns the number of waves.
    pub fn len(&self) -> usize {
        self.waves.len()
    }

    /// Returns true if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.waves.is_empty()
    }

    /// Returns the widest wave, i.e. the most steps that can ever run at once.
    pub fn max_width(&self) -> usize {
        self.waves.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Renders the plan as text, one line per step, for dry runs.
    pub fn describe(&self) -> String {
        let mut output = String::new();
        for (index, wave) in self.waves.iter().enumerate() {
            output.push_str(&format!("Wave {} ({} steps)\n", index + 1, wave.len()));
            for step in wave {
                output.push_str(&format!("  - {}: {}\n", step.name, step.action.describe()));
                if let Some(input) = &step.input {
                    output.push_str(&format!("      input: {}\n", input));
                }
                if !step.depends_on.is_empty() {
                    output.push_str(&format!("      after: {}\n", step.depends_on.join(", ")));
                }
            }
        }
        output
    }
}
