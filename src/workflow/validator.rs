//! Workflow Validation
//!
//! Turns raw step definitions into a [`Workflow`] the engine can trust:
//! - every step has a name
//! - every step has exactly one action (`run` or `tool`)
//! - step names are unique
//! - every dependency refers to a declared step
//!
//! Validation stops at the first violation. Cycles are not visible at this
//! stage and are reported by the planner with the same error type.

use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info};
use thiserror::Error;

use super::model::{Action, Step, StepDef, Workflow, WorkflowDef};

/// Definition errors. Any of these aborts the workflow before a step runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Step #{0} has no name")]
    MissingName(usize),

    #[error("Step '{0}' has neither a `run` command nor a `tool`")]
    MissingAction(String),

    #[error("Step '{0}' sets both `run` and `tool`; pick one")]
    ConflictingAction(String),

    #[error("Duplicate step name: '{0}'")]
    DuplicateName(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Cyclic dependency between steps: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),
}

/// Treats absent and whitespace-only strings the same way.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validates a single step definition and converts it.
///
/// `index` is the zero-based position in the document, used when the step
/// has no name to report.
fn validate_step(index: usize, def: StepDef) -> Result<Step, ValidationError> {
    let name = non_blank(def.name).ok_or(ValidationError::MissingName(index + 1))?;

    let action = match (non_blank(def.run), non_blank(def.tool)) {
        (Some(command), None) => Action::Shell(command),
        (None, Some(tool)) => Action::Tool {
            tool,
            args: def.args,
        },
        (Some(_), Some(_)) => return Err(ValidationError::ConflictingAction(name)),
        (None, None) => return Err(ValidationError::MissingAction(name)),
    };

    let mut step = Step {
        name,
        action,
        input: non_blank(def.input),
        depends_on: Vec::new(),
        on_fail: def.on_fail,
        timeout: None,
    }
    .with_timeout(Duration::from_secs(def.timeout));

    for dep in def.depends_on {
        step = step.depends_on(dep.trim());
    }

    debug!("Step '{}' validated: {}", step.name, step.action.describe());
    Ok(step)
}

/// Validates a raw workflow document.
///
/// Names and actions are checked step by step in declaration order.
/// Dependencies are checked afterwards, once every name is known.
pub fn validate_definition(def: WorkflowDef) -> Result<Workflow, ValidationError> {
    info!(
        "Validating workflow '{}' with {} steps",
        def.name,
        def.steps.len()
    );

    let mut workflow = Workflow::new(def.name);
    workflow.description = def.description;

    for (index, step_def) in def.steps.into_iter().enumerate() {
        workflow.add_step(validate_step(index, step_def)?)?;
    }
    check_references(&workflow)?;

    let roots: Vec<&str> = workflow.root_steps().iter().map(|s| s.name.as_str()).collect();
    info!(
        "Workflow validated: {} steps, entry points: {}",
        workflow.len(),
        roots.join(", ")
    );
    Ok(workflow)
}

/// Checks that every dependency names a declared step.
///
/// Public so callers building a [`Workflow`] in code can apply the same
/// check that the parser applies to documents.
pub fn check_references(workflow: &Workflow) -> Result<(), ValidationError> {
    let names: HashSet<&str> = workflow.steps.iter().map(|s| s.name.as_str()).collect();

    for step in &workflow.steps {
        if let Some(dep) = step.depends_on.iter().find(|d| !names.contains(d.as_str())) {
            return Err(ValidationError::UnknownDependency {
                step: step.name.clone(),
                dependency: dep.clone(),
            });
        }
    }

    Ok(())
}
