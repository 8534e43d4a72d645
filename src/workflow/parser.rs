//! Workflow Parser
//!
//! Loads workflow documents from YAML files (JSON documents parse too, since
//! JSON is valid YAML) and runs them through the validator.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

use super::model::{Workflow, WorkflowDef};
use super::validator::{validate_definition, ValidationError};

/// Errors raised while turning a file into a [`Workflow`].
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Failed to read workflow file '{}': {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse workflow document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid workflow: {0}")]
    Invalid(#[from] ValidationError),
}

/// Loads a workflow from a YAML file.
///
/// This function:
/// 1. Reads the file
/// 2. Deserializes the raw definitions
/// 3. Validates names, actions and dependency references
///
/// # Example
///
/// ```rust,no_run
/// use wavepipe::workflow::load_workflow;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     println!("Loaded {} steps", workflow.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_workflow(path: impl AsRef<Path>) -> Result<Workflow, LoadError> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    debug!("Workflow document loaded ({} bytes)", content.len());
    parse_workflow(&content)
}

/// Parses and validates a workflow document held in memory.
pub fn parse_workflow(content: &str) -> Result<Workflow, LoadError> {
    // An empty document deserializes as null, which serde_yaml rejects for a
    // struct; treat it as a workflow with no steps instead.
    let def: WorkflowDef = if content.trim().is_empty() {
        WorkflowDef::default()
    } else {
        serde_yaml::from_str(content)?
    };

    debug!("Parsed {} step definitions", def.steps.len());
    Ok(validate_definition(def)?)
}
