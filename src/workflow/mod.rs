//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, parsing,
//! validating and planning workflows.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, Workflow) and raw definitions
//! - [`parser`]: YAML parsing and loading
//! - [`validator`]: Definition checks and the error type they share
//! - [`planner`]: Dependency levelling into execution waves

pub mod model;
pub mod parser;
pub mod planner;
pub mod validator;

pub use model::{Action, OnFail, Step, StepDef, Workflow, WorkflowDef};
pub use parser::{load_workflow, parse_workflow, LoadError};
pub use planner::ExecutionPlan;
pub use validator::{validate_definition, ValidationError};
