//! Workflow Execution Module
//!
//! Provides the execution engine that runs a planned workflow wave by wave.
//!
//! # Architecture
//!
//! - [`engine`]: Wave runner, failure policy and run report
//! - [`input`]: Input expression resolution
//! - [`step`]: Single step execution with timeout and output capture

pub mod engine;
pub mod input;
pub mod step;

pub use engine::{Engine, RunReport};
pub use input::{parse_input, InputPart, InputResolver};
pub use step::{execute_step, EnvProvider, StepContext, StepResult};
