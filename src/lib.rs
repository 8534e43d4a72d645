//! Wavepipe - Wave-Parallel Workflow Engine
//!
//! Runs multi-step pipelines where each step is a shell command or a direct
//! tool invocation. Steps declare their dependencies; the engine groups them
//! into waves and runs every step of a wave at the same time, feeding each
//! step's stdin from the outputs of earlier steps, files, or git.
//!
//! # Architecture
//!
//! The library is organized into three main modules:
//!
//! - [`workflow`]: Data structures, parsing, validation and wave planning
//! - [`execution`]: Input resolution, step execution and the wave runner
//! - [`monitoring`]: Step state tracking and execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use wavepipe::execution::Engine;
//! use wavepipe::load_workflow;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let workflow = load_workflow("pipeline.yaml")?;
//!
//!     // Create execution engine
//!     let mut engine = Engine::new(workflow);
//!     engine.set_working_dir("/data/project");
//!
//!     // Execute the workflow
//!     let report = engine.run().await?;
//!     for result in &report.results {
//!         println!("{}: {}", result.step_name, result.exit_code);
//!     }
//!     Ok(())
//! }
//! ```

pub mod execution;
pub mod monitoring;
pub mod workflow;

// Re-export commonly used types
pub use execution::{Engine, RunReport, StepResult};
pub use workflow::model::{Step, Workflow};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Wavepipe";
