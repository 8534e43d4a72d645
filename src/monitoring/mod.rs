//! Run Monitoring Module
//!
//! Tracks what happened during a workflow run.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: step state transitions and Gantt-style timing

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, StepStatus, TimelineEvent};
