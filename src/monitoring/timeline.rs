//! Execution Timeline
//!
//! Records step state transitions with timestamps. The engine uses it to
//! answer "what state is this step in" and to print a Gantt chart once the
//! run is over.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::execution::StepResult;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Step process launched
    Started,
    /// Step exited successfully
    Succeeded,
    /// Step failed to start or exited non-zero
    Failed,
    /// Step was killed by its timeout
    TimedOut,
}

impl EventType {
    /// Maps a finished result to its terminal event.
    pub fn for_result(result: &StepResult) -> Self {
        if result.is_timeout() {
            EventType::TimedOut
        } else if result.is_success() {
            EventType::Succeeded
        } else {
            EventType::Failed
        }
    }

    fn is_terminal(self) -> bool {
        !matches!(self, EventType::Started)
    }
}

/// Lifecycle state of a step within one run.
///
/// `Pending -> Running -> {Succeeded | Failed | TimedOut}`. There is no
/// cancelled state: steps in waves skipped after a stop stay `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl From<EventType> for StepStatus {
    fn from(event: EventType) -> Self {
        match event {
            EventType::Started => StepStatus::Running,
            EventType::Succeeded => StepStatus::Succeeded,
            EventType::Failed => StepStatus::Failed,
            EventType::TimedOut => StepStatus::TimedOut,
        }
    }
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub step_name: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Tracks the execution timeline of a workflow run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a step.
    ///
    /// Events after a terminal one are ignored, so a finished step's state
    /// can never change.
    pub fn add_event(&mut self, step_name: impl Into<String>, event_type: EventType) {
        let step_name = step_name.into();
        if !matches!(
            self.status_of(&step_name),
            StepStatus::Pending | StepStatus::Running
        ) {
            return;
        }

        self.events.push(TimelineEvent {
            step_name,
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Current state of a step; `Pending` if nothing was recorded.
    pub fn status_of(&self, step_name: &str) -> StepStatus {
        self.events
            .iter()
            .rev()
            .find(|e| e.step_name == step_name)
            .map_or(StepStatus::Pending, |e| e.event_type.into())
    }

    /// Returns finished step durations in milliseconds.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .map(|(name, (start, end))| (name, end - start))
            .collect()
    }

    /// Start/end offsets in milliseconds for every finished step.
    fn spans(&self) -> HashMap<String, (u128, u128)> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut spans = HashMap::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();

            if event.event_type.is_terminal() {
                if let Some(start) = starts.get(event.step_name.as_str()) {
                    spans.insert(event.step_name.clone(), (*start, elapsed));
                }
            } else {
                starts.insert(event.step_name.as_str(), elapsed);
            }
        }

        spans
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each step is shown as a bar indicating when it ran relative to the
    /// total execution time. Steps of one wave line up in the same column.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = self.elapsed().as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        let mut sorted_steps: Vec<_> = self.spans().into_iter().collect();
        sorted_steps.sort_by(|(a_name, (a_start, _)), (b_name, (b_start, _))| {
            a_start.cmp(b_start).then_with(|| a_name.cmp(b_name))
        });

        for (step_name, (start, end)) in sorted_steps {
            let start_pos = (start as f64 * scale) as usize;
            let width = ((end - start) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(width));

            output.push_str(&format!(
                "{:12} |{}| ({} ms)\n",
                truncate(&step_name, 12),
                bar,
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a name to exactly `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}
