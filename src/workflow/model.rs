//! Workflow Data Model
//!
//! Core data structures representing workflow steps and their relationships.
//!
//! Two layers live here: the raw definitions deserialized straight from the
//! workflow document ([`WorkflowDef`], [`StepDef`]) and the validated model
//! the engine runs ([`Workflow`], [`Step`]). Only the validator turns one into
//! the other.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: review
//! description: Summarise the working tree changes
//! steps:
//!   - name: diff
//!     run: git diff --stat
//!
//!   - name: summarise
//!     tool: llm
//!     args: ["-m", "small"]
//!     input: step:diff
//!     depends_on: [diff]
//!     on_fail: continue
//!     timeout: 120
//! ```

use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::validator::ValidationError;

/// What a step actually runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// A command line handed to `sh -c` as one string
    Shell(String),
    /// An executable invoked directly with its own argument vector
    Tool { tool: String, args: Vec<String> },
}

impl Action {
    /// Short human-readable form used in logs and dry-run output.
    pub fn describe(&self) -> String {
        match self {
            Action::Shell(command) => command.clone(),
            Action::Tool { tool, args } if args.is_empty() => tool.clone(),
            Action::Tool { tool, args } => format!("{} {}", tool, args.join(" ")),
        }
    }
}

/// What to do with the rest of the run when a step fails.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnFail {
    /// Finish the current wave, then start no further waves
    #[default]
    Stop,
    /// Record the failure and keep going
    Continue,
}

impl<'de> Deserialize<'de> for OnFail {
    /// Only `continue` opts out; any other value (or none) means stop.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw {
            Some(s) if s.trim().eq_ignore_ascii_case("continue") => OnFail::Continue,
            _ => OnFail::Stop,
        })
    }
}

/// Represents a single validated step in a workflow.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique identifier for this step
    pub name: String,

    /// Shell command or tool invocation
    pub action: Action,

    /// Input expression resolved into the process's stdin
    pub input: Option<String>,

    /// Names of steps that must complete before this one starts
    pub depends_on: Vec<String>,

    /// Failure policy
    pub on_fail: OnFail,

    /// Wall-clock limit; `None` means unbounded
    pub timeout: Option<Duration>,
}

impl Step {
    /// Creates a step that runs `command` through the shell.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use wavepipe::workflow::Step;
    ///
    /// let step = Step::shell("lint", "cargo clippy")
    ///     .with_input("step:fmt")
    ///     .depends_on("fmt")
    ///     .with_timeout(Duration::from_secs(60));
    /// ```
    pub fn shell(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_action(name, Action::Shell(command.into()))
    }

    /// Creates a step that invokes `tool` directly with `args`.
    pub fn tool<I, S>(name: impl Into<String>, tool: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_action(
            name,
            Action::Tool {
                tool: tool.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
        )
    }

    fn with_action(name: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into().trim().to_string(),
            action,
            input: None,
            depends_on: Vec::new(),
            on_fail: OnFail::Stop,
            timeout: None,
        }
    }

    /// Sets the input expression.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_name: impl Into<String>) -> Self {
        let step_name = step_name.into();
        if !self.depends_on.contains(&step_name) {
            self.depends_on.push(step_name);
        }
        self
    }

    /// Sets the failure policy.
    pub fn with_on_fail(mut self, on_fail: OnFail) -> Self {
        self.on_fail = on_fail;
        self
    }

    /// Sets the timeout. A zero duration means unbounded.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }
}

/// Represents a complete workflow with multiple steps.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Workflow {
    pub name: String,
    pub description: String,
    /// Steps in declaration order
    pub steps: Vec<Step>,
}

impl Workflow {
    /// Creates a new empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
        }
    }

    /// Creates an unnamed workflow from a list of steps.
    ///
    /// No validation happens here; use [`super::validator::validate_definition`]
    /// for untrusted input.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Adds a step, rejecting duplicate names.
    pub fn add_step(&mut self, step: Step) -> Result<(), ValidationError> {
        if self.get_step(&step.name).is_some() {
            return Err(ValidationError::DuplicateName(step.name));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Gets a step by name.
    pub fn get_step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns steps with no dependencies (entry points).
    pub fn root_steps(&self) -> Vec<&Step> {
        self.steps.iter().filter(|s| s.depends_on.is_empty()).collect()
    }

    /// Returns the number of steps in the workflow.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Raw workflow document, exactly as written.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct WorkflowDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<StepDef>,
}

/// Raw step record. Fields are all optional so the validator, not serde,
/// gets to report what is missing.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct StepDef {
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command
    #[serde(default)]
    pub run: Option<String>,

    /// Executable for a direct invocation
    #[serde(default)]
    pub tool: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub input: Option<String>,

    #[serde(deserialize_with = "single_or_vec", default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub on_fail: OnFail,

    /// Seconds; 0 means unbounded
    #[serde(default)]
    pub timeout: u64,
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.trim().is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_creation() {
        let step = Step::shell(" build ", "make")
            .with_input("file:Makefile")
            .depends_on("fetch")
            .with_on_fail(OnFail::Continue)
            .with_timeout(Duration::from_secs(5));

        assert_eq!(step.name, "build");
        assert_eq!(step.action, Action::Shell("make".to_string()));
        assert_eq!(step.input.as_deref(), Some("file:Makefile"));
        assert_eq!(step.depends_on, vec!["fetch"]);
        assert_eq!(step.on_fail, OnFail::Continue);
        assert_eq!(step.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_tool_step() {
        let step = Step::tool("fmt", "rustfmt", ["--check", "src/lib.rs"]);
        assert_eq!(
            step.action,
            Action::Tool {
                tool: "rustfmt".to_string(),
                args: vec!["--check".to_string(), "src/lib.rs".to_string()],
            }
        );
        assert_eq!(step.action.describe(), "rustfmt --check src/lib.rs");
    }

    #[test]
    fn test_zero_timeout_is_unbounded() {
        let step = Step::shell("s", "true").with_timeout(Duration::ZERO);
        assert!(step.timeout.is_none());
    }

    #[test]
    fn test_depends_on_collapses_duplicates() {
        let step = Step::shell("s", "true").depends_on("a").depends_on("a").depends_on("b");
        assert_eq!(step.depends_on, vec!["a", "b"]);
    }

    #[test]
    fn test_workflow_add_step() {
        let mut workflow = Workflow::new("wf");
        let step = Step::shell("step1", "echo test");

        assert!(workflow.add_step(step.clone()).is_ok());
        assert!(matches!(
            workflow.add_step(step),
            Err(ValidationError::DuplicateName(name)) if name == "step1"
        ));
        assert_eq!(workflow.len(), 1);
    }

    #[test]
    fn test_workflow_root_steps() {
        let workflow = Workflow::from_steps(vec![
            Step::shell("root", "echo root"),
            Step::shell("leaf", "echo leaf").depends_on("root"),
        ]);

        let roots = workflow.root_steps();
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].name, "root");
    }

    #[test]
    fn test_workflow_default_is_empty() {
        let workflow = Workflow::default();
        assert!(workflow.is_empty());
        assert!(workflow.get_step("anything").is_none());
    }

    #[test]
    fn test_step_def_on_fail_parsing() {
        let yaml = r#"
- name: a
  run: "true"
  on_fail: continue
- name: b
  run: "true"
  on_fail: Continue
- name: c
  run: "true"
  on_fail: explode
- name: d
  run: "true"
"#;
        let defs: Vec<StepDef> = serde_yaml::from_str(yaml).unwrap();
        let policies: Vec<OnFail> = defs.iter().map(|d| d.on_fail).collect();
        assert_eq!(
            policies,
            vec![OnFail::Continue, OnFail::Continue, OnFail::Stop, OnFail::Stop]
        );
    }

    #[test]
    fn test_step_def_depends_on_single_string() {
        let yaml = "name: b\nrun: 'true'\ndepends_on: a\n";
        let def: StepDef = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.depends_on, vec!["a"]);
    }

    #[test]
    fn test_step_def_depends_on_rejects_numbers() {
        let yaml = "name: b\nrun: 'true'\ndepends_on: [1, 2]\n";
        assert!(serde_yaml::from_str::<StepDef>(yaml).is_err());
    }
}
