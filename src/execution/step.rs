//! Individual Step Execution
//!
//! Handles the execution of a single workflow step:
//! - building the process for a shell command or direct tool invocation
//! - overlaying the injected environment
//! - feeding the resolved input on stdin
//! - capturing stdout/stderr
//! - enforcing the step timeout

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, error, warn};
use serde::{Serialize, Serializer};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::workflow::{Action, Step};

/// Error text recorded for a step killed by its timeout.
pub const TIMEOUT_ERROR: &str = "timeout";

/// Exit code recorded for a step killed by its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Interpreter used for `run:` commands.
const SHELL: &str = "sh";

/// Supplies the environment assignments injected into every step.
///
/// Entries are opaque `KEY=VALUE` strings, typically provided by a
/// credential store.
pub trait EnvProvider: Send + Sync {
    fn env(&self) -> Vec<String>;
}

impl EnvProvider for Vec<String> {
    fn env(&self) -> Vec<String> {
        self.clone()
    }
}

/// Outcome of one step. Created once when the step finishes or is killed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub step_name: String,
    /// Stdout on success, stderr on failure, empty on timeout
    pub output: String,
    #[serde(rename = "duration_ms", serialize_with = "serialize_millis")]
    pub duration: Duration,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

fn serialize_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl StepResult {
    /// Builds a failed result that never got as far as producing output,
    /// e.g. a worker task that panicked.
    pub fn failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_name: step_name.into(),
            output: String::new(),
            duration: Duration::ZERO,
            exit_code: 1,
            error: Some(error.into()),
            started_at: Utc::now(),
        }
    }

    /// Returns true if the step exited successfully.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Returns true if the step was killed by its timeout.
    pub fn is_timeout(&self) -> bool {
        self.error.as_deref() == Some(TIMEOUT_ERROR)
    }
}

/// Per-run settings shared by every step.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    /// Parsed `KEY=VALUE` pairs, overlaid on the inherited environment
    pub env: Vec<(String, String)>,
    /// Directory processes start in; the current directory when unset
    pub working_dir: Option<PathBuf>,
}

impl StepContext {
    /// Builds a context from raw `KEY=VALUE` strings.
    ///
    /// Keys and values are kept exactly as given. Entries without `=` or with
    /// an empty key are skipped.
    pub fn new(env: &[String], working_dir: Option<PathBuf>) -> Self {
        let env = env
            .iter()
            .filter_map(|entry| match entry.split_once('=') {
                Some((key, value)) if !key.is_empty() => {
                    Some((key.to_string(), value.to_string()))
                }
                _ => {
                    warn!("Ignoring malformed environment entry (expected KEY=VALUE)");
                    None
                }
            })
            .collect();

        Self { env, working_dir }
    }
}

/// Builds the process for a step's action.
fn build_command(action: &Action, ctx: &StepContext) -> Command {
    let mut cmd = match action {
        Action::Shell(command) => {
            let mut cmd = Command::new(SHELL);
            cmd.arg("-c").arg(command);
            cmd
        }
        Action::Tool { tool, args } => {
            let mut cmd = Command::new(tool);
            cmd.args(args);
            cmd
        }
    };

    cmd.envs(ctx.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    if let Some(dir) = &ctx.working_dir {
        cmd.current_dir(dir);
    }

    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Executes a single workflow step and captures its outcome.
///
/// Never returns an error: spawn failures, non-zero exits and timeouts are
/// all recorded in the returned [`StepResult`].
///
/// # Outcomes
///
/// - success: `output` = stdout, `exit_code` = 0
/// - failure: `output` = stderr, `exit_code` = 1, `error` describes why
/// - timeout: `output` empty, `exit_code` = -1, `error` = `"timeout"`,
///   `duration` = the timeout
pub async fn execute_step(step: &Step, input: &str, ctx: &StepContext) -> StepResult {
    let started_at = Utc::now();
    let start = Instant::now();

    let mut cmd = build_command(&step.action, ctx);
    cmd.stdin(if input.is_empty() {
        Stdio::null()
    } else {
        Stdio::piped()
    });

    debug!("Step '{}' spawning: {}", step.name, step.action.describe());

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Step '{}' failed to start: {}", step.name, e);
            return StepResult {
                step_name: step.name.clone(),
                output: String::new(),
                duration: start.elapsed(),
                exit_code: 1,
                error: Some(format!("failed to start '{}': {}", step.action.describe(), e)),
                started_at,
            };
        }
    };

    // Written from its own task so a child that fills its stdout pipe before
    // draining stdin cannot deadlock us.
    if let Some(mut stdin) = child.stdin.take() {
        let input = input.to_owned();
        let step_name = step.name.clone();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!("Step '{}' closed stdin early: {}", step_name, e);
            }
        });
    }

    let waited = match step.timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(waited) => waited,
            Err(_) => {
                // Dropping the wait future dropped the child, and
                // kill_on_drop sends the kill.
                warn!("Step '{}' timed out after {:?}", step.name, limit);
                return StepResult {
                    step_name: step.name.clone(),
                    output: String::new(),
                    duration: limit,
                    exit_code: TIMEOUT_EXIT_CODE,
                    error: Some(TIMEOUT_ERROR.to_string()),
                    started_at,
                };
            }
        },
        None => child.wait_with_output().await,
    };

    let duration = start.elapsed();

    match waited {
        Ok(output) if output.status.success() => {
            debug!("Step '{}' completed in {:?}", step.name, duration);
            StepResult {
                step_name: step.name.clone(),
                output: String::from_utf8_lossy(&output.stdout).into_owned(),
                duration,
                exit_code: 0,
                error: None,
                started_at,
            }
        }
        Ok(output) => {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            error!("Step '{}' failed with {}", step.name, output.status);
            if !stderr.trim().is_empty() {
                debug!("stderr:\n{}", stderr);
            }
            StepResult {
                step_name: step.name.clone(),
                output: stderr,
                duration,
                exit_code: 1,
                error: Some(output.status.to_string()),
                started_at,
            }
        }
        Err(e) => {
            error!("Step '{}' could not be awaited: {}", step.name, e);
            StepResult {
                step_name: step.name.clone(),
                output: String::new(),
                duration,
                exit_code: 1,
                error: Some(e.to_string()),
                started_at,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ctx() -> StepContext {
        StepContext::default()
    }

    #[tokio::test]
    async fn test_echo_succeeds() {
        let step = Step::shell("hello", "echo hello world");
        let result = execute_step(&step, "", &ctx()).await;

        assert_eq!(result.step_name, "hello");
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.output, "hello world\n");
        assert!(result.error.is_none());
        assert!(result.is_success());
    }

    #[tokio::test]
    async fn test_false_fails() {
        let step = Step::shell("nope", "false");
        let result = execute_step(&step, "", &ctx()).await;

        assert_eq!(result.exit_code, 1);
        assert!(result.error.as_deref().is_some_and(|e| !e.is_empty()));
        assert!(!result.is_success());
        assert!(!result.is_timeout());
    }

    #[tokio::test]
    async fn test_failure_output_is_stderr() {
        let step = Step::shell("noisy", "echo out; echo err >&2; exit 3");
        let result = execute_step(&step, "", &ctx()).await;

        assert_eq!(result.exit_code, 1);
        assert_eq!(result.output, "err\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let step = Step::shell("slow", "sleep 10").with_timeout(Duration::from_secs(1));

        let start = Instant::now();
        let result = execute_step(&step, "", &ctx()).await;
        let waited = start.elapsed();

        assert_eq!(result.error.as_deref(), Some(TIMEOUT_ERROR));
        assert_eq!(result.exit_code, TIMEOUT_EXIT_CODE);
        assert_eq!(result.duration, Duration::from_secs(1));
        assert!(result.output.is_empty());
        assert!(result.is_timeout());
        assert!(waited < Duration::from_secs(8), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_fast_step_beats_timeout() {
        let step = Step::shell("quick", "echo done").with_timeout(Duration::from_secs(5));
        let result = execute_step(&step, "", &ctx()).await;

        assert!(result.is_success());
        assert_eq!(result.output, "done\n");
    }

    #[tokio::test]
    async fn test_input_goes_to_stdin() {
        let step = Step::tool("upper", "tr", ["a-z", "A-Z"]);
        let result = execute_step(&step, "shout", &ctx()).await;

        assert!(result.is_success(), "{:?}", result.error);
        assert_eq!(result.output, "SHOUT");
    }

    #[tokio::test]
    async fn test_large_input_does_not_deadlock() {
        let input = "x".repeat(1 << 20);
        let step = Step::tool("copy", "cat", Vec::<String>::new())
            .with_timeout(Duration::from_secs(10));
        let result = execute_step(&step, &input, &ctx()).await;

        assert!(result.is_success());
        assert_eq!(result.output.len(), input.len());
    }

    #[tokio::test]
    async fn test_missing_tool_is_spawn_failure() {
        let step = Step::tool("ghost", "definitely-not-a-real-binary-xyz", ["--help"]);
        let result = execute_step(&step, "", &ctx()).await;

        assert_eq!(result.exit_code, 1);
        assert!(result
            .error
            .as_deref()
            .is_some_and(|e| e.contains("failed to start")));
    }

    #[tokio::test]
    async fn test_env_is_injected() {
        let ctx = StepContext::new(
            &["GREETING=hi there".to_string(), "EQ=a=b".to_string()],
            None,
        );
        let step = Step::shell("env", "printf '%s|%s' \"$GREETING\" \"$EQ\"");
        let result = execute_step(&step, "", &ctx).await;

        assert_eq!(result.output, "hi there|a=b");
    }

    #[tokio::test]
    async fn test_working_dir_is_applied() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(temp_dir.path().join("marker.txt"), "here").unwrap();

        let ctx = StepContext::new(&[], Some(temp_dir.path().to_path_buf()));
        let step = Step::shell("read", "cat marker.txt");
        let result = execute_step(&step, "", &ctx).await;

        assert_eq!(result.output, "here");
    }

    #[test]
    fn test_context_skips_malformed_env() {
        let ctx = StepContext::new(
            &[
                "GOOD=1".to_string(),
                "no-equals".to_string(),
                "=value".to_string(),
                "EMPTY=".to_string(),
            ],
            None,
        );
        assert_eq!(
            ctx.env,
            vec![
                ("GOOD".to_string(), "1".to_string()),
                ("EMPTY".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_context_keeps_env_entries_verbatim() {
        let ctx = StepContext::new(&[" PADDED = spaced value ".to_string()], None);
        assert_eq!(
            ctx.env,
            vec![(" PADDED ".to_string(), " spaced value ".to_string())]
        );
    }

    #[test]
    fn test_vec_env_provider() {
        let provider = vec!["A=1".to_string()];
        assert_eq!(provider.env(), vec!["A=1"]);
    }

    #[test]
    fn test_result_serializes_millis() {
        let mut result = StepResult::failed("s", "boom");
        result.duration = Duration::from_millis(1500);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["error"], "boom");
        assert_eq!(json["exit_code"], 1);
    }
}
