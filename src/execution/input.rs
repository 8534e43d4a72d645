//! Step Input Resolution
//!
//! An input expression is a comma-separated list of parts, each trimmed and
//! read by prefix:
//!
//! | Part            | Contributes                                        |
//! |-----------------|----------------------------------------------------|
//! | `step:<name>`   | captured output of an earlier step (or nothing)    |
//! | `file:<path>`   | file contents, skipped if unreadable               |
//! | `git:diff`      | `git diff`, skipped on failure                     |
//! | `git:staged`    | `git diff --cached`, skipped on failure            |
//! | `git:log`       | `git log --oneline -n 20`, skipped on failure      |
//! | anything else   | the text itself                                    |
//!
//! Contributions are joined with a blank line. Resolution never fails.
//! A VCS query that does not finish within the query timeout is killed and
//! contributes nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};
use once_cell::sync::Lazy;
use tokio::process::Command;

/// Separator placed between resolved parts.
pub const PART_SEPARATOR: &str = "\n\n";

/// Default bound on a single VCS query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

const GIT_DIFF: &[&str] = &["diff"];
const GIT_STAGED: &[&str] = &["diff", "--cached"];
const GIT_LOG: &[&str] = &["log", "--oneline", "-n", "20"];

/// Fixed VCS queries: token -> (program, args).
static VCS_QUERIES: Lazy<HashMap<&'static str, (&'static str, &'static [&'static str])>> =
    Lazy::new(|| {
        HashMap::from([
            ("git:diff", ("git", GIT_DIFF)),
            ("git:staged", ("git", GIT_STAGED)),
            ("git:log", ("git", GIT_LOG)),
        ])
    });

/// One parsed part of an input expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputPart {
    StepOutput(String),
    File(String),
    Vcs(String),
    Literal(String),
}

/// Splits an input expression into typed parts. Empty parts are dropped.
pub fn parse_input(expression: &str) -> Vec<InputPart> {
    expression
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            if let Some(name) = part.strip_prefix("step:") {
                InputPart::StepOutput(name.trim().to_string())
            } else if let Some(path) = part.strip_prefix("file:") {
                InputPart::File(path.trim().to_string())
            } else if VCS_QUERIES.contains_key(part) {
                InputPart::Vcs(part.to_string())
            } else {
                InputPart::Literal(part.to_string())
            }
        })
        .collect()
}

/// Resolves input expressions against step outputs, files and VCS queries.
#[derive(Debug, Clone)]
pub struct InputResolver {
    working_dir: Option<PathBuf>,
    query_timeout: Duration,
}

impl Default for InputResolver {
    fn default() -> Self {
        Self::new(None)
    }
}

impl InputResolver {
    /// Creates a resolver. Relative `file:` paths and VCS queries use
    /// `working_dir` when set, the current directory otherwise.
    pub fn new(working_dir: Option<PathBuf>) -> Self {
        Self {
            working_dir,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    /// Overrides how long a VCS query may run before it is killed.
    pub fn with_query_timeout(mut self, limit: Duration) -> Self {
        self.query_timeout = limit;
        self
    }

    /// Produces the text for a step's stdin.
    pub async fn resolve(&self, expression: &str, outputs: &HashMap<String, String>) -> String {
        let mut resolved: Vec<String> = Vec::new();

        for part in parse_input(expression) {
            match part {
                InputPart::StepOutput(name) => {
                    if !outputs.contains_key(&name) {
                        debug!("No recorded output for step '{}'", name);
                    }
                    resolved.push(outputs.get(&name).cloned().unwrap_or_default());
                }
                InputPart::File(path) => match tokio::fs::read_to_string(self.path_for(&path)).await {
                    Ok(content) => resolved.push(content),
                    Err(e) => debug!("Skipping unreadable input file '{}': {}", path, e),
                },
                InputPart::Vcs(token) => {
                    if let Some(output) = self.run_vcs_query(&token).await {
                        resolved.push(output);
                    }
                }
                InputPart::Literal(text) => resolved.push(text),
            }
        }

        resolved.join(PART_SEPARATOR)
    }

    fn path_for(&self, path: &str) -> PathBuf {
        match &self.working_dir {
            Some(dir) if Path::new(path).is_relative() => dir.join(path),
            _ => PathBuf::from(path),
        }
    }

    async fn run_vcs_query(&self, token: &str) -> Option<String> {
        let (program, args) = VCS_QUERIES.get(token)?;
        self.run_query(token, program, args).await
    }

    /// Runs a query program and returns its stdout when it exits cleanly in
    /// time.
    async fn run_query(&self, token: &str, program: &str, args: &[&str]) -> Option<String> {
        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        match tokio::time::timeout(self.query_timeout, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => {
                debug!("Skipping '{}': {} exited with {}", token, program, output.status);
                None
            }
            Ok(Err(e)) => {
                debug!("Skipping '{}': could not run {}: {}", token, program, e);
                None
            }
            Err(_) => {
                warn!(
                    "Skipping '{}': {} did not finish within {:?}",
                    token, program, self.query_timeout
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn outputs() -> HashMap<String, String> {
        HashMap::from([
            ("s1".to_string(), "output1".to_string()),
            ("s2".to_string(), "output2".to_string()),
        ])
    }

    #[test]
    fn test_parse_input_parts() {
        let parts = parse_input(" step:a , file: notes.md,git:log,hello,, ");
        assert_eq!(
            parts,
            vec![
                InputPart::StepOutput("a".to_string()),
                InputPart::File("notes.md".to_string()),
                InputPart::Vcs("git:log".to_string()),
                InputPart::Literal("hello".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_unknown_git_token_is_literal() {
        assert_eq!(
            parse_input("git:blame"),
            vec![InputPart::Literal("git:blame".to_string())]
        );
    }

    #[tokio::test]
    async fn test_step_outputs_joined() {
        let resolver = InputResolver::default();
        let text = resolver.resolve("step:s1,step:s2", &outputs()).await;
        assert_eq!(text, "output1\n\noutput2");
    }

    #[tokio::test]
    async fn test_missing_step_is_empty() {
        let resolver = InputResolver::default();
        assert_eq!(resolver.resolve("step:missing", &outputs()).await, "");
    }

    #[tokio::test]
    async fn test_literal_passes_through() {
        let resolver = InputResolver::default();
        assert_eq!(
            resolver.resolve("literal text", &HashMap::new()).await,
            "literal text"
        );
    }

    #[tokio::test]
    async fn test_empty_expression() {
        let resolver = InputResolver::default();
        assert_eq!(resolver.resolve("", &outputs()).await, "");
        assert_eq!(resolver.resolve(" , ,", &outputs()).await, "");
    }

    #[tokio::test]
    async fn test_file_part_relative_to_working_dir() {
        let temp_dir = tempdir().unwrap();
        std::fs::write(temp_dir.path().join("notes.md"), "# Notes").unwrap();

        let resolver = InputResolver::new(Some(temp_dir.path().to_path_buf()));
        let text = resolver.resolve("Review:, file:notes.md", &HashMap::new()).await;
        assert_eq!(text, "Review:\n\n# Notes");
    }

    #[tokio::test]
    async fn test_file_part_absolute_path() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("abs.txt");
        std::fs::write(&path, "absolute").unwrap();

        let resolver = InputResolver::new(Some(PathBuf::from("/somewhere/else")));
        let text = resolver
            .resolve(&format!("file:{}", path.display()), &HashMap::new())
            .await;
        assert_eq!(text, "absolute");
    }

    #[tokio::test]
    async fn test_unreadable_file_is_omitted() {
        let resolver = InputResolver::default();
        let text = resolver
            .resolve("step:s1,file:/nonexistent/input.txt,tail", &outputs())
            .await;
        assert_eq!(text, "output1\n\ntail");
    }

    #[tokio::test]
    async fn test_vcs_query_outside_repository_is_omitted() {
        // A fresh temp dir is not a git repository, so every git query fails
        // (or git is missing entirely); either way nothing is contributed.
        let temp_dir = tempdir().unwrap();
        let resolver = InputResolver::new(Some(temp_dir.path().to_path_buf()));
        let text = resolver.resolve("git:log,step:s2", &outputs()).await;
        assert_eq!(text, "output2");
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=Wavepipe", "-c", "user.email=wavepipe@example.com"])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[tokio::test]
    async fn test_vcs_queries_read_repository() {
        let temp_dir = tempdir().unwrap();
        let repo = temp_dir.path();
        git(repo, &["init", "-q"]);
        std::fs::write(repo.join("tracked.txt"), "1\n").unwrap();
        git(repo, &["add", "tracked.txt"]);
        git(repo, &["commit", "-q", "-m", "first commit"]);

        std::fs::write(repo.join("tracked.txt"), "1\n2\n").unwrap();
        std::fs::write(repo.join("staged.txt"), "queued\n").unwrap();
        git(repo, &["add", "staged.txt"]);

        let resolver = InputResolver::new(Some(repo.to_path_buf()));
        let no_outputs = HashMap::new();

        let log = resolver.resolve("git:log", &no_outputs).await;
        assert!(log.contains("first commit"), "log: {:?}", log);

        let diff = resolver.resolve("git:diff", &no_outputs).await;
        assert!(diff.contains("+2"), "diff: {:?}", diff);
        assert!(!diff.contains("+queued"));

        let staged = resolver.resolve("git:staged", &no_outputs).await;
        assert!(staged.contains("+queued"), "staged: {:?}", staged);
        assert!(!staged.contains("+2"));
    }

    #[tokio::test]
    async fn test_slow_query_is_killed_and_omitted() {
        let resolver = InputResolver::default().with_query_timeout(Duration::from_millis(200));

        let start = std::time::Instant::now();
        let result = resolver.run_query("slow", "sleep", &["10"]).await;

        assert_eq!(result, None);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
