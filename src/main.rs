//! Wavepipe CLI Entry Point
//!
//! Loads a workflow file, runs it, and prints per-step results.
//!
//! # Usage
//!
//! ```bash
//! # Execute a workflow
//! wavepipe workflow.yaml
//!
//! # Preview the wave plan without running anything
//! wavepipe workflow.yaml --dry-run
//!
//! # Inject credentials and cap concurrency
//! wavepipe workflow.yaml --env API_TOKEN=secret --parallel 4
//!
//! # Machine-readable results
//! wavepipe workflow.yaml --json
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use wavepipe::execution::{Engine, RunReport};
use wavepipe::workflow::load_workflow;
use wavepipe::{APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yaml";

/// Longest stretch of step output echoed in the text summary.
const OUTPUT_PREVIEW_CHARS: usize = 400;

/// Command-line configuration parsed from arguments.
#[derive(Debug, PartialEq)]
struct Config {
    workflow_path: String,
    dry_run: bool,
    working_dir: Option<PathBuf>,
    /// 0 means no cap
    max_parallel: usize,
    env: Vec<String>,
    json: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: DEFAULT_WORKFLOW.to_string(),
            dry_run: false,
            working_dir: None,
            max_parallel: 0,
            env: Vec::new(),
            json: false,
            verbose: false,
        }
    }
}

/// What the command line asked for.
#[derive(Debug, PartialEq)]
enum Command {
    Run(Config),
    Help,
    Version,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: wavepipe [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML file (default: {})", DEFAULT_WORKFLOW);
    println!();
    println!("Options:");
    println!("  --dry-run           Print the wave plan without running steps");
    println!("  --working-dir PATH  Directory steps and file inputs are relative to");
    println!("  --parallel N        Maximum steps running at once (default: unbounded)");
    println!("  --env KEY=VALUE     Environment assignment for every step (repeatable)");
    println!("  --json              Print results as JSON");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
}

/// Parses command-line arguments (program name first).
fn parse_arguments(args: &[String]) -> Result<Command, String> {
    let mut config = Config::default();
    let mut positional_seen = false;
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--version" | "-V" => return Ok(Command::Version),
            "--dry-run" => config.dry_run = true,
            "--json" => config.json = true,
            "--verbose" | "-v" => config.verbose = true,
            "--working-dir" => {
                i += 1;
                let dir = args
                    .get(i)
                    .ok_or("--working-dir requires a path argument")?;
                config.working_dir = Some(PathBuf::from(dir));
            }
            "--parallel" => {
                i += 1;
                let value = args.get(i).ok_or("--parallel requires a number argument")?;
                config.max_parallel = value
                    .parse()
                    .map_err(|_| format!("Invalid parallel value: {}", value))?;
            }
            "--env" => {
                i += 1;
                let entry = args.get(i).ok_or("--env requires a KEY=VALUE argument")?;
                if !entry.contains('=') {
                    return Err(format!("Invalid --env value (expected KEY=VALUE): {}", entry));
                }
                config.env.push(entry.clone());
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if positional_seen {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.workflow_path = arg.clone();
                positional_seen = true;
            }
        }
        i += 1;
    }

    Ok(Command::Run(config))
}

/// Shortens long step output for the text summary.
fn preview(output: &str) -> String {
    let trimmed = output.trim_end();
    if trimmed.chars().count() <= OUTPUT_PREVIEW_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(OUTPUT_PREVIEW_CHARS).collect();
    format!("{}... [truncated]", head)
}

/// Prints one line per step plus its output, then the timeline.
fn print_report(report: &RunReport) {
    println!();
    for result in &report.results {
        let marker = if result.is_timeout() {
            "TIMEOUT".yellow().bold()
        } else if result.is_success() {
            "PASS".green().bold()
        } else {
            "FAIL".red().bold()
        };

        println!(
            "{} {} ({:.2?}, exit {})",
            marker, result.step_name, result.duration, result.exit_code
        );
        if let Some(err) = &result.error {
            println!("  error: {}", err);
        }
        let text = preview(&result.output);
        if !text.is_empty() {
            for line in text.lines() {
                println!("  | {}", line);
            }
        }
    }

    if let Some(step) = &report.halted_by {
        println!();
        println!("{} stopped after '{}' failed", "HALTED".red().bold(), step);
    }

    println!("{}", report.timeline.gantt_chart());
}

/// Main application flow. Returns whether the workflow succeeded.
async fn run(config: Config) -> Result<bool, Box<dyn std::error::Error>> {
    setup_logging(config.verbose);

    if !config.json {
        println!();
        println!("{} v{}", APP_NAME, VERSION);
        println!();
    }

    if let Some(dir) = &config.working_dir {
        if !dir.is_dir() {
            return Err(format!("Working directory does not exist: {}", dir.display()).into());
        }
    }

    let workflow = load_workflow(&config.workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        e
    })?;

    info!(
        "Workflow '{}' loaded: {} steps",
        workflow.name,
        workflow.len()
    );

    let mut engine = Engine::new(workflow);
    engine.set_env(&config.env);
    engine.set_max_parallel(config.max_parallel);
    engine.set_verbose(config.verbose);
    if let Some(dir) = config.working_dir {
        engine.set_working_dir(dir);
    }

    if config.dry_run {
        let plan = engine.plan()?;
        info!("Mode: DRY RUN (commands will not execute)");
        println!(
            "{} waves, up to {} steps at once",
            plan.len(),
            plan.max_width()
        );
        println!("{}", plan.describe());
        return Ok(true);
    }

    let report = engine.run().await?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&report.results)?);
    } else {
        print_report(&report);
    }

    Ok(report.is_success())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();

    let config = match parse_arguments(&args) {
        Ok(Command::Run(config)) => config,
        Ok(Command::Help) => {
            print_usage();
            return ExitCode::SUCCESS;
        }
        Ok(Command::Version) => {
            println!("{} {}", APP_NAME, VERSION);
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            return ExitCode::FAILURE;
        }
    };

    match run(config).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
