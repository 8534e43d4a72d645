//! Workflow Execution Engine
//!
//! Runs a workflow wave by wave:
//! - every step of a wave is spawned as its own tokio task
//! - the engine waits for the whole wave before looking at results
//! - a failed step with `on_fail: stop` prevents any later wave from starting
//!
//! Step outputs are published to a shared map as soon as each step succeeds.
//! Tasks resolve their input from a snapshot taken when their wave starts,
//! so a step only ever sees the outputs of earlier waves.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{error, info, log, warn, Level};
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::monitoring::{EventType, ExecutionTimeline, StepStatus};
use crate::workflow::{ExecutionPlan, OnFail, Step, ValidationError, Workflow};

use super::input::InputResolver;
use super::step::{execute_step, EnvProvider, StepContext, StepResult};

type OutputMap = Arc<Mutex<HashMap<String, String>>>;

/// State every step task of a run shares.
#[derive(Clone)]
struct StepShared {
    resolver: Arc<InputResolver>,
    ctx: Arc<StepContext>,
    outputs: OutputMap,
    timeline: Arc<Mutex<ExecutionTimeline>>,
    limiter: Option<Arc<Semaphore>>,
    level: Level,
}

/// Locks a mutex, recovering the data if another task panicked with it held.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a run produced, in the order steps were declared within each
/// wave.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub workflow: String,
    pub results: Vec<StepResult>,
    /// Step whose failure stopped the run, if any
    pub halted_by: Option<String>,
    pub timeline: ExecutionTimeline,
    pub elapsed: Duration,
}

impl RunReport {
    /// True when the run was not halted and every step succeeded.
    pub fn is_success(&self) -> bool {
        self.halted_by.is_none() && self.results.iter().all(StepResult::is_success)
    }

    /// Results of the steps that failed or timed out.
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Result for a step, if it ran.
    pub fn result(&self, step_name: &str) -> Option<&StepResult> {
        self.results.iter().find(|r| r.step_name == step_name)
    }

    /// Final state of a step. Steps that never started are `Pending`.
    pub fn status(&self, step_name: &str) -> StepStatus {
        self.timeline.status_of(step_name)
    }
}

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use wavepipe::execution::Engine;
/// use wavepipe::load_workflow;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("pipeline.yaml")?;
///     let mut engine = Engine::new(workflow);
///     engine.set_env(&vec!["API_TOKEN=secret".to_string()]);
///     engine.set_working_dir("/data/project");
///
///     let report = engine.run().await?;
///     println!("{} steps ran", report.results.len());
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    env: Vec<String>,
    working_dir: Option<PathBuf>,
    max_parallel: Option<usize>,
    verbose: bool,
}

impl Engine {
    /// Creates a new execution engine for a workflow.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            env: Vec::new(),
            working_dir: None,
            max_parallel: None,
            verbose: false,
        }
    }

    /// Sets the environment assignments injected into every step.
    pub fn set_env(&mut self, provider: &dyn EnvProvider) {
        self.env = provider.env();
    }

    /// Sets the working directory for steps, `file:` inputs and VCS queries.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Caps how many steps of a wave run at the same time. Zero removes the
    /// cap, which is also the default.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = (max > 0).then_some(max);
    }

    /// Logs step lifecycle at info level instead of debug.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Returns the workflow this engine runs.
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Computes the wave plan without running anything.
    pub fn plan(&self) -> Result<ExecutionPlan, ValidationError> {
        ExecutionPlan::build(&self.workflow)
    }

    /// Executes the workflow.
    ///
    /// Returns `Err` only for definition problems found while planning
    /// (a dependency cycle), before any step has started. Step failures are
    /// reported inside the [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, ValidationError> {
        let plan = self.plan()?;
        let start_time = Instant::now();

        info!(
            "Running workflow '{}': {} steps in {} waves, widest {} (max parallel: {})",
            self.workflow.name,
            self.workflow.len(),
            plan.len(),
            plan.max_width(),
            self.max_parallel
                .map_or_else(|| "unbounded".to_string(), |n| n.to_string())
        );

        let shared = StepShared {
            resolver: Arc::new(InputResolver::new(self.working_dir.clone())),
            ctx: Arc::new(StepContext::new(&self.env, self.working_dir.clone())),
            outputs: Arc::default(),
            timeline: Arc::new(Mutex::new(ExecutionTimeline::new())),
            limiter: self.max_parallel.map(|n| Arc::new(Semaphore::new(n))),
            level: if self.verbose { Level::Info } else { Level::Debug },
        };

        let mut results: Vec<StepResult> = Vec::with_capacity(self.workflow.len());
        let mut halted_by = None;

        for (index, wave) in plan.waves().iter().enumerate() {
            info!(
                "Wave {}/{}: {}",
                index + 1,
                plan.len(),
                wave.iter().map(|s| s.name.as_str()).collect::<Vec<_>>().join(", ")
            );

            let snapshot = Arc::new(lock(&shared.outputs).clone());

            let handles: Vec<_> = wave
                .iter()
                .map(|step| {
                    tokio::spawn(run_step(step.clone(), Arc::clone(&snapshot), shared.clone()))
                })
                .collect();

            let mut wave_results = Vec::with_capacity(wave.len());
            for (step, handle) in wave.iter().zip(handles) {
                wave_results.push(task_result(step, handle.await, &shared.timeline));
            }

            let stop = halting_step(wave, &wave_results);
            results.extend(wave_results);

            if let Some(name) = stop {
                error!(
                    "Step '{}' failed; skipping {} remaining wave(s)",
                    name,
                    plan.len() - index - 1
                );
                halted_by = Some(name);
                break;
            }
        }

        let timeline = lock(&shared.timeline).clone();
        let elapsed = start_time.elapsed();
        info!("Workflow '{}' finished in {:.2?}", self.workflow.name, elapsed);

        Ok(RunReport {
            workflow: self.workflow.name.clone(),
            results,
            halted_by,
            timeline,
            elapsed,
        })
    }
}

/// Turns a joined step task into its result. A task that panicked or was
/// cancelled counts as a failed step.
fn task_result(
    step: &Step,
    joined: Result<StepResult, JoinError>,
    timeline: &Mutex<ExecutionTimeline>,
) -> StepResult {
    match joined {
        Ok(result) => result,
        Err(e) => {
            error!("Step '{}' task aborted: {}", step.name, e);
            lock(timeline).add_event(step.name.as_str(), EventType::Failed);
            StepResult::failed(&step.name, format!("step task aborted: {}", e))
        }
    }
}

/// Applies `on_fail` to a finished wave. Returns the first failed step, in
/// declaration order, whose policy is `Stop`.
fn halting_step(wave: &[Step], results: &[StepResult]) -> Option<String> {
    let mut stop = None;
    for (step, result) in wave.iter().zip(results) {
        if result.is_success() {
            continue;
        }
        match step.on_fail {
            OnFail::Continue => warn!(
                "Step '{}' failed ({}); continuing",
                step.name,
                result.error.as_deref().unwrap_or_default()
            ),
            OnFail::Stop if stop.is_none() => stop = Some(step.name.clone()),
            OnFail::Stop => {}
        }
    }
    stop
}

/// Body of one step task: wait for a slot, resolve input, execute, publish.
async fn run_step(
    step: Step,
    snapshot: Arc<HashMap<String, String>>,
    shared: StepShared,
) -> StepResult {
    // Never closed, so `acquire_owned` cannot fail here.
    let _permit = match shared.limiter {
        Some(semaphore) => semaphore.acquire_owned().await.ok(),
        None => None,
    };

    let input = match &step.input {
        Some(expression) => shared.resolver.resolve(expression, &snapshot).await,
        None => String::new(),
    };

    lock(&shared.timeline).add_event(step.name.as_str(), EventType::Started);
    log!(shared.level, "Starting step: {}", step.name);

    let result = execute_step(&step, &input, &shared.ctx).await;

    if result.is_success() {
        lock(&shared.outputs).insert(step.name.clone(), result.output.clone());
        log!(shared.level, "Step '{}' completed in {:.2?}", step.name, result.duration);
    }
    lock(&shared.timeline).add_event(step.name.as_str(), EventType::for_result(&result));

    result
}
