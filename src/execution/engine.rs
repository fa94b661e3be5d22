//! Workflow Execution Engine
//!
//! The engine that drives a single workflow run:
//! - Parallel task scheduling with trigger-rule resolution
//! - Branch dispatch over declared outcome arms
//! - Run record persistence after every task transition
//! - Resource monitoring and an execution timeline
//!
//! A task failure does not abort the run; downstream trigger rules decide
//! what still executes, mirroring how an orchestration host treats partial
//! failure.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{error, info, warn};
use thiserror::Error;

use crate::monitoring::{EventType, ExecutionTimeline, ResourceMonitor};
use crate::workflow::planner::TaskStatus;
use crate::workflow::state::{RunState, StateError, STATE_DIR};
use crate::workflow::validator::{validate_workflow, WorkflowError};
use crate::workflow::{ExecutionPlanner, TaskKind, Workflow};

use super::context::{TaskContext, XcomStore};

/// Interval for resource monitoring samples.
const MONITOR_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Result message sent back from a worker thread.
///
/// `Ok(Some(target))` is a branch decision naming the chosen successor.
type TaskResult = (String, Result<Option<String>, String>);

/// Errors raised by a workflow run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("run '{}' finished with {} failed task(s): {:?}", report.run_id, report.failed.len(), report.failed)]
    RunFailed { report: RunReport },

    #[error("run stalled with {0} unschedulable task(s)")]
    Stalled(usize),

    #[error("worker channel disconnected")]
    ChannelClosed,
}

/// Outcome summary of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Logical run id
    pub run_id: String,
    /// Tasks that completed successfully, sorted by id
    pub succeeded: Vec<String>,
    /// Tasks that failed, sorted by id
    pub failed: Vec<String>,
    /// Tasks that were skipped, sorted by id
    pub skipped: Vec<String>,
    /// Wall-clock duration of the run
    pub elapsed: Duration,
}

/// Workflow execution engine.
///
/// Owns a workflow and executes one run of it at a time.
///
/// # Example
///
/// ```rust,no_run
/// use modelflow::execution::Engine;
/// use modelflow::pipeline::build_default;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = build_default()?;
///     let mut engine = Engine::new(workflow);
///     engine.set_max_parallel(4);
///     engine.run()?;
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: Workflow,
    run_id: Option<String>,
    max_parallel: usize,
    dry_run: bool,
    state_dir: PathBuf,
}

impl Engine {
    /// Creates a new execution engine for a workflow.
    pub fn new(workflow: Workflow) -> Self {
        Self {
            workflow,
            run_id: None,
            max_parallel: 4,
            dry_run: false,
            state_dir: STATE_DIR.clone(),
        }
    }

    /// Overrides the logical run id (defaults to the schedule date).
    pub fn set_run_id(&mut self, run_id: impl Into<String>) {
        self.run_id = Some(run_id.into());
    }

    /// Sets the maximum number of parallel tasks.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max;
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Sets the directory where run records are persisted.
    pub fn set_state_dir(&mut self, dir: impl Into<PathBuf>) {
        self.state_dir = dir.into();
    }

    /// Derives the logical run id from the schedule, or a manual id.
    ///
    /// With catchup disabled only the latest due interval runs; backfill
    /// of missed intervals is out of scope.
    fn resolve_run_id(&self) -> String {
        if let Some(ref run_id) = self.run_id {
            return run_id.clone();
        }

        let today = Utc::now().date_naive();
        if let Some(ref schedule) = self.workflow.schedule {
            if schedule.catchup {
                warn!("Catchup is enabled but backfill is not performed; running latest interval only");
            }
            if let Some(date) = schedule.latest_run_date(today) {
                return date.format("%Y-%m-%d").to_string();
            }
            warn!(
                "Schedule for '{}' has not started yet; falling back to a manual run",
                self.workflow.name
            );
        }

        format!("manual__{}", Utc::now().format("%Y-%m-%dT%H-%M-%S"))
    }

    /// Executes one run of the workflow.
    ///
    /// 1. Validates and topologically sorts the task graph
    /// 2. Loads a previous run record for this run id, if any
    /// 3. Schedules ready tasks in parallel worker threads
    /// 4. Applies branch decisions and cascaded skips
    /// 5. Persists the run record after each transition
    /// 6. Reports final results
    pub fn run(&mut self) -> Result<RunReport, EngineError> {
        let start_time = Instant::now();

        validate_workflow(&mut self.workflow)?;

        let run_id = self.resolve_run_id();
        info!(
            "Starting run '{}' of workflow '{}' (max parallel: {}, dry run: {})",
            run_id, self.workflow.name, self.max_parallel, self.dry_run
        );

        let store = Arc::new(XcomStore::new());

        // Resume from a previous record for the same logical run, if present
        let mut state = RunState::new(&self.workflow.name, &run_id);
        let mut planner = match RunState::load(&self.state_dir, &self.workflow.name, &run_id) {
            Ok(previous) if !self.dry_run && previous.is_resume() => {
                info!("Resuming run '{}' from previous record", run_id);
                store.restore(previous.xcoms.clone());
                let planner =
                    ExecutionPlanner::from_state(self.workflow.clone(), &previous, self.max_parallel);
                state = previous;
                planner
            }
            _ => ExecutionPlanner::new(self.workflow.clone(), self.max_parallel),
        };

        let mut timeline = ExecutionTimeline::new();

        let (tx, rx): (Sender<TaskResult>, Receiver<TaskResult>) = channel();

        // Background resource sampling for the run summary
        let monitor_running = Arc::new(AtomicBool::new(true));
        let monitor_flag = Arc::clone(&monitor_running);
        let monitor_handle = thread::spawn(move || {
            let mut monitor = ResourceMonitor::new();
            while monitor_flag.load(Ordering::Relaxed) {
                monitor.sample();
                thread::sleep(MONITOR_SAMPLE_INTERVAL);
            }
            monitor
        });

        loop {
            let newly_skipped = planner.resolve_skips();
            for task_id in &newly_skipped {
                info!("Task '{}' skipped", task_id);
                timeline.add_event(task_id.clone(), EventType::Skipped);
                state.set_task_status(task_id, TaskStatus::Skipped);
            }
            if !newly_skipped.is_empty() && !self.dry_run {
                state.save(&self.state_dir)?;
            }

            let ready = planner.get_ready_tasks();
            let mut scheduled = 0;

            for task in ready {
                info!("Starting task: {}", task.id);
                timeline.add_event(task.id.clone(), EventType::Started);
                planner.mark_task_running(&task.id);
                scheduled += 1;

                if self.dry_run {
                    println!();
                    println!("[DRY RUN] Task: {}", task.id);
                    println!("  Upstream: {:?}", task.upstream);
                    println!("  Trigger rule: {}", task.trigger_rule);
                    if let Some(arms) = task.branch_arms() {
                        for arm in arms {
                            println!("  Outcome '{}' -> {}", arm.outcome, arm.target);
                        }
                    }

                    timeline.add_event(task.id.clone(), EventType::Succeeded);
                    planner.mark_task_succeeded(&task.id);
                    continue;
                }

                let tx = tx.clone();
                let task = task.clone();
                let store = Arc::clone(&store);
                let run_id = run_id.clone();

                thread::spawn(move || {
                    let ctx = TaskContext::new(task.id.clone(), run_id, store);

                    let result: Result<Option<String>, String> = match &task.kind {
                        TaskKind::Action(f) => f(&ctx).map(|()| None).map_err(|e| e.to_string()),
                        TaskKind::Branch { decide, arms } => match decide(&ctx) {
                            Ok(outcome) => arms
                                .iter()
                                .find(|arm| arm.outcome == outcome)
                                .map(|arm| Some(arm.target.clone()))
                                .ok_or_else(|| {
                                    format!(
                                        "branch '{}' decided undeclared outcome '{}'",
                                        task.id, outcome
                                    )
                                }),
                            Err(e) => Err(e.to_string()),
                        },
                    };

                    if let Err(e) = tx.send((task.id.clone(), result)) {
                        error!("Failed to send completion signal for '{}': {}", task.id, e);
                    }
                });
            }

            if planner.running_count() == 0 && !planner.has_work_remaining() {
                break;
            }

            // Validation guarantees an acyclic graph, so a quiet iteration
            // with pending work means the scheduler is wedged.
            if planner.running_count() == 0 && scheduled == 0 && newly_skipped.is_empty() {
                let (done, total) = planner.progress();
                monitor_running.store(false, Ordering::Relaxed);
                return Err(EngineError::Stalled(total - done));
            }

            if planner.running_count() > 0 && !self.dry_run {
                let (task_id, result) = rx.recv().map_err(|_| EngineError::ChannelClosed)?;

                match result {
                    Ok(chosen) => {
                        info!("Task '{}' succeeded", task_id);
                        planner.mark_task_succeeded(&task_id);
                        timeline.add_event(task_id.clone(), EventType::Succeeded);
                        state.set_task_status(&task_id, TaskStatus::Succeeded);

                        if let Some(target) = chosen {
                            for skipped in planner.apply_branch(&task_id, &target) {
                                timeline.add_event(skipped.clone(), EventType::Skipped);
                                state.set_task_status(&skipped, TaskStatus::Skipped);
                            }
                        }
                    }
                    Err(e) => {
                        error!("Task '{}' failed: {}", task_id, e);
                        planner.mark_task_failed(&task_id, e.clone());
                        timeline.add_event(task_id.clone(), EventType::Failed);
                        state.set_task_status(&task_id, TaskStatus::Failed(e));
                    }
                }

                state.set_xcoms(store.snapshot());
                state.save(&self.state_dir)?;
            }
        }

        monitor_running.store(false, Ordering::Relaxed);
        let final_monitor = monitor_handle
            .join()
            .unwrap_or_else(|_| ResourceMonitor::new());

        let report = RunReport {
            run_id: run_id.clone(),
            succeeded: planner.tasks_with_status(&TaskStatus::Succeeded),
            failed: planner.tasks_with_status(&TaskStatus::Failed(String::new())),
            skipped: planner.tasks_with_status(&TaskStatus::Skipped),
            elapsed: start_time.elapsed(),
        };

        println!("{}", timeline.gantt_chart());
        println!(
            "Run '{}': {} succeeded, {} skipped, {} failed in {:.2?}",
            report.run_id,
            report.succeeded.len(),
            report.skipped.len(),
            report.failed.len(),
            report.elapsed
        );
        println!();
        println!("{}", final_monitor.get_summary());

        if report.failed.is_empty() {
            Ok(report)
        } else {
            Err(EngineError::RunFailed { report })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::TaskError;
    use crate::workflow::model::{BranchArm, Outcome, Task, TriggerRule};
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn engine_for(workflow: Workflow, state_dir: &std::path::Path) -> Engine {
        let mut engine = Engine::new(workflow);
        engine.set_state_dir(state_dir);
        engine.set_run_id("test-run");
        engine
    }

    fn publishing_task(id: &str, value: u32) -> Task {
        Task::action(id, move |ctx| ctx.push_return(&value))
    }

    #[test]
    fn test_linear_run() {
        let dir = tempdir().unwrap();
        let mut workflow = Workflow::new("linear");
        workflow.add_task(publishing_task("a", 1)).unwrap();
        workflow
            .add_task(Task::action("b", |ctx| {
                let value: u32 = ctx.pull("a")?;
                ctx.push_return(&(value + 1))
            }))
            .unwrap();
        workflow.set_downstream("a", "b").unwrap();

        let report = engine_for(workflow, dir.path()).run().unwrap();
        assert_eq!(report.succeeded, vec!["a".to_string(), "b".to_string()]);
        assert!(report.failed.is_empty());
        assert!(report.skipped.is_empty());

        let state = RunState::load(dir.path(), "linear", "test-run").unwrap();
        assert_eq!(state.xcoms["b"]["return_value"], serde_json::json!(2));
    }

    #[test]
    fn test_branch_runs_exactly_one_target() {
        let dir = tempdir().unwrap();
        let mut workflow = Workflow::new("branchy");
        let branch = Task::branch(
            "decide",
            |_ctx| Ok(Outcome::new("left")),
            vec![
                BranchArm::new(Outcome::new("left"), "left"),
                BranchArm::new(Outcome::new("right"), "right"),
            ],
        );
        workflow.add_task(branch).unwrap();
        workflow.add_task(publishing_task("left", 1)).unwrap();
        workflow.add_task(publishing_task("right", 2)).unwrap();
        workflow.set_downstream("decide", "left").unwrap();
        workflow.set_downstream("decide", "right").unwrap();

        let report = engine_for(workflow, dir.path()).run().unwrap();
        assert!(report.succeeded.contains(&"left".to_string()));
        assert_eq!(report.skipped, vec!["right".to_string()]);

        // The non-chosen target never published anything
        let state = RunState::load(dir.path(), "branchy", "test-run").unwrap();
        assert!(state.xcoms.contains_key("left"));
        assert!(!state.xcoms.contains_key("right"));
    }

    #[test]
    fn test_failure_skips_downstream_and_fails_run() {
        let dir = tempdir().unwrap();
        let mut workflow = Workflow::new("failing");
        workflow
            .add_task(Task::action("a", |_ctx| {
                Err(TaskError::Failed("boom".to_string()))
            }))
            .unwrap();
        workflow.add_task(publishing_task("b", 1)).unwrap();
        workflow.set_downstream("a", "b").unwrap();

        let err = engine_for(workflow, dir.path()).run().unwrap_err();
        match err {
            EngineError::RunFailed { report } => {
                assert_eq!(report.failed, vec!["a".to_string()]);
                assert_eq!(report.skipped, vec!["b".to_string()]);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_min_one_success_summarizer_runs_after_failure_free_branch() {
        let dir = tempdir().unwrap();
        let mut workflow = Workflow::new("diamond");
        let branch = Task::branch(
            "decide",
            |_ctx| Ok(Outcome::new("left")),
            vec![
                BranchArm::new(Outcome::new("left"), "left"),
                BranchArm::new(Outcome::new("right"), "right"),
            ],
        );
        workflow.add_task(branch).unwrap();
        workflow.add_task(publishing_task("left", 1)).unwrap();
        workflow.add_task(publishing_task("right", 2)).unwrap();
        workflow
            .add_task(
                Task::action("summarize", |ctx| {
                    let left: Option<u32> = ctx.try_pull_keyed("left", "return_value")?;
                    ctx.push_return(&left.is_some())
                })
                .with_trigger_rule(TriggerRule::NoneFailedMinOneSuccess),
            )
            .unwrap();
        workflow.set_downstream("decide", "left").unwrap();
        workflow.set_downstream("decide", "right").unwrap();
        workflow.set_downstream("left", "summarize").unwrap();
        workflow.set_downstream("right", "summarize").unwrap();

        let report = engine_for(workflow, dir.path()).run().unwrap();
        assert!(report.succeeded.contains(&"summarize".to_string()));
        assert_eq!(report.skipped, vec!["right".to_string()]);
    }

    #[test]
    fn test_dry_run_executes_nothing() {
        let dir = tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&counter);

        let mut workflow = Workflow::new("dry");
        workflow
            .add_task(Task::action("a", move |_ctx| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        let mut engine = engine_for(workflow, dir.path());
        engine.set_dry_run(true);
        let report = engine.run().unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(report.succeeded, vec!["a".to_string()]);
        // Dry runs leave no record behind
        assert!(RunState::load(dir.path(), "dry", "test-run").is_err());
    }

    #[test]
    fn test_resume_skips_previously_succeeded() {
        let dir = tempdir().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        let build = |counter: Arc<AtomicUsize>| {
            let mut workflow = Workflow::new("resumable");
            workflow
                .add_task(Task::action("a", move |ctx| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ctx.push_return(&41u32)
                }))
                .unwrap();
            workflow
                .add_task(Task::action("b", |ctx| {
                    let value: u32 = ctx.pull("a")?;
                    ctx.push_return(&(value + 1))
                }))
                .unwrap();
            workflow.set_downstream("a", "b").unwrap();
            workflow
        };

        // First run completes fully
        engine_for(build(Arc::clone(&counter)), dir.path())
            .run()
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        // Second run with the same run id resumes: 'a' is not re-executed,
        // but its published value is still available to 'b'
        let report = engine_for(build(Arc::clone(&counter)), dir.path())
            .run()
            .unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(report.succeeded.contains(&"b".to_string()));
    }

    #[test]
    fn test_run_id_from_schedule() {
        use crate::workflow::Schedule;
        use chrono::NaiveDate;

        let dir = tempdir().unwrap();
        let mut workflow = Workflow::new("scheduled")
            .with_schedule(Schedule::daily(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()));
        workflow.add_task(publishing_task("a", 1)).unwrap();

        let mut engine = Engine::new(workflow);
        engine.set_state_dir(dir.path());
        let report = engine.run().unwrap();

        // Daily schedule that already started: run id is today's date
        let today = Utc::now().date_naive().format("%Y-%m-%d").to_string();
        assert_eq!(report.run_id, today);
    }

    #[test]
    fn test_invalid_workflow_rejected() {
        let dir = tempdir().unwrap();
        let workflow = Workflow::new("empty");
        let err = engine_for(workflow, dir.path()).run().unwrap_err();
        assert!(matches!(err, EngineError::Workflow(_)));
    }
}
