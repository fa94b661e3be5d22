//! Execution Planner
//!
//! Tracks per-task status during a run and decides which tasks are ready:
//! - Trigger rule evaluation against upstream terminal statuses
//! - Skip cascading (an unsatisfiable rule skips the task, which may make
//!   further rules unsatisfiable)
//! - Branch application: all non-chosen successors of a branch are skipped
//! - Per-task timing metrics

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{Task, TriggerRule, Workflow};
use super::state::RunState;

/// Status of a task during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Waiting for its trigger rule to be satisfied
    Pending,
    /// Currently executing
    Running,
    /// Completed successfully
    Succeeded,
    /// Failed with an error message
    Failed(String),
    /// Will never run this run (unsatisfiable rule or non-chosen branch arm)
    Skipped,
}

impl TaskStatus {
    /// Returns true for statuses that will not change for the rest of the run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_) | Self::Skipped)
    }
}

/// How a trigger rule evaluates for a pending task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleEval {
    /// All conditions met, the task can start
    Ready,
    /// Some upstream task has not reached a terminal state yet
    Wait,
    /// The rule can never be satisfied this run
    Skip,
}

/// Execution metrics for a single task.
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    /// When the task started executing
    pub start_time: Option<Instant>,
    /// When the task finished
    pub end_time: Option<Instant>,
    /// Duration in milliseconds
    pub duration_ms: Option<u128>,
    /// Current status
    pub status: TaskStatus,
}

impl TaskMetrics {
    fn new() -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_ms: None,
            status: TaskStatus::Pending,
        }
    }
}

/// Plans which tasks run next during workflow execution.
pub struct ExecutionPlanner {
    workflow: Workflow,
    running: HashSet<String>,
    max_parallel: usize,
    metrics: HashMap<String, TaskMetrics>,
}

impl ExecutionPlanner {
    /// Creates a planner for a validated workflow.
    ///
    /// The requested parallelism is capped at the machine's CPU count.
    pub fn new(workflow: Workflow, max_parallel: usize) -> Self {
        let cpus = num_cpus::get();
        let max_parallel = max_parallel.max(1).min(cpus);

        info!(
            "Creating planner: {} max parallel tasks ({} cpus available)",
            max_parallel, cpus
        );

        let metrics = workflow
            .tasks
            .iter()
            .map(|t| (t.id.clone(), TaskMetrics::new()))
            .collect();

        Self {
            workflow,
            running: HashSet::new(),
            max_parallel,
            metrics,
        }
    }

    /// Creates a planner that resumes from a previous run record.
    ///
    /// Previously succeeded tasks keep their status; everything else starts
    /// over as pending.
    pub fn from_state(workflow: Workflow, state: &RunState, max_parallel: usize) -> Self {
        let mut planner = Self::new(workflow, max_parallel);

        for (task_id, status) in &state.task_states {
            if *status == TaskStatus::Succeeded {
                if let Some(metrics) = planner.metrics.get_mut(task_id) {
                    metrics.status = TaskStatus::Succeeded;
                    info!("Skipping previously succeeded task: {}", task_id);
                }
            }
        }

        planner
    }

    /// Returns the status of a task, defaulting to pending for unknown ids.
    pub fn status(&self, task_id: &str) -> TaskStatus {
        self.metrics
            .get(task_id)
            .map(|m| m.status.clone())
            .unwrap_or(TaskStatus::Pending)
    }

    /// Evaluates a task's trigger rule against upstream statuses.
    fn evaluate(&self, task: &Task) -> RuleEval {
        if task.upstream.is_empty() {
            return RuleEval::Ready;
        }

        let statuses: Vec<TaskStatus> = task.upstream.iter().map(|u| self.status(u)).collect();
        let all_terminal = statuses.iter().all(|s| s.is_terminal());
        let any_failed = statuses.iter().any(|s| matches!(s, TaskStatus::Failed(_)));
        let any_skipped = statuses.iter().any(|s| *s == TaskStatus::Skipped);
        let any_succeeded = statuses.iter().any(|s| *s == TaskStatus::Succeeded);

        match task.trigger_rule {
            TriggerRule::AllSuccess => {
                if any_failed || any_skipped {
                    RuleEval::Skip
                } else if all_terminal {
                    RuleEval::Ready
                } else {
                    RuleEval::Wait
                }
            }
            TriggerRule::NoneFailedMinOneSuccess => {
                if any_failed {
                    RuleEval::Skip
                } else if all_terminal {
                    if any_succeeded {
                        RuleEval::Ready
                    } else {
                        RuleEval::Skip
                    }
                } else {
                    RuleEval::Wait
                }
            }
        }
    }

    /// Skips every pending task whose trigger rule can no longer be
    /// satisfied, cascading until a fixpoint.
    ///
    /// Returns the newly skipped task ids in the order they were decided.
    pub fn resolve_skips(&mut self) -> Vec<String> {
        let mut newly_skipped = Vec::new();

        loop {
            let to_skip: Vec<String> = self
                .workflow
                .tasks
                .iter()
                .filter(|t| self.metrics[&t.id].status == TaskStatus::Pending)
                .filter(|t| self.evaluate(t) == RuleEval::Skip)
                .map(|t| t.id.clone())
                .collect();

            if to_skip.is_empty() {
                break;
            }

            for task_id in to_skip {
                self.set_status(&task_id, TaskStatus::Skipped);
                debug!("Task '{}' skipped (trigger rule unsatisfiable)", task_id);
                newly_skipped.push(task_id);
            }
        }

        newly_skipped
    }

    /// Returns tasks that are ready to execute right now.
    ///
    /// A task is ready when it is pending, its trigger rule evaluates to
    /// ready, and capacity remains under the parallel limit. Tasks are
    /// returned in topological order, so scheduling is deterministic.
    pub fn get_ready_tasks(&self) -> Vec<Task> {
        let capacity = self.max_parallel.saturating_sub(self.running.len());
        let mut ready = Vec::new();

        for task in &self.workflow.tasks {
            if ready.len() >= capacity {
                break;
            }
            if self.metrics[&task.id].status != TaskStatus::Pending {
                continue;
            }
            if self.evaluate(task) == RuleEval::Ready {
                ready.push(task.clone());
            }
        }

        ready
    }

    /// Marks a task as running.
    pub fn mark_task_running(&mut self, task_id: &str) {
        self.running.insert(task_id.to_string());

        if let Some(metrics) = self.metrics.get_mut(task_id) {
            metrics.start_time = Some(Instant::now());
            metrics.status = TaskStatus::Running;
        }
    }

    /// Marks a task as succeeded.
    pub fn mark_task_succeeded(&mut self, task_id: &str) {
        self.running.remove(task_id);
        self.finish(task_id, TaskStatus::Succeeded);
    }

    /// Marks a task as failed.
    pub fn mark_task_failed(&mut self, task_id: &str, error: String) {
        self.running.remove(task_id);
        self.finish(task_id, TaskStatus::Failed(error));
    }

    /// Applies a branch decision: every downstream task of the branch other
    /// than the chosen one is skipped.
    ///
    /// Returns the skipped task ids. Cascading to their descendants happens
    /// on the next [`resolve_skips`](Self::resolve_skips) call.
    pub fn apply_branch(&mut self, branch_id: &str, chosen: &str) -> Vec<String> {
        let siblings: Vec<String> = self
            .workflow
            .get_task(branch_id)
            .map(|t| t.downstream.clone())
            .unwrap_or_default()
            .into_iter()
            .filter(|d| d != chosen)
            .collect();

        for task_id in &siblings {
            self.set_status(task_id, TaskStatus::Skipped);
            info!("Branch '{}' chose '{}'; skipping '{}'", branch_id, chosen, task_id);
        }

        siblings
    }

    fn finish(&mut self, task_id: &str, status: TaskStatus) {
        if let Some(metrics) = self.metrics.get_mut(task_id) {
            let now = Instant::now();
            metrics.end_time = Some(now);
            if let Some(start) = metrics.start_time {
                metrics.duration_ms = Some(now.duration_since(start).as_millis());
            }
            metrics.status = status;
        }
    }

    fn set_status(&mut self, task_id: &str, status: TaskStatus) {
        if let Some(metrics) = self.metrics.get_mut(task_id) {
            metrics.status = status;
        }
    }

    /// Returns true while any task is pending or running.
    pub fn has_work_remaining(&self) -> bool {
        self.metrics
            .values()
            .any(|m| matches!(m.status, TaskStatus::Pending | TaskStatus::Running))
    }

    /// Returns the number of currently running tasks.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Returns the current progress as (terminal, total).
    pub fn progress(&self) -> (usize, usize) {
        let terminal = self.metrics.values().filter(|m| m.status.is_terminal()).count();
        (terminal, self.metrics.len())
    }

    /// Returns task ids currently in the given status.
    pub fn tasks_with_status(&self, wanted: &TaskStatus) -> Vec<String> {
        let mut ids: Vec<String> = self
            .metrics
            .iter()
            .filter(|(_, m)| match (&m.status, wanted) {
                (TaskStatus::Failed(_), TaskStatus::Failed(_)) => true,
                (a, b) => a == b,
            })
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Returns metrics for all tasks.
    pub fn get_metrics(&self) -> &HashMap<String, TaskMetrics> {
        &self.metrics
    }
}
