//! Workflow Data Model
//!
//! Core data structures representing a workflow as an explicit directed
//! acyclic graph of named tasks. Edges are typed and kept bidirectionally
//! consistent; branch decisions are declared as a typed outcome-to-successor
//! mapping that the validator resolves before anything runs.
//!
//! # Example
//!
//! ```rust
//! use modelflow::workflow::{Task, Workflow};
//!
//! let mut workflow = Workflow::new("example");
//! workflow.add_task(Task::action("extract", |_ctx| Ok(()))).unwrap();
//! workflow.add_task(Task::action("load", |_ctx| Ok(()))).unwrap();
//! workflow.set_downstream("extract", "load").unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::execution::context::{TaskContext, TaskError};
use crate::workflow::validator::WorkflowError;

/// Callable run by an action task.
pub type TaskFn = Arc<dyn Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync>;

/// Callable run by a branch task; returns the decided outcome.
pub type BranchFn = Arc<dyn Fn(&TaskContext) -> Result<Outcome, TaskError> + Send + Sync>;

/// A typed branch outcome label.
///
/// Pipeline code maps its own enums onto outcomes; the validator checks at
/// construction time that every declared outcome resolves to an existing
/// downstream task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Outcome(String);

impl Outcome {
    pub fn new(label: impl Into<String>) -> Self {
        Self(label.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maps one branch outcome to the downstream task that should run.
#[derive(Debug, Clone)]
pub struct BranchArm {
    pub outcome: Outcome,
    pub target: String,
}

impl BranchArm {
    pub fn new(outcome: Outcome, target: impl Into<String>) -> Self {
        Self {
            outcome,
            target: target.into(),
        }
    }
}

/// Activation rule of a task relative to its upstream tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TriggerRule {
    /// Run only if every upstream task succeeded (host default).
    #[default]
    AllSuccess,
    /// Run if no upstream task failed and at least one succeeded.
    /// Skipped upstream tasks are tolerated.
    NoneFailedMinOneSuccess,
}

impl fmt::Display for TriggerRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllSuccess => f.write_str("all_success"),
            Self::NoneFailedMinOneSuccess => f.write_str("none_failed_min_one_success"),
        }
    }
}

/// What a task does when executed.
#[derive(Clone)]
pub enum TaskKind {
    /// Runs a callable for effect.
    Action(TaskFn),
    /// Runs a decision callable and activates exactly one declared arm.
    Branch { decide: BranchFn, arms: Vec<BranchArm> },
}

impl fmt::Debug for TaskKind {
    // Callables are not Debug; show only the variant shape.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action(_) => f.write_str("Action"),
            Self::Branch { arms, .. } => f.debug_struct("Branch").field("arms", arms).finish(),
        }
    }
}

/// A single named task in a workflow.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique identifier for this task.
    pub id: String,

    /// IDs of tasks that must reach a terminal state before this one runs.
    pub upstream: Vec<String>,

    /// IDs of tasks that depend on this one.
    pub downstream: Vec<String>,

    /// Activation rule evaluated against upstream terminal statuses.
    pub trigger_rule: TriggerRule,

    /// The work this task performs.
    pub kind: TaskKind,
}

impl Task {
    /// Creates an action task from a callable.
    pub fn action<F>(id: impl Into<String>, f: F) -> Self
    where
        F: Fn(&TaskContext) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            id: id.into().trim().to_string(),
            upstream: Vec::new(),
            downstream: Vec::new(),
            trigger_rule: TriggerRule::default(),
            kind: TaskKind::Action(Arc::new(f)),
        }
    }

    /// Creates a branch task from a decision callable and its declared arms.
    ///
    /// Arm targets must be wired as downstream tasks of the branch; the
    /// validator rejects the workflow otherwise.
    pub fn branch<F>(id: impl Into<String>, decide: F, arms: Vec<BranchArm>) -> Self
    where
        F: Fn(&TaskContext) -> Result<Outcome, TaskError> + Send + Sync + 'static,
    {
        Self {
            id: id.into().trim().to_string(),
            upstream: Vec::new(),
            downstream: Vec::new(),
            trigger_rule: TriggerRule::default(),
            kind: TaskKind::Branch {
                decide: Arc::new(decide),
                arms,
            },
        }
    }

    /// Sets the trigger rule for this task.
    pub fn with_trigger_rule(mut self, rule: TriggerRule) -> Self {
        self.trigger_rule = rule;
        self
    }

    /// Returns true if this task is a branch decision.
    pub fn is_branch(&self) -> bool {
        matches!(self.kind, TaskKind::Branch { .. })
    }

    /// Returns the declared branch arms, if this task is a branch.
    pub fn branch_arms(&self) -> Option<&[BranchArm]> {
        match &self.kind {
            TaskKind::Branch { arms, .. } => Some(arms),
            TaskKind::Action(_) => None,
        }
    }
}

/// Recurrence interval of a scheduled workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    Daily,
}

/// Host-level schedule configuration for a workflow.
///
/// The engine derives the logical run date from this; no backfill is
/// performed when `catchup` is disabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// First logical date the workflow is eligible to run.
    pub start_date: NaiveDate,
    /// Recurrence interval.
    pub interval: Interval,
    /// Whether historical runs should be generated for missed intervals.
    pub catchup: bool,
}

impl Schedule {
    /// Creates a daily schedule starting at `start_date`, catchup disabled.
    pub fn daily(start_date: NaiveDate) -> Self {
        Self {
            start_date,
            interval: Interval::Daily,
            catchup: false,
        }
    }

    /// Enables or disables catchup.
    pub fn with_catchup(mut self, catchup: bool) -> Self {
        self.catchup = catchup;
        self
    }

    /// Returns the latest logical run date at or before `today`.
    ///
    /// `None` if the schedule has not started yet.
    pub fn latest_run_date(&self, today: NaiveDate) -> Option<NaiveDate> {
        if today < self.start_date {
            return None;
        }
        match self.interval {
            Interval::Daily => Some(today),
        }
    }

    /// Returns the logical run dates due at `today`.
    ///
    /// With catchup enabled this is every missed interval since the start
    /// date; otherwise only the latest one.
    pub fn run_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let Some(latest) = self.latest_run_date(today) else {
            return Vec::new();
        };

        if !self.catchup {
            return vec![latest];
        }

        match self.interval {
            Interval::Daily => {
                let mut dates = Vec::new();
                let mut date = self.start_date;
                while date <= latest {
                    dates.push(date);
                    match date.succ_opt() {
                        Some(next) => date = next,
                        None => break,
                    }
                }
                dates
            }
        }
    }
}

/// A named workflow: a collection of tasks forming a DAG.
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Workflow name, used in run ids and state files.
    pub name: String,

    /// Optional host-level schedule.
    pub schedule: Option<Schedule>,

    /// Tasks in the workflow. Reordered topologically by validation.
    pub tasks: Vec<Task>,
}

impl Workflow {
    /// Creates an empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: None,
            tasks: Vec::new(),
        }
    }

    /// Attaches a schedule to the workflow.
    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    /// Adds a task, rejecting duplicate ids.
    pub fn add_task(&mut self, task: Task) -> Result<(), WorkflowError> {
        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(WorkflowError::DuplicateTaskId(task.id));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Wires a dependency edge: `downstream` runs after `upstream`.
    ///
    /// Both edge lists are updated so the graph stays consistent.
    pub fn set_downstream(&mut self, upstream: &str, downstream: &str) -> Result<(), WorkflowError> {
        if self.get_task(upstream).is_none() {
            return Err(WorkflowError::UnknownTask(upstream.to_string()));
        }
        if self.get_task(downstream).is_none() {
            return Err(WorkflowError::UnknownTask(downstream.to_string()));
        }

        if let Some(up) = self.get_task_mut(upstream) {
            if !up.downstream.iter().any(|d| d == downstream) {
                up.downstream.push(downstream.to_string());
            }
        }

        if let Some(down) = self.get_task_mut(downstream) {
            if !down.upstream.iter().any(|u| u == upstream) {
                down.upstream.push(upstream.to_string());
            }
        }

        Ok(())
    }

    /// Gets a task by id.
    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Gets a mutable reference to a task by id.
    pub fn get_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Returns tasks with no upstream dependencies (entry points).
    pub fn root_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.upstream.is_empty()).collect()
    }

    /// Returns tasks with no dependents (exit points).
    pub fn leaf_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.downstream.is_empty()).collect()
    }

    /// Returns the number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Returns true if the workflow has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(id: &str) -> Task {
        Task::action(id, |_ctx| Ok(()))
    }

    #[test]
    fn test_action_task_creation() {
        let task = noop("  extract  ");
        assert_eq!(task.id, "extract");
        assert_eq!(task.trigger_rule, TriggerRule::AllSuccess);
        assert!(!task.is_branch());
        assert!(task.branch_arms().is_none());
    }

    #[test]
    fn test_branch_task_creation() {
        let task = Task::branch(
            "decide",
            |_ctx| Ok(Outcome::new("yes")),
            vec![
                BranchArm::new(Outcome::new("yes"), "a"),
                BranchArm::new(Outcome::new("no"), "b"),
            ],
        );

        assert!(task.is_branch());
        assert_eq!(task.branch_arms().unwrap().len(), 2);
    }

    #[test]
    fn test_with_trigger_rule() {
        let task = noop("summarize").with_trigger_rule(TriggerRule::NoneFailedMinOneSuccess);
        assert_eq!(task.trigger_rule, TriggerRule::NoneFailedMinOneSuccess);
    }

    #[test]
    fn test_trigger_rule_display() {
        assert_eq!(TriggerRule::AllSuccess.to_string(), "all_success");
        assert_eq!(
            TriggerRule::NoneFailedMinOneSuccess.to_string(),
            "none_failed_min_one_success"
        );
    }

    #[test]
    fn test_workflow_add_duplicate() {
        let mut workflow = Workflow::new("test");
        assert!(workflow.add_task(noop("a")).is_ok());
        assert!(matches!(
            workflow.add_task(noop("a")),
            Err(WorkflowError::DuplicateTaskId(_))
        ));
        assert_eq!(workflow.len(), 1);
    }

    #[test]
    fn test_set_downstream_wires_both_sides() {
        let mut workflow = Workflow::new("test");
        workflow.add_task(noop("a")).unwrap();
        workflow.add_task(noop("b")).unwrap();
        workflow.set_downstream("a", "b").unwrap();

        assert_eq!(workflow.get_task("a").unwrap().downstream, vec!["b"]);
        assert_eq!(workflow.get_task("b").unwrap().upstream, vec!["a"]);
    }

    #[test]
    fn test_set_downstream_idempotent() {
        let mut workflow = Workflow::new("test");
        workflow.add_task(noop("a")).unwrap();
        workflow.add_task(noop("b")).unwrap();
        workflow.set_downstream("a", "b").unwrap();
        workflow.set_downstream("a", "b").unwrap();

        assert_eq!(workflow.get_task("a").unwrap().downstream.len(), 1);
        assert_eq!(workflow.get_task("b").unwrap().upstream.len(), 1);
    }

    #[test]
    fn test_set_downstream_unknown_task() {
        let mut workflow = Workflow::new("test");
        workflow.add_task(noop("a")).unwrap();

        assert!(matches!(
            workflow.set_downstream("a", "ghost"),
            Err(WorkflowError::UnknownTask(_))
        ));
        assert!(matches!(
            workflow.set_downstream("ghost", "a"),
            Err(WorkflowError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_root_and_leaf_tasks() {
        let mut workflow = Workflow::new("test");
        workflow.add_task(noop("root")).unwrap();
        workflow.add_task(noop("leaf")).unwrap();
        workflow.set_downstream("root", "leaf").unwrap();

        assert_eq!(workflow.root_tasks()[0].id, "root");
        assert_eq!(workflow.leaf_tasks()[0].id, "leaf");
    }

    #[test]
    fn test_workflow_empty() {
        let workflow = Workflow::new("empty");
        assert!(workflow.is_empty());
        assert_eq!(workflow.len(), 0);
        assert!(workflow.get_task("anything").is_none());
    }

    #[test]
    fn test_schedule_latest_run_date() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let schedule = Schedule::daily(start);

        let today = NaiveDate::from_ymd_opt(2023, 1, 5).unwrap();
        assert_eq!(schedule.latest_run_date(today), Some(today));

        let before = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();
        assert_eq!(schedule.latest_run_date(before), None);
    }

    #[test]
    fn test_schedule_run_dates_no_catchup() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let schedule = Schedule::daily(start);

        let today = NaiveDate::from_ymd_opt(2023, 1, 5).unwrap();
        assert_eq!(schedule.run_dates(today), vec![today]);
    }

    #[test]
    fn test_schedule_run_dates_catchup() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let schedule = Schedule::daily(start).with_catchup(true);

        let today = NaiveDate::from_ymd_opt(2023, 1, 3).unwrap();
        let dates = schedule.run_dates(today);
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], start);
        assert_eq!(dates[2], today);
    }

    #[test]
    fn test_schedule_run_dates_before_start() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let schedule = Schedule::daily(start);

        let before = NaiveDate::from_ymd_opt(2022, 6, 1).unwrap();
        assert!(schedule.run_dates(before).is_empty());
    }

    #[test]
    fn test_outcome_display_and_eq() {
        let a = Outcome::new("is_accurate");
        let b = Outcome::new("is_accurate");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "is_accurate");
        assert_eq!(a.as_str(), "is_accurate");
    }
}
