//! Workflow Validation
//!
//! Resolves the task graph once, before execution:
//! - Task field validation
//! - Reference integrity (every edge names an existing task)
//! - Branch arm resolution (every outcome maps to a declared downstream
//!   task, every downstream of a branch is covered by exactly one arm)
//! - Cycle detection and topological sorting

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info, warn};
use thiserror::Error;

use super::model::{Task, Workflow};

/// Errors produced while building or validating a workflow.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("workflow '{0}' has no tasks")]
    EmptyWorkflow(String),

    #[error("duplicate task id: '{0}'")]
    DuplicateTaskId(String),

    #[error("task has empty or whitespace-only id")]
    EmptyTaskId,

    #[error("unknown task: '{0}'")]
    UnknownTask(String),

    #[error("task '{task}' references unknown task '{reference}'")]
    UnknownReference { task: String, reference: String },

    #[error("branch '{task}': outcome '{outcome}' targets '{target}', which is not a downstream task")]
    ArmTargetNotDownstream {
        task: String,
        outcome: String,
        target: String,
    },

    #[error("branch '{task}': downstream task '{target}' is not covered by any outcome")]
    UncoveredBranchTarget { task: String, target: String },

    #[error("branch '{task}': outcome '{outcome}' is declared more than once")]
    DuplicateOutcome { task: String, outcome: String },

    #[error("branch '{task}' declares no outcomes")]
    EmptyBranch { task: String },

    #[error("workflow contains a dependency cycle")]
    CyclicDependency,
}

/// Validates the entire workflow structure.
///
/// Performs the following checks:
/// 1. Workflow is not empty
/// 2. No duplicate or empty task IDs
/// 3. All edge references point to existing tasks
/// 4. Branch arms resolve to declared downstream tasks, exactly one arm
///    per downstream task
/// 5. No cyclic dependencies
///
/// On success, the tasks are reordered in topological order, so iteration
/// over `workflow.tasks` visits dependencies before dependents.
pub fn validate_workflow(workflow: &mut Workflow) -> Result<(), WorkflowError> {
    info!(
        "Validating workflow '{}' with {} tasks",
        workflow.name,
        workflow.tasks.len()
    );

    if workflow.tasks.is_empty() {
        return Err(WorkflowError::EmptyWorkflow(workflow.name.clone()));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for task in &workflow.tasks {
        if task.id.trim().is_empty() {
            return Err(WorkflowError::EmptyTaskId);
        }
        if !seen_ids.insert(task.id.as_str()) {
            return Err(WorkflowError::DuplicateTaskId(task.id.clone()));
        }
    }

    for task in &workflow.tasks {
        validate_edges(task, &seen_ids)?;
        validate_branch(task)?;
    }

    check_edge_consistency(workflow);
    topological_sort(workflow)?;

    info!(
        "Workflow '{}' validated: {} tasks, {} roots, {} leaves",
        workflow.name,
        workflow.tasks.len(),
        workflow.root_tasks().len(),
        workflow.leaf_tasks().len()
    );
    Ok(())
}

/// Checks that a task's edges reference existing tasks.
fn validate_edges(task: &Task, ids: &HashSet<&str>) -> Result<(), WorkflowError> {
    for reference in task.upstream.iter().chain(task.downstream.iter()) {
        if !ids.contains(reference.as_str()) {
            return Err(WorkflowError::UnknownReference {
                task: task.id.clone(),
                reference: reference.clone(),
            });
        }
    }

    if task.upstream.is_empty() {
        debug!("Task '{}' is a root task (no dependencies)", task.id);
    }
    if task.downstream.is_empty() {
        debug!("Task '{}' is a leaf task (nothing depends on it)", task.id);
    }

    Ok(())
}

/// Resolves a branch task's arms against its downstream edges.
///
/// Every arm must target a declared downstream task and every downstream
/// task must be reachable through exactly one outcome. This is what makes
/// the run-time dispatch total: a decided outcome either maps to a wired
/// successor or the branch could not have been constructed.
fn validate_branch(task: &Task) -> Result<(), WorkflowError> {
    let Some(arms) = task.branch_arms() else {
        return Ok(());
    };

    if arms.is_empty() {
        return Err(WorkflowError::EmptyBranch {
            task: task.id.clone(),
        });
    }

    let mut covered: HashSet<&str> = HashSet::new();
    let mut outcomes: HashSet<&str> = HashSet::new();

    for arm in arms {
        if !outcomes.insert(arm.outcome.as_str()) {
            return Err(WorkflowError::DuplicateOutcome {
                task: task.id.clone(),
                outcome: arm.outcome.as_str().to_string(),
            });
        }

        if !task.downstream.iter().any(|d| d == &arm.target) {
            return Err(WorkflowError::ArmTargetNotDownstream {
                task: task.id.clone(),
                outcome: arm.outcome.as_str().to_string(),
                target: arm.target.clone(),
            });
        }

        covered.insert(arm.target.as_str());
    }

    for target in &task.downstream {
        if !covered.contains(target.as_str()) {
            return Err(WorkflowError::UncoveredBranchTarget {
                task: task.id.clone(),
                target: target.clone(),
            });
        }
    }

    Ok(())
}

/// Warns about one-sided edges.
///
/// `Workflow::set_downstream` keeps both lists in sync; hand-built tasks
/// may not, which still executes but hides edges from one direction.
fn check_edge_consistency(workflow: &Workflow) {
    for task in &workflow.tasks {
        for down_id in &task.downstream {
            if let Some(down) = workflow.get_task(down_id) {
                if !down.upstream.iter().any(|u| u == &task.id) {
                    warn!(
                        "Inconsistent edge: {} -> {} but {} does not list {} as upstream",
                        task.id, down_id, down_id, task.id
                    );
                }
            }
        }
    }
}

/// Performs topological sort on the tasks using Kahn's algorithm.
///
/// Orders tasks so dependencies come before dependents; detects cycles.
fn topological_sort(workflow: &mut Workflow) -> Result<(), WorkflowError> {
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    for task in &workflow.tasks {
        in_degree.insert(task.id.clone(), task.upstream.len());
    }

    let mut queue: VecDeque<String> = workflow
        .tasks
        .iter()
        .filter(|t| t.upstream.is_empty())
        .map(|t| t.id.clone())
        .collect();

    let mut sorted_order: Vec<String> = Vec::new();

    while let Some(current_id) = queue.pop_front() {
        sorted_order.push(current_id.clone());

        let successors: Vec<String> = workflow
            .get_task(&current_id)
            .map(|t| t.downstream.clone())
            .unwrap_or_default();

        for successor_id in successors {
            if let Some(degree) = in_degree.get_mut(&successor_id) {
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(successor_id);
                }
            }
        }
    }

    if sorted_order.len() != workflow.tasks.len() {
        return Err(WorkflowError::CyclicDependency);
    }

    let mut task_map: HashMap<String, Task> = workflow
        .tasks
        .drain(..)
        .map(|t| (t.id.clone(), t))
        .collect();

    workflow.tasks = sorted_order
        .into_iter()
        .filter_map(|id| task_map.remove(&id))
        .collect();

    debug!(
        "Topological order: {:?}",
        workflow.tasks.iter().map(|t| &t.id).collect::<Vec<_>>()
    );

    Ok(())
}
