//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining and validating
//! workflows as typed, statically resolved task graphs.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Task, Workflow, Schedule, branches)
//! - [`validator`]: Validation rules, branch resolution, dependency checking
//! - [`planner`]: Status tracking, trigger rules, ready-set computation
//! - [`state`]: Run record persistence

pub mod model;
pub mod planner;
pub mod state;
pub mod validator;

pub use model::{BranchArm, Interval, Outcome, Schedule, Task, TaskKind, TriggerRule, Workflow};
pub use planner::{ExecutionPlanner, TaskStatus};
pub use state::RunState;
pub use validator::{validate_workflow, WorkflowError};
