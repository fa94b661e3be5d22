//! Execution Module
//!
//! Runs validated workflows:
//!
//! - [`context`]: Run-scoped value store and per-task execution context
//! - [`engine`]: Parallel scheduling, branch dispatch, and persistence

pub mod context;
pub mod engine;

pub use context::{TaskContext, TaskError, XcomStore, RETURN_VALUE_KEY};
pub use engine::{Engine, EngineError, RunReport};
