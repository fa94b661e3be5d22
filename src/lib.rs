//! ModelFlow - Branching Workflow Execution Engine
//!
//! A workflow engine for model selection pipelines: tasks form a typed,
//! statically validated graph, branch tasks route a run down exactly one
//! declared path, and trigger rules decide how tasks react to skipped or
//! failed upstreams. Ships with a built-in model selection pipeline that
//! trains three candidate models and reports the most accurate one.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Task graph data structures, validation, and planning
//! - [`execution`]: Core execution engine with parallel scheduling
//! - [`pipeline`]: Built-in workflow definitions
//! - [`monitoring`]: Resource usage tracking and execution timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use modelflow::execution::Engine;
//! use modelflow::pipeline::build_default;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build the model selection workflow
//!     let workflow = build_default()?;
//!
//!     // Create execution engine
//!     let mut engine = Engine::new(workflow);
//!     engine.set_max_parallel(4);
//!
//!     // Execute one run
//!     engine.run()?;
//!     Ok(())
//! }
//! ```

pub mod execution;
pub mod monitoring;
pub mod pipeline;
pub mod workflow;

// Re-export commonly used types
pub use execution::context::TaskContext;
pub use execution::engine::Engine;
pub use workflow::model::{Outcome, Task, TriggerRule, Workflow};
pub use workflow::validator::validate_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "ModelFlow";
