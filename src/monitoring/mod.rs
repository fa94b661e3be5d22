//! Run Monitoring Module
//!
//! Provides utilities for tracking resource usage and the execution
//! timeline during workflow runs.
//!
//! # Components
//!
//! - [`ResourceMonitor`]: CPU and memory usage tracking
//! - [`ExecutionTimeline`]: Task start/end timing and Gantt rendering

pub mod resource;
pub mod timeline;

pub use resource::{ResourceMonitor, ResourceSample};
pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
