//! Run Record Persistence
//!
//! Persists a per-run record after every task transition, enabling resume
//! after interruption. The record carries the task statuses and the XCom
//! snapshot so resumed tasks can still pull values published before the
//! interruption.
//!
//! Records are saved to `{state_dir}/{workflow}_{run_id}.state` as JSON.
//! The state directory is `.modelflow/` in the working directory, or the
//! `MODELFLOW_STATE_DIR` environment variable when set.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::info;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::planner::TaskStatus;

/// Default state directory, resolved once per process.
pub static STATE_DIR: Lazy<PathBuf> = Lazy::new(|| {
    if let Ok(dir) = std::env::var("MODELFLOW_STATE_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from(".modelflow")
});

/// Errors raised while reading or writing run records.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Persistent record of a single workflow run.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct RunState {
    /// Name of the workflow this run belongs to
    pub workflow: String,

    /// Logical run id (schedule date or manual id)
    pub run_id: String,

    /// Status of every task that has reached a state worth recording
    pub task_states: HashMap<String, TaskStatus>,

    /// Snapshot of the run's key-value handoff
    pub xcoms: HashMap<String, HashMap<String, Value>>,

    /// Last time the record was updated
    pub timestamp: SystemTime,
}

impl RunState {
    /// Creates a fresh record for a run.
    pub fn new(workflow: &str, run_id: &str) -> Self {
        Self {
            workflow: workflow.to_string(),
            run_id: run_id.to_string(),
            task_states: HashMap::new(),
            xcoms: HashMap::new(),
            timestamp: SystemTime::now(),
        }
    }

    /// Records a task status transition.
    pub fn set_task_status(&mut self, task_id: &str, status: TaskStatus) {
        self.task_states.insert(task_id.to_string(), status);
        self.timestamp = SystemTime::now();
    }

    /// Replaces the stored XCom snapshot.
    pub fn set_xcoms(&mut self, xcoms: HashMap<String, HashMap<String, Value>>) {
        self.xcoms = xcoms;
        self.timestamp = SystemTime::now();
    }

    /// Returns true if this record contains prior progress.
    pub fn is_resume(&self) -> bool {
        self.task_states
            .values()
            .any(|s| *s == TaskStatus::Succeeded)
    }

    /// Saves the record under the given state directory.
    pub fn save(&self, state_dir: &Path) -> Result<(), StateError> {
        fs::create_dir_all(state_dir)?;

        let path = Self::record_path(state_dir, &self.workflow, &self.run_id);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;

        Ok(())
    }

    /// Loads a record for the given workflow and run.
    pub fn load(state_dir: &Path, workflow: &str, run_id: &str) -> Result<Self, StateError> {
        let path = Self::record_path(state_dir, workflow, run_id);

        let content = fs::read_to_string(&path)?;
        let state: RunState = serde_json::from_str(&content)?;

        info!("Loaded run record from {}", path.display());
        Ok(state)
    }

    /// Deletes the record, if present.
    pub fn delete(&self, state_dir: &Path) -> Result<(), StateError> {
        let path = Self::record_path(state_dir, &self.workflow, &self.run_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted run record: {}", path.display());
        }
        Ok(())
    }

    fn record_path(state_dir: &Path, workflow: &str, run_id: &str) -> PathBuf {
        state_dir.join(format!("{}_{}.state", workflow, run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_state_creation() {
        let state = RunState::new("model_selection", "2023-01-01");
        assert_eq!(state.workflow, "model_selection");
        assert_eq!(state.run_id, "2023-01-01");
        assert!(state.task_states.is_empty());
        assert!(!state.is_resume());
    }

    #[test]
    fn test_set_task_status() {
        let mut state = RunState::new("w", "r");
        state.set_task_status("a", TaskStatus::Succeeded);
        state.set_task_status("b", TaskStatus::Failed("boom".to_string()));

        assert_eq!(state.task_states.get("a"), Some(&TaskStatus::Succeeded));
        assert!(state.is_resume());
    }

    #[test]
    fn test_failed_only_is_not_resume() {
        let mut state = RunState::new("w", "r");
        state.set_task_status("a", TaskStatus::Failed("boom".to_string()));
        assert!(!state.is_resume());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();

        let mut state = RunState::new("w", "2023-01-02");
        state.set_task_status("a", TaskStatus::Succeeded);
        state.set_task_status("b", TaskStatus::Skipped);

        let mut xcoms = HashMap::new();
        let mut values = HashMap::new();
        values.insert("best_model".to_string(), Value::String("A".to_string()));
        xcoms.insert("choose_best_model".to_string(), values);
        state.set_xcoms(xcoms);

        state.save(dir.path()).unwrap();

        let loaded = RunState::load(dir.path(), "w", "2023-01-02").unwrap();
        assert_eq!(loaded.task_states.len(), 2);
        assert_eq!(loaded.task_states.get("b"), Some(&TaskStatus::Skipped));
        assert_eq!(
            loaded.xcoms["choose_best_model"]["best_model"],
            Value::String("A".to_string())
        );
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = tempdir().unwrap();
        assert!(RunState::load(dir.path(), "w", "nope").is_err());
    }

    #[test]
    fn test_save_creates_state_dir() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("nested");

        let state = RunState::new("w", "r");
        state.save(&nested).unwrap();

        assert!(nested.join("w_r.state").exists());
    }

    #[test]
    fn test_delete() {
        let dir = tempdir().unwrap();
        let state = RunState::new("w", "r");
        state.save(dir.path()).unwrap();
        assert!(dir.path().join("w_r.state").exists());

        state.delete(dir.path()).unwrap();
        assert!(!dir.path().join("w_r.state").exists());

        // Deleting again is not an error
        assert!(state.delete(dir.path()).is_ok());
    }

    #[test]
    fn test_status_serialization_failed_message() {
        let mut state = RunState::new("w", "r");
        state.set_task_status("a", TaskStatus::Failed("score missing".to_string()));

        let json = serde_json::to_string(&state).unwrap();
        let loaded: RunState = serde_json::from_str(&json).unwrap();

        match loaded.task_states.get("a") {
            Some(TaskStatus::Failed(msg)) => assert_eq!(msg, "score missing"),
            other => panic!("unexpected status: {:?}", other),
        }
    }
}
