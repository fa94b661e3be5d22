//! Run-Scoped Task Context
//!
//! Provides the per-run key-value handoff between tasks. Each run owns a
//! single [`XcomStore`]; every task callable receives a [`TaskContext`]
//! bound to its task id and can publish values for downstream tasks or
//! pull values published upstream.
//!
//! Values are serialized as JSON so the store can be snapshotted into the
//! run record. A key is expected to be written once per run; overwriting
//! logs a warning.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Key under which a task's published return value is stored.
pub const RETURN_VALUE_KEY: &str = "return_value";

/// Errors raised inside a task callable.
#[derive(Debug, Error)]
pub enum TaskError {
    /// An upstream task published nothing under the requested key.
    #[error("task '{task}' published no value under key '{key}'")]
    MissingValue { task: String, key: String },

    /// A published value could not be decoded into the requested type.
    #[error("failed to decode value from task '{task}' key '{key}': {source}")]
    Decode {
        task: String,
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A value could not be encoded for publishing.
    #[error("failed to encode value for key '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Generic task failure with a message.
    #[error("{0}")]
    Failed(String),
}

/// Thread-safe key-value store scoped to a single workflow run.
///
/// Maps `(task id, key)` to a JSON value. Written by task callables through
/// [`TaskContext`]; discarded when the run ends, except for the snapshot
/// persisted in the run record.
#[derive(Debug, Default)]
pub struct XcomStore {
    values: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl XcomStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value under `(task_id, key)`.
    pub fn push(&self, task_id: &str, key: &str, value: Value) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        let entry = values.entry(task_id.to_string()).or_default();

        if entry.contains_key(key) {
            warn!(
                "Task '{}' overwrote value under key '{}' (keys are single-writer per run)",
                task_id, key
            );
        }

        entry.insert(key.to_string(), value);
    }

    /// Returns the value stored under `(task_id, key)`, if any.
    pub fn pull(&self, task_id: &str, key: &str) -> Option<Value> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.get(task_id).and_then(|m| m.get(key)).cloned()
    }

    /// Returns a serializable snapshot of all stored values.
    pub fn snapshot(&self) -> HashMap<String, HashMap<String, Value>> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.clone()
    }

    /// Replaces the store contents with a previously taken snapshot.
    ///
    /// Used when resuming a run so already-completed tasks keep their
    /// published values.
    pub fn restore(&self, snapshot: HashMap<String, HashMap<String, Value>>) {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        *values = snapshot;
    }

    /// Returns true if nothing has been published yet.
    pub fn is_empty(&self) -> bool {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        values.is_empty()
    }
}

/// Execution context handed to every task callable.
///
/// Identifies the running task and run, and gives typed access to the
/// run's [`XcomStore`].
#[derive(Debug, Clone)]
pub struct TaskContext {
    task_id: String,
    run_id: String,
    store: Arc<XcomStore>,
}

impl TaskContext {
    /// Creates a context for `task_id` within the given run.
    pub fn new(task_id: impl Into<String>, run_id: impl Into<String>, store: Arc<XcomStore>) -> Self {
        Self {
            task_id: task_id.into(),
            run_id: run_id.into(),
            store,
        }
    }

    /// The id of the task this context belongs to.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// The logical run id of the current run.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Publishes a value under the given key for downstream tasks.
    pub fn push<T: Serialize>(&self, key: &str, value: &T) -> Result<(), TaskError> {
        let json = serde_json::to_value(value).map_err(|source| TaskError::Encode {
            key: key.to_string(),
            source,
        })?;

        debug!("Task '{}' publishing key '{}'", self.task_id, key);
        self.store.push(&self.task_id, key, json);
        Ok(())
    }

    /// Publishes this task's return value.
    pub fn push_return<T: Serialize>(&self, value: &T) -> Result<(), TaskError> {
        self.push(RETURN_VALUE_KEY, value)
    }

    /// Pulls the return value published by an upstream task.
    ///
    /// Fails if the task published nothing, mirroring the undefined-upstream
    /// case: the error propagates and fails the calling task.
    pub fn pull<T: DeserializeOwned>(&self, task_id: &str) -> Result<T, TaskError> {
        self.pull_keyed(task_id, RETURN_VALUE_KEY)
    }

    /// Pulls a value published by an upstream task under a specific key.
    pub fn pull_keyed<T: DeserializeOwned>(&self, task_id: &str, key: &str) -> Result<T, TaskError> {
        let value = self
            .store
            .pull(task_id, key)
            .ok_or_else(|| TaskError::MissingValue {
                task: task_id.to_string(),
                key: key.to_string(),
            })?;

        serde_json::from_value(value).map_err(|source| TaskError::Decode {
            task: task_id.to_string(),
            key: key.to_string(),
            source,
        })
    }

    /// Pulls a value if present, returning `None` when nothing was published.
    ///
    /// Used by tasks that tolerate a missing upstream value, such as a
    /// summarizer with a fallback message.
    pub fn try_pull_keyed<T: DeserializeOwned>(
        &self,
        task_id: &str,
        key: &str,
    ) -> Result<Option<T>, TaskError> {
        match self.store.pull(task_id, key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| TaskError::Decode {
                    task: task_id.to_string(),
                    key: key.to_string(),
                    source,
                }),
        }
    }
}
