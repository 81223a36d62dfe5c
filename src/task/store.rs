//! JSON file-backed task store.
//!
//! The store is the sole mutator of the task document. Every operation
//! re-reads the file so edits made between calls are picked up, and every
//! write goes through a temp file + rename so a crash can never leave a
//! truncated document behind.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;

use super::{Task, TaskList, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read task list {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("task list {path} is malformed: {source}")]
    Schema {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to write task list {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("task {0} not found")]
    UnknownTask(String),
}

/// Owns the task-list file path; single-writer within one process.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
}

impl TaskStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the full task list. Schema mismatches are reported,
    /// never coerced.
    pub async fn load(&self) -> Result<TaskList, StoreError> {
        let bytes = fs::read(&self.path).await.map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Schema {
            path: self.path.clone(),
            source,
        })
    }

    /// First task with status `pending`, in document order.
    pub async fn next_pending(&self) -> Result<Option<Task>, StoreError> {
        let list = self.load().await?;
        Ok(list
            .tasks
            .into_iter()
            .find(|task| task.status == TaskStatus::Pending))
    }

    /// Set a task's status.
    pub async fn update_status(&self, id: &str, status: TaskStatus) -> Result<(), StoreError> {
        self.mutate(id, |task| task.status = status).await
    }

    /// Record a failure: status `failed` plus the error message.
    pub async fn set_error(&self, id: &str, message: &str) -> Result<(), StoreError> {
        self.mutate(id, |task| {
            task.status = TaskStatus::Failed;
            task.error = Some(message.to_string());
        })
        .await
    }

    /// Write back run telemetry.
    pub async fn record_outcome(
        &self,
        id: &str,
        attempts: u32,
        duration: &str,
    ) -> Result<(), StoreError> {
        self.mutate(id, |task| {
            task.attempts = attempts;
            task.duration = duration.to_string();
        })
        .await
    }

    async fn mutate<F>(&self, id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Task),
    {
        let mut list = self.load().await?;
        let task = list
            .tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| StoreError::UnknownTask(id.to_string()))?;
        apply(task);
        self.persist(&list).await
    }

    /// Serialize the whole document and rename it into place.
    async fn persist(&self, list: &TaskList) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(list).map_err(|source| StoreError::Schema {
            path: self.path.clone(),
            source,
        })?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .await
            .map_err(|source| StoreError::Write {
                path: tmp_path.clone(),
                source,
            })?;
        fs::rename(&tmp_path, &self.path)
            .await
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })
    }
}
