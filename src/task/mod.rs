//! Task model and persistent store.

mod store;

pub use store::{StoreError, TaskStore};

use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One unit of work from the task list.
///
/// Tasks are authored externally; the orchestrator only advances `status` and
/// writes back the telemetry fields (`attempts`, `duration`, `error`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: TaskStatus,

    /// Per-task override of the default verification command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_command: Option<String>,
    /// Routes the task to the deploy pipeline instead of the agent loop.
    #[serde(default)]
    pub is_deployment: bool,
    /// Commit after a successful run even when the global flag is off.
    #[serde(default)]
    pub auto_commit: bool,

    /// Test-command invocations performed on the last run.
    #[serde(default)]
    pub attempts: u32,
    /// Human-readable elapsed time of the last run.
    #[serde(default)]
    pub duration: String,
    /// Last failure message, present when `status` is `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The persisted task document: an ordered list of tasks.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskList {
    pub tasks: Vec<Task>,
}
