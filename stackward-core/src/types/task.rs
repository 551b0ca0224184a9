//! Task domain types.
//!
//! A task is a single scheduled replica of a service. Task observations are
//! derived on every poll and never cached across polls.

use serde::{Deserialize, Serialize};

/// Engine-reported task lifecycle states.
///
/// Values outside the known set are treated as transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    New,
    Pending,
    Assigned,
    Accepted,
    Preparing,
    Starting,
    Running,
    Complete,
    Shutdown,
    Failed,
    Rejected,
    /// Any state this tool does not interpret.
    Unknown,
}

impl TaskState {
    pub fn parse(s: &str) -> Self {
        match s {
            "new" => TaskState::New,
            "pending" => TaskState::Pending,
            "assigned" => TaskState::Assigned,
            "accepted" => TaskState::Accepted,
            "preparing" => TaskState::Preparing,
            "starting" => TaskState::Starting,
            "running" => TaskState::Running,
            "complete" => TaskState::Complete,
            "shutdown" => TaskState::Shutdown,
            "failed" => TaskState::Failed,
            "rejected" => TaskState::Rejected,
            _ => TaskState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::New => "new",
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Accepted => "accepted",
            TaskState::Preparing => "preparing",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Complete => "complete",
            TaskState::Shutdown => "shutdown",
            TaskState::Failed => "failed",
            TaskState::Rejected => "rejected",
            TaskState::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub service_id: String,
    pub state: TaskState,
    pub desired_state: TaskState,
    /// Last scheduler or runtime error, if any.
    pub error: Option<String>,
    /// Backing container, once one is attached.
    pub container_id: Option<String>,
    /// Exit code of the backing container, once it has exited.
    pub exit_code: Option<i64>,
}

impl Task {
    /// Whether this task observation counts as a failure.
    ///
    /// A task in `complete` with desired state `shutdown` is the engine's
    /// signal for "replaced after failing" (typically a healthcheck
    /// failure).
    pub fn is_failed(&self) -> bool {
        match self.state {
            TaskState::Failed | TaskState::Rejected => true,
            TaskState::Shutdown => self.error.as_deref().is_some_and(|e| !e.is_empty()),
            TaskState::Complete => self.desired_state == TaskState::Shutdown,
            _ => false,
        }
    }

    /// Short id for log lines, matching the engine CLI's 12-char form.
    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(12)]
    }
}
