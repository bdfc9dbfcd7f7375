/// Core domain types for the task queue: tasks, their status, dependency
/// edges, and the wire-adjacent request/summary structs QueueService hands
/// back to its callers.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::QueueError;

/// The seven-state task lifecycle. `Pending` is a transient internal state
/// during `enqueue` and must never be observed outside QueueService.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Blocked,
    Ready,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Ready => "ready",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "blocked" => Ok(TaskStatus::Blocked),
            "ready" => Ok(TaskStatus::Ready),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(QueueError::Validation(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

/// Who (or what) produced a task, used by `PriorityScorer::source_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSource {
    Human,
    AgentRequirements,
    AgentPlanner,
    AgentImplementation,
}

impl TaskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskSource::Human => "human",
            TaskSource::AgentRequirements => "agent_requirements",
            TaskSource::AgentPlanner => "agent_planner",
            TaskSource::AgentImplementation => "agent_implementation",
        }
    }
}

impl fmt::Display for TaskSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskSource {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(TaskSource::Human),
            "agent_requirements" => Ok(TaskSource::AgentRequirements),
            "agent_planner" => Ok(TaskSource::AgentPlanner),
            "agent_implementation" => Ok(TaskSource::AgentImplementation),
            other => Err(QueueError::Validation(format!(
                "unknown task source: {other}"
            ))),
        }
    }
}

/// `sequential` vs `parallel` currently behave identically (both AND-joins);
/// the column is kept for forward compatibility (see design notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Sequential,
    Parallel,
}

impl DependencyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DependencyKind::Sequential => "sequential",
            DependencyKind::Parallel => "parallel",
        }
    }
}

impl fmt::Display for DependencyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DependencyKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(DependencyKind::Sequential),
            "parallel" => Ok(DependencyKind::Parallel),
            other => Err(QueueError::Validation(format!(
                "unknown dependency kind: {other}"
            ))),
        }
    }
}

/// A task record. Mirrors the data model in full, including the computed
/// `calculated_priority` / `dependency_depth` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub summary: Option<String>,
    pub agent_type: String,
    pub base_priority: f64,
    pub status: TaskStatus,
    pub source: TaskSource,
    pub parent_task_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration_seconds: Option<i64>,
    pub input_data: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub execution_timeout_seconds: i64,
    pub calculated_priority: f64,
    pub dependency_depth: i64,
}

/// A dependency edge: `dependent_id` waits on `prerequisite_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub id: Uuid,
    pub dependent_id: Uuid,
    pub prerequisite_id: Uuid,
    pub kind: DependencyKind,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Validated input to `QueueService::enqueue`.
#[derive(Debug, Clone)]
pub struct EnqueueInput {
    pub description: String,
    pub source: TaskSource,
    pub summary: Option<String>,
    pub agent_type: String,
    pub base_priority: f64,
    pub prerequisites: Vec<Uuid>,
    pub parent_task_id: Option<Uuid>,
    pub deadline: Option<DateTime<Utc>>,
    pub estimated_duration_seconds: Option<i64>,
    pub session_id: Option<String>,
    pub input_data: serde_json::Value,
    pub max_retries: i32,
    pub execution_timeout_seconds: i64,
}

pub const DEFAULT_AGENT_TYPE: &str = "requirements-gatherer";
pub const DEFAULT_BASE_PRIORITY: f64 = 5.0;
pub const DEFAULT_MAX_RETRIES: i32 = 0;
pub const DEFAULT_EXECUTION_TIMEOUT_SECONDS: i64 = 3600;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
pub const MAX_SUMMARY_LEN: usize = 500;
pub const MAX_PREREQUISITES: usize = 100;

impl EnqueueInput {
    /// Validates field ranges per the ToolServer boundary contract. Called
    /// before any Store access, so validation failures never reach QueueService.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.description.is_empty() || self.description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(QueueError::Validation(format!(
                "description must be 1..{MAX_DESCRIPTION_LEN} characters"
            )));
        }
        if let Some(summary) = &self.summary {
            if summary.chars().count() > MAX_SUMMARY_LEN {
                return Err(QueueError::Validation(format!(
                    "summary must be at most {MAX_SUMMARY_LEN} characters"
                )));
            }
        }
        if !(0.0..=10.0).contains(&self.base_priority) {
            return Err(QueueError::Validation(
                "base_priority must be in [0, 10]".to_string(),
            ));
        }
        if self.prerequisites.len() > MAX_PREREQUISITES {
            return Err(QueueError::Validation(format!(
                "at most {MAX_PREREQUISITES} prerequisites are allowed"
            )));
        }
        Ok(())
    }
}

/// Aggregate returned by `QueueService::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: i64,
    pub pending: i64,
    pub blocked: i64,
    pub ready: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub cancelled: i64,
    pub average_calculated_priority: f64,
    pub max_depth: i64,
    pub oldest_non_terminal_submitted_at: Option<DateTime<Utc>>,
    pub newest_submitted_at: Option<DateTime<Utc>>,
}

/// A filter over `list_tasks` / `task_list`. Any combination of fields may
/// be set; absent fields are unconstrained.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub source: Option<TaskSource>,
    pub agent_type: Option<String>,
}

/// Selects terminal tasks for `QueueService::prune`. `statuses` empty means
/// any terminal status; `older_than` absent means no age bound.
#[derive(Debug, Clone, Default)]
pub struct PruneFilter {
    pub older_than: Option<DateTime<Utc>>,
    pub statuses: Vec<TaskStatus>,
}

/// A patch applied by `Store::update_task`; only `Some` fields are written.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub result: Option<Option<serde_json::Value>>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<i32>,
    pub calculated_priority: Option<f64>,
    pub dependency_depth: Option<i64>,
}
