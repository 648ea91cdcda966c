use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type ProjectId = String;
pub type SprintId = String;
pub type TaskId = String;

/// Generate a fresh opaque identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub const DEFAULT_TASK_STATUS: &str = "To Do";
pub const DEFAULT_TASK_PRIORITY: &str = "low";

// ── Sprint status ─────────────────────────────────────────────────────

/// Sprint lifecycle status.
///
/// Stored and transmitted as its display string. Values outside the known
/// lifecycle (e.g. `"active"`) round-trip unchanged through `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SprintStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
    Other(String),
}

impl SprintStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Planned => "Planned",
            Self::InProgress => "In Progress",
            Self::Completed => "Completed",
            Self::Other(s) => s,
        }
    }
}

impl std::fmt::Display for SprintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SprintStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Planned" => Self::Planned,
            "In Progress" => Self::InProgress,
            "Completed" => Self::Completed,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for SprintStatus {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<SprintStatus> for String {
    fn from(status: SprintStatus) -> Self {
        match status {
            SprintStatus::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

// ── Stored documents ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(rename = "_id")]
    pub id: TaskId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub assigned_user: String,
    pub status: String,
    pub priority: String,
    pub task_points: u32,
    pub sprint: Option<SprintId>,
    pub project: ProjectId,
    #[serde(default)]
    pub prereq_tasks: Vec<TaskId>,
    #[serde(default)]
    pub dependent_tasks: Vec<TaskId>,
    #[serde(default)]
    pub relevant_questions: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sprint {
    #[serde(rename = "_id")]
    pub id: SprintId,
    pub name: String,
    pub project: ProjectId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SprintStatus,
    pub tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    #[serde(rename = "_id")]
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub assigned_users: Vec<String>,
    pub sprints: Vec<SprintId>,
    pub backlog_tasks: Vec<TaskId>,
    pub created_at: String,
    pub updated_at: String,
}

// ── Populated views (read-time joins) ─────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedSprint {
    #[serde(rename = "_id")]
    pub id: SprintId,
    pub name: String,
    pub project: ProjectId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SprintStatus,
    pub tasks: Vec<Task>,
}

impl PopulatedSprint {
    pub fn from_parts(sprint: Sprint, tasks: Vec<Task>) -> Self {
        Self {
            id: sprint.id,
            name: sprint.name,
            project: sprint.project,
            start_date: sprint.start_date,
            end_date: sprint.end_date,
            status: sprint.status,
            tasks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulatedProject {
    #[serde(rename = "_id")]
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub assigned_users: Vec<String>,
    pub sprints: Vec<PopulatedSprint>,
    pub backlog_tasks: Vec<Task>,
    pub created_at: String,
    pub updated_at: String,
}

impl PopulatedProject {
    /// Every task id held by the project, sprints first, then backlog.
    pub fn task_ids(&self) -> Vec<&str> {
        self.sprints
            .iter()
            .flat_map(|s| s.tasks.iter())
            .chain(self.backlog_tasks.iter())
            .map(|t| t.id.as_str())
            .collect()
    }
}

// ── Write payloads ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewSprint {
    pub name: String,
    pub project: ProjectId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub status: SprintStatus,
    pub tasks: Vec<TaskId>,
}

#[derive(Debug, Clone, Default)]
pub struct SprintUpdate {
    pub name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<SprintStatus>,
    /// Reordering of the current task list; membership changes go through task moves.
    pub tasks: Option<Vec<TaskId>>,
}

impl SprintUpdate {
    pub fn status(status: SprintStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintDraft {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub description: String,
    pub assigned_users: Vec<String>,
    pub initial_sprint: Option<SprintDraft>,
}

#[derive(Debug, Clone, Default)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub assigned_users: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub assigned_user: String,
    pub status: String,
    pub priority: String,
    pub task_points: u32,
    pub sprint: Option<SprintId>,
    pub project: ProjectId,
    pub prereq_tasks: Vec<TaskId>,
    pub relevant_questions: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub assigned_user: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub task_points: Option<u32>,
    pub relevant_questions: Option<Vec<String>>,
}
