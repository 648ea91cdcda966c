//! Typed error hierarchy for sprintboard.
//!
//! - `BoardError`: domain rule violations detected inside the database layer
//! - `ServiceError`: the tagged error result returned by every service call

use thiserror::Error;

/// Domain rule violations raised while a write transaction is in flight.
///
/// These travel through `anyhow::Error` out of `db.rs` and are recovered by
/// the service layer with `downcast_ref`, so a violated rule surfaces as
/// [`ServiceError::Invalid`] rather than a generic storage fault.
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("Sprint {id} not found")]
    SprintNotFound { id: String },

    #[error("Task {id} not found")]
    TaskNotFound { id: String },

    #[error("Task {task_id} belongs to project {task_project}, not {expected_project}")]
    CrossProjectReference {
        task_id: String,
        task_project: String,
        expected_project: String,
    },

    #[error("Task {id} cannot depend on itself")]
    SelfDependency { id: String },

    #[error("Task list for sprint {sprint_id} must be a reordering of its current tasks")]
    TaskOrderMismatch { sprint_id: String },

    #[error("Task {task_id} is already assigned to sprint {sprint_id}")]
    TaskAlreadyInSprint { task_id: String, sprint_id: String },
}

/// Failure half of every service result.
///
/// `Display` is the human-readable message the HTTP layer embeds in its
/// fixed-format 500 responses.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Storage(String),
}

impl ServiceError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Classify an error coming out of the database layer.
    pub fn from_db(err: anyhow::Error) -> Self {
        match err.downcast_ref::<BoardError>() {
            Some(BoardError::ProjectNotFound { id }) => Self::NotFound {
                entity: "Project",
                id: id.clone(),
            },
            Some(BoardError::SprintNotFound { id }) => Self::NotFound {
                entity: "Sprint",
                id: id.clone(),
            },
            Some(BoardError::TaskNotFound { id }) => Self::NotFound {
                entity: "Task",
                id: id.clone(),
            },
            Some(other) => Self::Invalid(other.to_string()),
            None => Self::Storage(format!("{:#}", err)),
        }
    }
}
