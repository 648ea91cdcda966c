//! Client-side cache projection of one populated project.
//!
//! `ProjectState::reduce` applies one [`ProjectAction`] and returns a new
//! state; it never mutates in place, so readers holding an older state keep
//! a consistent snapshot. [`ProjectStore`] is the injectable container the
//! presentation layer subscribes to.
//!
//! The two filter actions narrow the cached collections destructively. The
//! only way back to the full project is a fresh `SetProject`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use super::models::{PopulatedProject, PopulatedSprint, SprintId, SprintStatus, Task, TaskId};
use super::ws::WsMessage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum ProjectAction {
    SetProject {
        project: Option<PopulatedProject>,
    },
    AddSprint {
        sprint: PopulatedSprint,
    },
    #[serde(rename_all = "camelCase")]
    AddTaskToSprint {
        sprint_id: SprintId,
        task: Task,
    },
    AddTaskToBacklog {
        task: Task,
    },
    #[serde(rename_all = "camelCase")]
    RemoveSprint {
        sprint_id: SprintId,
    },
    #[serde(rename_all = "camelCase")]
    RemoveTask {
        task_id: TaskId,
    },
    #[serde(rename_all = "camelCase")]
    UpdateTask {
        task_id: TaskId,
        updated_task: Task,
    },
    #[serde(rename_all = "camelCase")]
    UpdateSprint {
        sprint_id: SprintId,
        updated_sprint: PopulatedSprint,
    },
    #[serde(rename_all = "camelCase")]
    StartSprint {
        sprint_id: SprintId,
    },
    #[serde(rename_all = "camelCase")]
    EndSprint {
        sprint_id: SprintId,
    },
    FilterTasksByUser {
        user: String,
    },
    #[serde(rename_all = "camelCase")]
    FilterTasksBySprint {
        sprint_id: SprintId,
    },
}

impl ProjectAction {
    /// Parse an action arriving from outside the process. Unknown action
    /// types and payloads of the wrong shape are rejected.
    pub fn from_json(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectState {
    pub project: Option<PopulatedProject>,
}

impl ProjectState {
    pub fn new(project: Option<PopulatedProject>) -> Self {
        Self { project }
    }

    /// Apply one action, returning the next state.
    pub fn reduce(&self, action: &ProjectAction) -> ProjectState {
        if let ProjectAction::SetProject { project } = action {
            return ProjectState::new(project.clone());
        }
        let Some(current) = &self.project else {
            return self.clone();
        };
        let mut next = current.clone();

        match action {
            ProjectAction::SetProject { .. } => {}
            ProjectAction::AddSprint { sprint } => {
                next.sprints.push(sprint.clone());
            }
            ProjectAction::AddTaskToSprint { sprint_id, task } => {
                if let Some(sprint) = next.sprints.iter_mut().find(|s| &s.id == sprint_id) {
                    sprint.tasks.push(task.clone());
                }
            }
            ProjectAction::AddTaskToBacklog { task } => {
                next.backlog_tasks.push(task.clone());
            }
            ProjectAction::RemoveSprint { sprint_id } => {
                next.sprints.retain(|s| &s.id != sprint_id);
            }
            ProjectAction::RemoveTask { task_id } => {
                for sprint in &mut next.sprints {
                    sprint.tasks.retain(|t| &t.id != task_id);
                }
                next.backlog_tasks.retain(|t| &t.id != task_id);
            }
            ProjectAction::UpdateTask {
                task_id,
                updated_task,
            } => {
                // Only the sprint the updated task claims to live in is touched,
                // so a stale copy of the task in another sprint stays as is.
                for sprint in &mut next.sprints {
                    if updated_task.sprint.as_deref() != Some(sprint.id.as_str()) {
                        continue;
                    }
                    for task in &mut sprint.tasks {
                        if &task.id == task_id {
                            *task = updated_task.clone();
                        }
                    }
                }
                for task in &mut next.backlog_tasks {
                    if &task.id == task_id {
                        *task = updated_task.clone();
                    }
                }
            }
            ProjectAction::UpdateSprint {
                sprint_id,
                updated_sprint,
            } => {
                for sprint in &mut next.sprints {
                    if &sprint.id == sprint_id {
                        *sprint = updated_sprint.clone();
                    }
                }
            }
            ProjectAction::StartSprint { sprint_id } => {
                set_sprint_status(&mut next, sprint_id, SprintStatus::InProgress);
            }
            ProjectAction::EndSprint { sprint_id } => {
                set_sprint_status(&mut next, sprint_id, SprintStatus::Completed);
            }
            ProjectAction::FilterTasksByUser { user } => {
                next.backlog_tasks.retain(|t| &t.assigned_user == user);
                for sprint in &mut next.sprints {
                    sprint.tasks.retain(|t| &t.assigned_user == user);
                }
            }
            ProjectAction::FilterTasksBySprint { sprint_id } => {
                next.sprints.retain(|s| &s.id == sprint_id);
                // Backlog tasks carry no sprint, so this normally empties the backlog.
                next.backlog_tasks
                    .retain(|t| t.sprint.as_deref() == Some(sprint_id.as_str()));
            }
        }

        ProjectState::new(Some(next))
    }
}

fn set_sprint_status(project: &mut PopulatedProject, sprint_id: &str, status: SprintStatus) {
    for sprint in &mut project.sprints {
        if sprint.id == sprint_id {
            sprint.status = status.clone();
        }
    }
}

/// Single-writer container for the cached project.
///
/// Each `dispatch` publishes exactly one new state to every subscriber.
pub struct ProjectStore {
    tx: watch::Sender<Arc<ProjectState>>,
}

impl ProjectStore {
    pub fn new(initial: ProjectState) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    pub fn state(&self) -> Arc<ProjectState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<ProjectState>> {
        self.tx.subscribe()
    }

    pub fn dispatch(&mut self, action: &ProjectAction) -> Arc<ProjectState> {
        let next = Arc::new(self.state().reduce(action));
        self.tx.send_replace(next.clone());
        tracing::trace!(?action, "projection updated");
        next
    }

    /// Apply a change-feed message to the cached project. Messages about
    /// other projects, or arriving before any project is loaded, are
    /// skipped and return `None`.
    pub fn apply(&mut self, msg: &WsMessage) -> Option<Arc<ProjectState>> {
        let cached_id = self.state().project.as_ref()?.id.clone();
        match msg.to_action(&cached_id) {
            Some(action) => Some(self.dispatch(&action)),
            None => {
                tracing::trace!(project_id = msg.project_id(), "change feed message skipped");
                None
            }
        }
    }
}

impl Default for ProjectStore {
    fn default() -> Self {
        Self::new(ProjectState::default())
    }
}
