//! Persistence services for sprints, projects and tasks.
//!
//! Every method resolves to `Result<T, ServiceError>`: storage faults are
//! caught here and turned into a tagged error value carrying a message, so
//! the HTTP layer only has to choose a status code. The traits are the seam
//! between handlers and storage; [`DbBoardService`] is the SQLite-backed
//! implementation used in production.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::db::DbHandle;
use super::models::*;
use crate::errors::ServiceError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[async_trait]
pub trait SprintService: Send + Sync {
    async fn save(&self, sprint: NewSprint) -> ServiceResult<Sprint>;
    async fn get_by_id(&self, sprint_id: &str) -> ServiceResult<Sprint>;
    async fn get_populated(&self, sprint_id: &str) -> ServiceResult<PopulatedSprint>;
    async fn update(&self, sprint_id: &str, update: SprintUpdate) -> ServiceResult<Sprint>;
    async fn delete_by_id(&self, sprint_id: &str) -> ServiceResult<Sprint>;
}

#[async_trait]
pub trait ProjectService: Send + Sync {
    async fn save(&self, project: NewProject) -> ServiceResult<Project>;
    async fn get_all_by_user(&self, username: &str) -> ServiceResult<Vec<Project>>;
    async fn get_populated(&self, project_id: &str) -> ServiceResult<PopulatedProject>;
    async fn update(&self, project_id: &str, update: ProjectUpdate) -> ServiceResult<Project>;
}

#[async_trait]
pub trait TaskService: Send + Sync {
    async fn save(&self, task: NewTask) -> ServiceResult<Task>;
    async fn get_by_id(&self, task_id: &str) -> ServiceResult<Task>;
    async fn update(&self, task_id: &str, update: TaskUpdate) -> ServiceResult<Task>;
    async fn delete_by_id(&self, task_id: &str) -> ServiceResult<Task>;
    /// Move into `sprint_id`, or back to the backlog when `None`.
    async fn move_to(&self, task_id: &str, sprint_id: Option<String>) -> ServiceResult<Task>;
    async fn add_dependency(&self, prereq_id: &str, dependent_id: &str) -> ServiceResult<Task>;
    async fn remove_dependency(&self, prereq_id: &str, dependent_id: &str) -> ServiceResult<Task>;
}

/// SQLite-backed implementation of all three services.
#[derive(Clone)]
pub struct DbBoardService {
    db: DbHandle,
}

impl DbBoardService {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }

    /// Run a DB closure, classifying its failure.
    async fn run<F, R>(&self, op: &'static str, f: F) -> ServiceResult<R>
    where
        F: FnOnce(&super::db::BoardDb) -> anyhow::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.db.call(f).await.map_err(|e| {
            let err = ServiceError::from_db(e);
            warn!(op, error = %err, "storage operation failed");
            err
        })
    }
}

fn found<T>(value: Option<T>, entity: &'static str, id: String) -> ServiceResult<T> {
    value.ok_or(ServiceError::NotFound { entity, id })
}

#[async_trait]
impl SprintService for DbBoardService {
    async fn save(&self, sprint: NewSprint) -> ServiceResult<Sprint> {
        let created = self.run("sprint.save", move |db| db.create_sprint(&sprint)).await?;
        debug!(sprint_id = %created.id, project_id = %created.project, "sprint saved");
        Ok(created)
    }

    async fn get_by_id(&self, sprint_id: &str) -> ServiceResult<Sprint> {
        let id = sprint_id.to_string();
        let sprint = self.run("sprint.get", move |db| db.get_sprint(&id)).await?;
        found(sprint, "Sprint", sprint_id.to_string())
    }

    async fn get_populated(&self, sprint_id: &str) -> ServiceResult<PopulatedSprint> {
        let id = sprint_id.to_string();
        let sprint = self
            .run("sprint.get_populated", move |db| db.get_populated_sprint(&id))
            .await?;
        found(sprint, "Sprint", sprint_id.to_string())
    }

    async fn update(&self, sprint_id: &str, update: SprintUpdate) -> ServiceResult<Sprint> {
        let id = sprint_id.to_string();
        let sprint = self
            .run("sprint.update", move |db| db.update_sprint(&id, &update))
            .await?;
        found(sprint, "Sprint", sprint_id.to_string())
    }

    async fn delete_by_id(&self, sprint_id: &str) -> ServiceResult<Sprint> {
        let id = sprint_id.to_string();
        let sprint = self.run("sprint.delete", move |db| db.delete_sprint(&id)).await?;
        found(sprint, "Sprint", sprint_id.to_string())
    }
}

#[async_trait]
impl ProjectService for DbBoardService {
    async fn save(&self, project: NewProject) -> ServiceResult<Project> {
        let created = self.run("project.save", move |db| db.create_project(&project)).await?;
        debug!(project_id = %created.id, "project saved");
        Ok(created)
    }

    async fn get_all_by_user(&self, username: &str) -> ServiceResult<Vec<Project>> {
        let username = username.to_string();
        self.run("project.get_all_by_user", move |db| {
            db.list_projects_for_user(&username)
        })
        .await
    }

    async fn get_populated(&self, project_id: &str) -> ServiceResult<PopulatedProject> {
        let id = project_id.to_string();
        let project = self
            .run("project.get_populated", move |db| db.get_populated_project(&id))
            .await?;
        found(project, "Project", project_id.to_string())
    }

    async fn update(&self, project_id: &str, update: ProjectUpdate) -> ServiceResult<Project> {
        let id = project_id.to_string();
        let project = self
            .run("project.update", move |db| db.update_project(&id, &update))
            .await?;
        found(project, "Project", project_id.to_string())
    }
}

#[async_trait]
impl TaskService for DbBoardService {
    async fn save(&self, task: NewTask) -> ServiceResult<Task> {
        let created = self.run("task.save", move |db| db.create_task(&task)).await?;
        debug!(task_id = %created.id, sprint = ?created.sprint, "task saved");
        Ok(created)
    }

    async fn get_by_id(&self, task_id: &str) -> ServiceResult<Task> {
        let id = task_id.to_string();
        let task = self.run("task.get", move |db| db.get_task(&id)).await?;
        found(task, "Task", task_id.to_string())
    }

    async fn update(&self, task_id: &str, update: TaskUpdate) -> ServiceResult<Task> {
        let id = task_id.to_string();
        let task = self
            .run("task.update", move |db| db.update_task(&id, &update))
            .await?;
        found(task, "Task", task_id.to_string())
    }

    async fn delete_by_id(&self, task_id: &str) -> ServiceResult<Task> {
        let id = task_id.to_string();
        let task = self.run("task.delete", move |db| db.delete_task(&id)).await?;
        found(task, "Task", task_id.to_string())
    }

    async fn move_to(&self, task_id: &str, sprint_id: Option<String>) -> ServiceResult<Task> {
        let id = task_id.to_string();
        let task = self
            .run("task.move", move |db| db.move_task(&id, sprint_id.as_deref()))
            .await?;
        found(task, "Task", task_id.to_string())
    }

    async fn add_dependency(&self, prereq_id: &str, dependent_id: &str) -> ServiceResult<Task> {
        let (prereq, dependent) = (prereq_id.to_string(), dependent_id.to_string());
        self.run("task.add_dependency", move |db| {
            db.add_dependency(&prereq, &dependent)
        })
        .await
    }

    async fn remove_dependency(&self, prereq_id: &str, dependent_id: &str) -> ServiceResult<Task> {
        let (prereq, dependent) = (prereq_id.to_string(), dependent_id.to_string());
        self.run("task.remove_dependency", move |db| {
            db.remove_dependency(&prereq, &dependent)
        })
        .await
    }
}
