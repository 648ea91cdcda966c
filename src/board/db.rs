use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};

use super::models::*;
use crate::errors::BoardError;

/// Async-safe handle to the board database.
///
/// Wraps `BoardDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, keeping synchronous SQLite
/// I/O off the async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<BoardDb>>,
}

impl DbHandle {
    pub fn new(db: BoardDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&BoardDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }
}

pub struct BoardDb {
    conn: Connection,
}

impl BoardDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    assigned_users TEXT NOT NULL DEFAULT '[]',
                    sprints TEXT NOT NULL DEFAULT '[]',
                    backlog_tasks TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS sprints (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    start_date TEXT NOT NULL,
                    end_date TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'Planned',
                    tasks TEXT NOT NULL DEFAULT '[]'
                );

                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
                    sprint_id TEXT REFERENCES sprints(id) ON DELETE SET NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    assigned_user TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'To Do',
                    priority TEXT NOT NULL DEFAULT 'low',
                    task_points INTEGER NOT NULL DEFAULT 0 CHECK (task_points >= 0),
                    prereq_tasks TEXT NOT NULL DEFAULT '[]',
                    dependent_tasks TEXT NOT NULL DEFAULT '[]',
                    relevant_questions TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_sprints_project ON sprints(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
                CREATE INDEX IF NOT EXISTS idx_tasks_sprint ON tasks(sprint_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Project CRUD ──────────────────────────────────────────────────

    /// Insert a project, and its initial sprint if one is given, in one transaction.
    pub fn create_project(&self, new: &NewProject) -> Result<Project> {
        let tx = self.conn.unchecked_transaction()?;
        let id = new_id();
        tx.execute(
            "INSERT INTO projects (id, name, description, assigned_users) VALUES (?1, ?2, ?3, ?4)",
            params![id, new.name, new.description, ids_json(&new.assigned_users)?],
        )
        .context("Failed to insert project")?;

        if let Some(draft) = &new.initial_sprint {
            let sprint = NewSprint {
                name: draft.name.clone(),
                project: id.clone(),
                start_date: draft.start_date,
                end_date: draft.end_date,
                status: SprintStatus::Planned,
                tasks: Vec::new(),
            };
            insert_sprint(&tx, &sprint)?;
        }

        let project = require_project(&tx, &id)?;
        tx.commit().context("Failed to commit project creation")?;
        Ok(project)
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        fetch_project(&self.conn, id)
    }

    /// Projects whose assigned users include `username`.
    pub fn list_projects_for_user(&self, username: &str) -> Result<Vec<Project>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, name, description, assigned_users, sprints, backlog_tasks, created_at, updated_at
                 FROM projects
                 WHERE EXISTS (SELECT 1 FROM json_each(projects.assigned_users) WHERE json_each.value = ?1)
                 ORDER BY created_at, rowid",
            )
            .context("Failed to prepare list_projects_for_user")?;
        let rows = stmt
            .query_map(params![username], ProjectRow::from_row)
            .context("Failed to query projects")?;
        let mut projects = Vec::new();
        for row in rows {
            let r = row.context("Failed to read project row")?;
            projects.push(r.into_project()?);
        }
        Ok(projects)
    }

    pub fn update_project(&self, id: &str, update: &ProjectUpdate) -> Result<Option<Project>> {
        let Some(mut project) = fetch_project(&self.conn, id)? else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            project.name = name.clone();
        }
        if let Some(description) = &update.description {
            project.description = description.clone();
        }
        if let Some(users) = &update.assigned_users {
            project.assigned_users = users.clone();
        }
        self.conn
            .execute(
                "UPDATE projects SET name = ?1, description = ?2, assigned_users = ?3, updated_at = datetime('now')
                 WHERE id = ?4",
                params![
                    project.name,
                    project.description,
                    ids_json(&project.assigned_users)?,
                    id
                ],
            )
            .context("Failed to update project")?;
        fetch_project(&self.conn, id)
    }

    pub fn get_populated_project(&self, id: &str) -> Result<Option<PopulatedProject>> {
        let Some(project) = fetch_project(&self.conn, id)? else {
            return Ok(None);
        };
        let mut sprints = Vec::with_capacity(project.sprints.len());
        for sprint_id in &project.sprints {
            if let Some(sprint) = fetch_sprint(&self.conn, sprint_id)? {
                let tasks = fetch_tasks(&self.conn, &sprint.tasks)?;
                sprints.push(PopulatedSprint::from_parts(sprint, tasks));
            }
        }
        let backlog_tasks = fetch_tasks(&self.conn, &project.backlog_tasks)?;
        Ok(Some(PopulatedProject {
            id: project.id,
            name: project.name,
            description: project.description,
            assigned_users: project.assigned_users,
            sprints,
            backlog_tasks,
            created_at: project.created_at,
            updated_at: project.updated_at,
        }))
    }

    // ── Sprint CRUD ───────────────────────────────────────────────────

    /// Insert a sprint and append it to its project's sprint list.
    ///
    /// Initial tasks must come from the same project's backlog; they are
    /// moved into the sprint in the same transaction.
    pub fn create_sprint(&self, new: &NewSprint) -> Result<Sprint> {
        let tx = self.conn.unchecked_transaction()?;
        let sprint = insert_sprint(&tx, new)?;
        tx.commit().context("Failed to commit sprint creation")?;
        Ok(sprint)
    }

    pub fn get_sprint(&self, id: &str) -> Result<Option<Sprint>> {
        fetch_sprint(&self.conn, id)
    }

    pub fn get_populated_sprint(&self, id: &str) -> Result<Option<PopulatedSprint>> {
        let Some(sprint) = fetch_sprint(&self.conn, id)? else {
            return Ok(None);
        };
        let tasks = fetch_tasks(&self.conn, &sprint.tasks)?;
        Ok(Some(PopulatedSprint::from_parts(sprint, tasks)))
    }

    /// Merge the given fields into the stored sprint.
    pub fn update_sprint(&self, id: &str, update: &SprintUpdate) -> Result<Option<Sprint>> {
        let Some(mut sprint) = fetch_sprint(&self.conn, id)? else {
            return Ok(None);
        };
        if let Some(name) = &update.name {
            sprint.name = name.clone();
        }
        if let Some(start) = update.start_date {
            sprint.start_date = start;
        }
        if let Some(end) = update.end_date {
            sprint.end_date = end;
        }
        if let Some(status) = &update.status {
            sprint.status = status.clone();
        }
        if let Some(order) = &update.tasks {
            let mut current = sprint.tasks.clone();
            let mut proposed = order.clone();
            current.sort();
            proposed.sort();
            if current != proposed {
                return Err(BoardError::TaskOrderMismatch {
                    sprint_id: id.to_string(),
                }
                .into());
            }
            sprint.tasks = order.clone();
        }
        self.conn
            .execute(
                "UPDATE sprints SET name = ?1, start_date = ?2, end_date = ?3, status = ?4, tasks = ?5
                 WHERE id = ?6",
                params![
                    sprint.name,
                    sprint.start_date.to_rfc3339(),
                    sprint.end_date.to_rfc3339(),
                    sprint.status.as_str(),
                    ids_json(&sprint.tasks)?,
                    id
                ],
            )
            .context("Failed to update sprint")?;
        fetch_sprint(&self.conn, id)
    }

    /// Delete a sprint, relocating its tasks to the project backlog.
    /// Returns the sprint as it was before deletion.
    pub fn delete_sprint(&self, id: &str) -> Result<Option<Sprint>> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(sprint) = fetch_sprint(&tx, id)? else {
            return Ok(None);
        };
        let mut project = require_project(&tx, &sprint.project)?;

        for task_id in &sprint.tasks {
            set_task_sprint(&tx, task_id, None)?;
            if !project.backlog_tasks.contains(task_id) {
                project.backlog_tasks.push(task_id.clone());
            }
        }
        project.sprints.retain(|s| s != id);
        write_project_lists(&tx, &project)?;

        tx.execute("DELETE FROM sprints WHERE id = ?1", params![id])
            .context("Failed to delete sprint")?;
        tx.commit().context("Failed to commit sprint deletion")?;
        Ok(Some(sprint))
    }

    // ── Task CRUD ─────────────────────────────────────────────────────

    /// Insert a task into its sprint (or the backlog) and link its prerequisites.
    pub fn create_task(&self, new: &NewTask) -> Result<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let project = require_project(&tx, &new.project)?;
        if let Some(sprint_id) = &new.sprint {
            let sprint = require_sprint(&tx, sprint_id)?;
            if sprint.project != project.id {
                return Err(BoardError::SprintNotFound {
                    id: sprint_id.clone(),
                })
                .context(format!("Sprint does not belong to project {}", project.id));
            }
        }

        let id = new_id();
        let mut prereqs: Vec<TaskId> = Vec::new();
        for prereq_id in &new.prereq_tasks {
            if prereqs.contains(prereq_id) {
                continue;
            }
            let prereq = require_task(&tx, prereq_id)?;
            ensure_same_project(&prereq, &project.id)?;
            prereqs.push(prereq_id.clone());
        }

        tx.execute(
            "INSERT INTO tasks (id, project_id, sprint_id, name, description, assigned_user, status, priority,
                                task_points, prereq_tasks, relevant_questions)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                id,
                new.project,
                new.sprint,
                new.name,
                new.description,
                new.assigned_user,
                new.status,
                new.priority,
                new.task_points,
                ids_json(&prereqs)?,
                ids_json(&new.relevant_questions)?,
            ],
        )
        .context("Failed to insert task")?;

        for prereq_id in &prereqs {
            let mut prereq = require_task(&tx, prereq_id)?;
            prereq.dependent_tasks.push(id.clone());
            write_task_links(&tx, &prereq)?;
        }
        attach_task(&tx, &id, &project.id, new.sprint.as_deref())?;

        let task = require_task(&tx, &id)?;
        tx.commit().context("Failed to commit task creation")?;
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        fetch_task(&self.conn, id)
    }

    pub fn update_task(&self, id: &str, update: &TaskUpdate) -> Result<Option<Task>> {
        let Some(mut task) = fetch_task(&self.conn, id)? else {
            return Ok(None);
        };
        if let Some(v) = &update.name {
            task.name = v.clone();
        }
        if let Some(v) = &update.description {
            task.description = v.clone();
        }
        if let Some(v) = &update.assigned_user {
            task.assigned_user = v.clone();
        }
        if let Some(v) = &update.status {
            task.status = v.clone();
        }
        if let Some(v) = &update.priority {
            task.priority = v.clone();
        }
        if let Some(v) = update.task_points {
            task.task_points = v;
        }
        if let Some(v) = &update.relevant_questions {
            task.relevant_questions = v.clone();
        }
        self.conn
            .execute(
                "UPDATE tasks SET name = ?1, description = ?2, assigned_user = ?3, status = ?4, priority = ?5,
                                  task_points = ?6, relevant_questions = ?7, updated_at = datetime('now')
                 WHERE id = ?8",
                params![
                    task.name,
                    task.description,
                    task.assigned_user,
                    task.status,
                    task.priority,
                    task.task_points,
                    ids_json(&task.relevant_questions)?,
                    id
                ],
            )
            .context("Failed to update task")?;
        fetch_task(&self.conn, id)
    }

    /// Delete a task, detaching it from its sprint or backlog and from
    /// every linked task. Returns the task as it was before deletion.
    pub fn delete_task(&self, id: &str) -> Result<Option<Task>> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(task) = fetch_task(&tx, id)? else {
            return Ok(None);
        };
        detach_task(&tx, &task)?;

        for prereq_id in &task.prereq_tasks {
            if let Some(mut prereq) = fetch_task(&tx, prereq_id)? {
                prereq.dependent_tasks.retain(|t| t != id);
                write_task_links(&tx, &prereq)?;
            }
        }
        for dependent_id in &task.dependent_tasks {
            if let Some(mut dependent) = fetch_task(&tx, dependent_id)? {
                dependent.prereq_tasks.retain(|t| t != id);
                write_task_links(&tx, &dependent)?;
            }
        }

        tx.execute("DELETE FROM tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        tx.commit().context("Failed to commit task deletion")?;
        Ok(Some(task))
    }

    /// Move a task into `target` sprint, or back to the backlog when `None`.
    pub fn move_task(&self, id: &str, target: Option<&str>) -> Result<Option<Task>> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(task) = fetch_task(&tx, id)? else {
            return Ok(None);
        };
        if task.sprint.as_deref() == target {
            return Ok(Some(task));
        }
        if let Some(sprint_id) = target {
            let sprint = require_sprint(&tx, sprint_id)?;
            if sprint.project != task.project {
                return Err(BoardError::CrossProjectReference {
                    task_id: task.id.clone(),
                    task_project: task.project.clone(),
                    expected_project: sprint.project,
                }
                .into());
            }
        }
        detach_task(&tx, &task)?;
        attach_task(&tx, id, &task.project, target)?;
        set_task_sprint(&tx, id, target)?;

        let moved = require_task(&tx, id)?;
        tx.commit().context("Failed to commit task move")?;
        Ok(Some(moved))
    }

    /// Record `prereq_id` as a prerequisite of `dependent_id` (both directions).
    /// Returns the updated dependent task.
    pub fn add_dependency(&self, prereq_id: &str, dependent_id: &str) -> Result<Task> {
        if prereq_id == dependent_id {
            return Err(BoardError::SelfDependency {
                id: prereq_id.to_string(),
            }
            .into());
        }
        let tx = self.conn.unchecked_transaction()?;
        let mut prereq = require_task(&tx, prereq_id)?;
        let mut dependent = require_task(&tx, dependent_id)?;
        ensure_same_project(&prereq, &dependent.project)?;

        if !dependent.prereq_tasks.iter().any(|t| t == prereq_id) {
            dependent.prereq_tasks.push(prereq_id.to_string());
        }
        if !prereq.dependent_tasks.iter().any(|t| t == dependent_id) {
            prereq.dependent_tasks.push(dependent_id.to_string());
        }
        write_task_links(&tx, &prereq)?;
        write_task_links(&tx, &dependent)?;

        let updated = require_task(&tx, dependent_id)?;
        tx.commit().context("Failed to commit dependency")?;
        Ok(updated)
    }

    /// Remove the link between `prereq_id` and `dependent_id`. Returns the dependent task.
    pub fn remove_dependency(&self, prereq_id: &str, dependent_id: &str) -> Result<Task> {
        let tx = self.conn.unchecked_transaction()?;
        let mut prereq = require_task(&tx, prereq_id)?;
        let mut dependent = require_task(&tx, dependent_id)?;
        dependent.prereq_tasks.retain(|t| t != prereq_id);
        prereq.dependent_tasks.retain(|t| t != dependent_id);
        write_task_links(&tx, &prereq)?;
        write_task_links(&tx, &dependent)?;

        let updated = require_task(&tx, dependent_id)?;
        tx.commit().context("Failed to commit dependency removal")?;
        Ok(updated)
    }
}

// ── Row types ─────────────────────────────────────────────────────────

struct ProjectRow {
    id: String,
    name: String,
    description: String,
    assigned_users: String,
    sprints: String,
    backlog_tasks: String,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            assigned_users: row.get(3)?,
            sprints: row.get(4)?,
            backlog_tasks: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }

    fn into_project(self) -> Result<Project> {
        Ok(Project {
            assigned_users: parse_ids(&self.assigned_users)?,
            sprints: parse_ids(&self.sprints)?,
            backlog_tasks: parse_ids(&self.backlog_tasks)?,
            id: self.id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

struct SprintRow {
    id: String,
    project_id: String,
    name: String,
    start_date: String,
    end_date: String,
    status: String,
    tasks: String,
}

impl SprintRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            start_date: row.get(3)?,
            end_date: row.get(4)?,
            status: row.get(5)?,
            tasks: row.get(6)?,
        })
    }

    fn into_sprint(self) -> Result<Sprint> {
        Ok(Sprint {
            start_date: parse_timestamp(&self.start_date)?,
            end_date: parse_timestamp(&self.end_date)?,
            tasks: parse_ids(&self.tasks)?,
            status: SprintStatus::from(self.status),
            id: self.id,
            project: self.project_id,
            name: self.name,
        })
    }
}

struct TaskRow {
    id: String,
    project_id: String,
    sprint_id: Option<String>,
    name: String,
    description: String,
    assigned_user: String,
    status: String,
    priority: String,
    task_points: u32,
    prereq_tasks: String,
    dependent_tasks: String,
    relevant_questions: String,
    created_at: String,
    updated_at: String,
}

impl TaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            sprint_id: row.get(2)?,
            name: row.get(3)?,
            description: row.get(4)?,
            assigned_user: row.get(5)?,
            status: row.get(6)?,
            priority: row.get(7)?,
            task_points: row.get(8)?,
            prereq_tasks: row.get(9)?,
            dependent_tasks: row.get(10)?,
            relevant_questions: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            prereq_tasks: parse_ids(&self.prereq_tasks)?,
            dependent_tasks: parse_ids(&self.dependent_tasks)?,
            relevant_questions: parse_ids(&self.relevant_questions)?,
            id: self.id,
            name: self.name,
            description: self.description,
            assigned_user: self.assigned_user,
            status: self.status,
            priority: self.priority,
            task_points: self.task_points,
            sprint: self.sprint_id,
            project: self.project_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

// ── Connection-level helpers (usable on a `Transaction` via deref) ────

fn parse_ids(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).with_context(|| format!("Invalid id list: {}", raw))
}

fn ids_json(ids: &[String]) -> Result<String> {
    serde_json::to_string(ids).context("Failed to serialize id list")
}

fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    Ok(chrono::DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Invalid timestamp: {}", raw))?
        .with_timezone(&chrono::Utc))
}

fn fetch_project(conn: &Connection, id: &str) -> Result<Option<Project>> {
    conn.query_row(
        "SELECT id, name, description, assigned_users, sprints, backlog_tasks, created_at, updated_at
         FROM projects WHERE id = ?1",
        params![id],
        ProjectRow::from_row,
    )
    .optional()
    .context("Failed to query project")?
    .map(ProjectRow::into_project)
    .transpose()
}

fn fetch_sprint(conn: &Connection, id: &str) -> Result<Option<Sprint>> {
    conn.query_row(
        "SELECT id, project_id, name, start_date, end_date, status, tasks FROM sprints WHERE id = ?1",
        params![id],
        SprintRow::from_row,
    )
    .optional()
    .context("Failed to query sprint")?
    .map(SprintRow::into_sprint)
    .transpose()
}

fn fetch_task(conn: &Connection, id: &str) -> Result<Option<Task>> {
    conn.query_row(
        "SELECT id, project_id, sprint_id, name, description, assigned_user, status, priority, task_points,
                prereq_tasks, dependent_tasks, relevant_questions, created_at, updated_at
         FROM tasks WHERE id = ?1",
        params![id],
        TaskRow::from_row,
    )
    .optional()
    .context("Failed to query task")?
    .map(TaskRow::into_task)
    .transpose()
}

/// Load tasks in the order given, skipping ids that no longer resolve.
fn fetch_tasks(conn: &Connection, ids: &[TaskId]) -> Result<Vec<Task>> {
    let mut tasks = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(task) = fetch_task(conn, id)? {
            tasks.push(task);
        }
    }
    Ok(tasks)
}

fn require_project(conn: &Connection, id: &str) -> Result<Project> {
    fetch_project(conn, id)?.ok_or_else(|| BoardError::ProjectNotFound { id: id.to_string() }.into())
}

fn require_sprint(conn: &Connection, id: &str) -> Result<Sprint> {
    fetch_sprint(conn, id)?.ok_or_else(|| BoardError::SprintNotFound { id: id.to_string() }.into())
}

fn require_task(conn: &Connection, id: &str) -> Result<Task> {
    fetch_task(conn, id)?.ok_or_else(|| BoardError::TaskNotFound { id: id.to_string() }.into())
}

fn ensure_same_project(task: &Task, project_id: &str) -> Result<()> {
    if task.project != project_id {
        return Err(BoardError::CrossProjectReference {
            task_id: task.id.clone(),
            task_project: task.project.clone(),
            expected_project: project_id.to_string(),
        }
        .into());
    }
    Ok(())
}

fn insert_sprint(conn: &Connection, new: &NewSprint) -> Result<Sprint> {
    let mut project = require_project(conn, &new.project)?;
    let id = new_id();

    let mut tasks: Vec<TaskId> = Vec::new();
    for task_id in &new.tasks {
        if tasks.contains(task_id) {
            continue;
        }
        let task = require_task(conn, task_id)?;
        ensure_same_project(&task, &project.id)?;
        if let Some(current) = task.sprint {
            return Err(BoardError::TaskAlreadyInSprint {
                task_id: task_id.clone(),
                sprint_id: current,
            }
            .into());
        }
        tasks.push(task_id.clone());
    }

    conn.execute(
        "INSERT INTO sprints (id, project_id, name, start_date, end_date, status, tasks)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            new.project,
            new.name,
            new.start_date.to_rfc3339(),
            new.end_date.to_rfc3339(),
            new.status.as_str(),
            ids_json(&tasks)?,
        ],
    )
    .context("Failed to insert sprint")?;

    for task_id in &tasks {
        set_task_sprint(conn, task_id, Some(&id))?;
    }
    project.backlog_tasks.retain(|t| !tasks.contains(t));
    project.sprints.push(id.clone());
    write_project_lists(conn, &project)?;

    require_sprint(conn, &id)
}

fn write_project_lists(conn: &Connection, project: &Project) -> Result<()> {
    conn.execute(
        "UPDATE projects SET sprints = ?1, backlog_tasks = ?2, updated_at = datetime('now') WHERE id = ?3",
        params![
            ids_json(&project.sprints)?,
            ids_json(&project.backlog_tasks)?,
            project.id
        ],
    )
    .context("Failed to update project collections")?;
    Ok(())
}

fn write_sprint_tasks(conn: &Connection, sprint: &Sprint) -> Result<()> {
    conn.execute(
        "UPDATE sprints SET tasks = ?1 WHERE id = ?2",
        params![ids_json(&sprint.tasks)?, sprint.id],
    )
    .context("Failed to update sprint tasks")?;
    Ok(())
}

fn write_task_links(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET prereq_tasks = ?1, dependent_tasks = ?2, updated_at = datetime('now') WHERE id = ?3",
        params![
            ids_json(&task.prereq_tasks)?,
            ids_json(&task.dependent_tasks)?,
            task.id
        ],
    )
    .context("Failed to update task links")?;
    Ok(())
}

fn set_task_sprint(conn: &Connection, task_id: &str, sprint_id: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET sprint_id = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![sprint_id, task_id],
    )
    .context("Failed to update task sprint")?;
    Ok(())
}

/// Remove a task id from whichever collection currently holds it.
fn detach_task(conn: &Connection, task: &Task) -> Result<()> {
    if let Some(sprint_id) = &task.sprint {
        if let Some(mut sprint) = fetch_sprint(conn, sprint_id)? {
            sprint.tasks.retain(|t| t != &task.id);
            write_sprint_tasks(conn, &sprint)?;
        }
    }
    let mut project = require_project(conn, &task.project)?;
    if project.backlog_tasks.iter().any(|t| t == &task.id) {
        project.backlog_tasks.retain(|t| t != &task.id);
        write_project_lists(conn, &project)?;
    }
    Ok(())
}

/// Append a task id to `sprint_id`'s task list, or to the project backlog.
fn attach_task(conn: &Connection, task_id: &str, project_id: &str, sprint_id: Option<&str>) -> Result<()> {
    match sprint_id {
        Some(sprint_id) => {
            let mut sprint = require_sprint(conn, sprint_id)?;
            if !sprint.tasks.iter().any(|t| t == task_id) {
                sprint.tasks.push(task_id.to_string());
                write_sprint_tasks(conn, &sprint)?;
            }
        }
        None => {
            let mut project = require_project(conn, project_id)?;
            if !project.backlog_tasks.iter().any(|t| t == task_id) {
                project.backlog_tasks.push(task_id.to_string());
                write_project_lists(conn, &project)?;
            }
        }
    }
    Ok(())
}
