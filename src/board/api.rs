use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::broadcast;

use super::db::DbHandle;
use super::models::*;
use super::service::{DbBoardService, ProjectService, SprintService, TaskService};
use super::ws::{WsMessage, broadcast_message};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub sprints: Arc<dyn SprintService>,
    pub projects: Arc<dyn ProjectService>,
    pub tasks: Arc<dyn TaskService>,
    pub ws_tx: broadcast::Sender<String>,
}

impl AppState {
    /// Wire all three services to one SQLite-backed implementation.
    pub fn from_db(db: DbHandle, ws_tx: broadcast::Sender<String>) -> Self {
        let service = Arc::new(DbBoardService::new(db));
        Self {
            sprints: service.clone(),
            projects: service.clone(),
            tasks: service,
            ws_tx,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSprintRequest {
    pub name: String,
    pub project: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<SprintStatus>,
    #[serde(default)]
    pub tasks: Vec<TaskId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintIdRequest {
    #[serde(default)]
    pub sprint_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSprintRequest {
    #[serde(default)]
    pub sprint_id: String,
    pub name: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub status: Option<SprintStatus>,
    pub tasks: Option<Vec<TaskId>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub assigned_users: Vec<String>,
    #[serde(default)]
    pub initial_sprint: Option<SprintDraft>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProjectRequest {
    #[serde(default)]
    pub project_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub assigned_users: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    pub name: String,
    pub project: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assigned_user: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    #[serde(default)]
    pub task_points: u32,
    #[serde(default)]
    pub sprint: Option<SprintId>,
    #[serde(default)]
    pub prereq_tasks: Vec<TaskId>,
    #[serde(default)]
    pub relevant_questions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdRequest {
    #[serde(default)]
    pub task_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub task_id: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub assigned_user: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub task_points: Option<u32>,
    pub relevant_questions: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskRequest {
    #[serde(default)]
    pub task_id: String,
    /// Target sprint; `null` or absent moves the task to the backlog.
    #[serde(default)]
    pub sprint_id: Option<SprintId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyRequest {
    #[serde(default)]
    pub prereq_task_id: String,
    #[serde(default)]
    pub dependent_task_id: String,
}

// ── Error handling ────────────────────────────────────────────────────

/// Error responses carry a plain-text body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_request() -> Self {
        ApiError::BadRequest("Invalid request".into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };
        (status, message).into_response()
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/sprint/createSprint", post(create_sprint))
        .route("/sprint/getSprint", get(get_sprint))
        .route("/sprint/deleteSprint", delete(delete_sprint))
        .route("/sprint/startSprint", put(start_sprint))
        .route("/sprint/endSprint", put(end_sprint))
        .route("/sprint/updateSprint", put(update_sprint))
        .route("/project/createProject", post(create_project))
        .route("/project/getProjectsByUser/{username}", get(get_projects_by_user))
        .route("/project/getProject/{project_id}", get(get_project))
        .route("/project/updateProject", put(update_project))
        .route("/task/createTask", post(create_task))
        .route("/task/getTask", get(get_task))
        .route("/task/updateTask", put(update_task))
        .route("/task/deleteTask", delete(delete_task))
        .route("/task/moveTask", put(move_task))
        .route("/task/addDependency", put(add_dependency))
        .route("/task/removeDependency", put(remove_dependency))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            tracing::debug!(reason = %rejection.body_text(), "rejected request body");
            Err(ApiError::invalid_request())
        }
    }
}

fn require_id(id: &str) -> Result<(), ApiError> {
    if id.trim().is_empty() {
        return Err(ApiError::invalid_request());
    }
    Ok(())
}

/// Broadcast the fresh, populated project after a metadata edit or a
/// multi-collection write.
async fn refresh_project(state: &SharedState, project_id: &str) {
    match state.projects.get_populated(project_id).await {
        Ok(project) => broadcast_message(&state.ws_tx, &WsMessage::ProjectRefreshed { project }),
        Err(e) => tracing::warn!(project_id, error = %e, "could not refresh project for subscribers"),
    }
}

async fn announce_sprint_update(state: &SharedState, sprint_id: &str) {
    match state.sprints.get_populated(sprint_id).await {
        Ok(sprint) => broadcast_message(&state.ws_tx, &WsMessage::SprintUpdated { sprint }),
        Err(e) => tracing::warn!(sprint_id, error = %e, "could not load sprint for subscribers"),
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

// Sprint

async fn create_sprint(
    State(state): State<SharedState>,
    payload: Result<Json<CreateSprintRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.project)?;
    if req.name.trim().is_empty() {
        return Err(ApiError::invalid_request());
    }
    let new_sprint = NewSprint {
        name: req.name,
        project: req.project,
        start_date: req.start_date,
        end_date: req.end_date,
        status: req.status.unwrap_or_default(),
        tasks: req.tasks,
    };
    let sprint = state
        .sprints
        .save(new_sprint)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when saving a sprint: {}", e)))?;

    if sprint.tasks.is_empty() {
        match state.sprints.get_populated(&sprint.id).await {
            Ok(populated) => {
                broadcast_message(&state.ws_tx, &WsMessage::SprintCreated { sprint: populated })
            }
            Err(e) => tracing::warn!(sprint_id = %sprint.id, error = %e, "could not load new sprint"),
        }
    } else {
        refresh_project(&state, &sprint.project).await;
    }
    Ok((StatusCode::CREATED, Json(sprint)))
}

async fn get_sprint(
    State(state): State<SharedState>,
    payload: Result<Json<SprintIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.sprint_id)?;
    let sprint = state
        .sprints
        .get_populated(&req.sprint_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when fetching a sprint: {}", e)))?;
    Ok(Json(sprint))
}

async fn delete_sprint(
    State(state): State<SharedState>,
    payload: Result<Json<SprintIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.sprint_id)?;
    let deleted = state
        .sprints
        .delete_by_id(&req.sprint_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when deleting a sprint: {}", e)))?;
    refresh_project(&state, &deleted.project).await;
    Ok(Json(deleted))
}

async fn set_sprint_status(
    state: &SharedState,
    payload: Result<Json<SprintIdRequest>, JsonRejection>,
    status: SprintStatus,
) -> Result<Json<Sprint>, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.sprint_id)?;
    let sprint = state
        .sprints
        .update(&req.sprint_id, SprintUpdate::status(status))
        .await
        .map_err(|e| ApiError::Internal(format!("Error when updating sprint status: {}", e)))?;
    tracing::info!(sprint_id = %sprint.id, status = %sprint.status, "sprint status changed");
    announce_sprint_update(state, &sprint.id).await;
    Ok(Json(sprint))
}

async fn start_sprint(
    State(state): State<SharedState>,
    payload: Result<Json<SprintIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    set_sprint_status(&state, payload, SprintStatus::InProgress).await
}

async fn end_sprint(
    State(state): State<SharedState>,
    payload: Result<Json<SprintIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    set_sprint_status(&state, payload, SprintStatus::Completed).await
}

async fn update_sprint(
    State(state): State<SharedState>,
    payload: Result<Json<UpdateSprintRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.sprint_id)?;
    let update = SprintUpdate {
        name: req.name,
        start_date: req.start_date,
        end_date: req.end_date,
        status: req.status,
        tasks: req.tasks,
    };
    let sprint = state
        .sprints
        .update(&req.sprint_id, update)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when updating a sprint: {}", e)))?;
    announce_sprint_update(&state, &sprint.id).await;
    Ok(Json(sprint))
}

// Project

async fn create_project(
    State(state): State<SharedState>,
    payload: Result<Json<CreateProjectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    if req.name.trim().is_empty() {
        return Err(ApiError::invalid_request());
    }
    let project = state
        .projects
        .save(NewProject {
            name: req.name,
            description: req.description,
            assigned_users: req.assigned_users,
            initial_sprint: req.initial_sprint,
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Error when saving a project: {}", e)))?;
    broadcast_message(
        &state.ws_tx,
        &WsMessage::ProjectCreated {
            project: project.clone(),
        },
    );
    Ok((StatusCode::CREATED, Json(project)))
}

async fn get_projects_by_user(
    State(state): State<SharedState>,
    Path(username): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_id(&username)?;
    let projects = state
        .projects
        .get_all_by_user(&username)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when getting projects: {}", e)))?;
    Ok(Json(projects))
}

async fn get_project(
    State(state): State<SharedState>,
    Path(project_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let project = state
        .projects
        .get_populated(&project_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when getting a project: {}", e)))?;
    Ok(Json(project))
}

async fn update_project(
    State(state): State<SharedState>,
    payload: Result<Json<UpdateProjectRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.project_id)?;
    let update = ProjectUpdate {
        name: req.name,
        description: req.description,
        assigned_users: req.assigned_users,
    };
    let project = state
        .projects
        .update(&req.project_id, update)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when updating a project: {}", e)))?;
    refresh_project(&state, &project.id).await;
    Ok(Json(project))
}

// Task

async fn create_task(
    State(state): State<SharedState>,
    payload: Result<Json<CreateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.project)?;
    if req.name.trim().is_empty() {
        return Err(ApiError::invalid_request());
    }
    let links_changed = !req.prereq_tasks.is_empty();
    let task = state
        .tasks
        .save(NewTask {
            name: req.name,
            description: req.description,
            assigned_user: req.assigned_user,
            status: req.status.unwrap_or_else(|| DEFAULT_TASK_STATUS.to_string()),
            priority: req.priority.unwrap_or_else(|| DEFAULT_TASK_PRIORITY.to_string()),
            task_points: req.task_points,
            sprint: req.sprint.filter(|s| !s.is_empty()),
            project: req.project,
            prereq_tasks: req.prereq_tasks,
            relevant_questions: req.relevant_questions,
        })
        .await
        .map_err(|e| ApiError::Internal(format!("Error when saving a task: {}", e)))?;

    if links_changed {
        refresh_project(&state, &task.project).await;
    } else {
        broadcast_message(&state.ws_tx, &WsMessage::TaskCreated { task: task.clone() });
    }
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    payload: Result<Json<TaskIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.task_id)?;
    let task = state
        .tasks
        .get_by_id(&req.task_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when fetching a task: {}", e)))?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.task_id)?;
    let update = TaskUpdate {
        name: req.name,
        description: req.description,
        assigned_user: req.assigned_user,
        status: req.status,
        priority: req.priority,
        task_points: req.task_points,
        relevant_questions: req.relevant_questions,
    };
    let task = state
        .tasks
        .update(&req.task_id, update)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when updating a task: {}", e)))?;
    broadcast_message(&state.ws_tx, &WsMessage::TaskUpdated { task: task.clone() });
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    payload: Result<Json<TaskIdRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.task_id)?;
    let task = state
        .tasks
        .delete_by_id(&req.task_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when deleting a task: {}", e)))?;
    if task.prereq_tasks.is_empty() && task.dependent_tasks.is_empty() {
        broadcast_message(
            &state.ws_tx,
            &WsMessage::TaskDeleted {
                project_id: task.project.clone(),
                task_id: task.id.clone(),
            },
        );
    } else {
        refresh_project(&state, &task.project).await;
    }
    Ok(Json(task))
}

async fn move_task(
    State(state): State<SharedState>,
    payload: Result<Json<MoveTaskRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.task_id)?;
    let target = req.sprint_id.filter(|s| !s.is_empty());
    let task = state
        .tasks
        .move_to(&req.task_id, target)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when moving a task: {}", e)))?;
    refresh_project(&state, &task.project).await;
    Ok(Json(task))
}

async fn add_dependency(
    State(state): State<SharedState>,
    payload: Result<Json<DependencyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.prereq_task_id)?;
    require_id(&req.dependent_task_id)?;
    let task = state
        .tasks
        .add_dependency(&req.prereq_task_id, &req.dependent_task_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when updating task dependencies: {}", e)))?;
    refresh_project(&state, &task.project).await;
    Ok(Json(task))
}

async fn remove_dependency(
    State(state): State<SharedState>,
    payload: Result<Json<DependencyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let req = parse_body(payload)?;
    require_id(&req.prereq_task_id)?;
    require_id(&req.dependent_task_id)?;
    let task = state
        .tasks
        .remove_dependency(&req.prereq_task_id, &req.dependent_task_id)
        .await
        .map_err(|e| ApiError::Internal(format!("Error when updating task dependencies: {}", e)))?;
    refresh_project(&state, &task.project).await;
    Ok(Json(task))
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;
    use crate::board::service::ServiceResult;
    use crate::errors::ServiceError;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    /// Sprint service that fails every call with a fixed message.
    struct FailingSprints {
        message: String,
        calls: AtomicUsize,
    }

    impl FailingSprints {
        fn new(message: &str) -> Arc<Self> {
            Arc::new(Self {
                message: message.to_string(),
                calls: AtomicUsize::new(0),
            })
        }

        fn fail<T>(&self) -> ServiceResult<T> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::storage(self.message.clone()))
        }
    }

    #[async_trait]
    impl SprintService for FailingSprints {
        async fn save(&self, _sprint: NewSprint) -> ServiceResult<Sprint> {
            self.fail()
        }
        async fn get_by_id(&self, _sprint_id: &str) -> ServiceResult<Sprint> {
            self.fail()
        }
        async fn get_populated(&self, _sprint_id: &str) -> ServiceResult<PopulatedSprint> {
            self.fail()
        }
        async fn update(&self, _sprint_id: &str, _update: SprintUpdate) -> ServiceResult<Sprint> {
            self.fail()
        }
        async fn delete_by_id(&self, _sprint_id: &str) -> ServiceResult<Sprint> {
            self.fail()
        }
    }

    fn test_state() -> SharedState {
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let (ws_tx, _) = broadcast::channel(16);
        Arc::new(AppState::from_db(db, ws_tx))
    }

    fn test_app() -> Router {
        api_router().with_state(test_state())
    }

    fn failing_app(sprints: Arc<FailingSprints>) -> Router {
        let db = DbHandle::new(BoardDb::new_in_memory().unwrap());
        let (ws_tx, _) = broadcast::channel(16);
        let mut state = AppState::from_db(db, ws_tx);
        state.sprints = sprints;
        api_router().with_state(Arc::new(state))
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(body: Body) -> T {
        let bytes = body.collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(body: Body) -> String {
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn create_project(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/project/createProject",
                serde_json::json!({
                    "name": "Planner",
                    "description": "A project to test the project model.",
                    "assignedUsers": ["alice"]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let project: serde_json::Value = body_json(response.into_body()).await;
        project["_id"].as_str().unwrap().to_string()
    }

    async fn create_sprint(app: &Router, project_id: &str) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/sprint/createSprint",
                serde_json::json!({
                    "name": "Test",
                    "project": project_id,
                    "startDate": "2023-11-18T09:24:00Z",
                    "endDate": "2023-11-18T09:24:00Z",
                    "status": "active"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response.into_body()).await
    }

    async fn create_task(app: &Router, body: serde_json::Value) -> serde_json::Value {
        let response = app
            .clone()
            .oneshot(json_request("POST", "/task/createTask", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        body_json(response.into_body()).await
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = test_app();
        let request = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response.into_body()).await, "ok");
    }

    // ── createSprint ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_sprint_missing_field_is_400() {
        let app = test_app();
        let response = app
            .oneshot(json_request(
                "POST",
                "/sprint/createSprint",
                serde_json::json!({"name": "Test"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_create_sprint_service_error_is_500() {
        let sprints = FailingSprints::new("Error creating sprint");
        let app = failing_app(sprints.clone());
        let response = app
            .oneshot(json_request(
                "POST",
                "/sprint/createSprint",
                serde_json::json!({
                    "name": "Test",
                    "project": "p1",
                    "startDate": "2023-11-18T09:24:00Z",
                    "endDate": "2023-11-18T09:24:00Z"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response.into_body()).await,
            "Error when saving a sprint: Error creating sprint"
        );
    }

    #[tokio::test]
    async fn test_create_sprint_for_unknown_project_is_500() {
        let app = test_app();
        let response = app
            .oneshot(json_request(
                "POST",
                "/sprint/createSprint",
                serde_json::json!({
                    "name": "Test",
                    "project": "47e9b58310afe6e94fc2e9dc",
                    "startDate": "2023-11-18T09:24:00Z",
                    "endDate": "2023-11-18T09:24:00Z"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_create_sprint_defaults_tasks_to_empty() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let sprint = create_sprint(&app, &project_id).await;
        assert_eq!(sprint["tasks"], serde_json::json!([]));
        assert_eq!(sprint["project"], project_id);
        assert_eq!(sprint["status"], "active");
        assert!(sprint["_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_create_sprint_broadcasts_ws() {
        let state = test_state();
        let mut rx = state.ws_tx.subscribe();
        let app = api_router().with_state(state);
        let project_id = create_project(&app).await;
        let _ = rx.recv().await.unwrap(); // ProjectCreated

        create_sprint(&app, &project_id).await;
        let msg: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(msg["type"], "SprintCreated");
        assert_eq!(msg["data"]["sprint"]["name"], "Test");
    }

    // ── getSprint ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_sprint_malformed_body_is_400() {
        let app = test_app();
        let response = app
            .oneshot(json_request(
                "GET",
                "/sprint/getSprint",
                serde_json::json!({"test": "Test"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_get_sprint_unknown_id_is_500() {
        let app = test_app();
        let response = app
            .oneshot(json_request(
                "GET",
                "/sprint/getSprint",
                serde_json::json!({"sprintId": "test"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response.into_body()).await,
            "Error when fetching a sprint: Sprint test not found"
        );
    }

    #[tokio::test]
    async fn test_get_sprint_is_populated() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let sprint = create_sprint(&app, &project_id).await;
        let sprint_id = sprint["_id"].as_str().unwrap();
        create_task(
            &app,
            serde_json::json!({
                "name": "username",
                "description": "test_desc",
                "assignedUser": "test",
                "project": project_id,
                "sprint": sprint_id,
                "priority": "high",
                "taskPoints": 5
            }),
        )
        .await;

        let response = app
            .oneshot(json_request(
                "GET",
                "/sprint/getSprint",
                serde_json::json!({"sprintId": sprint_id}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let populated: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(populated["tasks"][0]["name"], "username");
        assert_eq!(populated["tasks"][0]["assignedUser"], "test");
        assert_eq!(populated["tasks"][0]["sprint"], sprint_id);
    }

    // ── deleteSprint ─────────────────────────────────────────────────

    #[tokio::test]
    async fn test_delete_sprint_returns_deleted_record() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let sprint = create_sprint(&app, &project_id).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "DELETE",
                "/sprint/deleteSprint",
                serde_json::json!({"sprintId": sprint["_id"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let deleted: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(deleted, sprint);

        let project = app
            .oneshot(
                Request::builder()
                    .uri(format!("/project/getProject/{}", project_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let project: serde_json::Value = body_json(project.into_body()).await;
        assert_eq!(project["sprints"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_delete_sprint_error_is_500() {
        let app = failing_app(FailingSprints::new("Error deleting sprint"));
        let response = app
            .oneshot(json_request(
                "DELETE",
                "/sprint/deleteSprint",
                serde_json::json!({"sprintId": "test"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ── start / end / update ─────────────────────────────────────────

    #[tokio::test]
    async fn test_status_endpoints_reject_missing_sprint_id_without_service_call() {
        let sprints = FailingSprints::new("unused");
        let app = failing_app(sprints.clone());
        for uri in ["/sprint/startSprint", "/sprint/endSprint", "/sprint/updateSprint"] {
            for body in [serde_json::json!({}), serde_json::json!({"sprintId": ""})] {
                let response = app
                    .clone()
                    .oneshot(json_request("PUT", uri, body))
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
                assert_eq!(body_text(response.into_body()).await, "Invalid request");
            }
        }
        assert_eq!(sprints.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_and_end_sprint_error_message() {
        for uri in ["/sprint/startSprint", "/sprint/endSprint"] {
            let app = failing_app(FailingSprints::new("Test error"));
            let response = app
                .oneshot(json_request(
                    "PUT",
                    uri,
                    serde_json::json!({"sprintId": "test"}),
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert_eq!(
                body_text(response.into_body()).await,
                "Error when updating sprint status: Test error"
            );
        }
    }

    #[tokio::test]
    async fn test_update_sprint_error_message() {
        let app = failing_app(FailingSprints::new("Test error"));
        let response = app
            .oneshot(json_request(
                "PUT",
                "/sprint/updateSprint",
                serde_json::json!({"sprintId": "test"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_text(response.into_body()).await,
            "Error when updating a sprint: Test error"
        );
    }

    #[tokio::test]
    async fn test_start_then_end_sprint() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let sprint = create_sprint(&app, &project_id).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/sprint/startSprint",
                serde_json::json!({"sprintId": sprint["_id"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let started: serde_json::Value = body_json(response.into_body()).await;
        let mut expected = sprint.clone();
        expected["status"] = "In Progress".into();
        assert_eq!(started, expected);

        let response = app
            .oneshot(json_request(
                "PUT",
                "/sprint/endSprint",
                serde_json::json!({"sprintId": sprint["_id"]}),
            ))
            .await
            .unwrap();
        let ended: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(ended["status"], "Completed");
    }

    #[tokio::test]
    async fn test_update_sprint_merges_name() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let sprint = create_sprint(&app, &project_id).await;

        let response = app
            .oneshot(json_request(
                "PUT",
                "/sprint/updateSprint",
                serde_json::json!({"sprintId": sprint["_id"], "name": "Updated Sprint"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(updated["name"], "Updated Sprint");
        assert_eq!(updated["status"], "active");
        assert_eq!(updated["startDate"], sprint["startDate"]);
    }

    // ── projects ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_get_projects_by_user() {
        let app = test_app();
        let project_id = create_project(&app).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/project/getProjectsByUser/alice")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let projects: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0]["_id"], project_id);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/project/getProjectsByUser/mallory")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let projects: Vec<serde_json::Value> = body_json(response.into_body()).await;
        assert!(projects.is_empty());
    }

    #[tokio::test]
    async fn test_update_project_requires_id() {
        let app = test_app();
        let response = app
            .oneshot(json_request(
                "PUT",
                "/project/updateProject",
                serde_json::json!({"name": "x"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response.into_body()).await, "Invalid request");
    }

    #[tokio::test]
    async fn test_update_project_assigned_users() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let response = app
            .oneshot(json_request(
                "PUT",
                "/project/updateProject",
                serde_json::json!({"projectId": project_id, "assignedUsers": ["alice", "bob"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let project: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(project["assignedUsers"], serde_json::json!(["alice", "bob"]));
        assert_eq!(project["name"], "Planner");
    }

    #[tokio::test]
    async fn test_update_project_broadcasts_refreshed_project() {
        let state = test_state();
        let mut rx = state.ws_tx.subscribe();
        let app = api_router().with_state(state);
        let project_id = create_project(&app).await;
        let _ = rx.recv().await.unwrap(); // ProjectCreated

        let response = app
            .oneshot(json_request(
                "PUT",
                "/project/updateProject",
                serde_json::json!({"projectId": project_id, "name": "Renamed"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let msg: WsMessage = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        match msg.to_action(&project_id) {
            Some(crate::board::projection::ProjectAction::SetProject {
                project: Some(project),
            }) => {
                assert_eq!(project.name, "Renamed");
                assert_eq!(project.assigned_users, vec!["alice".to_string()]);
            }
            other => panic!("Expected SetProject, got {:?}", other),
        }
    }

    // ── tasks ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_task_move_keeps_single_home() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let sprint = create_sprint(&app, &project_id).await;
        let task = create_task(
            &app,
            serde_json::json!({"name": "Mover", "project": project_id}),
        )
        .await;
        assert_eq!(task["sprint"], serde_json::Value::Null);
        assert_eq!(task["status"], DEFAULT_TASK_STATUS);

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/task/moveTask",
                serde_json::json!({"taskId": task["_id"], "sprintId": sprint["_id"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/project/getProject/{}", project_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let project: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(project["backlogTasks"], serde_json::json!([]));
        assert_eq!(project["sprints"][0]["tasks"][0]["_id"], task["_id"]);
    }

    #[tokio::test]
    async fn test_task_update_and_delete() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let task = create_task(
            &app,
            serde_json::json!({"name": "Edit me", "project": project_id, "assignedUser": "alice"}),
        )
        .await;

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/task/updateTask",
                serde_json::json!({"taskId": task["_id"], "status": "Done", "priority": "high"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let updated: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(updated["status"], "Done");
        assert_eq!(updated["assignedUser"], "alice");

        let response = app
            .clone()
            .oneshot(json_request(
                "DELETE",
                "/task/deleteTask",
                serde_json::json!({"taskId": task["_id"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(json_request(
                "GET",
                "/task/getTask",
                serde_json::json!({"taskId": task["_id"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_add_dependency_endpoint() {
        let app = test_app();
        let project_id = create_project(&app).await;
        let a = create_task(&app, serde_json::json!({"name": "A", "project": project_id})).await;
        let b = create_task(&app, serde_json::json!({"name": "B", "project": project_id})).await;

        let response = app
            .clone()
            .oneshot(json_request(
                "PUT",
                "/task/addDependency",
                serde_json::json!({"prereqTaskId": a["_id"], "dependentTaskId": b["_id"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let dependent: serde_json::Value = body_json(response.into_body()).await;
        assert_eq!(dependent["prereqTasks"], serde_json::json!([a["_id"]]));

        let response = app
            .oneshot(json_request(
                "PUT",
                "/task/addDependency",
                serde_json::json!({"prereqTaskId": a["_id"], "dependentTaskId": a["_id"]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body_text(response.into_body())
                .await
                .starts_with("Error when updating task dependencies:")
        );
    }

    #[tokio::test]
    async fn test_non_json_body_is_400() {
        let app = test_app();
        let request = Request::builder()
            .method("PUT")
            .uri("/sprint/startSprint")
            .body(Body::from("sprintId=abc"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response.into_body()).await, "Invalid request");
    }
}
