use axum::{
    body::Bytes,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::models::*;
use super::projection::ProjectAction;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    SprintCreated {
        sprint: PopulatedSprint,
    },
    SprintUpdated {
        sprint: PopulatedSprint,
    },
    TaskCreated {
        task: Task,
    },
    TaskUpdated {
        task: Task,
    },
    TaskDeleted {
        project_id: ProjectId,
        task_id: TaskId,
    },
    /// A project was created. No client can be caching it yet.
    ProjectCreated {
        project: Project,
    },
    /// Project metadata changed, or several collections changed in one
    /// transaction (sprint deletion, task moves, dependency edits). Clients
    /// replace their cached copy.
    ProjectRefreshed {
        project: PopulatedProject,
    },
}

impl WsMessage {
    pub fn project_id(&self) -> &str {
        match self {
            Self::SprintCreated { sprint } | Self::SprintUpdated { sprint } => &sprint.project,
            Self::TaskCreated { task } | Self::TaskUpdated { task } => &task.project,
            Self::TaskDeleted { project_id, .. } => project_id,
            Self::ProjectCreated { project } => &project.id,
            Self::ProjectRefreshed { project } => &project.id,
        }
    }

    /// The projection action a client caching `cached_project_id` applies to
    /// stay in sync. Changes to any other project map to `None`.
    pub fn to_action(&self, cached_project_id: &str) -> Option<ProjectAction> {
        if self.project_id() != cached_project_id {
            return None;
        }
        match self {
            Self::SprintCreated { sprint } => Some(ProjectAction::AddSprint {
                sprint: sprint.clone(),
            }),
            Self::SprintUpdated { sprint } => Some(ProjectAction::UpdateSprint {
                sprint_id: sprint.id.clone(),
                updated_sprint: sprint.clone(),
            }),
            Self::TaskCreated { task } => Some(match &task.sprint {
                Some(sprint_id) => ProjectAction::AddTaskToSprint {
                    sprint_id: sprint_id.clone(),
                    task: task.clone(),
                },
                None => ProjectAction::AddTaskToBacklog { task: task.clone() },
            }),
            Self::TaskUpdated { task } => Some(ProjectAction::UpdateTask {
                task_id: task.id.clone(),
                updated_task: task.clone(),
            }),
            Self::TaskDeleted { task_id, .. } => Some(ProjectAction::RemoveTask {
                task_id: task_id.clone(),
            }),
            Self::ProjectCreated { .. } => None,
            Self::ProjectRefreshed { project } => Some(ProjectAction::SetProject {
                project: Some(project.clone()),
            }),
        }
    }
}

// ── WebSocket handler ────────────────────────────────────────────────

/// WebSocket handler that accepts a broadcast sender directly (for use with server router).
pub async fn ws_handler_with_sender(
    ws: WebSocketUpgrade,
    tx: broadcast::Sender<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket_with_sender(socket, tx))
}

async fn handle_socket_with_sender(socket: WebSocket, tx: broadcast::Sender<String>) {
    let (sender, receiver) = socket.split();
    let rx = tx.subscribe();
    tracing::debug!("websocket client connected");
    run_socket_loop(sender, receiver, rx).await;
    tracing::debug!("websocket client disconnected");
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Combines broadcast forwarding, client message receiving, and periodic
/// ping/pong health checking into a single select loop. If no Pong is
/// received within [`PONG_TIMEOUT`] after a Ping is sent, the connection
/// is considered dead and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<String>,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagging; messages dropped");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

// ── Broadcast helper ─────────────────────────────────────────────────

/// Serialize and broadcast a WsMessage to all connected WebSocket clients.
/// Returns silently even if no clients are connected.
pub fn broadcast_message(tx: &broadcast::Sender<String>, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(json) => {
            let _ = tx.send(json);
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WsMessage");
        }
    }
}
