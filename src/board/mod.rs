//! Sprint board back-end: projects, sprints and tasks.
//!
//! ## Overview
//!
//! A project owns an ordered list of sprints and a backlog of unscheduled
//! tasks. Every task lives in exactly one place: one sprint's list or its
//! project's backlog. Moves between the two, sprint deletion and dependency
//! edits happen inside one SQLite transaction each.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │          │ <─────── │    └─ api.rs  (route handlers, AppState)         │
//! └──────────┘ WebSocket│         │                                        │
//!      │                │         │ SprintService / ProjectService / ...   │
//!      │                │         v                                        │
//!      │                │  service.rs  (traits, DbBoardService)            │
//!      │                │         │                                        │
//!      │                │         │ DbHandle::call()                       │
//!      │                │         v                                        │
//!      │                │  db.rs   (BoardDb, migrations, transactions)     │
//!      │                └──────────────────────────────────────────────────┘
//!      v
//!  projection.rs  (ProjectStore: client-side cache of one populated project)
//! ```
//!
//! ## Supporting Modules
//!
//! | Module       | Responsibility                                           |
//! |--------------|----------------------------------------------------------|
//! | `models`     | Shared types: `Project`, `Sprint`, `Task`, write payloads |
//! | `ws`         | `WsMessage` change feed + `broadcast_message()` helper   |
//! | `projection` | `ProjectAction` reducer and watch-backed `ProjectStore`  |

pub mod api;
pub mod db;
pub mod models;
pub mod projection;
pub mod server;
pub mod service;
pub mod ws;
