//! HTTP surface: webhook endpoint plus health and job inspection

use axum::{Router, routing};

use crate::SharedState;

pub mod handlers;
pub mod jobs;
pub mod webhook;

pub use handlers::{get_logs, root};
pub use jobs::{get_job, get_jobs};
pub use webhook::handle_webhook;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", routing::get(root))
        .route(
            "/hook/{workspace_id}/{project_id}/{connector_id}",
            routing::post(handle_webhook),
        )
        .route("/api/jobs", routing::get(get_jobs))
        .route("/api/jobs/{id}", routing::get(get_job))
        .route("/api/logs", routing::get(get_logs))
        .with_state(state)
}
