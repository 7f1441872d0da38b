//! Health and operator endpoints

use axum::{
    Json,
    extract::{Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::Level;

use crate::SharedState;
use crate::job::JobStatus;

/// Root health check endpoint
/// Supports ?format=json for detailed JSON response
pub async fn root(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    if params.get("format").map(|s| s.as_str()) != Some("json") {
        return "vcs_gitops - healthy".into_response();
    }

    let recent = state
        .jobs
        .store()
        .get_recent_jobs(None, 100)
        .await
        .unwrap_or_default();
    let count = |status: JobStatus| recent.iter().filter(|j| j.status == status).count();

    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "workspace": state.config.workspace.id,
        "total_projects": state.config.project.len(),
        "vcs_types": state.registry.kinds().iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "jobs": {
            "queued": count(JobStatus::Queued),
            "running": count(JobStatus::Running),
            "success": count(JobStatus::Success),
            "failed": count(JobStatus::Failed),
        },
        "status": "healthy"
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    /// Minimum level: error, warn, info, debug or trace (default: info)
    pub level: Option<String>,
}

/// GET /api/logs - Recent log lines kept in memory
pub async fn get_logs(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<LogsQuery>,
) -> impl IntoResponse {
    let level = match params.level.as_deref().unwrap_or("info").parse::<Level>() {
        Ok(level) => level,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid level. Use: error, warn, info, debug, trace"})),
            )
                .into_response();
        }
    };

    let entries = match state.recent_logs.lock() {
        Ok(logs) => logs.at_least(level),
        Err(_) => Vec::new(),
    };
    Json(json!({ "logs": entries })).into_response()
}
