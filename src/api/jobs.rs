//! Jobs API endpoints

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::SharedState;
use crate::job::Job;

/// Query parameters for job listing
#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Filter by project id
    pub project: Option<String>,
    /// Number of items (default: 50, max: 100)
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<Job>,
    pub total: usize,
    pub limit: i64,
}

/// GET /api/jobs - Recent background jobs, newest first
pub async fn get_jobs(
    AxumState(state): AxumState<SharedState>,
    Query(params): Query<JobsQuery>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(50).clamp(1, 100);

    match state
        .jobs
        .store()
        .get_recent_jobs(params.project.as_deref(), limit)
        .await
    {
        Ok(jobs) => Json(JobsResponse {
            total: jobs.len(),
            jobs,
            limit,
        })
        .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

/// GET /api/jobs/{id} - Get a specific job by ID
pub async fn get_job(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.jobs.store().get_job(&id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Job not found"})),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}
