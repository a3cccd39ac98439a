use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use jobs::{Job, QueueStats};
use serde_json::{Value as JsonValue, json};
use uuid::Uuid;

use crate::AppState;
use crate::auth::AuthUser;
use crate::error::ApiError;

pub async fn stats(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<QueueStats> {
    Json(state.job_queue.stats())
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Job>, ApiError> {
    state
        .job_queue
        .get_job(id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Job"))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    if !state.job_queue.cancel(id) {
        return Err(ApiError::validation(
            "Only pending or retrying jobs can be cancelled",
        ));
    }
    Ok(Json(json!({ "cancelled": true })))
}

pub async fn dead_letter(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<Vec<Job>> {
    Json(state.job_queue.dead_letter_jobs(100))
}

pub async fn retry_dead_letter(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<JsonValue>, ApiError> {
    if !state.job_queue.retry_dead_letter(id) {
        return Err(ApiError::not_found("Dead-lettered job"));
    }
    Ok(Json(json!({ "requeued": true })))
}

pub async fn clear_dead_letter(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<JsonValue> {
    let cleared = state.job_queue.clear_dead_letter();
    Json(json!({ "cleared": cleared }))
}

pub async fn scheduler_tasks(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
) -> Json<JsonValue> {
    let tasks: Vec<JsonValue> = state
        .scheduler
        .tasks()
        .into_iter()
        .map(|t| {
            json!({
                "name": t.name,
                "job_name": t.job_name,
                "enabled": t.enabled,
                "last_run": t.last_run,
                "next_run": t.next_run,
                "run_count": t.run_count,
            })
        })
        .collect();
    Json(json!({ "tasks": tasks }))
}
