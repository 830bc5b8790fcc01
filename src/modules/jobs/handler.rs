use super::dto::{JobStatsResponse, JobStatusResponse, SubmitJobForm, SubmitJobResponse};
use super::service::JobService;
use crate::common::response::{ApiResponse, ApiSuccess};
use crate::common::upload::read_media_field;
use crate::state::AppState;
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
};
use uuid::Uuid;

/// Submit media for transcoding
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body(content = SubmitJobForm, content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "Job accepted", body = ApiResponse<SubmitJobResponse>),
        (status = 400, description = "Empty, oversized or unsupported media")
    ),
    tag = "Jobs"
)]
pub async fn submit_job(State(state): State<AppState>, mut multipart: Multipart) -> impl IntoResponse {
    let upload = match read_media_field(&mut multipart, state.config.max_upload_bytes).await {
        Ok(upload) => upload,
        Err(e) => return e.into_response(),
    };

    match JobService::submit(state, upload.data, upload.content_type.as_deref()).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job accepted"),
            StatusCode::ACCEPTED,
        )
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Get job status
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job status", body = ApiResponse<JobStatusResponse>),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs"
)]
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match JobService::status(state, id).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Download the output of a finished job
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}/result",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Transcoded media", body = Vec<u8>, content_type = "application/octet-stream"),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job not finished yet"),
        (status = 410, description = "Job was canceled"),
        (status = 422, description = "Job failed, detail in `data`")
    ),
    tag = "Jobs"
)]
pub async fn get_job_result(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match JobService::result(state, id).await {
        Ok(result) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, result.content_type)],
            result.data,
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Cancel a queued job
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job canceled", body = ApiResponse<JobStatusResponse>),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already running or finished")
    ),
    tag = "Jobs"
)]
pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match JobService::cancel(state, id).await {
        Ok(job) => ApiSuccess(
            ApiResponse::success(job, "Job canceled successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Job counts per state
#[utoipa::path(
    get,
    path = "/api/v1/jobs/stats",
    responses(
        (status = 200, description = "Job statistics", body = ApiResponse<JobStatsResponse>)
    ),
    tag = "Jobs"
)]
pub async fn job_stats(State(state): State<AppState>) -> impl IntoResponse {
    match JobService::stats(state).await {
        Ok(stats) => ApiSuccess(
            ApiResponse::success(stats, "Job statistics retrieved successfully"),
            StatusCode::OK,
        )
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// Job counts in Prometheus text format
#[utoipa::path(
    get,
    path = "/api/v1/jobs/metrics",
    responses(
        (status = 200, description = "Prometheus exposition", body = String, content_type = "text/plain")
    ),
    tag = "Jobs"
)]
pub async fn job_metrics(State(state): State<AppState>) -> impl IntoResponse {
    match JobService::stats(state).await {
        Ok(stats) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            stats.to_prometheus(),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}
