use axum::Router;
use axum::routing::{get, post};
use crate::state::AppState;

pub mod dto;
pub mod format;
pub mod handler;
pub mod model;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handler::submit_job))
        .route("/stats", get(handler::job_stats))
        .route("/metrics", get(handler::job_metrics))
        .route("/{id}", get(handler::get_job))
        .route("/{id}/result", get(handler::get_job_result))
        .route("/{id}/cancel", post(handler::cancel_job))
}
