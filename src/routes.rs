use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use crate::docs::ApiDoc;
use axum::extract::DefaultBodyLimit;
use axum::Router;
use crate::state::AppState;

use tower_http::cors::{Any, CorsLayer};

/// Room for multipart boundaries and headers on top of the media itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn configure_routes(state: &AppState) -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.max_upload_bytes.saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes())
        .nest("/api/v1/jobs", crate::modules::jobs::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", axum::routing::get(|| async { "ok" }))
}
