// SPDX-License-Identifier: GPL-3.0-or-later
pub mod handlers;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use handlers::recognize::{
    recognize, DiagnosticEntryResponse, DiagnosticsResponse, RecognizeErrorResponse,
    RecognizeForm, RecognizeResponse, TrackResponse, __path_recognize,
};
use handlers::status::{status, AdvisoryStatus, RecognizerStatus, StatusResponse, __path_status};
use mixscribe_application::AppState;
use serde::Serialize;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(Serialize, utoipa::ToSchema)]
struct HealthResponse {
    status: &'static str,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    ),
    tag = "system"
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[derive(OpenApi)]
#[openapi(
    paths(health, status, recognize),
    components(
        schemas(
            HealthResponse,
            StatusResponse,
            RecognizerStatus,
            AdvisoryStatus,
            RecognizeForm,
            RecognizeResponse,
            RecognizeErrorResponse,
            TrackResponse,
            DiagnosticsResponse,
            DiagnosticEntryResponse,
        )
    ),
    tags(
        (name = "system", description = "System health and status endpoints"),
        (name = "recognition", description = "Tracklist identification endpoints")
    ),
    info(
        title = "mixscribe API",
        version = "0.1.0",
        description = "Identify the tracks played in a DJ mix",
    )
)]
pub struct ApiDoc;

pub fn router(state: AppState) -> Router {
    let upload_limit = state.config.http.max_upload_bytes;
    info!(target: "api", upload_limit, "building router");

    let api_v1 = Router::new()
        .route("/status", get(status))
        .route("/recognize", post(recognize))
        .layer(DefaultBodyLimit::max(upload_limit));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}
