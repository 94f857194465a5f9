// SPDX-License-Identifier: GPL-3.0-or-later
use axum::{extract::State, Json};
use mixscribe_application::AppState;
use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct RecognizerStatus {
    pub id: String,
    pub available: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AdvisoryStatus {
    pub enabled: bool,
    pub available: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// `ready` when at least one recognizer is usable, `no_apis` otherwise.
    pub status: String,
    pub recognizers: Vec<RecognizerStatus>,
    pub advisory: AdvisoryStatus,
}

/// Report which recognition services and advisors are configured.
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses(
        (status = 200, description = "Service availability", body = StatusResponse)
    ),
    tag = "system"
)]
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let recognizers: Vec<RecognizerStatus> = state
        .pipeline
        .recognizers()
        .iter()
        .map(|r| RecognizerStatus {
            id: r.id().to_string(),
            available: r.is_available(),
        })
        .collect();

    let ready = recognizers.iter().any(|r| r.available);

    Json(StatusResponse {
        status: if ready { "ready" } else { "no_apis" }.to_string(),
        recognizers,
        advisory: AdvisoryStatus {
            enabled: state.config.advisory.enabled,
            available: state
                .pipeline
                .advisor()
                .is_some_and(|advisor| advisor.is_available()),
        },
    })
}
