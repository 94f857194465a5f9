// SPDX-License-Identifier: GPL-3.0-or-later
use std::path::Path;
use std::str::FromStr;

use axum::{
    extract::{multipart::Field, multipart::MultipartError, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use mixscribe_application::{
    render, AppState, OutputFormat, PipelineError, RunConfig, UnknownFormat,
};
use mixscribe_domain::{DiagnosticEntry, Diagnostics, Track};
use mixscribe_extraction::SUPPORTED_EXTENSIONS;
use serde::Serialize;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;

/// Multipart form accepted by the recognize endpoint.
#[derive(Debug, Default, ToSchema)]
pub struct RecognizeForm {
    /// Recording to analyze: mp3, wav, flac, m4a, ogg or aac.
    #[schema(value_type = String, format = Binary)]
    pub file: Option<TempPath>,
    /// `json` (default), `markdown` or `csv`.
    pub format: Option<String>,
    pub confidence_threshold: Option<f32>,
    pub segment_length: Option<f64>,
    pub segment_overlap: Option<f64>,
    pub max_segments: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrackResponse {
    pub start_time: String,
    pub end_time: String,
    pub artist: String,
    pub title: String,
    pub confidence: f32,
    pub source: String,
}

impl From<&Track> for TrackResponse {
    fn from(track: &Track) -> Self {
        Self {
            start_time: track.start.clone(),
            end_time: track.end.clone(),
            artist: track.artist.clone(),
            title: track.title.clone(),
            confidence: track.confidence,
            source: track.source.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DiagnosticEntryResponse {
    pub segment_index: Option<usize>,
    pub recognizer: Option<String>,
    pub kind: String,
    pub message: String,
}

impl From<&DiagnosticEntry> for DiagnosticEntryResponse {
    fn from(entry: &DiagnosticEntry) -> Self {
        Self {
            segment_index: entry.segment_index,
            recognizer: entry.recognizer.clone(),
            kind: entry.kind.to_string(),
            message: entry.message.clone(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DiagnosticsResponse {
    pub segments_planned: usize,
    pub segments_attempted: usize,
    pub segments_succeeded: usize,
    pub segments_failed: usize,
    pub recognizer_calls: usize,
    pub recognizer_failures: usize,
    pub truncated: bool,
    pub cancelled: bool,
    pub error_count: usize,
    pub errors: Vec<DiagnosticEntryResponse>,
}

impl From<&Diagnostics> for DiagnosticsResponse {
    fn from(d: &Diagnostics) -> Self {
        Self {
            segments_planned: d.segments_planned,
            segments_attempted: d.segments_attempted,
            segments_succeeded: d.segments_succeeded,
            segments_failed: d.segments_failed,
            recognizer_calls: d.recognizer_calls,
            recognizer_failures: d.recognizer_failures,
            truncated: d.truncated,
            cancelled: d.cancelled,
            error_count: d.error_count,
            errors: d.entries().iter().map(DiagnosticEntryResponse::from).collect(),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecognizeResponse {
    pub success: bool,
    pub tracks: Vec<TrackResponse>,
    pub count: usize,
    pub diagnostics: DiagnosticsResponse,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecognizeErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<DiagnosticsResponse>,
}

impl RecognizeForm {
    async fn read(mut multipart: Multipart) -> Result<Self, Response> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => form.file = Some(save_upload(field).await?),
                "format" => form.format = Some(field.text().await.map_err(multipart_error)?),
                "confidence_threshold" => form.confidence_threshold = number(&name, field).await?,
                "segment_length" => form.segment_length = number(&name, field).await?,
                "segment_overlap" => form.segment_overlap = number(&name, field).await?,
                "max_segments" => form.max_segments = number(&name, field).await?,
                _ => debug!(target: "api", field = %name, "ignoring form field"),
            }
        }
        Ok(form)
    }

    fn output_format(&self) -> Result<OutputFormat, Response> {
        match self.format.as_deref().map(str::trim) {
            None | Some("") => Ok(OutputFormat::Json),
            Some(name) => name
                .parse()
                .map_err(|e: UnknownFormat| failure(StatusCode::BAD_REQUEST, e.to_string())),
        }
    }

    fn apply(&self, mut config: RunConfig) -> RunConfig {
        if let Some(threshold) = self.confidence_threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(length) = self.segment_length {
            config.segment_length = length;
        }
        if let Some(overlap) = self.segment_overlap {
            config.segment_overlap = overlap;
        }
        if self.max_segments.is_some() {
            config.max_segments = self.max_segments;
        }
        config
    }
}

fn supported_extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .filter(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Streams the upload into a temporary file named with its extension, so
/// the extractor can tell the container format. The file is removed when
/// the returned path drops.
async fn save_upload(mut field: Field<'_>) -> Result<TempPath, Response> {
    let file_name = field.file_name().unwrap_or_default().to_string();
    if file_name.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "No file selected"));
    }
    let extension = supported_extension(&file_name).ok_or_else(|| {
        failure(
            StatusCode::BAD_REQUEST,
            format!(
                "Invalid file type. Allowed: {}",
                SUPPORTED_EXTENSIONS.join(", ")
            ),
        )
    })?;

    let (file, path) = tempfile::Builder::new()
        .prefix("upload_")
        .suffix(&format!(".{}", extension))
        .tempfile()
        .map_err(internal_error)?
        .into_parts();
    let mut file = tokio::fs::File::from_std(file);

    let mut written = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        file.write_all(&chunk).await.map_err(internal_error)?;
        written += chunk.len();
    }
    file.flush().await.map_err(internal_error)?;

    debug!(target: "api", file = %file_name, bytes = written, "upload saved");
    Ok(path)
}

async fn number<T: FromStr>(name: &str, field: Field<'_>) -> Result<Option<T>, Response> {
    let text = field.text().await.map_err(multipart_error)?;
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse().map(Some).map_err(|_| {
        failure(
            StatusCode::BAD_REQUEST,
            format!("invalid {}: {}", name, text),
        )
    })
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(RecognizeErrorResponse {
            success: false,
            error: message.into(),
            diagnostics: None,
        }),
    )
        .into_response()
}

/// Oversized bodies surface here as 413.
fn multipart_error(err: MultipartError) -> Response {
    warn!(target: "api", status = err.status().as_u16(), error = %err, "rejected upload");
    failure(err.status(), err.body_text())
}

fn internal_error(err: impl std::fmt::Display) -> Response {
    error!(target: "api", error = %err, "upload could not be stored");
    failure(StatusCode::INTERNAL_SERVER_ERROR, "failed to store upload")
}

fn error_response(error: PipelineError) -> axum::response::Response {
    let status = match &error {
        PipelineError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        PipelineError::Source(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineError::NoRecognizerAvailable | PipelineError::RecognizersExhausted { .. } => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };

    let diagnostics = match &error {
        PipelineError::RecognizersExhausted { diagnostics } => {
            Some(DiagnosticsResponse::from(diagnostics.as_ref()))
        }
        _ => None,
    };

    warn!(target: "api", status = status.as_u16(), error = %error, "recognition failed");

    (
        status,
        Json(RecognizeErrorResponse {
            success: false,
            error: error.to_string(),
            diagnostics,
        }),
    )
        .into_response()
}

/// Identify the tracks in an uploaded recording.
#[utoipa::path(
    post,
    path = "/api/v1/recognize",
    request_body(content = RecognizeForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Tracklist as JSON, or as text for markdown and csv", body = RecognizeResponse),
        (status = 400, description = "Missing or unsupported upload, or invalid settings", body = RecognizeErrorResponse),
        (status = 413, description = "Upload larger than the configured limit", body = RecognizeErrorResponse),
        (status = 422, description = "Recording unreadable", body = RecognizeErrorResponse),
        (status = 503, description = "No recognition service usable", body = RecognizeErrorResponse)
    ),
    tag = "recognition"
)]
pub async fn recognize(State(state): State<AppState>, multipart: Multipart) -> Response {
    let mut form = match RecognizeForm::read(multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };
    let format = match form.output_format() {
        Ok(format) => format,
        Err(response) => return response,
    };
    let Some(upload) = form.file.take() else {
        return failure(StatusCode::BAD_REQUEST, "No file uploaded");
    };
    let config = form.apply(state.run_config());

    info!(target: "api", %format, "recognition requested");

    // A dropped connection drops this future, which aborts the run.
    let result = state
        .pipeline
        .run(&upload, &config, CancellationToken::new())
        .await;
    drop(upload);

    let report = match result {
        Ok(report) => report,
        Err(error) => return error_response(error),
    };

    if format == OutputFormat::Json {
        let tracks: Vec<TrackResponse> =
            report.tracklist.iter().map(TrackResponse::from).collect();
        return (
            StatusCode::OK,
            Json(RecognizeResponse {
                success: true,
                count: tracks.len(),
                tracks,
                diagnostics: DiagnosticsResponse::from(&report.diagnostics),
            }),
        )
            .into_response();
    }

    match render(&report.tracklist, format) {
        Ok(text) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, format.content_type())],
            text,
        )
            .into_response(),
        Err(error) => internal_error(error),
    }
}
